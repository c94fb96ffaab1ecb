//! Routing strategies for target selection and fallback
//!
//! The router picks target(s) according to the config's strategy and hands each
//! one to a [`TargetDispatcher`]. Every error is turned into a canonical
//! envelope here, so callers always receive a response.

use crate::config::{GatewayConfig, StrategyMode};
use crate::error::GatewayError;
use crate::protocol::request::{CanonicalRequest, JsonMap};
use crate::protocol::response::GatewayResponse;
use crate::providers::conditional::ConditionalRouter;
use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Executes one target of a config
#[async_trait]
pub trait TargetDispatcher: Send + Sync {
    /// Dispatch `request` to `config.targets[index]`
    async fn dispatch(
        &self,
        config: &GatewayConfig,
        index: usize,
        request: &CanonicalRequest,
        deadline: Option<Instant>,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// Selects targets per strategy and invokes the dispatcher
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyRouter;

impl StrategyRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route a request; never fails, errors become canonical envelopes
    pub async fn route(
        &self,
        config: &GatewayConfig,
        request: &CanonicalRequest,
        dispatcher: &dyn TargetDispatcher,
    ) -> GatewayResponse {
        let deadline = config
            .deadline_ms
            .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)));

        let mut response = match config.strategy.mode {
            StrategyMode::Single => self.dispatch_one(config, 0, request, dispatcher, deadline).await,
            StrategyMode::Fallback => self.fallback(config, request, dispatcher, deadline).await,
            StrategyMode::Loadbalance => {
                let index = {
                    let weights: Vec<f64> =
                        config.targets.iter().map(|t| t.effective_weight()).collect();
                    let mut rng = rand::thread_rng();
                    pick_weighted(&weights, &mut rng)
                };
                debug!("Load balancer selected target {}", index);
                self.dispatch_one(config, index, request, dispatcher, deadline).await
            }
            StrategyMode::Conditional => {
                let params = request.json_body().cloned().unwrap_or_else(JsonMap::new);
                match ConditionalRouter::new(config).resolve(&params) {
                    Ok(index) => {
                        debug!("Conditional routing selected target {}", index);
                        self.dispatch_one(config, index, request, dispatcher, deadline).await
                    }
                    Err(e) => {
                        warn!("Conditional routing failed: {}", e);
                        e.into_response(None)
                    }
                }
            }
        };

        response.apply_meta_headers();
        response
    }

    async fn dispatch_one(
        &self,
        config: &GatewayConfig,
        index: usize,
        request: &CanonicalRequest,
        dispatcher: &dyn TargetDispatcher,
        deadline: Option<Instant>,
    ) -> GatewayResponse {
        let Some(target) = config.targets.get(index) else {
            return GatewayError::Routing(format!("no target at index {}", index)).into_response(None);
        };

        let mut response = match dispatcher.dispatch(config, index, request, deadline).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Dispatch to target '{}' failed: {}", target.label(), e);
                e.into_response(Some(&target.provider))
            }
        };
        response.meta.last_used_option_index = Some(index);
        response
    }

    async fn fallback(
        &self,
        config: &GatewayConfig,
        request: &CanonicalRequest,
        dispatcher: &dyn TargetDispatcher,
        deadline: Option<Instant>,
    ) -> GatewayResponse {
        let escalate = &config.strategy.on_status_codes;
        let mut last = None;

        for index in 0..config.targets.len() {
            if index > 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Deadline reached, not trying fallback target {}", index);
                break;
            }

            let response = self.dispatch_one(config, index, request, dispatcher, deadline).await;
            if response.meta.gateway_exception {
                warn!("Gateway exception on target {}, stopping fallback", index);
                return response;
            }
            if should_stop_fallback(&response, escalate) {
                if index > 0 {
                    info!("Fallback target {} succeeded", index);
                }
                return response;
            }

            debug!(
                "Target {} returned {}, trying next target",
                index, response.status
            );
            last = Some(response);
        }

        last.unwrap_or_else(|| {
            GatewayError::Routing("fallback strategy has no targets".to_string()).into_response(None)
        })
    }
}

/// Fallback stops at the first response that is ok and not listed for escalation
pub fn should_stop_fallback(response: &GatewayResponse, on_status_codes: &[u16]) -> bool {
    response.status.is_success() && !on_status_codes.contains(&response.status.as_u16())
}

/// Pick an index with probability `weight_i / Σweights`.
///
/// Degenerate weights (empty, non-finite or non-positive total) pick index 0.
pub fn pick_weighted<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || !total.is_finite() || total <= 0.0 {
        return 0;
    }
    select_weighted(weights, rng.gen_range(0.0..total))
}

/// First index whose cumulative weight exceeds `draw`, for `draw` in `[0, Σweights)`
pub fn select_weighted(weights: &[f64], draw: f64) -> usize {
    let mut cumulative = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if cumulative > draw {
            return index;
        }
    }
    weights.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StrategyConfig, Target};
    use crate::protocol::function::Function;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a scripted status per target and records the call order
    struct Scripted {
        statuses: Vec<u16>,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TargetDispatcher for Scripted {
        async fn dispatch(
            &self,
            _config: &GatewayConfig,
            index: usize,
            _request: &CanonicalRequest,
            _deadline: Option<Instant>,
        ) -> Result<GatewayResponse, GatewayError> {
            self.calls.lock().unwrap().push(index);
            match self.statuses[index] {
                0 => Err(GatewayError::Transport {
                    provider: "p".into(),
                    message: "refused".into(),
                }),
                status => Ok(GatewayResponse::json(
                    StatusCode::from_u16(status).unwrap(),
                    json!({"target": index}),
                )),
            }
        }
    }

    fn scripted(statuses: &[u16]) -> Scripted {
        Scripted {
            statuses: statuses.to_vec(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn fallback_config(n: usize, escalate: Vec<u16>) -> GatewayConfig {
        GatewayConfig::single(Target::new("openai"))
            .with_targets((0..n).map(|_| Target::new("openai")).collect())
            .with_strategy(StrategyConfig::new(StrategyMode::Fallback).with_on_status_codes(escalate))
    }

    fn request() -> CanonicalRequest {
        CanonicalRequest::json(Function::ChatComplete, "/v1/chat/completions", json!({})).unwrap()
    }

    #[test]
    fn test_select_weighted_boundaries() {
        let weights = [1.0, 2.0, 1.0];
        assert_eq!(select_weighted(&weights, 0.0), 0);
        assert_eq!(select_weighted(&weights, 0.99), 0);
        assert_eq!(select_weighted(&weights, 1.0), 1);
        assert_eq!(select_weighted(&weights, 2.99), 1);
        assert_eq!(select_weighted(&weights, 3.5), 2);
    }

    #[test]
    fn test_degenerate_weights_pick_first_target() {
        let mut rng = rand::thread_rng();
        assert_eq!(pick_weighted(&[f64::INFINITY, 1.0], &mut rng), 0);
        assert_eq!(pick_weighted(&[f64::MAX, f64::MAX], &mut rng), 0);
        assert_eq!(pick_weighted(&[f64::NAN, 1.0], &mut rng), 0);
        assert_eq!(pick_weighted(&[0.0, 0.0], &mut rng), 0);
        assert_eq!(pick_weighted(&[], &mut rng), 0);
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let weights = [0.0, 1.0];
        assert_eq!(select_weighted(&weights, 0.0), 1);
    }

    #[tokio::test]
    async fn test_fallback_stops_at_first_ok() {
        let dispatcher = scripted(&[429, 200, 200]);
        let config = fallback_config(3, vec![]);
        let response = StrategyRouter::new().route(&config, &request(), &dispatcher).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json_body().unwrap()["target"], 1);
        assert_eq!(*dispatcher.calls.lock().unwrap(), vec![0, 1]);
        assert_eq!(response.headers["x-relaygate-last-used-option-index"], "1");
    }

    #[tokio::test]
    async fn test_fallback_escalates_listed_ok_status() {
        let dispatcher = scripted(&[202, 200]);
        let config = fallback_config(2, vec![202]);
        let response = StrategyRouter::new().route(&config, &request(), &dispatcher).await;
        assert_eq!(response.json_body().unwrap()["target"], 1);
    }

    #[tokio::test]
    async fn test_fallback_returns_last_when_all_fail() {
        let dispatcher = scripted(&[500, 503]);
        let config = fallback_config(2, vec![]);
        let response = StrategyRouter::new().route(&config, &request(), &dispatcher).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_gateway_exception_is_hard_stop() {
        let dispatcher = scripted(&[0, 200]);
        let config = fallback_config(2, vec![]);
        let response = StrategyRouter::new().route(&config, &request(), &dispatcher).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers["x-relaygate-gateway-exception"], "true");
        assert_eq!(*dispatcher.calls.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_conditional_failure_is_400() {
        let dispatcher = scripted(&[200]);
        let mut strategy = StrategyConfig::new(StrategyMode::Conditional);
        strategy.conditions = vec![crate::config::ConditionRule {
            query: json!({"metadata.tier": "pro"}).as_object().cloned().unwrap(),
            then: "a".into(),
        }];
        let config = GatewayConfig::single(Target::new("openai").with_name("a")).with_strategy(strategy);
        let response = StrategyRouter::new().route(&config, &request(), &dispatcher).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(dispatcher.calls.lock().unwrap().is_empty());
    }
}
