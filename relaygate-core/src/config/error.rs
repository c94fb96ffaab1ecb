//! Errors raised while loading and validating a gateway config

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read gateway config '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// `line`/`column` are 1-based and only known for YAML and JSON syntax errors
    #[error("cannot parse gateway config '{path}'{}: {message}", location(.line, .column))]
    ParseError {
        path: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("environment variable '{var}' referenced by the config is not set")]
    EnvVarNotFound { var: String },

    #[error("invalid interpolation pattern: {0}")]
    Pattern(#[from] regex::Error),
}

fn location(line: &Option<usize>, column: &Option<usize>) -> String {
    match (*line, *column) {
        (Some(line), Some(column)) => format!(" at {}:{}", line, column),
        (Some(line), None) => format!(" at line {}", line),
        _ => String::new(),
    }
}

/// A rejected config field, addressed by its path (e.g. `targets[0].custom_host`)
#[derive(Debug, Error)]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
    pub hint: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid gateway config at '{}': {}", self.field_path, self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("missing")]
    Missing,

    #[error("target name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("no target is named '{0}'")]
    UnknownTarget(String),

    #[error("{0}")]
    OutOfRange(String),

    #[error("not an http(s) URL: {0}")]
    UnsupportedUrl(String),

    #[error("{0}")]
    Malformed(String),
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn missing(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::Missing)
    }

    pub fn duplicate_name(field_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::DuplicateName(name.into()))
    }

    pub fn unknown_target(field_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::UnknownTarget(name.into()))
    }

    pub fn out_of_range(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::OutOfRange(message.into()))
    }

    pub fn unsupported_url(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::UnsupportedUrl(message.into()))
    }

    pub fn malformed(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::Malformed(message.into()))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_location_rendering() {
        let err = ConfigError::ParseError {
            path: "gateway.yaml".into(),
            line: Some(3),
            column: Some(7),
            message: "unexpected ']'".into(),
        };
        assert_eq!(err.to_string(), "cannot parse gateway config 'gateway.yaml' at 3:7: unexpected ']'");

        let err = ConfigError::ParseError {
            path: "<inline>".into(),
            line: None,
            column: None,
            message: "bad".into(),
        };
        assert_eq!(err.to_string(), "cannot parse gateway config '<inline>': bad");
    }

    #[test]
    fn test_validation_error_names_field_and_hint() {
        let err = ValidationError::missing("targets").with_hint("configure at least one target");
        assert_eq!(
            err.to_string(),
            "invalid gateway config at 'targets': missing (configure at least one target)"
        );
        assert!(matches!(
            ValidationError::unknown_target("strategy.default", "eu").kind,
            ValidationErrorKind::UnknownTarget(ref name) if name == "eu"
        ));
    }
}
