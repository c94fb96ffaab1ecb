//! The operations the gateway exposes downstream

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A canonical gateway function.
///
/// Streaming is not a separate function: chat, completion and model-response
/// creation become streaming calls when the body carries `"stream": true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Function {
    ChatComplete,
    Complete,
    Embed,
    ImageGenerate,
    CreateSpeech,
    CreateTranscription,
    CreateTranslation,
    UploadFile,
    ListFiles,
    RetrieveFile,
    RetrieveFileContent,
    DeleteFile,
    CreateBatch,
    RetrieveBatch,
    CancelBatch,
    ListBatches,
    GetBatchOutput,
    CreateFinetune,
    RetrieveFinetune,
    ListFinetunes,
    CancelFinetune,
    CreateModelResponse,
    GetModelResponse,
    DeleteModelResponse,
    ListResponseInputItems,
    Proxy,
    Realtime,
}

impl Function {
    /// HTTP method the canonical route uses
    pub fn method(&self) -> Method {
        match self {
            Function::ListFiles
            | Function::RetrieveFile
            | Function::RetrieveFileContent
            | Function::RetrieveBatch
            | Function::ListBatches
            | Function::GetBatchOutput
            | Function::RetrieveFinetune
            | Function::ListFinetunes
            | Function::GetModelResponse
            | Function::ListResponseInputItems
            | Function::Realtime => Method::GET,
            Function::DeleteFile | Function::DeleteModelResponse => Method::DELETE,
            _ => Method::POST,
        }
    }

    /// Functions whose body carries a `messages` array
    pub fn is_chat_capable(&self) -> bool {
        matches!(self, Function::ChatComplete)
    }

    /// Functions that may be served as a server-sent event stream
    pub fn is_streamable(&self) -> bool {
        matches!(
            self,
            Function::ChatComplete | Function::Complete | Function::CreateModelResponse
        )
    }

    /// Functions that never carry a request body
    pub fn is_bodyless(&self) -> bool {
        matches!(self.method(), Method::GET | Method::DELETE)
    }

    /// Resolve a canonical route to its function.
    ///
    /// `path` is the downstream path without query string, with or without a
    /// leading `/v1`. Unknown routes resolve to [`Function::Proxy`].
    pub fn from_route(method: &Method, path: &str) -> Function {
        let trimmed = path.trim_end_matches('/');
        let trimmed = trimmed.strip_prefix("/v1").unwrap_or(trimmed);
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

        match (method.as_str(), segments.as_slice()) {
            ("POST", ["chat", "completions"]) => Function::ChatComplete,
            ("POST", ["completions"]) => Function::Complete,
            ("POST", ["embeddings"]) => Function::Embed,
            ("POST", ["images", "generations"]) => Function::ImageGenerate,
            ("POST", ["audio", "speech"]) => Function::CreateSpeech,
            ("POST", ["audio", "transcriptions"]) => Function::CreateTranscription,
            ("POST", ["audio", "translations"]) => Function::CreateTranslation,
            ("POST", ["files"]) => Function::UploadFile,
            ("GET", ["files"]) => Function::ListFiles,
            ("GET", ["files", _]) => Function::RetrieveFile,
            ("GET", ["files", _, "content"]) => Function::RetrieveFileContent,
            ("DELETE", ["files", _]) => Function::DeleteFile,
            ("POST", ["batches"]) => Function::CreateBatch,
            ("GET", ["batches"]) => Function::ListBatches,
            ("GET", ["batches", _]) => Function::RetrieveBatch,
            ("POST", ["batches", _, "cancel"]) => Function::CancelBatch,
            ("GET", ["batches", _, "output"]) => Function::GetBatchOutput,
            ("POST", ["fine_tuning", "jobs"]) => Function::CreateFinetune,
            ("GET", ["fine_tuning", "jobs"]) => Function::ListFinetunes,
            ("GET", ["fine_tuning", "jobs", _]) => Function::RetrieveFinetune,
            ("POST", ["fine_tuning", "jobs", _, "cancel"]) => Function::CancelFinetune,
            ("POST", ["responses"]) => Function::CreateModelResponse,
            ("GET", ["responses", _]) => Function::GetModelResponse,
            ("DELETE", ["responses", _]) => Function::DeleteModelResponse,
            ("GET", ["responses", _, "input_items"]) => Function::ListResponseInputItems,
            ("GET", ["realtime"]) => Function::Realtime,
            _ => Function::Proxy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Function::ChatComplete => "chatComplete",
            Function::Complete => "complete",
            Function::Embed => "embed",
            Function::ImageGenerate => "imageGenerate",
            Function::CreateSpeech => "createSpeech",
            Function::CreateTranscription => "createTranscription",
            Function::CreateTranslation => "createTranslation",
            Function::UploadFile => "uploadFile",
            Function::ListFiles => "listFiles",
            Function::RetrieveFile => "retrieveFile",
            Function::RetrieveFileContent => "retrieveFileContent",
            Function::DeleteFile => "deleteFile",
            Function::CreateBatch => "createBatch",
            Function::RetrieveBatch => "retrieveBatch",
            Function::CancelBatch => "cancelBatch",
            Function::ListBatches => "listBatches",
            Function::GetBatchOutput => "getBatchOutput",
            Function::CreateFinetune => "createFinetune",
            Function::RetrieveFinetune => "retrieveFinetune",
            Function::ListFinetunes => "listFinetunes",
            Function::CancelFinetune => "cancelFinetune",
            Function::CreateModelResponse => "createModelResponse",
            Function::GetModelResponse => "getModelResponse",
            Function::DeleteModelResponse => "deleteModelResponse",
            Function::ListResponseInputItems => "listResponseInputItems",
            Function::Proxy => "proxy",
            Function::Realtime => "realtime",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
