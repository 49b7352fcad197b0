use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),
}

/// Failures that abort a document import as a whole.
///
/// Individual malformed node entries never produce one of these; they are
/// skipped and counted instead.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document must be a sequence of row entries")]
    NotASequence,

    #[error("row entry {index} is malformed: {reason}")]
    InvalidRow { index: usize, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("relay connection is closed")]
    Disconnected,

    #[error("nothing to send: no {0} yet")]
    MissingInput(&'static str),

    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error(transparent)]
    Prompt(#[from] crate::prompt::PromptError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
}
