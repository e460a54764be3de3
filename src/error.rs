use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("no usable Google access token")]
    AuthRequired,
    #[error("{service} unavailable: {detail}")]
    UpstreamUnavailable { service: &'static str, detail: String },
    #[error("model output was not the expected JSON shape: {0}")]
    MalformedModelOutput(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn upstream(service: &'static str, detail: impl Into<String>) -> Self {
        PipelineError::UpstreamUnavailable {
            service,
            detail: detail.into(),
        }
    }

    /// Text that is safe to put in front of the user.
    pub fn message(&self) -> String {
        match self {
            PipelineError::Validation(msg) => msg.clone(),
            PipelineError::AuthRequired => {
                "Google is not connected. Run /connect to link Calendar and Tasks.".to_string()
            }
            PipelineError::UpstreamUnavailable { service, .. } => {
                format!("Sorry, I'm having trouble connecting to {service}.")
            }
            PipelineError::MalformedModelOutput(_) => {
                "The assistant replied in an unexpected format.".to_string()
            }
            PipelineError::Storage(_) => "Could not save your meal records.".to_string(),
            PipelineError::Config(msg) => msg.clone(),
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}
