use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrpError {
    #[error("initialization failed for {worker}: {reason}")]
    Initialization { worker: String, reason: String },

    #[error("processing failed for signal {signal_id}: {reason}")]
    Processing { signal_id: String, reason: String },

    #[error("invalid {field} '{value}': {reason}")]
    Validation {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("timed out after {millis}ms waiting for {what}")]
    Timeout { what: String, millis: u64 },

    #[error("worker pool is closed")]
    PoolClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PrpError {
    pub fn validation(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PrpError::Validation {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrpError>;
