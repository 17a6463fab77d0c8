use transport::types::ReturnCode;

pub type RequestResult<T> = Result<T, RequestError>;

/// Failure of one agent operation.
///
/// This is the only error type that crosses the agent boundary; the
/// endpoint maps it onto the wire [`ReturnCode`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    /// Live VM state was needed while no pause was in effect.
    #[error("the VM is not paused")]
    NotPaused,

    /// Malformed input; nothing was changed.
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// The VM misbehaved underneath us.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl RequestError {
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        RequestError::InvalidParameter {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        RequestError::Internal {
            reason: reason.into(),
        }
    }

    pub fn return_code(&self) -> ReturnCode {
        match self {
            RequestError::NotPaused => ReturnCode::InvalidNotPaused,
            RequestError::InvalidParameter { .. } => ReturnCode::InvalidParameter,
            RequestError::Internal { .. } => ReturnCode::ErrorInternal,
        }
    }
}
