use thiserror::Error;

/// Normalized failure taxonomy for chunk processing.
///
/// Workers never let raw errors escape their task: every failure is mapped
/// into one of these variants and reported to the scheduler, which decides
/// between retry and permanent failure based on `is_retriable`.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("guardian credentials missing or expired: {0}")]
    CredentialsExpired(String),

    #[error("message bus unavailable: {0}")]
    TransientBus(String),

    #[error("cryptographic service unavailable: {0}")]
    TransientCws(String),

    #[error("store unavailable: {0}")]
    TransientStore(String),

    #[error("cryptographic service rejected request ({code}): {message}")]
    PermanentCws { code: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Whether the scheduler may re-queue the chunk after backoff.
    ///
    /// `Internal` is retriable: unknown failures get up to the retry budget
    /// before the chunk is permanently failed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TaskError::TransientBus(_)
                | TaskError::TransientCws(_)
                | TaskError::TransientStore(_)
                | TaskError::Internal(_)
        )
    }

    /// Stable short code used in worker logs and job error messages.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::InvalidInput(_) => "INVALID_INPUT",
            TaskError::CredentialsExpired(_) => "CREDENTIALS_EXPIRED",
            TaskError::TransientBus(_) => "TRANSIENT_BUS",
            TaskError::TransientCws(_) => "TRANSIENT_CWS",
            TaskError::TransientStore(_) => "TRANSIENT_STORE",
            TaskError::PermanentCws { .. } => "PERMANENT_CWS",
            TaskError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_variants_are_retriable() {
        assert!(TaskError::TransientBus("x".into()).is_retriable());
        assert!(TaskError::TransientCws("x".into()).is_retriable());
        assert!(TaskError::TransientStore("x".into()).is_retriable());
        assert!(TaskError::Internal("x".into()).is_retriable());
    }

    #[test]
    fn permanent_variants_are_not_retriable() {
        assert!(!TaskError::InvalidInput("x".into()).is_retriable());
        assert!(!TaskError::CredentialsExpired("x".into()).is_retriable());
        assert!(
            !TaskError::PermanentCws {
                code: 400,
                message: "bad".into()
            }
            .is_retriable()
        );
    }
}
