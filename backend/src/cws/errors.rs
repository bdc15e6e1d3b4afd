use thiserror::Error;

use crate::error::TaskError;

#[derive(Error, Debug)]
pub enum CwsError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cws returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("invalid response from cws: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CwsError {
    /// 4xx means the request itself is malformed and will never succeed;
    /// everything else is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            CwsError::Http(_) => true,
            CwsError::Status { code, .. } => !(400..500).contains(code),
            CwsError::Decode(_) => false,
        }
    }
}

impl From<CwsError> for TaskError {
    fn from(e: CwsError) -> Self {
        match e {
            CwsError::Http(inner) => TaskError::TransientCws(inner.to_string()),
            CwsError::Status { code, message } if (400..500).contains(&code) => {
                TaskError::PermanentCws { code, message }
            }
            CwsError::Status { code, message } => {
                TaskError::TransientCws(format!("{code}: {message}"))
            }
            CwsError::Decode(inner) => TaskError::Internal(inner.to_string()),
        }
    }
}
