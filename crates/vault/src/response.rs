use crate::error::{ErrorKind, VaultError};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Tagged result handed to the UI layer. Only the error kind and its fixed
/// message cross this boundary; diagnostic detail stays in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> VaultResponse<T> {
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(kind: ErrorKind) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind,
                message: kind.message().to_string(),
            }),
        }
    }
}

impl<T> From<Result<T, VaultError>> for VaultResponse<T> {
    fn from(result: Result<T, VaultError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                debug!(error = %e, "vault call failed");
                Self::err(e.kind())
            }
        }
    }
}
