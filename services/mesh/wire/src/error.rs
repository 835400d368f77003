//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Payload is not a JSON object of the expected shape
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required by the message kind is absent
    #[error("missing field `{field}` in {kind} message")]
    MissingField {
        /// Message kind being decoded
        kind: &'static str,
        /// Name of the absent field
        field: &'static str,
    },
}
