use serde::Deserialize;
use thiserror::Error;

/// Storage failures, classified so callers can tell a lost race from a broken backend.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Exclusion constraint violated: {0}")]
    ExclusionViolation(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    /// A conditional write matched no row in the expected state.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DatabaseError {
    /// True for outcomes produced by a concurrent writer winning, which a client may retry.
    pub fn is_write_conflict(&self) -> bool {
        matches!(
            self,
            DatabaseError::UniqueViolation(_)
                | DatabaseError::ExclusionViolation(_)
                | DatabaseError::SerializationFailure(_)
                | DatabaseError::PreconditionFailed(_)
        )
    }
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Map an unsuccessful PostgREST response to a [`DatabaseError`].
pub fn classify_response(status: u16, body: &str) -> DatabaseError {
    let parsed: Option<PostgrestError> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|p| p.code.clone()).unwrap_or_default();
    let message = parsed
        .as_ref()
        .and_then(|p| p.message.clone().or_else(|| p.details.clone()))
        .unwrap_or_else(|| body.to_string());

    match code.as_str() {
        "23505" => return DatabaseError::UniqueViolation(message),
        "23P01" => return DatabaseError::ExclusionViolation(message),
        "40001" | "40P01" => return DatabaseError::SerializationFailure(message),
        "PGRST116" => return DatabaseError::NotFound(message),
        "P0001" if message.starts_with("precondition_failed") => {
            return DatabaseError::PreconditionFailed(message)
        }
        _ => {}
    }

    match status {
        401 | 403 => DatabaseError::Auth(message),
        404 => DatabaseError::NotFound(message),
        409 => DatabaseError::UniqueViolation(message),
        _ => DatabaseError::Api { status, message },
    }
}
