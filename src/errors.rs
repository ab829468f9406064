use thiserror::Error;

/// Errors the matching core can raise. The session facade (`facade.rs`)
/// catches every one of these at its boundary and turns it into a Reject
/// execution report — nothing here is fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("order {id} not found")]
    NotFound { id: u64 },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("order {id} already exists")]
    DuplicateId { id: u64 },

    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },
}

pub type BookResult<T> = Result<T, BookError>;
