//! Store and query errors.
//!
//! Queries are checked against the realm's schema before they run, so a
//! typo in a type or field name is reported instead of quietly matching
//! nothing.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The `on` or `type` reference doesn't resolve to a card.
    #[error("unknown card type '{card}': {reason}")]
    UnknownType { card: String, reason: String },

    /// A filter or sort path names a field the card doesn't have.
    #[error("card '{card}' has no field '{path}'")]
    UnknownField { card: String, path: String },

    /// Sorting needs one value per card.
    #[error("cannot sort by '{path}': it goes through a plural field")]
    PluralSort { path: String },

    /// The query itself is malformed.
    #[error("invalid query: {0}")]
    Invalid(String),
}

/// Failures reading or writing the index store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupted data: {0}")]
    Corrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_messages() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(StoreError::from(json).to_string().starts_with("JSON column error"));
        assert_eq!(
            StoreError::Corrupted("bad row".into()).to_string(),
            "Corrupted data: bad row"
        );
    }
}
