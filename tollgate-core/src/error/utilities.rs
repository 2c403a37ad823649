use crate::{Error, error::StorageError};

/// Extension trait for results that decode or encode records kept in the
/// counter store.
///
/// ```rust,ignore
/// use tollgate_core::error::utilities::StorageResultExt;
///
/// serde_json::from_str::<Record>(&raw).map_malformed_err("2fa_user")?;
/// ```
pub trait StorageResultExt<T> {
    /// Convert a (de)serialization failure into a malformed-record error
    fn map_malformed_err(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> StorageResultExt<T> for Result<T, E> {
    fn map_malformed_err(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Malformed(format!("{context}: {e}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_malformed_err() {
        let parsed = serde_json::from_str::<u32>("not-json").map_malformed_err("lockout");
        match parsed.unwrap_err() {
            Error::Storage(StorageError::Malformed(msg)) => assert!(msg.starts_with("lockout: ")),
            _ => panic!("Expected malformed record error"),
        }
    }

    #[test]
    fn test_map_malformed_err_passes_ok_through() {
        let parsed = serde_json::from_str::<u32>("7").map_malformed_err("lockout");
        assert_eq!(parsed.unwrap(), 7);
    }
}
