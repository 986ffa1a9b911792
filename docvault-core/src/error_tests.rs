/*!
Tests for error handling and error types.
*/

#[cfg(test)]
mod tests {
    use crate::error::VaultError;
    use crate::metadata::BackupKind;
    use crate::registry::OperationKind;
    use docvault_retry::RetryableError;
    use std::io;

    #[test]
    fn test_vault_error_display() {
        let error = VaultError::compression("bad gzip header");
        assert_eq!(error.to_string(), "Compression error: bad gzip header");

        let error = VaultError::storage("disk full");
        assert_eq!(error.to_string(), "Storage error: disk full");

        let error = VaultError::NotFound("full_1".to_string());
        assert_eq!(error.to_string(), "Backup not found: full_1");
    }

    #[test]
    fn test_conflict_names_both_operations() {
        let error = VaultError::Conflict {
            requested: OperationKind::Recovery,
            active: OperationKind::Backup(BackupKind::Full),
        };
        let message = error.to_string();

        assert!(message.contains("recovery"));
        assert!(message.contains("full backup"));
    }

    #[test]
    fn test_validation_joins_issues() {
        let error = VaultError::Validation {
            target: "full_1".to_string(),
            issues: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(error.to_string(), "Validation failed for full_1: first; second");
        assert!(error.is_precondition());
    }

    #[test]
    fn test_backup_failed_wraps_cause() {
        let error = VaultError::BackupFailed {
            backup_id: "full_42".to_string(),
            collections_captured: 2,
            source: Box::new(VaultError::storage("store offline")),
        };
        let message = error.to_string();

        assert!(message.contains("full_42"));
        assert!(message.contains("2 collection(s)"));
        assert!(message.contains("store offline"));
        assert!(std::error::Error::source(&error).is_some());
        assert!(!error.is_precondition());
    }

    #[test]
    fn test_vault_error_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let vault_error = VaultError::from(io_error);

        match vault_error {
            VaultError::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_vault_error_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let vault_error = VaultError::from(json_error);

        match vault_error {
            VaultError::Json(_) => {}
            _ => panic!("Expected Json error variant"),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(VaultError::unavailable("connection reset by peer").is_transient());
        assert!(!VaultError::storage("bucket does not exist").is_transient());
        assert!(VaultError::from(io::Error::new(io::ErrorKind::TimedOut, "slow")).is_transient());
        assert!(!VaultError::from(io::Error::new(io::ErrorKind::PermissionDenied, "no")).is_transient());
        assert!(!VaultError::corrupt("full_1", "truncated").is_transient());
        assert!(VaultError::NotFound("x".to_string()).is_permanent());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VaultError>();
        assert_sync::<VaultError>();
    }
}
