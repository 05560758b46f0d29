//! Content Updater Library
//!
//! Keeps a large game installation in sync with a versioned manifest.
//! Files are verified by content digest and brought up to date with full
//! downloads or binary delta patches; interrupted sessions are detected on
//! the next run and recovered from restore points.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(constants::files::LOCK_FILE_NAME, "update.lock");
        assert!(constants::USER_AGENT.starts_with("Content-Updater"));
    }

    #[test]
    fn test_error_types() {
        let app_error: AppError = errors::BackupError::NotFound {
            name: "missing.zip".to_string(),
        }
        .into();

        assert_eq!(app_error.category(), "backup");
        assert!(!app_error.is_recoverable());
    }
}
