//! Error types for the explorer core
//!
//! Document problems are never errors: they are accumulated as
//! [`Diagnostic`](crate::diagnostic::Diagnostic)s next to a best-effort
//! [`Program`](crate::Program). The variants here are reserved for defects
//! in code-supplied inputs, chiefly the migration set, which must block
//! start-up rather than degrade.

use thiserror::Error;

/// Explorer core error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A migration still applies to its own output
    #[error("Migration cycle: '{id}' still applies after running on {witness}")]
    MigrationCycle { id: String, witness: String },

    /// A migration witness that the migration itself does not accept
    #[error("Invalid witness for migration '{id}': {witness} does not satisfy applies_to")]
    InvalidWitness { id: String, witness: String },

    /// Two migrations registered under one id
    #[error("Duplicate migration id '{0}'")]
    DuplicateMigration(String),

    /// A declarative migration row that cannot be turned into a migration
    #[error("Invalid migration at {position}: {message}")]
    MigrationSpec { position: String, message: String },

    /// Reading a document or migration file failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type alias for explorer operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_migration() {
        let err = Error::MigrationCycle {
            id: "flip".into(),
            witness: "a=1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Migration cycle: 'flip' still applies after running on a=1"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(ref msg) if msg.contains("gone")));
    }
}
