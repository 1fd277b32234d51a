use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected: {0}")]
    Unexpected(String),
}

impl DomainError {
    pub fn user_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "User",
            field: "name",
            value: name.into(),
        }
    }

    /// Errors that describe the request itself. Retrying will not change the
    /// outcome, so they are reported back to the caller.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::AlreadyExists(_) | Self::NotFound { .. }
        )
    }

    /// Whether this error is likely transient (deadline, lost connection)
    /// and the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }

    /// Short machine-readable tag, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::AlreadyExists(_) => "already_exists",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

impl From<validator::ValidationErrors> for DomainError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(crate::support::validations::describe(&errors))
    }
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics exporter error: {0}")]
    Metrics(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Infra(#[from] InfraError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Receiver(#[from] crate::application::ReceiverError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_transient_are_disjoint() {
        let all = [
            DomainError::user_not_found("ivan"),
            DomainError::Validation("bad".into()),
            DomainError::AlreadyExists("ivan".into()),
            DomainError::Timeout("store".into()),
            DomainError::Unavailable("db".into()),
            DomainError::Unexpected("boom".into()),
        ];
        for err in &all {
            assert!(!(err.is_terminal() && err.is_transient()), "{err}");
        }
        assert!(!DomainError::Unexpected("boom".into()).is_terminal());
        assert!(!DomainError::Unexpected("boom".into()).is_transient());
    }

    #[test]
    fn not_found_message_names_the_user() {
        let err = DomainError::user_not_found("Ivan");
        assert_eq!(err.to_string(), "Not found: User with name=Ivan");
        assert_eq!(err.kind(), "not_found");
    }
}
