//! Error types for the mailer.

use crate::templates::SUPPORTED_TEMPLATE_TYPES;
use thiserror::Error;

/// Opaque error produced by a collaborator (provider client, MIME composer).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for mailer operations.
pub type EmailResult<T> = Result<T, EmailError>;

/// Errors that can occur while preparing or sending an email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// Unsupported provider id or invalid provider options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Requested template is not in the cache
    #[error("{name} not found on directory. Verify the path and the supported types [{supported}]", supported = SUPPORTED_TEMPLATE_TYPES)]
    TemplateNotFound { name: String },

    /// Template engine or MJML converter failure
    #[error("Template error: {0}")]
    Template(String),

    /// Template directory or attachment read failure
    #[error(transparent)]
    Filesystem(#[from] std::io::Error),

    /// Raw MIME assembly failed, nothing was sent
    #[error("MIME composition failed: {0}")]
    Composition(#[source] BoxError),

    /// Error reported by the provider client, unchanged
    #[error("Provider error: {0}")]
    Provider(#[source] BoxError),
}

impl EmailError {
    /// Downcast the wrapped provider or composer error.
    pub fn downcast_source<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Composition(err) | Self::Provider(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_not_found_lists_supported_types() {
        let err = EmailError::TemplateNotFound {
            name: "missing.hbs".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("missing.hbs"));
        assert!(message.contains(".hbs"));
        assert!(message.contains(".handlebars"));
        assert!(message.contains(".mjml"));
    }

    #[test]
    fn test_io_errors_stay_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = EmailError::from(io);

        assert!(matches!(err, EmailError::Filesystem(_)));
        assert_eq!(err.to_string(), "no such file");
    }

    #[test]
    fn test_downcast_source() {
        let source: BoxError = Box::new(std::fmt::Error);
        let err = EmailError::Provider(source);

        assert!(err.downcast_source::<std::fmt::Error>().is_some());
        assert!(err.downcast_source::<std::io::Error>().is_none());
    }
}
