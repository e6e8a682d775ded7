use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

/// Errors raised while resolving configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A file, environment or command-line layer could not be loaded.
    #[error(transparent)]
    Load(#[from] Arc<OrthoError>),
    /// The layers merged but a value cannot be used.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        /// Field holding the offending value.
        field: &'static str,
        /// What the value must satisfy.
        reason: &'static str,
    },
}
