//! Error types for differential privacy operations.

/// Errors that can occur while noising or evaluating query results.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DpError {
    /// Invalid epsilon/delta, missing sensitivity, or another setup mistake.
    #[error("configuration error: {msg}")]
    Configuration {
        /// Human-readable error description.
        msg: String,
    },

    /// A noised result does not line up with its baseline.
    #[error("shape mismatch for query `{query}`: {msg}")]
    ShapeMismatch {
        /// Query identifier.
        query: String,
        /// Human-readable error description.
        msg: String,
    },

    /// A query result that violates its own column manifest.
    #[error("invalid input: {msg}")]
    InvalidInput {
        /// Human-readable error description.
        msg: String,
    },

    /// Unsupported feature or configuration.
    #[error("unsupported feature: {msg}")]
    Unsupported {
        /// Human-readable error description.
        msg: String,
    },
}

/// Result type for DP operations.
pub type Result<T> = std::result::Result<T, DpError>;

impl DpError {
    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration { msg: msg.into() }
    }

    /// Create a shape mismatch error.
    pub fn shape<Q: Into<String>, S: Into<String>>(query: Q, msg: S) -> Self {
        Self::ShapeMismatch {
            query: query.into(),
            msg: msg.into(),
        }
    }

    /// Create an invalid input error.
    pub fn input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput { msg: msg.into() }
    }

    /// Create an unsupported feature error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::Unsupported { msg: msg.into() }
    }

    /// Whether this error should abort a whole run rather than one triple.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ShapeMismatch { .. })
    }
}
