//! Directory client error types
//!
//! Error definitions with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error that can occur while talking to the directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Discovery errors (non-fatal when explicit endpoints are configured)
    /// DNS service-record lookup returned nothing or failed.
    #[error("discovery failed for {domain}: {message}")]
    Discovery {
        domain: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Connection errors (usually transient)
    /// Failed to establish or keep a connection to a directory server.
    #[error("connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Every configured endpoint refused a connection.
    #[error("connection pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// No connection became available before the checkout deadline.
    #[error("timed out after {timeout_ms} ms waiting for a pooled connection")]
    PoolTimeout { timeout_ms: u64 },

    // Authentication errors (never retried)
    /// Bind failed. Retrying risks locking the account out.
    #[error("authentication failed: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Data errors (permanent)
    /// Malformed binary or textual identifier.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Search returned zero matches.
    #[error("object not found: {identifier}")]
    NotFound { identifier: String },

    /// Search returned more than one match where exactly one was required.
    #[error("identifier '{identifier}' is ambiguous: {matches} objects match")]
    AmbiguousIdentifier { identifier: String, matches: usize },

    /// Object already exists (add conflict).
    #[error("object already exists: {dn}")]
    AlreadyExists { dn: String },

    /// Search filter rejected by the server or malformed locally.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Non-success LDAP result code not covered by a more specific variant.
    #[error("LDAP operation failed with code {rc}: {message}")]
    Ldap { rc: u32, message: String },

    /// Client configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Control flow
    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Transient failures persisted past the retry policy.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<DirectoryError>,
    },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// LDAP result codes the client reacts to.
pub mod rc {
    pub const SUCCESS: u32 = 0;
    pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
    pub const NO_SUCH_ATTRIBUTE: u32 = 16;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INVALID_CREDENTIALS: u32 = 49;
    pub const BUSY: u32 = 51;
    pub const UNAVAILABLE: u32 = 52;
    pub const ENTRY_ALREADY_EXISTS: u32 = 68;
    pub const FILTER_ERROR: u32 = 87;
    pub const SERVER_DOWN: u32 = 81;
    pub const TIMEOUT: u32 = 85;
}

impl DirectoryError {
    /// Check if this error is transient and the operation should be retried.
    ///
    /// Authentication failures are deliberately excluded: repeated binds
    /// against Active Directory count towards account lockout.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::Connection { .. }
            | DirectoryError::Timeout { .. }
            | DirectoryError::PoolExhausted { .. }
            | DirectoryError::PoolTimeout { .. } => true,
            DirectoryError::Ldap { rc, .. } => matches!(
                *rc,
                rc::BUSY | rc::UNAVAILABLE | rc::SERVER_DOWN | rc::TIMEOUT
            ),
            _ => false,
        }
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Zero-result searches are absence, not failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            DirectoryError::Discovery { .. } => "DISCOVERY_FAILED",
            DirectoryError::Connection { .. } => "CONNECTION_FAILED",
            DirectoryError::Timeout { .. } => "TIMEOUT",
            DirectoryError::PoolExhausted { .. } => "POOL_EXHAUSTED",
            DirectoryError::PoolTimeout { .. } => "POOL_TIMEOUT",
            DirectoryError::Authentication { .. } => "AUTH_FAILED",
            DirectoryError::Codec { .. } => "CODEC_ERROR",
            DirectoryError::NotFound { .. } => "NOT_FOUND",
            DirectoryError::AmbiguousIdentifier { .. } => "AMBIGUOUS_IDENTIFIER",
            DirectoryError::AlreadyExists { .. } => "ALREADY_EXISTS",
            DirectoryError::InvalidFilter { .. } => "INVALID_FILTER",
            DirectoryError::Ldap { .. } => "LDAP_ERROR",
            DirectoryError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            DirectoryError::Cancelled => "CANCELLED",
            DirectoryError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            DirectoryError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Map a non-success LDAP result code for an operation on `dn`.
    pub fn from_result_code(rc: u32, dn: &str, text: &str) -> Self {
        match rc {
            rc::NO_SUCH_OBJECT => DirectoryError::NotFound {
                identifier: dn.to_string(),
            },
            rc::ENTRY_ALREADY_EXISTS => DirectoryError::AlreadyExists { dn: dn.to_string() },
            rc::INVALID_CREDENTIALS => DirectoryError::authentication(format!(
                "invalid credentials: {text}"
            )),
            rc::FILTER_ERROR => DirectoryError::InvalidFilter {
                message: text.to_string(),
            },
            _ => DirectoryError::Ldap {
                rc,
                message: if text.is_empty() {
                    dn.to_string()
                } else {
                    format!("{dn}: {text}")
                },
            },
        }
    }

    // Convenience constructors

    /// Create a discovery error.
    pub fn discovery(domain: impl Into<String>, message: impl Into<String>) -> Self {
        DirectoryError::Discovery {
            domain: domain.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a discovery error with source.
    pub fn discovery_with_source(
        domain: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Discovery {
            domain: domain.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        DirectoryError::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Create an authentication error with source.
    pub fn authentication_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Authentication {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        DirectoryError::Codec {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(identifier: impl Into<String>) -> Self {
        DirectoryError::NotFound {
            identifier: identifier.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        DirectoryError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        DirectoryError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
