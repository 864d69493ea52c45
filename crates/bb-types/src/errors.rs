use thiserror::Error;

/// Main error type for BlackBridge
#[derive(Error, Debug)]
pub enum BbError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BbError {
    /// True for errors that are raised before any evaluation is attempted:
    /// bad config values and unsupported algorithm selectors.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BbError::Config(_) | BbError::Optimizer(OptimizerError::UnsupportedAlgorithm { .. })
        )
    }

    /// True when the external evaluator broke the handshake contract.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, BbError::Protocol(_))
    }
}

/// Configuration file and spec validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("Missing required key: {key}")]
    MissingKey { key: String },

    #[error("Invalid value for {key}: {value:?} ({message})")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("Length mismatch for {key}: expected {expected} values, got {actual}")]
    LengthMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid bounds for variable {index}: lower {low} exceeds upper {up}")]
    InvertedBounds { index: usize, low: f64, up: f64 },

    #[error("Handshake directory does not exist: {path}")]
    MissingDirectory { path: String },

    #[error("{0}")]
    Other(String),
}

/// Handshake protocol violations. These are never timing issues: they mean
/// the collaborator on the other side of the file speaks a different protocol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed objective value {line:?} before ObjWritten sentinel")]
    MalformedObjective { line: String },

    #[error("Malformed design variable {token:?} in line {line:?}")]
    MalformedVector { line: String, token: String },

    #[error("Unknown sentinel token: {0:?}")]
    UnknownSentinel(String),
}

/// Optimization driver errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Unsupported optimization algorithm: {name}")]
    UnsupportedAlgorithm { name: String },

    #[error("Optimization finished without a single evaluation")]
    NoEvaluations,
}

/// Result type alias for BlackBridge operations
pub type BbResult<T> = Result<T, BbError>;

/// Macro for creating free-form configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ConfigError::Other(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::BbError::Internal(format!($($arg)*))
    };
}
