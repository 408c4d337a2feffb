//! Crate-wide error type for the navigation filter.

/// Errors surfaced across the filter's public entry points.
///
/// Sensor-stream and geodetic problems are normally absorbed locally (logged and
/// skipped, per the error-handling design); this type only carries the subset
/// that is meant to propagate all the way out to a caller or the CLI.
#[derive(Debug)]
pub enum NavError {
    /// Failed to read or write a file (sensor stream, config, output).
    Io(std::io::Error),
    /// Configuration is missing, malformed, or internally inconsistent.
    Config(String),
    /// A geodetic projection input was out of the valid domain.
    Geodetic(String),
    /// The filter has diverged (non-finite state, covariance trace blew up).
    Divergence(String),
    /// A sensor record could not be parsed or was out of order.
    Sensor(String),
}

impl std::fmt::Display for NavError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavError::Io(e) => write!(f, "I/O error: {e}"),
            NavError::Config(msg) => write!(f, "configuration error: {msg}"),
            NavError::Geodetic(msg) => write!(f, "geodetic error: {msg}"),
            NavError::Divergence(msg) => write!(f, "filter diverged: {msg}"),
            NavError::Sensor(msg) => write!(f, "sensor stream error: {msg}"),
        }
    }
}

impl std::error::Error for NavError {}

impl From<std::io::Error> for NavError {
    fn from(e: std::io::Error) -> Self {
        NavError::Io(e)
    }
}

impl From<serde_yaml::Error> for NavError {
    fn from(e: serde_yaml::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

/// Exit codes for the CLI driver, per the external-interface contract.
pub mod exit_code {
    /// Completed successfully.
    pub const SUCCESS: i32 = 0;
    /// Could not read sensor input, config, or write output.
    pub const IO_ERROR: i32 = 1;
    /// Configuration failed validation.
    pub const CONFIG_ERROR: i32 = 2;
    /// Filter diverged mid-run.
    pub const DIVERGENCE: i32 = 3;
}

impl NavError {
    /// Maps this error onto the process exit code it should produce.
    pub fn exit_code(&self) -> i32 {
        match self {
            NavError::Io(_) => exit_code::IO_ERROR,
            NavError::Config(_) => exit_code::CONFIG_ERROR,
            NavError::Divergence(_) => exit_code::DIVERGENCE,
            NavError::Geodetic(_) | NavError::Sensor(_) => exit_code::IO_ERROR,
        }
    }
}
