//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can occur on the testbed, from configuration issues to
//! vendor library calls that report failure.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while parsing or extracting the
//!   configuration file.
//! - **`Configuration`**: Semantic errors in the configuration (values that parse but
//!   are logically wrong). Usually caught by `TestbedConfig::validate`.
//! - **`Io`**: Wraps `std::io::Error` for file and serial I/O.
//! - **`Instrument`**: General driver errors (bad response, value out of range).
//! - **`VendorCall`**: A vendor library call returned a non-success code. The message
//!   names the call, e.g. `command_move() failed`.
//! - **`DeviceNotFound`**: Device enumeration did not return the requested device.
//! - **`Timeout`**: A polling wait ran out of time.
//! - **`Storage`**: Writing or reading data products (frames, text tables, plots).
//! - **`Processing`**: Image processing or fitting failures.
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.
//!
//! Instrument traits and experiments use `anyhow::Result`; `DaqError` values convert
//! into `anyhow::Error` with `?`, so call sites can still downcast to the typed error.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the testbed library.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but invalid
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument refused or failed a command
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Vendor library call failed
    #[error("{0}")]
    VendorCall(String),

    /// Configured device is not attached
    #[error("{0}")]
    DeviceNotFound(String),

    /// Wait exceeded its timeout
    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),

    /// Writing or reading data failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Fit or image processing failed
    #[error("Data processing error: {0}")]
    Processing(String),

    /// Cargo feature required for this path is off
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Backend exists but cannot drive this instrument yet
    #[error("Feature '{0}' is enabled but not yet implemented. {1}")]
    FeatureIncomplete(String, String),

    /// Several instruments failed to close
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Error for a vendor library call that returned a failure code.
    pub fn vendor_call(call: &str) -> Self {
        DaqError::VendorCall(format!("{call}() failed"))
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}
