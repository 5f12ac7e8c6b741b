//! Application bootstrap primitives shared by the faultline binaries.
//!
//! Currently this covers initializing logging and exiting fatally when bootstrap itself fails.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod logging;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingGuard};
}
