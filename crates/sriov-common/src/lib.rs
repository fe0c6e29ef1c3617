//! Common types for the SR-IOV e2e harness
//!
//! CRD types, configuration, error types and Kubernetes utilities shared by
//! the harness library and the CLI.

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use config::{DeviceDescriptor, HarnessConfig, Timeouts};
pub use error::{Error, StoreErrorKind};

/// Result type alias using our custom Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
