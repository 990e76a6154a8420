//! # dockwall-common
//!
//! Shared types for the dockwall workspace:
//! - The common error type
//! - IP families and prefixed addresses

#![warn(missing_docs)]

pub mod address;
pub mod error;

pub use address::{IpAddress, IpFamily};
pub use error::{WallError, WallResult};
