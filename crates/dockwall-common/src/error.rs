//! Common error types for dockwall.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`WallError`].
pub type WallResult<T> = Result<T, WallError>;

/// Errors raised while reconciling firewall rules.
#[derive(Error, Diagnostic, Debug)]
pub enum WallError {
    /// The container runtime could not be reached at startup.
    #[error("Error communicating with docker: {message}")]
    #[diagnostic(
        code(dockwall::runtime::connection),
        help("Check that the Docker daemon is running and DOCKER_HOST points at it")
    )]
    Connection {
        /// Underlying failure.
        message: String,
    },

    /// A runtime API call or the event stream failed after startup.
    #[error("Runtime error: {message}")]
    #[diagnostic(code(dockwall::runtime))]
    Runtime {
        /// Underlying failure.
        message: String,
    },

    /// A runtime payload lacked a field the projection needs.
    #[error("Missing field {field} in {resource}")]
    #[diagnostic(code(dockwall::runtime::missing_field))]
    MissingField {
        /// Kind of resource being parsed.
        resource: &'static str,
        /// Name of the missing field.
        field: &'static str,
    },

    /// An address or prefix could not be parsed.
    #[error("Invalid address: {value}")]
    #[diagnostic(code(dockwall::address::invalid))]
    InvalidAddress {
        /// The offending text.
        value: String,
    },

    /// Two rules with the same identity were present at once.
    #[error("Duplicated rule: {rule}")]
    #[diagnostic(
        code(dockwall::rules::duplicate),
        help("Rule generation produced the same rule twice, this is a bug")
    )]
    DuplicateRule {
        /// Rendered rule.
        rule: String,
    },

    /// Interface derivation is undefined for this network.
    #[error("Network {network} uses driver {driver}, interface lookup is not implemented")]
    #[diagnostic(code(dockwall::network::unsupported))]
    UnsupportedNetwork {
        /// Network id.
        network: String,
        /// Network driver.
        driver: String,
    },

    /// A firewall binary invocation failed.
    #[error("Firewall command failed: {command}: {stderr}")]
    #[diagnostic(
        code(dockwall::firewall),
        help("Managed chains may now differ from the desired state until the next restart")
    )]
    Firewall {
        /// Rendered command line.
        command: String,
        /// Captured stderr or exit status.
        stderr: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(dockwall::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(dockwall::io))]
    Io(#[from] std::io::Error),
}

impl WallError {
    /// Build a [`WallError::Runtime`] from any displayable error.
    pub fn runtime(err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            message: err.to_string(),
        }
    }
}
