//! # dockwall
//!
//! Keeps the host firewall's NAT and filter chains in sync with Docker
//! networks and containers.
//!
//! Runtime state is projected into [`model`] values, turned into rule blocks
//! by [`generate`] and reconciled by the [`controller::Controller`], which
//! applies only the rules that changed.

pub mod cli;
pub mod config;
pub mod controller;
pub mod docker;
pub mod events;
pub mod generate;
pub mod model;

pub use config::Settings;
pub use controller::Controller;
pub use docker::{DockerClient, RuntimeClient};
pub use events::RuntimeEvent;
