//! nodeadm engine: turns a Linux host into a hybrid Kubernetes node and back.
//!
//! The binary crate only parses arguments and builds a [`host::Host`]; every
//! flow lives here so it can run against fakes under a temp directory.

pub mod artifact;
pub mod command;
pub mod components;
pub mod config;
pub mod daemon;
pub mod error;
pub mod flows;
pub mod host;
pub mod node;
pub mod packagemanager;
pub mod paths;
pub mod platform;
pub mod retry;
pub mod tracker;

pub use error::{Error, Result};
