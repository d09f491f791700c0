//! vistag-core: shared building blocks for the vistag workspace
//!
//! Holds the workspace-wide error type and the configuration loader used by
//! the pipeline crate and the command line tool.

pub mod error;
pub mod config;

pub use error::{Error, Result};
