//! oscal-runner core - platform-independent abstractions and configuration
//!
//! This crate provides the data model, configuration, error taxonomy and the
//! process traits shared by the platform-specific process managers and the
//! dispatch engine in `oscal-runner`.

mod config;
mod error;
mod operation;
mod process;
mod service;
mod stdio;

pub use config::*;
pub use error::*;
pub use operation::*;
pub use process::*;
pub use service::*;
pub use stdio::*;
