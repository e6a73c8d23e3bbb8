//! Library half of the `strato` CLI.
//!
//! The binary in `main.rs` only parses arguments and dispatches; everything
//! else lives here so the reconciliation engine and script generator can be
//! exercised by integration tests against a fake cloud backend.

pub mod api;
pub mod cli;
pub mod config;
pub mod gcp;
pub mod wif;

pub use config::Config;
pub use gcp::{CloudIdentity, GcpError, GcpResult};
pub use wif::WifReconciler;
