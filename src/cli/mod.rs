//! CLI command handlers. Each submodule owns one command family and is
//! dispatched from `main.rs`.

pub mod list;
pub mod login;
pub mod raw;
pub mod wif;
