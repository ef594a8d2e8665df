//! Core types, wire protocol, config, and errors for devops-pack.

pub mod config;
pub mod error;
pub mod output;
pub mod protocol;
pub mod types;
