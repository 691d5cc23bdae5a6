//! CLI command implementations.

pub mod attack;
pub mod cache;
pub mod init;
pub mod model;
pub mod ppr;
