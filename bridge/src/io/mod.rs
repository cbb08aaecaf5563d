//! I/O helpers: configuration, the remote service, and local project files.

pub mod archive;
pub mod config;
pub mod fingerprint;
pub mod remote;
pub mod walk;
pub mod workspace_client;
