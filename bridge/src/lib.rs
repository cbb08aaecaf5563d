//! Remote notebook execution bridge.
//!
//! Runs notebook cells on a remote cluster through one persistent execution
//! context per session, re-creating the context when the service reports it
//! gone, and mirrors a local project directory onto the cluster so imports
//! resolve there. The architecture follows a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (failure classification, result
//!   decoding, exclusion matching, path sanitization). No I/O.
//! - **[`io`]**: Side-effecting pieces (configuration files, the remote service
//!   client, fingerprint cache, directory walks, archives).
//!
//! Orchestration modules ([`execution`], [`sync`], [`session`]) combine the two
//! to implement the session lifecycle the CLI and front ends drive.

pub mod core;
pub mod error;
pub mod execution;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
