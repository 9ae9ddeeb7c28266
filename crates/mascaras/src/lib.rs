//! mascaras - masked snapshots of Aurora clusters
//!
//! Clones an Aurora cluster, runs a masking script (or an interactive
//! prompt) against the clone, snapshots the result, optionally exports the
//! snapshot to S3, and removes the clone again.
//!
//! ## Modules
//!
//! - [`aws`]: RDS and S3 clients behind SDK-free types
//! - [`cleanup`]: tracking and teardown of temporary resources
//! - [`config`]: layered configuration
//! - [`error`]: run-level error taxonomy
//! - [`executor`]: SQL execution against the clone
//! - [`location`]: reading files from local paths or S3
//! - [`orchestrator`]: the end-to-end run
//! - [`session`]: interactive prompt
//! - [`wait`]: polling with backoff

pub mod aws;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod executor;
pub mod location;
pub mod orchestrator;
pub mod session;
pub mod wait;
