//! mascaras-common - Shared types and utilities
//!
//! This crate holds the pieces of mascaras that do not talk to AWS or to a
//! database, so they can be tested and reused without pulling in the SDK.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`dialect`]: Mapping from RDS engine names to SQL dialects
//! - [`ident`]: Temporary resource identifier generation
//! - [`resource_kind`]: Temporary resource kinds and cleanup ordering

pub mod defaults;
pub mod dialect;
pub mod ident;
pub mod resource_kind;

pub use dialect::EngineDialect;
pub use ident::TempIdentifiers;
pub use resource_kind::ResourceKind;
