//! # warmpool-id
//!
//! Typed identifiers for the warmpool workspace.
//!
//! The pool treats identifiers as opaque unique keys; this crate is the
//! supplier. Every id is a prefixed ULID, `{prefix}_{ulid}`:
//!
//! - `item_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `pool_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! Prefixes keep item and pool ids from being mixed up in logs and HTTP
//! paths, and parsing is strict so a malformed id never reaches the pool.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
