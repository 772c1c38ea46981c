//! kedge-state: embedded state store for Kedge.
//!
//! Backed by [redb](https://docs.rs/redb), persists scaling target specs
//! and the status the controller publishes after every reconcile pass.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns and
//! keyed by `{namespace}/{name}`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
