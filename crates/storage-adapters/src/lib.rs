//! # storage-adapters
//!
//! Implementations of the `CommentStore` and `MediaStorage` ports.
//! The in-memory store and the media backends are always compiled; the
//! Postgres and hosted REST stores sit behind `db-postgres` and `hosted-rest`.

pub mod demo;
pub mod media;
pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

#[cfg(feature = "hosted-rest")]
pub mod hosted;
#[cfg(feature = "hosted-rest")]
mod realtime;

pub use demo::{seed_demo, DEMO_COMMENTS, DEMO_PINNED};
pub use media::{InMemoryMediaStorage, LocalMediaStorage};
pub use memory::InMemoryCommentStore;

#[cfg(feature = "db-postgres")]
pub use postgres::PgCommentStore;

#[cfg(feature = "hosted-rest")]
pub use hosted::{RestCommentStore, RestConfig};
