//! Database layer
//!
//! The [`DocumentStore`] trait is the only seam between the core and a
//! storage backend. MongoDB serves production; the in-memory store serves
//! `memory://` URLs and tests.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;
pub use schemas::StagedRecord;
pub use store::{DocumentStore, RecordFilter};
