//! Lending records and the durable store they live in

pub mod demo;
pub mod model;
pub mod store;

pub use model::*;
pub use store::{ChangeSet, InMemoryRecordStore, RecordKind, RecordStore, Row};
