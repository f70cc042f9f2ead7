//! Pipeline services, leaves first: the object store, queue and record
//! stores are trait seams with SQLite/disk-backed production adapters; the
//! importer and consumer drive the producer and consumer paths across them.

pub mod consumer;
pub mod gate;
pub mod importer;
pub mod lifecycle;
pub mod object_store;
pub mod publisher;
pub mod queue;
pub mod reader;
pub mod stores;

#[cfg(test)]
pub mod test_support;
