//! Storage and gateway adapters for the domain ports.

pub mod card;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
