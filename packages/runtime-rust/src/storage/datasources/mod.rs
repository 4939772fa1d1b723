//! Bundled [`DataSource`](crate::traits::DataSource) implementations.

pub mod memory;

pub use memory::MemoryDataSource;
