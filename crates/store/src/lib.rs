//! Thread persistence for Ralph.

pub mod file_store;
pub mod in_memory;

pub use file_store::FileThreadStore;
pub use in_memory::InMemoryThreadStore;
