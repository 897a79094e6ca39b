//! # Storage Backends
//!
//! Concrete implementations of the store contract live here. The crate
//! ships the reference in-memory backend; physical backends (embedded or
//! relational) plug in from outside by implementing [`crate::store::NodeStore`]
//! and, when they want consistency checking, [`crate::store::StoreInspect`].

pub mod memory;

pub use memory::MemoryStore;
