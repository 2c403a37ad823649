//! Bundled storage implementations
//!
//! - [`MemoryCounterStore`]: an in-process [`crate::repositories::CounterStore`]
//!   for single-instance deployments and tests.

pub mod memory;

pub use memory::MemoryCounterStore;
