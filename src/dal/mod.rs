//! Data access layer: the repository seam the core calls through, plus an
//! in-memory implementation used by tests and the CLI. Production deployments
//! supply their own backend behind the same trait.

pub mod memory;
pub mod traits;

pub use memory::MemoryRepository;
pub use traits::PolicyRepository;
