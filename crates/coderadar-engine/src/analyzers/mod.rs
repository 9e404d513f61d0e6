//! Built-in filesystem analyzers.
//!
//! Each analyzer walks the repository's `local_path` on the blocking pool and
//! returns its typed payload. Deep-phase invocations run with `thorough` set,
//! lifting the sampling limits in [`walk::WalkLimits`].

mod dependencies;
mod patterns;
mod security;
mod structure;
pub mod walk;

pub use dependencies::DependencyAnalyzer;
pub use patterns::PatternAnalyzer;
pub use security::SecurityAnalyzer;
pub use structure::StructureAnalyzer;
