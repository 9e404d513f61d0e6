pub mod analysis;
pub mod config_manager;
pub mod error;
pub mod event;
pub mod insight;
pub mod job;
pub mod repository;
pub mod scoring;
pub mod sync;
pub mod task;
pub mod traits;

pub use analysis::*;
pub use config_manager::*;
pub use error::*;
pub use event::*;
pub use insight::*;
pub use job::*;
pub use repository::*;
pub use scoring::compute_scores;
pub use sync::*;
pub use task::*;
pub use traits::*;
