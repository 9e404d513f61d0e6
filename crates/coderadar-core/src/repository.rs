use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository the orchestrator can analyze, addressed by `local_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub id: String,
    pub name: String,
    pub local_path: String,
    pub registered_at: DateTime<Utc>,
}

impl RepositoryDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        local_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            local_path: local_path.into(),
            registered_at: Utc::now(),
        }
    }

    /// Descriptor with a fresh id, for clients that register without one.
    pub fn generated(name: impl Into<String>, local_path: impl Into<String>) -> Self {
        let id = format!("repo_{}", uuid::Uuid::new_v4().simple());
        Self::new(id, name, local_path)
    }
}
