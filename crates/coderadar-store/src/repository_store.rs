use async_trait::async_trait;
use coderadar_core::{CodeRadarError, RepositoryDescriptor, RepositoryStore, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

#[derive(Default)]
pub struct MemoryRepositoryStore {
    repositories: DashMap<String, RepositoryDescriptor>,
    /// local_path -> repository id
    paths: DashMap<String, String>,
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryStore for MemoryRepositoryStore {
    async fn register(&self, descriptor: RepositoryDescriptor) -> Result<RepositoryDescriptor> {
        if descriptor.id.trim().is_empty() {
            return Err(CodeRadarError::Validation(
                "repository id must not be empty".to_string(),
            ));
        }
        let previous_path = self
            .repositories
            .get(&descriptor.id)
            .map(|r| r.local_path.clone());
        if let Some(path) = previous_path.filter(|p| *p != descriptor.local_path) {
            self.paths.remove(&path);
        }
        self.paths
            .insert(descriptor.local_path.clone(), descriptor.id.clone());
        self.repositories
            .insert(descriptor.id.clone(), descriptor.clone());
        info!(
            repository_id = %descriptor.id,
            path = %descriptor.local_path,
            "registered repository"
        );
        Ok(descriptor)
    }

    async fn get(&self, repository_id: &str) -> Result<Option<RepositoryDescriptor>> {
        Ok(self.repositories.get(repository_id).map(|r| r.clone()))
    }

    async fn get_or_register_path(
        &self,
        candidate: RepositoryDescriptor,
    ) -> Result<RepositoryDescriptor> {
        match self.paths.entry(candidate.local_path.clone()) {
            Entry::Occupied(mapped) => self
                .repositories
                .get(mapped.get())
                .map(|r| r.clone())
                .ok_or_else(|| {
                    CodeRadarError::NotFound(format!("repository {}", mapped.get()))
                }),
            Entry::Vacant(slot) => {
                self.repositories
                    .insert(candidate.id.clone(), candidate.clone());
                slot.insert(candidate.id.clone());
                info!(
                    repository_id = %candidate.id,
                    path = %candidate.local_path,
                    "mapped new repository path"
                );
                Ok(candidate)
            }
        }
    }

    async fn list(&self) -> Result<Vec<RepositoryDescriptor>> {
        let mut repos: Vec<RepositoryDescriptor> =
            self.repositories.iter().map(|r| r.clone()).collect();
        repos.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(repos)
    }
}
