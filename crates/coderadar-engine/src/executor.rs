use crate::analyzers::{DependencyAnalyzer, PatternAnalyzer, SecurityAnalyzer, StructureAnalyzer};
use coderadar_core::{TaskExecutor, TaskType};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps each task type to the executor that runs it.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the filesystem analyzers for every task type.
    pub fn with_builtin_analyzers() -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(StructureAnalyzer::new()));
        registry.register(Arc::new(PatternAnalyzer::new()));
        registry.register(Arc::new(SecurityAnalyzer::new()?));
        registry.register(Arc::new(DependencyAnalyzer::new()));
        Ok(registry)
    }

    /// Replaces any executor already registered for the same task type.
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) -> &mut Self {
        self.executors.insert(executor.task_type(), executor);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.executors.keys().copied().collect();
        types.sort();
        types
    }
}
