use super::walk::{walk_repository, RepositoryWalk, WalkLimits};
use async_trait::async_trait;
use coderadar_core::{DetectedPattern, PatternReport, TaskContext, TaskExecutor, TaskPayload, TaskType};
use std::path::Path;

/// Detects layout-level architecture, test-suite and documentation patterns.
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for PatternAnalyzer {
    fn task_type(&self) -> TaskType {
        TaskType::Pattern
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<TaskPayload> {
        let root = ctx.repository.local_path.clone();
        let thorough = ctx.task.thorough;
        let report = tokio::task::spawn_blocking(move || detect(Path::new(&root), thorough)).await??;
        Ok(TaskPayload::Pattern(report))
    }
}

pub(crate) fn detect(root: &Path, thorough: bool) -> anyhow::Result<PatternReport> {
    let walk = walk_repository(root, WalkLimits::for_task(thorough))?;
    let mut patterns = Vec::new();

    let mvc = ["models", "views", "controllers"]
        .iter()
        .filter(|d| walk.has_dir_named(d))
        .count();
    if mvc >= 2 {
        patterns.push(pattern(
            "architecture",
            "mvc",
            0.5 + 0.15 * mvc as f64,
            "model/view/controller directories",
        ));
    }

    let layers = ["domain", "application", "infrastructure", "presentation", "services", "repositories"]
        .iter()
        .filter(|d| walk.has_dir_named(d))
        .count();
    if layers >= 3 {
        patterns.push(pattern(
            "architecture",
            "layered",
            (0.4 + 0.1 * layers as f64).min(0.95),
            "separate layer directories",
        ));
    }

    let workspace_roots = ["packages", "crates", "apps", "libs"]
        .iter()
        .filter(|d| walk.has_dir(d))
        .count();
    if workspace_roots > 0 && nested_manifests(&walk) >= 2 {
        patterns.push(pattern(
            "architecture",
            "monorepo",
            0.85,
            "multiple packages under a shared root",
        ));
    }

    let dockerfiles = walk
        .files
        .iter()
        .filter(|f| f.relative.ends_with("Dockerfile"))
        .count();
    if dockerfiles >= 2 || (walk.has_dir("services") && walk.has_file("docker-compose.yml")) {
        patterns.push(pattern(
            "architecture",
            "microservices",
            if dockerfiles >= 2 { 0.8 } else { 0.6 },
            "independently deployable service units",
        ));
    }

    if walk.has_file("serverless.yml")
        || walk.has_file("template.yaml")
        || (walk.has_dir("functions") && walk.has_file("firebase.json"))
        || walk.has_file("netlify.toml")
    {
        patterns.push(pattern(
            "architecture",
            "serverless",
            0.8,
            "function-as-a-service deployment descriptors",
        ));
    }

    let test_files = walk
        .files
        .iter()
        .filter(|f| {
            let name = f.relative.rsplit('/').next().unwrap_or(&f.relative);
            f.relative.starts_with("tests/")
                || f.relative.contains("/tests/")
                || name.starts_with("test_")
                || name.contains("_test.")
                || name.contains(".test.")
                || name.contains(".spec.")
        })
        .count();
    if test_files > 0 {
        patterns.push(pattern(
            "testing",
            "test-suite",
            (0.5 + 0.05 * test_files as f64).min(0.95),
            "automated test files present",
        ));
    }

    let docs = walk
        .files
        .iter()
        .filter(|f| {
            let lower = f.relative.to_ascii_lowercase();
            lower.ends_with(".md") || lower.ends_with(".rst") || lower.starts_with("docs/")
        })
        .count();
    if docs > 0 {
        patterns.push(pattern(
            "documentation",
            "written-docs",
            (0.5 + 0.1 * docs as f64).min(0.9),
            "markdown or reStructuredText documentation",
        ));
    }

    Ok(PatternReport { patterns })
}

fn nested_manifests(walk: &RepositoryWalk) -> usize {
    walk.files
        .iter()
        .filter(|f| f.depth >= 2)
        .filter(|f| {
            matches!(
                f.relative.rsplit('/').next(),
                Some("Cargo.toml" | "package.json" | "pyproject.toml" | "go.mod")
            )
        })
        .count()
}

fn pattern(pattern_type: &str, name: &str, confidence: f64, description: &str) -> DetectedPattern {
    DetectedPattern {
        pattern_type: pattern_type.to_string(),
        name: name.to_string(),
        confidence,
        description: description.to_string(),
    }
}
