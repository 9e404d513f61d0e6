use super::walk::{read_text, walk_repository, WalkLimits};
use async_trait::async_trait;
use coderadar_core::{StructureReport, TaskContext, TaskExecutor, TaskPayload, TaskType};
use std::collections::BTreeSet;
use std::path::Path;

/// File, line and directory counts plus language and framework detection.
pub struct StructureAnalyzer;

impl StructureAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StructureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for StructureAnalyzer {
    fn task_type(&self) -> TaskType {
        TaskType::Structure
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<TaskPayload> {
        let root = ctx.repository.local_path.clone();
        let thorough = ctx.task.thorough;
        let report = tokio::task::spawn_blocking(move || scan(Path::new(&root), thorough)).await??;
        Ok(TaskPayload::Structure(report))
    }
}

pub(crate) fn scan(root: &Path, thorough: bool) -> anyhow::Result<StructureReport> {
    let limits = WalkLimits::for_task(thorough);
    let walk = walk_repository(root, limits)?;

    let mut report = StructureReport {
        total_files: walk.files.len() as u64,
        directories: walk.directories.len() as u64,
        ..Default::default()
    };
    let mut languages = BTreeSet::new();
    let mut frameworks = BTreeSet::new();

    for file in &walk.files {
        report.max_depth = report.max_depth.max(file.depth as u32);
        let name = file.relative.rsplit('/').next().unwrap_or(&file.relative);
        let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
        if let Some(language) = ext.as_deref().and_then(language_for_extension) {
            languages.insert(language);
            if let Some(text) = read_text(file, limits) {
                report.total_lines += text.lines().count() as u64;
            }
        }
        if is_test_path(&file.relative) {
            report.has_tests = true;
        }
        if is_doc_path(&file.relative) {
            report.has_docs = true;
        }
        if is_ci_path(&file.relative) {
            report.has_ci = true;
        }
        if file.depth == 1 {
            detect_frameworks(name, file, limits, &mut frameworks);
        }
    }
    if walk.has_dir_named("tests") || walk.has_dir_named("__tests__") || walk.has_dir_named("spec") {
        report.has_tests = true;
    }
    if walk.has_dir("docs") || walk.has_dir("doc") {
        report.has_docs = true;
    }

    report.languages = languages.into_iter().map(str::to_string).collect();
    report.frameworks = frameworks.into_iter().map(str::to_string).collect();
    Ok(report)
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" => "shell",
        _ => return None,
    })
}

fn is_test_path(relative: &str) -> bool {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || relative.starts_with("tests/")
        || relative.contains("/tests/")
}

fn is_doc_path(relative: &str) -> bool {
    let lower = relative.to_ascii_lowercase();
    lower.starts_with("docs/") || lower == "readme.md" || lower == "readme" || lower == "readme.rst"
}

fn is_ci_path(relative: &str) -> bool {
    relative.starts_with(".github/workflows/")
        || relative == ".gitlab-ci.yml"
        || relative == "Jenkinsfile"
        || relative == ".travis.yml"
        || relative == "azure-pipelines.yml"
        || relative.starts_with(".circleci/")
}

fn detect_frameworks(
    name: &str,
    file: &super::walk::WalkedFile,
    limits: WalkLimits,
    frameworks: &mut BTreeSet<&'static str>,
) {
    let markers: &[(&str, &str)] = match name {
        "package.json" => &[
            ("\"react\"", "react"),
            ("\"next\"", "nextjs"),
            ("\"vue\"", "vue"),
            ("\"@angular/core\"", "angular"),
            ("\"express\"", "express"),
            ("\"svelte\"", "svelte"),
        ],
        "Cargo.toml" => &[
            ("axum", "axum"),
            ("actix-web", "actix-web"),
            ("rocket", "rocket"),
            ("tokio", "tokio"),
        ],
        "requirements.txt" | "pyproject.toml" => &[
            ("django", "django"),
            ("flask", "flask"),
            ("fastapi", "fastapi"),
        ],
        "go.mod" => &[("gin-gonic/gin", "gin"), ("labstack/echo", "echo")],
        "pom.xml" | "build.gradle" => &[("spring", "spring")],
        "Gemfile" => &[("rails", "rails")],
        _ => return,
    };
    let Some(text) = read_text(file, limits) else {
        return;
    };
    let lower = text.to_ascii_lowercase();
    for &(needle, framework) in markers {
        if lower.contains(needle) {
            frameworks.insert(framework);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn counts_files_and_detects_languages() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {\n}\n").unwrap();
        fs::write(dir.path().join("tests/it.rs"), "#[test]\nfn t() {}\n").unwrap();
        fs::write(dir.path().join("app.py"), "print(1)\n").unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[dependencies]\naxum = \"0.8\"\n",
        )
        .unwrap();

        let report = scan(dir.path(), false).unwrap();
        assert_eq!(report.total_files, 4);
        assert_eq!(report.total_lines, 5);
        assert_eq!(report.languages, vec!["python", "rust"]);
        assert_eq!(report.frameworks, vec!["axum"]);
        assert!(report.has_tests);
        assert!(!report.has_docs);
        assert!(!report.has_ci);
        assert_eq!(report.max_depth, 2);
    }

    #[test]
    fn detects_docs_and_ci() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".github/workflows")).unwrap();
        fs::write(dir.path().join(".github/workflows/ci.yml"), "on: push\n").unwrap();
        fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

        let report = scan(dir.path(), false).unwrap();
        assert!(report.has_docs);
        assert!(report.has_ci);
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(scan(Path::new("/definitely/not/here"), false).is_err());
    }
}
