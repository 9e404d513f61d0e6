use super::walk::{read_text, walk_repository, WalkLimits, WalkedFile};
use async_trait::async_trait;
use coderadar_core::{
    Dependency, DependencyReport, PackageEcosystem, TaskContext, TaskExecutor, TaskPayload,
    TaskType,
};
use std::path::Path;
use tracing::debug;

/// Reads package manifests and lists declared dependencies per ecosystem.
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DependencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for DependencyAnalyzer {
    fn task_type(&self) -> TaskType {
        TaskType::Dependency
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<TaskPayload> {
        let root = ctx.repository.local_path.clone();
        let thorough = ctx.task.thorough;
        let report = tokio::task::spawn_blocking(move || analyze(Path::new(&root), thorough)).await??;
        Ok(TaskPayload::Dependency(report))
    }
}

pub(crate) fn analyze(root: &Path, thorough: bool) -> anyhow::Result<DependencyReport> {
    let limits = WalkLimits::for_task(thorough);
    let walk = walk_repository(root, limits)?;
    let mut report = DependencyReport::default();

    for file in &walk.files {
        let name = file.relative.rsplit('/').next().unwrap_or(&file.relative);
        let parser: fn(&str) -> anyhow::Result<Vec<Dependency>> = match name {
            "Cargo.toml" => parse_cargo,
            "package.json" => parse_package_json,
            "requirements.txt" => |text| Ok(parse_requirements(text)),
            "pyproject.toml" => parse_pyproject,
            "go.mod" => |text| Ok(parse_go_mod(text)),
            _ => continue,
        };
        let Some(ecosystem) = ecosystem_for(name) else {
            continue;
        };
        if let Some(parsed) = parse_manifest(file, limits, parser) {
            report.ecosystems.push(PackageEcosystem {
                ecosystem: ecosystem.to_string(),
                manifest: file.relative.clone(),
                dependencies: parsed,
            });
        }
    }
    Ok(report)
}

fn ecosystem_for(manifest: &str) -> Option<&'static str> {
    match manifest {
        "Cargo.toml" => Some("cargo"),
        "package.json" => Some("npm"),
        "requirements.txt" | "pyproject.toml" => Some("pypi"),
        "go.mod" => Some("go"),
        _ => None,
    }
}

fn parse_manifest(
    file: &WalkedFile,
    limits: WalkLimits,
    parser: fn(&str) -> anyhow::Result<Vec<Dependency>>,
) -> Option<Vec<Dependency>> {
    let text = read_text(file, limits)?;
    match parser(&text) {
        Ok(deps) => Some(deps),
        Err(e) => {
            // A malformed manifest is skipped rather than failing the task.
            debug!(manifest = %file.relative, "skipping manifest: {}", e);
            None
        }
    }
}

fn parse_cargo(text: &str) -> anyhow::Result<Vec<Dependency>> {
    let doc: toml::Table = toml::from_str(text)?;
    let mut deps = Vec::new();
    let mut collect = |table: Option<&toml::Value>| {
        let Some(table) = table.and_then(toml::Value::as_table) else {
            return;
        };
        for (name, spec) in table {
            deps.push(Dependency {
                name: name.clone(),
                version: cargo_version(spec),
            });
        }
    };
    for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
        collect(doc.get(section));
    }
    collect(doc.get("workspace").and_then(|w| w.get("dependencies")));
    Ok(deps)
}

fn cargo_version(spec: &toml::Value) -> Option<String> {
    match spec {
        toml::Value::String(v) => Some(v.clone()),
        toml::Value::Table(t) => {
            if let Some(v) = t.get("version").and_then(toml::Value::as_str) {
                Some(v.to_string())
            } else if let Some(p) = t.get("path").and_then(toml::Value::as_str) {
                Some(format!("path:{}", p))
            } else if let Some(g) = t.get("git").and_then(toml::Value::as_str) {
                Some(format!("git:{}", g))
            } else if t.get("workspace").and_then(toml::Value::as_bool) == Some(true) {
                Some("workspace".to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_package_json(text: &str) -> anyhow::Result<Vec<Dependency>> {
    let doc: serde_json::Value = serde_json::from_str(text)?;
    let mut deps = Vec::new();
    for section in ["dependencies", "devDependencies", "peerDependencies"] {
        if let Some(map) = doc.get(section).and_then(|v| v.as_object()) {
            for (name, version) in map {
                deps.push(Dependency {
                    name: name.clone(),
                    version: version.as_str().map(str::to_string),
                });
            }
        }
    }
    Ok(deps)
}

fn parse_requirements(text: &str) -> Vec<Dependency> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty() && !line.starts_with('-'))
        .map(parse_pep508)
        .collect()
}

/// `name[extras] (op version)?; markers` -> name and version requirement.
fn parse_pep508(requirement: &str) -> Dependency {
    let requirement = requirement.split(';').next().unwrap_or("").trim();
    let split_at = requirement
        .find(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | ' ' | '('))
        .unwrap_or(requirement.len());
    let (name, version) = requirement.split_at(split_at);
    let name = name.split('[').next().unwrap_or(name).trim();
    let version = version
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    Dependency {
        name: name.to_string(),
        version: (!version.is_empty()).then(|| version.to_string()),
    }
}

fn parse_pyproject(text: &str) -> anyhow::Result<Vec<Dependency>> {
    let doc: toml::Table = toml::from_str(text)?;
    let mut deps: Vec<Dependency> = doc
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(toml::Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(toml::Value::as_str)
                .map(parse_pep508)
                .collect()
        })
        .unwrap_or_default();

    if let Some(poetry) = doc
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(toml::Value::as_table)
    {
        for (name, spec) in poetry {
            if name == "python" {
                continue;
            }
            deps.push(Dependency {
                name: name.clone(),
                version: cargo_version(spec),
            });
        }
    }
    Ok(deps)
}

fn parse_go_mod(text: &str) -> Vec<Dependency> {
    let mut deps = Vec::new();
    let mut in_block = false;
    for line in text.lines() {
        let line = line.split("//").next().unwrap_or("").trim();
        let spec = if in_block {
            if line == ")" {
                in_block = false;
                continue;
            }
            line
        } else if line == "require (" {
            in_block = true;
            continue;
        } else if let Some(rest) = line.strip_prefix("require ") {
            rest
        } else {
            continue;
        };
        let mut parts = spec.split_whitespace();
        if let Some(module) = parts.next() {
            deps.push(Dependency {
                name: module.to_string(),
                version: parts.next().map(str::to_string),
            });
        }
    }
    deps
}
