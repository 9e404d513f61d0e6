use anyhow::{bail, Context};
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SAMPLED_MAX_FILES: usize = 5_000;
const THOROUGH_MAX_FILES: usize = 50_000;
const SAMPLED_MAX_FILE_BYTES: u64 = 1024 * 1024;

const DEFAULT_EXCLUDES: &[&str] = &[
    "!**/.git/**",
    "!**/target/**",
    "!**/node_modules/**",
    "!**/dist/**",
    "!**/build/**",
    "!**/vendor/**",
    "!**/__pycache__/**",
    "!**/.venv/**",
    "!**/coverage/**",
];

/// Sampling limits for one walk. Thorough walks visit more files and read
/// files of any size.
#[derive(Debug, Clone, Copy)]
pub struct WalkLimits {
    pub max_files: usize,
    pub max_file_bytes: Option<u64>,
}

impl WalkLimits {
    pub fn for_task(thorough: bool) -> Self {
        if thorough {
            Self {
                max_files: THOROUGH_MAX_FILES,
                max_file_bytes: None,
            }
        } else {
            Self {
                max_files: SAMPLED_MAX_FILES,
                max_file_bytes: Some(SAMPLED_MAX_FILE_BYTES),
            }
        }
    }

    pub fn allows_reading(&self, size: u64) -> bool {
        self.max_file_bytes.map_or(true, |cap| size <= cap)
    }
}

#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub path: PathBuf,
    /// Path relative to the repository root, `/`-separated.
    pub relative: String,
    pub size: u64,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct RepositoryWalk {
    pub files: Vec<WalkedFile>,
    pub directories: Vec<String>,
    pub truncated: bool,
}

impl RepositoryWalk {
    pub fn has_file(&self, relative: &str) -> bool {
        self.files.iter().any(|f| f.relative == relative)
    }

    pub fn has_dir(&self, relative: &str) -> bool {
        self.directories.iter().any(|d| d == relative)
    }

    /// True if any directory component anywhere in the tree is named `name`.
    pub fn has_dir_named(&self, name: &str) -> bool {
        self.directories
            .iter()
            .any(|d| d.rsplit('/').next() == Some(name))
    }
}

/// Walks `root` honouring .gitignore, skipping build output and VCS metadata.
pub fn walk_repository(root: &Path, limits: WalkLimits) -> anyhow::Result<RepositoryWalk> {
    if !root.is_dir() {
        bail!("repository path {} is not a directory", root.display());
    }

    let mut overrides = OverrideBuilder::new(root);
    for exclude in DEFAULT_EXCLUDES {
        overrides
            .add(exclude)
            .with_context(|| format!("invalid exclude pattern {}", exclude))?;
    }
    let overrides = overrides.build().context("building walk overrides")?;

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .ignore(true)
        .require_git(false)
        .overrides(overrides)
        .build();

    let mut walk = RepositoryWalk::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("walker error: {}", e);
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if relative == ".git" || relative.starts_with(".git/") {
            continue;
        }

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            walk.directories.push(relative);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        if walk.files.len() >= limits.max_files {
            walk.truncated = true;
            break;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        walk.files.push(WalkedFile {
            path: entry.path().to_path_buf(),
            relative,
            size,
            depth: entry.depth(),
        });
    }

    debug!(
        root = %root.display(),
        files = walk.files.len(),
        directories = walk.directories.len(),
        truncated = walk.truncated,
        "repository walk complete"
    );
    Ok(walk)
}

/// Reads a text file, returning None for binaries and files over the cap.
pub fn read_text(file: &WalkedFile, limits: WalkLimits) -> Option<String> {
    if !limits.allows_reading(file.size) {
        return None;
    }
    let bytes = std::fs::read(&file.path).ok()?;
    if bytes.iter().take(8192).any(|b| *b == 0) {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
