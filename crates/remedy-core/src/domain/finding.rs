//! Externally supplied findings and their structural validation.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::error::FindingError;

/// Category assigned to findings that do not name one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Informational severity. Only consulted for approval routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// File path plus an optional line region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

impl Location {
    pub fn file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            line: None,
            end_line: None,
        }
    }

    pub fn at(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            end_line: None,
        }
    }

    /// Location used for failures that cannot be pinned to a file.
    pub fn workspace() -> Self {
        Self::file(".")
    }

    pub fn is_workspace(&self) -> bool {
        self.file == PathBuf::from(".")
    }

    /// This location with its file rewritten workspace-relative, or `None`
    /// when the file lies outside `workspace`.
    pub fn within(&self, workspace: &Path) -> Option<Location> {
        Some(Location {
            file: workspace_relative(workspace, &self.file)?,
            line: self.line,
            end_line: self.end_line,
        })
    }
}

/// Resolve `path` lexically against `workspace` and return it relative to it.
///
/// `a.rs`, `./a.rs`, `sub/../a.rs` and `<workspace>/a.rs` all map to `a.rs`.
/// Returns `None` for paths that leave the workspace. Symlinks are not
/// followed, except that a canonicalized workspace prefix is also accepted
/// for absolute paths.
pub fn workspace_relative(workspace: &Path, path: &Path) -> Option<PathBuf> {
    let relative = if path.has_root() {
        let path = lexical(path)?;
        workspace_roots(workspace)
            .into_iter()
            .find_map(|root| path.strip_prefix(&root).ok().map(Path::to_path_buf))?
    } else {
        path.to_path_buf()
    };

    let normalized = lexical(&relative)?;
    if normalized.has_root() {
        return None;
    }
    if normalized.as_os_str().is_empty() {
        Some(PathBuf::from("."))
    } else {
        Some(normalized)
    }
}

/// Drop `.` and fold `..` into its parent. `None` if `..` climbs past the start.
fn lexical(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            root @ (Component::RootDir | Component::Prefix(_)) => out.push(root.as_os_str()),
        }
    }
    Some(out)
}

/// Absolute spellings of the workspace root an absolute finding path may start with.
fn workspace_roots(workspace: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let absolute = if workspace.has_root() {
        Some(workspace.to_path_buf())
    } else {
        std::env::current_dir().ok().map(|cwd| cwd.join(workspace))
    };
    if let Some(root) = absolute.as_deref().and_then(lexical) {
        roots.push(root);
    }
    if let Ok(canonical) = std::fs::canonicalize(workspace) {
        if !roots.contains(&canonical) {
            roots.push(canonical);
        }
    }
    roots
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file.display())?;
        match (self.line, self.end_line) {
            (Some(start), Some(end)) if end != start => write!(f, ":{start}-{end}"),
            (Some(start), _) => write!(f, ":{start}"),
            _ => Ok(()),
        }
    }
}

/// One issue to remediate, as reported by an external analysis tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub location: Location,
    pub severity: Severity,
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Finding {
    pub fn new(
        id: impl Into<String>,
        location: Location,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location,
            severity,
            description: description.into(),
            category: default_category(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// Check the structure of a finding batch. Provenance is not checked.
pub fn validate_findings(findings: &[Finding]) -> Result<(), FindingError> {
    let mut seen = HashSet::new();
    for finding in findings {
        if finding.id.trim().is_empty() {
            return Err(FindingError::EmptyId);
        }
        if !seen.insert(finding.id.as_str()) {
            return Err(FindingError::DuplicateId(finding.id.clone()));
        }
        if finding.location.file.as_os_str().is_empty() {
            return Err(FindingError::EmptyPath {
                id: finding.id.clone(),
            });
        }
        if let (Some(line), Some(end_line)) = (finding.location.line, finding.location.end_line) {
            if end_line < line {
                return Err(FindingError::InvertedRegion {
                    id: finding.id.clone(),
                    line,
                    end_line,
                });
            }
        }
    }
    Ok(())
}

/// Rewrite every finding's location workspace-relative.
///
/// Fails on the first location outside `workspace`, so nothing outside the
/// workspace is ever handed to a fix plugin.
pub fn confine_findings(
    findings: Vec<Finding>,
    workspace: &Path,
) -> Result<Vec<Finding>, FindingError> {
    findings
        .into_iter()
        .map(|mut finding| {
            finding.location = finding.location.within(workspace).ok_or_else(|| {
                FindingError::OutsideWorkspace {
                    id: finding.id.clone(),
                    path: finding.location.file.clone(),
                }
            })?;
            Ok(finding)
        })
        .collect()
}
