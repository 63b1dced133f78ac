//! Project model: build targets, their source roots and configuration
//!
//! The model is read-only input to a build session. It is loaded from JSON
//! and never written back by the build.

use crate::error::{BuildError, BuildResult};
use crate::storage::read_json_file;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Stable identifier of a build target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of a build target.
///
/// Production and test targets are module based: they take part in the
/// fixed-point builder pipeline and keep deleted-file bookkeeping across
/// configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Production,
    Tests,
    Artifact,
    Custom(String),
}

impl TargetKind {
    pub fn is_module_based(&self) -> bool {
        matches!(self, Self::Production | Self::Tests)
    }

    pub fn is_tests(&self) -> bool {
        matches!(self, Self::Tests)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Tests => f.write_str("tests"),
            Self::Artifact => f.write_str("artifact"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Production/test partition of dirty and deleted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScope {
    Production,
    Tests,
}

impl SourceScope {
    pub const ALL: [SourceScope; 2] = [SourceScope::Production, SourceScope::Tests];

    pub fn from_tests(tests: bool) -> Self {
        if tests { Self::Tests } else { Self::Production }
    }

    pub fn is_tests(self) -> bool {
        self == Self::Tests
    }
}

/// A source directory of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRoot {
    pub path: PathBuf,
    /// Test sources even inside a production target
    #[serde(default)]
    pub tests: bool,
    /// Written by a build step rather than by the user
    #[serde(default)]
    pub generated: bool,
}

impl SourceRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tests: false,
            generated: false,
        }
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }
}

/// One addressable unit of compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub id: TargetId,
    pub kind: TargetKind,
    pub roots: Vec<SourceRoot>,
    #[serde(default)]
    pub excludes: Vec<PathBuf>,
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<TargetId>,
    /// Everything besides file contents that affects the build (flags, profiles, versions)
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

impl BuildTarget {
    pub fn new(id: impl Into<TargetId>, kind: TargetKind) -> Self {
        Self {
            id: id.into(),
            kind,
            roots: Vec::new(),
            excludes: Vec::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
            configuration: BTreeMap::new(),
        }
    }

    pub fn with_root(mut self, root: SourceRoot) -> Self {
        self.roots.push(root);
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.outputs.push(output.into());
        self
    }

    pub fn with_exclude(mut self, exclude: impl Into<PathBuf>) -> Self {
        self.excludes.push(exclude.into());
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<TargetId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.configuration.insert(key.into(), value.into());
        self
    }

    /// Scope of files under `root`.
    pub fn scope_of(&self, root: &SourceRoot) -> SourceScope {
        SourceScope::from_tests(root.tests || self.kind.is_tests())
    }

    /// Digest of every non-content input of this target.
    ///
    /// Dependencies are not part of it: build order changes do not
    /// invalidate already compiled files.
    pub fn configuration_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update([0]);
        for (key, value) in &self.configuration {
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        for root in &self.roots {
            hasher.update(root.path.to_string_lossy().as_bytes());
            hasher.update([u8::from(root.tests), u8::from(root.generated), 0]);
        }
        for exclude in &self.excludes {
            hasher.update(b"-");
            hasher.update(exclude.to_string_lossy().as_bytes());
            hasher.update([0]);
        }
        for output in &self.outputs {
            hasher.update(b">");
            hasher.update(output.to_string_lossy().as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// All targets of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectModel {
    pub targets: Vec<BuildTarget>,
}

impl ProjectModel {
    pub fn new(targets: Vec<BuildTarget>) -> Self {
        Self { targets }
    }

    /// Load a model from a JSON file.
    ///
    /// Relative paths are resolved against the directory containing the file.
    pub fn from_file(path: &Path) -> BuildResult<Self> {
        let mut model: Self = read_json_file(path).map_err(|e| BuildError::InvalidModel(e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        model.resolve_paths(base);
        model.validate()?;
        Ok(model)
    }

    /// Make every path absolute against `base` and lexically normalized.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            *path = normalize(&base.join(&*path));
        };
        for target in &mut self.targets {
            for root in &mut target.roots {
                resolve(&mut root.path);
            }
            target.excludes.iter_mut().for_each(resolve);
            target.outputs.iter_mut().for_each(resolve);
        }
    }

    /// Check identifiers are unique and dependencies resolve.
    pub fn validate(&self) -> BuildResult<()> {
        let mut ids = HashSet::new();
        for target in &self.targets {
            if !ids.insert(&target.id) {
                return Err(BuildError::InvalidModel(format!("duplicate target id '{}'", target.id)));
            }
        }
        for target in &self.targets {
            if let Some(missing) = target.dependencies.iter().find(|dep| !ids.contains(dep)) {
                return Err(BuildError::InvalidModel(format!(
                    "target '{}' depends on unknown target '{missing}'",
                    target.id
                )));
            }
        }
        Ok(())
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the parent.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            other => result.push(other),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("a/b/../../..")), PathBuf::from(".."));
    }

    #[test]
    fn test_fingerprint_changes_with_configuration() {
        let target = BuildTarget::new("m", TargetKind::Production)
            .with_root(SourceRoot::new("/p/src"))
            .with_output("/p/out");
        let before = target.configuration_fingerprint();
        assert_eq!(before, target.clone().configuration_fingerprint());

        let changed = target.clone().with_option("javac.target", "21");
        assert_ne!(before, changed.configuration_fingerprint());

        let with_dep = target.with_dependency("other");
        assert_eq!(before, with_dep.configuration_fingerprint());
    }

    #[test]
    fn test_model_from_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            r#"{"targets": [
                {"id": "core", "kind": "production", "roots": [{"path": "core/src"}], "outputs": ["out/core"]},
                {"id": "core-tests", "kind": "tests", "roots": [{"path": "core/test"}],
                 "dependencies": ["core"], "configuration": {"junit": "5"}}
            ]}"#,
        )
        .unwrap();

        let model = ProjectModel::from_file(&path).unwrap();
        assert_eq!(model.targets.len(), 2);
        assert_eq!(model.targets[0].roots[0].path, dir.path().join("core/src"));
        assert_eq!(model.targets[1].kind, TargetKind::Tests);
        assert_eq!(model.targets[1].scope_of(&model.targets[1].roots[0]), SourceScope::Tests);
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let model = ProjectModel::new(vec![
            BuildTarget::new("a", TargetKind::Production).with_dependency("missing"),
        ]);
        assert!(matches!(model.validate(), Err(BuildError::InvalidModel(_))));
    }
}
