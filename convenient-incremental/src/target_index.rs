//! Build target index: chunk computation and source root lookup

use crate::error::BuildResult;
use crate::model::{BuildTarget, ProjectModel, SourceScope, TargetId};
use convenient_graph::Digraph;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Targets that depend on each other cyclically and are built as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetChunk {
    targets: Vec<TargetId>,
    contains_tests: bool,
    module_based: bool,
}

impl TargetChunk {
    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn contains(&self, target: &TargetId) -> bool {
        self.targets.contains(target)
    }

    pub fn contains_tests(&self) -> bool {
        self.contains_tests
    }

    /// Whether every target in the chunk is module based.
    pub fn is_module_based(&self) -> bool {
        self.module_based
    }

    /// Human readable chunk name for messages.
    pub fn name(&self) -> String {
        match self.targets.as_slice() {
            [single] => single.to_string(),
            [first, rest @ ..] => format!("{first} and {} more", rest.len()),
            [] => String::from("<empty>"),
        }
    }
}

/// A source root of one target, as seen by dirty tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RootDescriptor {
    pub target: TargetId,
    pub root: PathBuf,
    pub scope: SourceScope,
    pub generated: bool,
}

/// Lookup from paths to the source roots containing them.
#[derive(Debug, Default)]
pub struct BuildRootIndex {
    descriptors: Vec<RootDescriptor>,
    by_target: HashMap<TargetId, Vec<usize>>,
    excludes: HashMap<TargetId, Vec<PathBuf>>,
}

impl BuildRootIndex {
    fn new(targets: &BTreeMap<TargetId, BuildTarget>) -> Self {
        let mut index = Self::default();
        for target in targets.values() {
            for root in &target.roots {
                let position = index.descriptors.len();
                index.descriptors.push(RootDescriptor {
                    target: target.id.clone(),
                    root: root.path.clone(),
                    scope: target.scope_of(root),
                    generated: root.generated,
                });
                index.by_target.entry(target.id.clone()).or_default().push(position);
            }
            let _ = index
                .excludes
                .insert(target.id.clone(), target.excludes.clone());
        }
        index
    }

    pub fn target_roots(&self, target: &TargetId) -> Vec<&RootDescriptor> {
        self.by_target
            .get(target)
            .map(|positions| positions.iter().map(|&p| &self.descriptors[p]).collect())
            .unwrap_or_default()
    }

    pub fn is_excluded(&self, target: &TargetId, path: &Path) -> bool {
        self.excludes
            .get(target)
            .is_some_and(|excludes| excludes.iter().any(|exclude| path.starts_with(exclude)))
    }

    /// Every root, of any target, that contains `path` without excluding it.
    pub fn find_all_parent_descriptors(&self, path: &Path) -> Vec<&RootDescriptor> {
        self.descriptors
            .iter()
            .filter(|rd| path.starts_with(&rd.root) && !self.is_excluded(&rd.target, path))
            .collect()
    }

    /// Deepest root of `target` containing `path`.
    pub fn find_parent_descriptor(&self, path: &Path, target: &TargetId) -> Option<&RootDescriptor> {
        if self.is_excluded(target, path) {
            return None;
        }
        self.target_roots(target)
            .into_iter()
            .filter(|rd| path.starts_with(&rd.root))
            .max_by_key(|rd| rd.root.components().count())
    }
}

/// Targets of the project together with their chunks in build order.
#[derive(Debug)]
pub struct BuildTargetIndex {
    targets: BTreeMap<TargetId, BuildTarget>,
    chunks: Vec<TargetChunk>,
    chunk_dependencies: Vec<Vec<usize>>,
    chunk_of: HashMap<TargetId, usize>,
    roots: BuildRootIndex,
}

impl BuildTargetIndex {
    /// Compute chunks as the strongly connected components of the target
    /// dependency graph, ordered dependencies first.
    pub fn new(model: ProjectModel) -> BuildResult<Self> {
        model.validate()?;

        let mut graph = Digraph::<TargetId, ()>::new();
        let mut nodes = HashMap::new();
        for target in &model.targets {
            let _ = nodes.insert(target.id.clone(), graph.add_node(target.id.clone()));
        }
        for target in &model.targets {
            for dependency in &target.dependencies {
                graph.add_edge(nodes[dependency], nodes[&target.id], ())?;
            }
        }

        let targets: BTreeMap<TargetId, BuildTarget> = model
            .targets
            .into_iter()
            .map(|target| (target.id.clone(), target))
            .collect();

        let condensation = graph.condensation();
        let order = condensation.topological_order();
        let mut position_of_component = vec![0; condensation.len()];
        let mut chunks = Vec::with_capacity(order.len());
        let mut chunk_of = HashMap::new();

        for (position, &component) in order.iter().enumerate() {
            position_of_component[component] = position;
            let mut members = Vec::new();
            for &node in condensation.component(component) {
                let id = graph.node(node)?.clone();
                let _ = chunk_of.insert(id.clone(), position);
                members.push(id);
            }
            let contains_tests = members.iter().any(|id| targets[id].kind.is_tests());
            let module_based = members.iter().all(|id| targets[id].kind.is_module_based());
            chunks.push(TargetChunk {
                targets: members,
                contains_tests,
                module_based,
            });
        }

        let chunk_dependencies = order
            .iter()
            .map(|&component| {
                condensation
                    .dependencies(component)
                    .iter()
                    .map(|&dep| position_of_component[dep])
                    .collect()
            })
            .collect();

        debug!("Computed {} chunks for {} targets", chunks.len(), targets.len());
        let roots = BuildRootIndex::new(&targets);
        Ok(Self {
            targets,
            chunks,
            chunk_dependencies,
            chunk_of,
            roots,
        })
    }

    pub fn target(&self, id: &TargetId) -> Option<&BuildTarget> {
        self.targets.get(id)
    }

    pub fn targets(&self) -> impl Iterator<Item = &BuildTarget> {
        self.targets.values()
    }

    /// Chunks in build order.
    pub fn chunks(&self) -> &[TargetChunk] {
        &self.chunks
    }

    /// Positions of the chunks that must be built before chunk `chunk`.
    pub fn chunk_dependencies(&self, chunk: usize) -> &[usize] {
        &self.chunk_dependencies[chunk]
    }

    pub fn chunk_of(&self, target: &TargetId) -> Option<&TargetChunk> {
        self.chunk_of.get(target).map(|&position| &self.chunks[position])
    }

    pub fn roots(&self) -> &BuildRootIndex {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceRoot, TargetKind};

    fn target(id: &str, deps: &[&str]) -> BuildTarget {
        let mut target = BuildTarget::new(id, TargetKind::Production)
            .with_root(SourceRoot::new(format!("/p/{id}/src")));
        for dep in deps {
            target = target.with_dependency(*dep);
        }
        target
    }

    #[test]
    fn test_chunks_follow_dependencies() {
        let model = ProjectModel::new(vec![
            target("app", &["a"]),
            target("a", &["b", "core"]),
            target("b", &["a"]),
            target("core", &[]),
        ]);
        let index = BuildTargetIndex::new(model).unwrap();

        let names: Vec<Vec<&str>> = index
            .chunks()
            .iter()
            .map(|c| c.targets().iter().map(TargetId::as_str).collect())
            .collect();
        assert_eq!(names, vec![vec!["core"], vec!["a", "b"], vec!["app"]]);
        assert_eq!(index.chunk_dependencies(1), &[0]);
        assert_eq!(index.chunk_dependencies(2), &[1]);
        assert_eq!(index.chunks()[1].name(), "a and 1 more");
        assert!(index.chunk_of(&TargetId::new("b")).unwrap().contains(&TargetId::new("a")));
    }

    #[test]
    fn test_root_lookup() {
        let model = ProjectModel::new(vec![
            BuildTarget::new("m", TargetKind::Production)
                .with_root(SourceRoot::new("/p/m/src"))
                .with_root(SourceRoot::new("/p/m/src/gen").generated())
                .with_exclude("/p/m/src/skip"),
            BuildTarget::new("consumer", TargetKind::Production).with_root(SourceRoot::new("/p/m/src/gen")),
        ]);
        let index = BuildTargetIndex::new(model).unwrap();
        let roots = index.roots();
        let m = TargetId::new("m");

        let deepest = roots.find_parent_descriptor(Path::new("/p/m/src/gen/A.java"), &m).unwrap();
        assert!(deepest.generated);
        assert!(roots.find_parent_descriptor(Path::new("/p/m/src/skip/B.java"), &m).is_none());
        assert!(roots.find_parent_descriptor(Path::new("/elsewhere/C.java"), &m).is_none());

        let all = roots.find_all_parent_descriptors(Path::new("/p/m/src/gen/A.java"));
        assert_eq!(all.len(), 3);
        assert_eq!(roots.target_roots(&m).len(), 2);
    }
}
