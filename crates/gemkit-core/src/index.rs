//! Multi-source specification index.
//!
//! An [`Index`] owns a two-level map (name → full name → spec) for its own
//! layer, a list of superseded "duplicate" specs kept for enumeration, and an
//! ordered list of child [`Source`]s whose results are federated into every
//! lookup. Unknown names read as empty; lookups never insert.
//!
//! Two merge flavours exist. [`Index::reverse_merge`] keeps what is already
//! here and records incoming clashes as duplicates; [`Index::merge`] lets the
//! incoming spec win and records the displaced local one.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use gemkit_schema::{Specification, Version};

/// What to look for in an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// The single spec with this full name.
    FullName {
        /// Package name, used to pick the bucket.
        name: String,
        /// `name-version[-platform]`.
        full_name: String,
    },
    /// Every spec with this name.
    Name(String),
    /// Every spec with this name and version.
    NameVersion(String, Version),
}

impl Query {
    /// The package name the query is about.
    pub fn name(&self) -> &str {
        match self {
            Self::FullName { name, .. } | Self::Name(name) | Self::NameVersion(name, _) => name,
        }
    }
}

impl From<&Specification> for Query {
    fn from(spec: &Specification) -> Self {
        Self::FullName {
            name: spec.name.clone(),
            full_name: spec.full_name(),
        }
    }
}

impl From<&str> for Query {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Query {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<(&str, Version)> for Query {
    fn from((name, version): (&str, Version)) -> Self {
        Self::NameVersion(name.to_string(), version)
    }
}

impl From<(&str, &Version)> for Query {
    fn from((name, version): (&str, &Version)) -> Self {
        Self::NameVersion(name.to_string(), version.clone())
    }
}

/// Anything that can be federated into an [`Index`]: a remote registry
/// client, a cache layer, or another index.
pub trait Source: fmt::Debug + Send + Sync {
    /// Specs matching `query`, without duplicates.
    fn search(&self, query: &Query) -> Vec<Specification>;

    /// Every spec known under `name`, superseded ones included.
    fn search_all(&self, name: &str) -> Vec<Specification>;

    /// Enumerate every spec this source provides. Each call starts over.
    fn each(&self) -> Box<dyn Iterator<Item = &Specification> + '_>;

    /// Approximate catalog volume.
    fn size(&self) -> usize {
        self.each().count()
    }

    /// Names of every spec this source provides, first occurrence first.
    fn spec_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.each()
            .filter(|spec| seen.insert(spec.name.as_str()))
            .map(|spec| spec.name.clone())
            .collect()
    }
}

/// A layered, searchable collection of specifications.
#[derive(Clone, Default)]
pub struct Index {
    specs: BTreeMap<String, BTreeMap<String, Specification>>,
    duplicates: BTreeMap<String, Vec<Specification>>,
    sources: Vec<Arc<dyn Source>>,
}

impl Index {
    /// An empty index with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index and populate it in one expression.
    pub fn build(f: impl FnOnce(&mut Self)) -> Self {
        let mut index = Self::new();
        f(&mut index);
        index
    }

    /// Insert `spec`, replacing any spec with the same full name in this
    /// layer. Child sources are never touched.
    pub fn add(&mut self, spec: Specification) -> &Specification {
        let full_name = spec.full_name();
        let by_name = self.specs.entry(spec.name.clone()).or_default();
        match by_name.entry(full_name) {
            Entry::Occupied(mut slot) => {
                slot.insert(spec);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(spec),
        }
    }

    /// Combine with `other`, keeping existing specs (`use`).
    ///
    /// Incoming specs whose full name is already present are recorded as
    /// duplicates; the rest are added.
    pub fn reverse_merge<S: Source + ?Sized>(&mut self, other: &S) -> &mut Self {
        for spec in other.each() {
            if self.contains_spec(spec) {
                self.add_duplicate(spec.clone());
            } else {
                self.add(spec.clone());
            }
        }
        self
    }

    /// Combine with `other`, letting incoming specs win (`merge!`).
    ///
    /// Each local spec that gets overwritten is recorded as a duplicate.
    pub fn merge<S: Source + ?Sized>(&mut self, other: &S) -> &mut Self {
        for spec in other.each() {
            if let Some(existing) = self.find_by_spec(spec).cloned() {
                self.add_duplicate(existing);
            }
            self.add(spec.clone());
        }
        self
    }

    /// Search this layer and every child source.
    ///
    /// Results are local matches followed by each source's matches in source
    /// order, deduplicated by full name keeping the first occurrence.
    pub fn search(&self, query: impl Into<Query>) -> Vec<Specification> {
        let query = query.into();
        let mut results = self.local_search(&query);
        if self.sources.is_empty() {
            return results;
        }

        for source in &self.sources {
            results.extend(source.search(&query));
        }
        uniq_by_full_name(results)
    }

    /// Every spec named `name`: local ones, then this layer's duplicates,
    /// then each source's `search_all`. Not deduplicated.
    pub fn search_all(&self, name: &str) -> Vec<Specification> {
        let mut all: Vec<Specification> = self.specs_by_name(name).cloned().collect();
        if let Some(dupes) = self.duplicates.get(name) {
            all.extend(dupes.iter().cloned());
        }
        for source in &self.sources {
            all.extend(source.search_all(name));
        }
        all
    }

    /// Every spec owned by this layer, then every spec of each source in
    /// source order. Duplicates are not included.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Specification> + '_> {
        let local = self.specs.values().flat_map(BTreeMap::values);
        let children = self.sources.iter().flat_map(|source| source.each());
        Box::new(local.chain(children))
    }

    /// Whether neither this layer nor any source holds a spec.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Local entry count plus each source's size. Specs present in several
    /// layers are counted once per layer.
    pub fn size(&self) -> usize {
        let local: usize = self.specs.values().map(BTreeMap::len).sum();
        self.sources
            .iter()
            .fold(local, |size, source| size + source.size())
    }

    /// Names present in this layer followed by names from each source.
    pub fn spec_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let local = self
            .specs
            .iter()
            .filter(|(_, by_full_name)| !by_full_name.is_empty())
            .map(|(name, _)| name.clone());
        let children = self.sources.iter().flat_map(|source| source.spec_names());
        local.chain(children).filter(|n| seen.insert(n.clone())).collect()
    }

    /// Names of every runtime dependency of every reachable spec.
    pub fn dependency_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for spec in self.iter() {
            for dep in spec.runtime_dependencies() {
                if seen.insert(dep.name.as_str()) {
                    names.push(dep.name.clone());
                }
            }
        }
        names
    }

    /// Runtime dependency names that no reachable spec provides.
    pub fn unmet_dependency_names(&self) -> Vec<String> {
        self.dependency_names()
            .into_iter()
            .filter(|name| self.search(name.as_str()).is_empty())
            .collect()
    }

    /// Whether every spec here has a counterpart in `other` with the same
    /// runtime dependencies and source.
    ///
    /// This is containment, not equality: `a.contained_in(&b)` says nothing
    /// about `b.contained_in(&a)`.
    pub fn contained_in<S: Source + ?Sized>(&self, other: &S) -> bool {
        self.iter().all(|spec| {
            other
                .search(&Query::from(spec))
                .first()
                .is_some_and(|other_spec| {
                    spec.sorted_runtime_dependencies() == other_spec.sorted_runtime_dependencies()
                        && spec.source == other_spec.source
                })
        })
    }

    /// Attach a child source. Attaching the same source twice is a no-op.
    pub fn add_source(&mut self, source: Arc<dyn Source>) {
        self.sources.push(source);
        let mut seen: Vec<*const ()> = Vec::new();
        self.sources.retain(|s| {
            let ptr = Arc::as_ptr(s).cast::<()>();
            if seen.contains(&ptr) {
                false
            } else {
                seen.push(ptr);
                true
            }
        });
    }

    /// The attached child sources, in order.
    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    /// Specs superseded under `name` by earlier merges.
    pub fn duplicates(&self, name: &str) -> &[Specification] {
        self.duplicates.get(name).map_or(&[], Vec::as_slice)
    }

    /// Look up a spec with the same full name in this layer.
    pub fn find_by_spec(&self, spec: &Specification) -> Option<&Specification> {
        self.find_by_full_name(&spec.name, &spec.full_name())
    }

    fn find_by_full_name(&self, name: &str, full_name: &str) -> Option<&Specification> {
        self.specs.get(name).and_then(|m| m.get(full_name))
    }

    fn contains_spec(&self, spec: &Specification) -> bool {
        self.find_by_spec(spec).is_some()
    }

    fn specs_by_name(&self, name: &str) -> impl Iterator<Item = &Specification> {
        self.specs.get(name).into_iter().flat_map(BTreeMap::values)
    }

    fn local_search(&self, query: &Query) -> Vec<Specification> {
        match query {
            Query::FullName { name, full_name } => self
                .find_by_full_name(name, full_name)
                .into_iter()
                .cloned()
                .collect(),
            Query::Name(name) => self.specs_by_name(name).cloned().collect(),
            Query::NameVersion(name, version) => self
                .specs_by_name(name)
                .filter(|spec| spec.version == *version)
                .cloned()
                .collect(),
        }
    }

    fn add_duplicate(&mut self, spec: Specification) {
        self.duplicates
            .entry(spec.name.clone())
            .or_default()
            .push(spec);
    }
}

fn uniq_by_full_name(specs: Vec<Specification>) -> Vec<Specification> {
    let mut seen = HashSet::new();
    specs
        .into_iter()
        .filter(|spec| seen.insert(spec.full_name()))
        .collect()
}

impl Source for Index {
    fn search(&self, query: &Query) -> Vec<Specification> {
        Index::search(self, query.clone())
    }

    fn search_all(&self, name: &str) -> Vec<Specification> {
        Index::search_all(self, name)
    }

    fn each(&self) -> Box<dyn Iterator<Item = &Specification> + '_> {
        self.iter()
    }

    fn size(&self) -> usize {
        Index::size(self)
    }

    fn spec_names(&self) -> Vec<String> {
        Index::spec_names(self)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("sources", &self.sources)
            .field("specs.size", &self.specs.len())
            .finish_non_exhaustive()
    }
}
