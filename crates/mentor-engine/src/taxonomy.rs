//! Popularity-ranked field → subfield → skill trees for filter menus.
//!
//! Each level counts how many candidates expose an entry, considering only
//! candidates that already expose the parent entry, and sorts by that count
//! (descending, ties in first-seen order).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

use crate::model::{Candidate, FieldId, SkillId, SubfieldId, SubjectCapability};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillNode {
    pub id: SkillId,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubfieldNode {
    pub id: SubfieldId,
    pub name: String,
    pub count: usize,
    pub skills: Vec<SkillNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldNode {
    pub id: FieldId,
    pub name: String,
    pub count: usize,
    pub subfields: Vec<SubfieldNode>,
}

pub type Taxonomy = Vec<FieldNode>;

/// Counts entries once per candidate, keeping first-seen order.
struct Tally<K> {
    index: HashMap<K, usize>,
    entries: Vec<(K, String, usize)>,
}

impl<K: Copy + Eq + Hash> Tally<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Record one candidate's entries; duplicates within it count once.
    fn add_candidate<'a>(&mut self, entries: impl IntoIterator<Item = (K, &'a str)>) {
        let mut seen: Vec<K> = Vec::new();
        for (key, name) in entries {
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            match self.index.get(&key) {
                Some(&i) => self.entries[i].2 += 1,
                None => {
                    self.index.insert(key, self.entries.len());
                    self.entries.push((key, name.to_string(), 1));
                }
            }
        }
    }

    fn into_ranked(mut self) -> Vec<(K, String, usize)> {
        // sort_by is stable, so ties keep insertion order.
        self.entries.sort_by(|a, b| b.2.cmp(&a.2));
        self.entries
    }
}

/// Build the three-level taxonomy for a candidate pool.
pub fn build_taxonomy(pool: &[Candidate]) -> Taxonomy {
    let mut fields = Tally::new();
    for candidate in pool {
        fields.add_candidate(
            candidate
                .subjects
                .iter()
                .map(|s| (s.field.id, s.field.name.as_str())),
        );
    }

    fields
        .into_ranked()
        .into_iter()
        .map(|(field_id, name, count)| {
            let in_field: Vec<Vec<&SubjectCapability>> = pool
                .iter()
                .map(|c| c.subjects.iter().filter(|s| s.field.id == field_id).collect::<Vec<_>>())
                .filter(|caps| !caps.is_empty())
                .collect();
            FieldNode {
                id: field_id,
                name,
                count,
                subfields: build_subfields(&in_field),
            }
        })
        .collect()
}

fn build_subfields(in_field: &[Vec<&SubjectCapability>]) -> Vec<SubfieldNode> {
    let mut subfields = Tally::new();
    for caps in in_field {
        subfields.add_candidate(caps.iter().map(|s| (s.subfield.id, s.subfield.name.as_str())));
    }

    subfields
        .into_ranked()
        .into_iter()
        .map(|(subfield_id, name, count)| {
            let mut skills = Tally::new();
            for caps in in_field {
                let owned = caps.iter().filter(|s| s.subfield.id == subfield_id);
                skills.add_candidate(
                    owned.flat_map(|s| s.skills.iter().map(|k| (k.id, k.name.as_str()))),
                );
            }
            SubfieldNode {
                id: subfield_id,
                name,
                count,
                skills: skills
                    .into_ranked()
                    .into_iter()
                    .map(|(id, name, count)| SkillNode { id, name, count })
                    .collect(),
            }
        })
        .collect()
}

/// Identity of a pool's taxonomy-relevant content.
///
/// Covers candidate order, ids, and every subject id and name, so any
/// change that could alter the built tree changes the fingerprint.
pub fn pool_fingerprint(pool: &[Candidate]) -> u64 {
    let mut hasher = DefaultHasher::new();
    pool.len().hash(&mut hasher);
    for candidate in pool {
        candidate.id.hash(&mut hasher);
        candidate.subjects.len().hash(&mut hasher);
        for s in &candidate.subjects {
            s.field.id.hash(&mut hasher);
            s.field.name.hash(&mut hasher);
            s.subfield.id.hash(&mut hasher);
            s.subfield.name.hash(&mut hasher);
            for skill in &s.skills {
                skill.id.hash(&mut hasher);
                skill.name.hash(&mut hasher);
            }
        }
    }
    hasher.finish()
}

type InvalidationHook = Box<dyn Fn(&str) + Send + Sync>;

/// Caller-owned cache of the last built taxonomy.
///
/// Rebuilt when the pool fingerprint changes. External triggers (a mentor
/// editing subjects, a course opening) call [`TaxonomyCache::invalidate`];
/// an injected hook is told about each invalidation.
#[derive(Default)]
pub struct TaxonomyCache {
    entry: Option<(u64, Arc<Taxonomy>)>,
    hook: Option<InvalidationHook>,
}

impl TaxonomyCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_invalidation_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn get_or_build(&mut self, pool: &[Candidate]) -> Arc<Taxonomy> {
        let fingerprint = pool_fingerprint(pool);
        if let Some((cached, taxonomy)) = &self.entry {
            if *cached == fingerprint {
                return Arc::clone(taxonomy);
            }
        }
        tracing::debug!(fingerprint, candidates = pool.len(), "rebuilding taxonomy");
        let taxonomy = Arc::new(build_taxonomy(pool));
        self.entry = Some((fingerprint, Arc::clone(&taxonomy)));
        taxonomy
    }

    pub fn invalidate(&mut self, reason: &str) {
        if self.entry.take().is_some() {
            tracing::debug!(reason, "taxonomy cache invalidated");
        }
        if let Some(hook) = &self.hook {
            hook(reason);
        }
    }

    pub fn is_warm(&self) -> bool {
        self.entry.is_some()
    }
}

impl std::fmt::Debug for TaxonomyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxonomyCache")
            .field("fingerprint", &self.entry.as_ref().map(|(fp, _)| *fp))
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}
