//! Subject and time eligibility of candidates against a seeker's filter.
//!
//! Used by mentor search, course search, and the waiting-pool search. The
//! candidate pool comes pre-filtered from storage; everything fine-grained
//! happens here with typed comparisons.

use serde::{Deserialize, Serialize};

use crate::interval::{any_overlap, expand_all, AvailabilityWindow, TimeWindow};
use crate::model::{Candidate, FieldId, SkillId, SubfieldId};

/// Which subfield a filter entry targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubfieldSelector {
    /// Any subfield of the field; narrowed only by the filter's skills.
    All,
    Only(SubfieldId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubfieldFilter {
    pub subfield: SubfieldSelector,
    #[serde(default)]
    pub skills: Vec<SkillId>,
}

impl SubfieldFilter {
    pub fn only(subfield: SubfieldId) -> Self {
        Self {
            subfield: SubfieldSelector::Only(subfield),
            skills: Vec::new(),
        }
    }

    pub fn all() -> Self {
        Self {
            subfield: SubfieldSelector::All,
            skills: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_skills(mut self, skills: impl IntoIterator<Item = SkillId>) -> Self {
        self.skills.extend(skills);
        self
    }
}

/// What the seeker wants to learn.
///
/// Skills are only meaningful under a subfield. An empty `subfields` list
/// accepts any subfield of the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFilter {
    pub field: FieldId,
    #[serde(default)]
    pub subfields: Vec<SubfieldFilter>,
}

impl SubjectFilter {
    pub fn field(field: FieldId) -> Self {
        Self {
            field,
            subfields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_subfield(mut self, subfield: SubfieldFilter) -> Self {
        self.subfields.push(subfield);
        self
    }

    fn all_skills(&self) -> impl Iterator<Item = SkillId> + '_ {
        self.subfields.iter().flat_map(|s| s.skills.iter().copied())
    }

    /// Whether `candidate` teaches something this filter asks for.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        let owns_field = candidate.subjects.iter().any(|c| c.field.id == self.field);
        if self.subfields.is_empty() {
            return owns_field;
        }

        self.subfields.iter().any(|entry| match entry.subfield {
            SubfieldSelector::All => {
                let mut skills = self.all_skills().peekable();
                if skills.peek().is_none() {
                    owns_field
                } else {
                    skills.any(|skill| candidate.subjects.iter().any(|c| c.has_skill(skill)))
                }
            }
            SubfieldSelector::Only(id) => candidate.subject(id).is_some_and(|owned| {
                entry.skills.is_empty() || entry.skills.iter().any(|&s| owned.has_skill(s))
            }),
        })
    }
}

/// A seeker's search: optional subject plus optional weekly availability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchQuery {
    #[serde(default)]
    pub subject: Option<SubjectFilter>,
    #[serde(default)]
    pub availability: Vec<AvailabilityWindow>,
}

impl MatchQuery {
    /// Parse and expand the query's windows once for a whole pool.
    pub fn prepare(&self) -> PreparedQuery<'_> {
        PreparedQuery {
            subject: self.subject.as_ref(),
            has_time_filter: !self.availability.is_empty(),
            windows: expand_all(&self.availability),
        }
    }
}

/// A [`MatchQuery`] with its windows already expanded.
#[derive(Debug, Clone)]
pub struct PreparedQuery<'a> {
    subject: Option<&'a SubjectFilter>,
    has_time_filter: bool,
    windows: Vec<TimeWindow>,
}

impl PreparedQuery<'_> {
    pub fn matches(&self, candidate: &Candidate) -> bool {
        if !candidate.is_complete() {
            return false;
        }
        if let Some(subject) = self.subject {
            if !subject.matches(candidate) {
                return false;
            }
        }
        if !self.has_time_filter {
            return true;
        }
        any_overlap(&self.windows, &expand_all(&candidate.availability))
    }

    /// Number of the candidate's preferred window pieces that overlap the
    /// query's windows.
    fn preferred_overlaps(&self, candidate: &Candidate) -> usize {
        expand_all(&candidate.availability)
            .iter()
            .filter(|w| w.preferred && self.windows.iter().any(|q| q.overlaps(w)))
            .count()
    }
}

/// Whether `candidate` satisfies the optional subject and time filters.
///
/// Candidates without subjects or without availability never match.
/// Malformed clock strings on either side are skipped, never fatal.
pub fn is_eligible(
    candidate: &Candidate,
    subject: Option<&SubjectFilter>,
    time: Option<&[AvailabilityWindow]>,
) -> bool {
    let availability = time.unwrap_or_default();
    PreparedQuery {
        subject,
        has_time_filter: !availability.is_empty(),
        windows: expand_all(availability),
    }
    .matches(candidate)
}

/// Keep the eligible candidates, preserving pool order.
pub fn filter_candidates<'a>(pool: &'a [Candidate], query: &MatchQuery) -> Vec<&'a Candidate> {
    let prepared = query.prepare();
    let matched: Vec<&Candidate> = pool.iter().filter(|c| prepared.matches(c)).collect();
    tracing::debug!(
        pool = pool.len(),
        matched = matched.len(),
        "filtered candidate pool"
    );
    matched
}

/// An eligible candidate with its ranking score.
#[derive(Debug, Clone, Serialize)]
pub struct Ranked<'a> {
    pub candidate: &'a Candidate,
    pub preferred_overlaps: usize,
}

/// Eligible candidates ordered by how many of their preferred windows meet
/// the query. Ties keep pool order.
pub fn rank_candidates<'a>(pool: &'a [Candidate], query: &MatchQuery) -> Vec<Ranked<'a>> {
    let prepared = query.prepare();
    let mut ranked: Vec<Ranked<'a>> = pool
        .iter()
        .filter(|c| prepared.matches(c))
        .map(|candidate| Ranked {
            candidate,
            preferred_overlaps: prepared.preferred_overlaps(candidate),
        })
        .collect();
    ranked.sort_by(|a, b| b.preferred_overlaps.cmp(&a.preferred_overlaps));
    ranked
}
