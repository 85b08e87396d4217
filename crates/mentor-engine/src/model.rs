//! Shared domain vocabulary: identifiers, the subject taxonomy, and the
//! candidate shape consumed by the matcher and the taxonomy aggregator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interval::AvailabilityWindow;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// A platform user. Mentors and students share one id space.
    UserId
);
id_type!(LessonId);
id_type!(CourseId);
id_type!(CourseTypeId);
id_type!(RequestId);
id_type!(FieldId);
id_type!(SubfieldId);
id_type!(SkillId);

pub type MentorId = UserId;
pub type StudentId = UserId;

/// A top-level subject area, e.g. "Mathematics".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub name: String,
}

/// A subject inside a field, e.g. "Algebra".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfield {
    pub id: SubfieldId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: SkillId,
    pub name: String,
}

/// One subfield a candidate can teach, with the skills they cover in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCapability {
    pub field: Field,
    pub subfield: Subfield,
    #[serde(default)]
    pub skills: Vec<Skill>,
}

impl SubjectCapability {
    pub fn has_skill(&self, skill: SkillId) -> bool {
        self.skills.iter().any(|s| s.id == skill)
    }
}

/// Who a candidate stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CandidateRef {
    Mentor(MentorId),
    Course(CourseId),
}

impl fmt::Display for CandidateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateRef::Mentor(id) => write!(f, "mentor:{id}"),
            CandidateRef::Course(id) => write!(f, "course:{id}"),
        }
    }
}

/// A mentor, or a course seen through its mentors, as offered to a seeker.
///
/// Loaded read-only for each matching call; the engine never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateRef,
    #[serde(default)]
    pub subjects: Vec<SubjectCapability>,
    #[serde(default)]
    pub availability: Vec<AvailabilityWindow>,
}

impl Candidate {
    pub fn mentor(id: MentorId) -> Self {
        Self {
            id: CandidateRef::Mentor(id),
            subjects: Vec::new(),
            availability: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: SubjectCapability) -> Self {
        self.subjects.push(subject);
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: AvailabilityWindow) -> Self {
        self.availability.push(window);
        self
    }

    /// A profile without subjects or availability never matches anything.
    pub fn is_complete(&self) -> bool {
        !self.subjects.is_empty() && !self.availability.is_empty()
    }

    pub fn subject(&self, subfield: SubfieldId) -> Option<&SubjectCapability> {
        self.subjects.iter().find(|s| s.subfield.id == subfield)
    }

    /// Combine the mentors of a course into one candidate.
    ///
    /// The course teaches only subfields every mentor shares; within a
    /// shared subfield the skills are unioned. Availability is the union of
    /// all mentors' windows, since either mentor may lead a given week.
    pub fn combined(course: CourseId, mentors: &[Candidate]) -> Self {
        let mut subjects: Vec<SubjectCapability> = Vec::new();
        if let Some((first, rest)) = mentors.split_first() {
            for capability in &first.subjects {
                let shared = rest
                    .iter()
                    .all(|m| m.subject(capability.subfield.id).is_some());
                if !shared {
                    continue;
                }
                let mut merged = capability.clone();
                for other in rest.iter().filter_map(|m| m.subject(capability.subfield.id)) {
                    for skill in &other.skills {
                        if !merged.has_skill(skill.id) {
                            merged.skills.push(skill.clone());
                        }
                    }
                }
                subjects.push(merged);
            }
        }

        let availability = mentors
            .iter()
            .flat_map(|m| m.availability.iter().cloned())
            .collect();

        Self {
            id: CandidateRef::Course(course),
            subjects,
            availability,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn capability(field: u64, subfield: u64, skills: &[u64]) -> SubjectCapability {
        SubjectCapability {
            field: Field {
                id: FieldId(field),
                name: format!("field-{field}"),
            },
            subfield: Subfield {
                id: SubfieldId(subfield),
                name: format!("subfield-{subfield}"),
            },
            skills: skills
                .iter()
                .map(|&id| Skill {
                    id: SkillId(id),
                    name: format!("skill-{id}"),
                })
                .collect(),
        }
    }
}
