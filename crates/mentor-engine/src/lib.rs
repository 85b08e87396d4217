//! # mentor-engine
//!
//! Deterministic availability matching and recurring lesson resolution for
//! a volunteer mentorship platform.
//!
//! Every operation is a pure function over fully loaded domain values and
//! an explicit reference instant; nothing reads the clock or touches I/O.
//! Workflows that must read or write persisted state go through the narrow
//! traits in [`store`], implemented by the caller's transactional backend.
//!
//! ## Modules
//!
//! - [`interval`]: weekly time windows, midnight-wrap expansion, overlap tests
//! - [`matcher`]: subject and availability filtering of candidates, preferred-window ranking
//! - [`taxonomy`]: popularity-ranked field/subfield/skill trees and their cache
//! - [`recurrence`]: next/previous occurrence of weekly series under per-participant exceptions
//! - [`partnership`]: courses, the alternating two-mentor schedule, course start computation
//! - [`request`]: partnership-request lifecycle, waiting pool, re-match cooldown
//! - [`store`]: external collaborator traits and an in-memory implementation
//! - [`config`]: tunable grace windows and cooldowns
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod interval;
pub mod matcher;
pub mod model;
pub mod partnership;
pub mod recurrence;
pub mod request;
pub mod store;
pub mod taxonomy;

pub use config::EngineConfig;
pub use error::{EngineError, StoreResult, WorkflowError};
pub use interval::{AvailabilityWindow, TimeOfDay, TimeWindow};
pub use matcher::{
    filter_candidates, is_eligible, rank_candidates, MatchQuery, Ranked, SubfieldFilter,
    SubfieldSelector, SubjectFilter,
};
pub use model::{
    Candidate, CandidateRef, CourseId, CourseTypeId, FieldId, LessonId, MentorId, RequestId,
    SkillId, StudentId, SubfieldId, SubjectCapability, UserId,
};
pub use partnership::{
    course_start_after, ensure_schedule, generate_schedule, mentor_for_instant,
    next_assigned_occurrence, reassign_entry, Course, CourseType, PartnershipSchedule,
    ScheduleEntry, ScheduleGeneration,
};
pub use recurrence::{
    apply_cancellation, cancel_lesson_occurrence, cancel_remaining_lesson, next_lesson_for,
    next_occurrence, plan_single_cancellation, previous_occurrence, ExceptionSet, Lesson,
    LessonSeries, Perspective, SeriesId,
};
pub use request::{
    apply_outcome, check_can_request, open_request, search_waiting_pool, PartnershipRequest,
    RequestOutcome, RequestStatus, WaitingRequest,
};
pub use store::InMemoryStore;
pub use taxonomy::{build_taxonomy, Taxonomy, TaxonomyCache};
