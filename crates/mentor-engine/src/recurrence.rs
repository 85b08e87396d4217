//! Next/previous occurrence resolution for weekly lesson series.
//!
//! A series starts at an anchor instant and, when recurrent, repeats every
//! seven days until an optional end boundary. Individual occurrences are
//! suppressed per participant by exception records. All functions take the
//! reference instant explicitly; nothing here reads the clock.
//!
//! # Mentor perspective
//!
//! Mentors get a grace window (see [`EngineConfig::mentor_grace_hours`]):
//! the reference instant is moved back by it, and the end boundary is moved
//! forward by it, to absorb timezone and reporting skew. A mentor's next
//! occurrence also needs at least one enrolled student who has not excepted
//! that date; a week nobody attends is skipped.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreResult, WorkflowError};
use crate::model::{CourseId, LessonId, MentorId, StudentId, SubfieldId, UserId};
use crate::store::{ExceptionStore, LessonStore};

const WEEK_SECONDS: i64 = 7 * 24 * 60 * 60;

/// What an exception record is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SeriesId {
    Lesson(LessonId),
    Course(CourseId),
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesId::Lesson(id) => write!(f, "lesson:{id}"),
            SeriesId::Course(id) => write!(f, "course:{id}"),
        }
    }
}

/// The timing of a lesson or course, independent of who attends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSeries {
    pub id: SeriesId,
    pub anchor: DateTime<Utc>,
    #[serde(default)]
    pub is_recurrent: bool,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_canceled: bool,
}

impl LessonSeries {
    pub fn single(id: SeriesId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            anchor: at,
            is_recurrent: false,
            end: None,
            is_canceled: false,
        }
    }

    pub fn weekly(id: SeriesId, anchor: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            anchor,
            is_recurrent: true,
            end,
            is_canceled: false,
        }
    }

    /// Change recurrence as the owning mentor edits the lesson.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSeries`] when `end` precedes the anchor
    /// or the series was already canceled.
    pub fn set_recurrence(&mut self, is_recurrent: bool, end: Option<DateTime<Utc>>) -> Result<()> {
        if self.is_canceled {
            return Err(EngineError::InvalidSeries(format!(
                "{} is canceled and can no longer change",
                self.id
            )));
        }
        if let Some(end) = end {
            if end < self.anchor {
                return Err(EngineError::InvalidSeries(format!(
                    "end {end} is before the first occurrence {}",
                    self.anchor
                )));
            }
        }
        self.is_recurrent = is_recurrent;
        self.end = if is_recurrent { end } else { None };
        Ok(())
    }

    /// Whether `at` is one of this series' raw occurrences.
    pub fn is_occurrence(&self, at: DateTime<Utc>) -> bool {
        if !self.is_recurrent {
            return at == self.anchor;
        }
        if at < self.anchor || self.end.is_some_and(|end| at > end) {
            return false;
        }
        let offset = at - self.anchor;
        offset.subsec_nanos() == 0 && offset.num_seconds() % WEEK_SECONDS == 0
    }

    /// Raw occurrences in `[from, to)`, ignoring exceptions and cancellation.
    pub fn occurrences_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        if !self.is_recurrent {
            return if self.anchor >= from && self.anchor < to {
                vec![self.anchor]
            } else {
                Vec::new()
            };
        }
        let mut out = Vec::new();
        let mut next = if from > self.anchor {
            from.checked_sub_signed(Duration::nanoseconds(1))
                .and_then(|floor| first_strictly_after(self.anchor, floor))
        } else {
            Some(self.anchor)
        };
        while let Some(at) = next {
            if at >= to || self.end.is_some_and(|end| at > end) {
                break;
            }
            out.push(at);
            next = at.checked_add_signed(Duration::weeks(1));
        }
        out
    }

    /// Stop producing further occurrences. Past exceptions are untouched.
    ///
    /// Returns `false` when the series was already canceled.
    pub fn cancel_remaining(&mut self) -> bool {
        if self.is_canceled {
            return false;
        }
        self.is_canceled = true;
        tracing::info!(series = %self.id, "series canceled");
        true
    }
}

/// A one-to-one or small-group lesson between a mentor and students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub subfield: SubfieldId,
    pub mentor: MentorId,
    pub students: Vec<StudentId>,
    pub anchor: DateTime<Utc>,
    #[serde(default)]
    pub is_recurrent: bool,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_canceled: bool,
}

impl Lesson {
    pub fn series(&self) -> LessonSeries {
        LessonSeries {
            id: SeriesId::Lesson(self.id),
            anchor: self.anchor,
            is_recurrent: self.is_recurrent,
            end: self.end,
            is_canceled: self.is_canceled,
        }
    }
}

/// One participant's excepted occurrence dates for one series, sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawExceptionSet")]
pub struct ExceptionSet {
    pub participant: UserId,
    dates: Vec<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawExceptionSet {
    participant: UserId,
    #[serde(default)]
    dates: Vec<DateTime<Utc>>,
}

impl From<RawExceptionSet> for ExceptionSet {
    fn from(raw: RawExceptionSet) -> Self {
        Self::new(raw.participant, raw.dates)
    }
}

impl ExceptionSet {
    pub fn new(participant: UserId, dates: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let mut dates: Vec<DateTime<Utc>> = dates.into_iter().collect();
        dates.sort_unstable();
        dates.dedup();
        Self { participant, dates }
    }

    pub fn empty(participant: UserId) -> Self {
        Self {
            participant,
            dates: Vec::new(),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.dates.binary_search(&at).is_ok()
    }

    pub fn dates(&self) -> &[DateTime<Utc>] {
        &self.dates
    }

    pub fn insert(&mut self, at: DateTime<Utc>) -> bool {
        match self.dates.binary_search(&at) {
            Ok(_) => false,
            Err(pos) => {
                self.dates.insert(pos, at);
                true
            }
        }
    }
}

/// Whose occurrences are being resolved.
#[derive(Debug, Clone, Copy)]
pub enum Perspective<'a> {
    Student,
    /// The mentor, with the exceptions of every enrolled student.
    Mentor { roster: &'a [ExceptionSet] },
}

impl Perspective<'_> {
    fn grace(&self, config: &EngineConfig) -> Duration {
        match self {
            Perspective::Student => Duration::zero(),
            Perspective::Mentor { .. } => config.mentor_grace(),
        }
    }

    fn has_attendee(&self, at: DateTime<Utc>) -> bool {
        match self {
            Perspective::Student => true,
            Perspective::Mentor { roster } => roster.iter().any(|s| !s.contains(at)),
        }
    }
}

/// The next occurrence of `series` that actually happens for a participant.
///
/// Occurrences excepted by the participant are skipped. Returns `None` when
/// the series is canceled, has no occurrence after the reference instant,
/// or every remaining occurrence before the end boundary is excepted.
pub fn next_occurrence(
    series: &LessonSeries,
    own: &ExceptionSet,
    perspective: Perspective<'_>,
    reference: DateTime<Utc>,
    config: &EngineConfig,
) -> Option<DateTime<Utc>> {
    if series.is_canceled {
        return None;
    }
    if let Perspective::Mentor { roster } = perspective {
        if roster.is_empty() {
            tracing::debug!(
                series = %series.id,
                "no enrolled students; mentor has no next occurrence"
            );
            return None;
        }
    }

    let grace = perspective.grace(config);
    let floor = reference
        .checked_sub_signed(grace)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let happens = |at: DateTime<Utc>| !own.contains(at) && perspective.has_attendee(at);

    if !series.is_recurrent {
        return (series.anchor > floor && happens(series.anchor)).then_some(series.anchor);
    }

    // An end so late that the grace overflows is as good as no end.
    let ceiling = series.end.and_then(|end| end.checked_add_signed(grace));
    let mut candidate = first_strictly_after(series.anchor, floor)?;
    // Exceptions are finite and the roster is non-empty, so an open-ended
    // series reaches a date nobody excepted unless time itself runs out.
    loop {
        if ceiling.is_some_and(|c| candidate > c) {
            tracing::debug!(
                series = %series.id,
                participant = %own.participant,
                "series exhausted"
            );
            return None;
        }
        if happens(candidate) {
            return Some(candidate);
        }
        candidate = candidate.checked_add_signed(Duration::weeks(1))?;
    }
}

/// The latest occurrence strictly before `reference` that the participant
/// did not except, never earlier than the anchor.
pub fn previous_occurrence(
    series: &LessonSeries,
    own: &ExceptionSet,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if reference <= series.anchor {
        return None;
    }
    if !series.is_recurrent {
        return (!own.contains(series.anchor)).then_some(series.anchor);
    }

    let mut weeks = (reference - series.anchor).num_seconds() / WEEK_SECONDS;
    if weeks_after(series.anchor, weeks).is_none_or(|at| at >= reference) {
        weeks -= 1;
    }
    if let Some(end) = series.end {
        if end < series.anchor {
            return None;
        }
        weeks = weeks.min((end - series.anchor).num_seconds() / WEEK_SECONDS);
    }

    // Walk back through the exceptions from the latest date.
    while weeks >= 0 {
        if let Some(candidate) = weeks_after(series.anchor, weeks) {
            if !own.contains(candidate) {
                return Some(candidate);
            }
        }
        weeks -= 1;
    }
    None
}

/// First `anchor + k weeks` (k ≥ 0) strictly after `floor`, or `None`
/// past the representable range.
fn first_strictly_after(anchor: DateTime<Utc>, floor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if anchor > floor {
        return Some(anchor);
    }
    let weeks = (floor - anchor).num_seconds() / WEEK_SECONDS + 1;
    let candidate = weeks_after(anchor, weeks)?;
    if candidate > floor {
        Some(candidate)
    } else {
        candidate.checked_add_signed(Duration::weeks(1))
    }
}

fn weeks_after(anchor: DateTime<Utc>, weeks: i64) -> Option<DateTime<Utc>> {
    Duration::try_weeks(weeks).and_then(|offset| anchor.checked_add_signed(offset))
}

// ── Cancellation write path ─────────────────────────────────────────────────

/// One exception row to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationException {
    pub participant: UserId,
    pub series: SeriesId,
    pub occurrence: DateTime<Utc>,
}

/// Exceptions needed to cancel one future occurrence for everyone.
///
/// Covers the mentor and every student who has not already excepted the
/// date, so re-running the plan after a partial write adds nothing twice.
///
/// # Errors
///
/// [`EngineError::InvalidSeries`] for a canceled series, and
/// [`EngineError::InvalidOccurrence`] when `occurrence` is not part of the
/// series or is not after `reference`.
pub fn plan_single_cancellation(
    series: &LessonSeries,
    mentor: &ExceptionSet,
    roster: &[ExceptionSet],
    occurrence: DateTime<Utc>,
    reference: DateTime<Utc>,
) -> Result<Vec<CancellationException>> {
    if series.is_canceled {
        return Err(EngineError::InvalidSeries(format!("{} is canceled", series.id)));
    }
    if !series.is_occurrence(occurrence) {
        return Err(EngineError::InvalidOccurrence(format!(
            "{occurrence} is not an occurrence of {}",
            series.id
        )));
    }
    if occurrence <= reference {
        return Err(EngineError::InvalidOccurrence(format!(
            "{occurrence} is not in the future"
        )));
    }

    let plan: Vec<CancellationException> = std::iter::once(mentor)
        .chain(roster)
        .filter(|set| !set.contains(occurrence))
        .map(|set| CancellationException {
            participant: set.participant,
            series: series.id,
            occurrence,
        })
        .collect();
    tracing::info!(
        series = %series.id,
        %occurrence,
        rows = plan.len(),
        "planned occurrence cancellation"
    );
    Ok(plan)
}

/// Persist a cancellation plan. Returns the number of rows written.
pub fn apply_cancellation<S: ExceptionStore>(
    store: &mut S,
    plan: &[CancellationException],
) -> StoreResult<usize, S::Error> {
    for row in plan {
        store
            .add_exception(row.participant, row.series, row.occurrence)
            .map_err(WorkflowError::Store)?;
    }
    Ok(plan.len())
}

/// Cancel one future occurrence of a stored lesson for everyone in it.
///
/// Returns the number of exception rows written; zero when every
/// participant had already excepted the date.
///
/// # Errors
///
/// [`EngineError::InvalidSeries`] for an unknown or canceled lesson and
/// [`EngineError::InvalidOccurrence`] for an instant outside the series.
pub fn cancel_lesson_occurrence<S: LessonStore + ExceptionStore>(
    store: &mut S,
    lesson_id: LessonId,
    occurrence: DateTime<Utc>,
    reference: DateTime<Utc>,
) -> StoreResult<usize, S::Error> {
    let lesson = store
        .load_lesson(lesson_id)
        .map_err(WorkflowError::Store)?
        .ok_or_else(|| EngineError::InvalidSeries(format!("lesson {lesson_id} does not exist")))?;
    let series = lesson.series();

    let mentor = ExceptionSet::new(
        lesson.mentor,
        store
            .list_exceptions(lesson.mentor, series.id)
            .map_err(WorkflowError::Store)?,
    );
    let mut roster = Vec::with_capacity(lesson.students.len());
    for &student in &lesson.students {
        let dates = store
            .list_exceptions(student, series.id)
            .map_err(WorkflowError::Store)?;
        roster.push(ExceptionSet::new(student, dates));
    }

    let plan = plan_single_cancellation(&series, &mentor, &roster, occurrence, reference)?;
    apply_cancellation(store, &plan)
}

/// Cancel every remaining occurrence of a stored lesson.
///
/// Returns `false` when the lesson was already canceled.
pub fn cancel_remaining_lesson<S: LessonStore>(
    store: &mut S,
    lesson_id: LessonId,
) -> StoreResult<bool, S::Error> {
    let mut lesson = store
        .load_lesson(lesson_id)
        .map_err(WorkflowError::Store)?
        .ok_or_else(|| EngineError::InvalidSeries(format!("lesson {lesson_id} does not exist")))?;
    if lesson.is_canceled {
        return Ok(false);
    }
    lesson.is_canceled = true;
    tracing::info!(lesson = %lesson_id, "lesson series canceled");
    store.save_lesson(lesson).map_err(WorkflowError::Store)?;
    Ok(true)
}

/// Resolve a lesson's next occurrence for one of its participants,
/// loading exception sets from the store.
///
/// # Errors
///
/// [`EngineError::InvalidParticipant`] when `participant` neither teaches
/// nor attends the lesson; store failures are passed through.
pub fn next_lesson_for<S: ExceptionStore>(
    store: &S,
    lesson: &Lesson,
    participant: UserId,
    reference: DateTime<Utc>,
    config: &EngineConfig,
) -> StoreResult<Option<DateTime<Utc>>, S::Error> {
    let series = lesson.series();
    let load = |user: UserId| -> std::result::Result<ExceptionSet, S::Error> {
        Ok(ExceptionSet::new(user, store.list_exceptions(user, series.id)?))
    };

    if participant == lesson.mentor {
        let own = load(participant).map_err(WorkflowError::Store)?;
        let roster = lesson
            .students
            .iter()
            .map(|&s| load(s))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(WorkflowError::Store)?;
        let perspective = Perspective::Mentor { roster: &roster };
        return Ok(next_occurrence(&series, &own, perspective, reference, config));
    }

    if lesson.students.contains(&participant) {
        let own = load(participant).map_err(WorkflowError::Store)?;
        return Ok(next_occurrence(&series, &own, Perspective::Student, reference, config));
    }

    Err(EngineError::InvalidParticipant(format!(
        "user {participant} is not part of lesson {}",
        lesson.id
    ))
    .into())
}
