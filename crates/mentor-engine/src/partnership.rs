//! Courses and the alternating two-mentor lesson table.
//!
//! A partnership course is co-taught by two mentors. When it activates, a
//! weekly schedule is generated from the start date through the course
//! duration plus a short grace tail; the first half of the calendar goes to
//! the first mentor and the second half to the other. The table is written
//! once and afterwards only single entries are reassigned.

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreResult, WorkflowError};
use crate::model::{CourseId, CourseTypeId, MentorId, StudentId};
use crate::recurrence::{next_occurrence, ExceptionSet, LessonSeries, Perspective, SeriesId};
use crate::store::ScheduleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseType {
    pub id: CourseTypeId,
    pub duration_months: u32,
    pub is_with_partner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub course_type: CourseType,
    pub mentors: Vec<MentorId>,
    #[serde(default)]
    pub students: Vec<StudentId>,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub has_started: bool,
}

impl Course {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidCourse`] unless the course has one or
    /// two distinct mentors.
    pub fn validate(&self) -> Result<()> {
        match self.mentors.as_slice() {
            [_] => Ok(()),
            [a, b] if a != b => Ok(()),
            [_, _] => Err(EngineError::InvalidCourse(format!(
                "course {} lists the same mentor twice",
                self.id
            ))),
            other => Err(EngineError::InvalidCourse(format!(
                "course {} has {} mentors, expected 1 or 2",
                self.id,
                other.len()
            ))),
        }
    }

    pub fn is_partnership(&self) -> bool {
        self.mentors.len() == 2
    }

    /// Exclusive end of the schedule: start + duration + grace tail.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidCourse`] when the end is not representable or
    /// the window `[start, end)` is empty.
    pub fn schedule_end(&self, config: &EngineConfig) -> Result<DateTime<Utc>> {
        let out_of_range =
            || EngineError::InvalidCourse(format!("course {} ends out of range", self.id));
        let end = self
            .start
            .checked_add_months(Months::new(self.course_type.duration_months))
            .ok_or_else(out_of_range)?
            .checked_add_signed(config.schedule_grace())
            .ok_or_else(out_of_range)?;
        if end <= self.start {
            return Err(EngineError::InvalidCourse(format!(
                "course {} has no lesson window",
                self.id
            )));
        }
        Ok(end)
    }

    /// Weekly lesson instants in `[start, schedule_end)`. Never empty.
    pub fn lesson_instants(&self, config: &EngineConfig) -> Result<Vec<DateTime<Utc>>> {
        let stop = self.schedule_end(config)?;
        let mut out = Vec::new();
        let mut next = Some(self.start);
        while let Some(at) = next.filter(|&at| at < stop) {
            out.push(at);
            next = at.checked_add_signed(Duration::weeks(1));
        }
        Ok(out)
    }

    /// The course as a weekly series ending at its last lesson.
    pub fn lesson_series(&self, config: &EngineConfig) -> Result<LessonSeries> {
        let last = self.lesson_instants(config)?.last().copied().ok_or_else(|| {
            EngineError::InvalidCourse(format!("course {} has no lessons", self.id))
        })?;
        Ok(LessonSeries::weekly(SeriesId::Course(self.id), self.start, Some(last)))
    }

    /// Whether the schedule should be generated now.
    pub fn ready_to_activate(&self, config: &EngineConfig) -> bool {
        self.is_partnership()
            && self.students.len() >= config.min_students_for_activation
            && !self.has_started
    }

    fn ensure_mentor(&self, mentor: MentorId) -> Result<()> {
        if self.mentors.contains(&mentor) {
            Ok(())
        } else {
            Err(EngineError::InvalidParticipant(format!(
                "mentor {mentor} does not teach course {}",
                self.id
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub lesson_at: DateTime<Utc>,
    pub mentor: MentorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnershipSchedule {
    pub course: CourseId,
    pub entries: Vec<ScheduleEntry>,
}

impl PartnershipSchedule {
    pub fn entry(&self, at: DateTime<Utc>) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.lesson_at == at)
    }

    /// Hand one lesson to `mentor` without touching the rest of the table.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParticipant`] when `at` has no entry or the
    /// mentor does not teach the course.
    pub fn reassign(&mut self, course: &Course, at: DateTime<Utc>, mentor: MentorId) -> Result<()> {
        course.ensure_mentor(mentor)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.lesson_at == at)
            .ok_or_else(|| {
                EngineError::InvalidParticipant(format!(
                    "{at} is not scheduled for course {}",
                    course.id
                ))
            })?;
        entry.mentor = mentor;
        Ok(())
    }
}

/// Build the alternating table for a two-mentor course.
///
/// Lessons before the calendar midpoint of `[start, schedule_end)` go to
/// the first mentor, the rest to the second.
///
/// # Errors
///
/// [`EngineError::InvalidCourse`] unless the course has two distinct mentors.
pub fn generate_schedule(course: &Course, config: &EngineConfig) -> Result<PartnershipSchedule> {
    course.validate()?;
    let [first, second] = course.mentors[..] else {
        return Err(EngineError::InvalidCourse(format!(
            "course {} is not a partnership course",
            course.id
        )));
    };

    let stop = course.schedule_end(config)?;
    let midpoint = course.start + (stop - course.start) / 2;
    let entries = course
        .lesson_instants(config)?
        .into_iter()
        .map(|lesson_at| ScheduleEntry {
            lesson_at,
            mentor: if lesson_at < midpoint { first } else { second },
        })
        .collect();

    Ok(PartnershipSchedule {
        course: course.id,
        entries,
    })
}

/// Outcome of [`ensure_schedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleGeneration {
    Created(PartnershipSchedule),
    /// A table already exists; nothing was written.
    AlreadyExists,
    /// The course does not meet the activation threshold yet.
    NotReady,
}

/// Generate and store the schedule if the course just became ready.
///
/// Safe to re-run inside a retried transaction: an existing table is left
/// alone, which also absorbs two enrolments racing past the threshold.
pub fn ensure_schedule<S: ScheduleStore>(
    store: &mut S,
    course: &Course,
    config: &EngineConfig,
) -> StoreResult<ScheduleGeneration, S::Error> {
    if !course.ready_to_activate(config) {
        return Ok(ScheduleGeneration::NotReady);
    }
    if store
        .load_schedule(course.id)
        .map_err(WorkflowError::Store)?
        .is_some()
    {
        tracing::debug!(course = %course.id, "schedule already generated");
        return Ok(ScheduleGeneration::AlreadyExists);
    }

    let schedule = generate_schedule(course, config)?;
    store
        .insert_schedule(schedule.clone())
        .map_err(WorkflowError::Store)?;
    tracing::info!(
        course = %course.id,
        lessons = schedule.entries.len(),
        "partnership schedule generated"
    );
    Ok(ScheduleGeneration::Created(schedule))
}

/// Which mentor teaches the lesson at `at`.
///
/// # Errors
///
/// [`EngineError::InvalidParticipant`] when a two-mentor course has no
/// schedule or no entry for `at`; the instant must come from the occurrence
/// resolver.
pub fn mentor_for_instant(
    course: &Course,
    schedule: Option<&PartnershipSchedule>,
    at: DateTime<Utc>,
) -> Result<MentorId> {
    course.validate()?;
    if let [only] = course.mentors[..] {
        return Ok(only);
    }
    let schedule = schedule.ok_or_else(|| {
        EngineError::InvalidParticipant(format!("course {} has no schedule yet", course.id))
    })?;
    schedule
        .entry(at)
        .map(|e| e.mentor)
        .ok_or_else(|| {
            EngineError::InvalidParticipant(format!(
                "{at} is not scheduled for course {}",
                course.id
            ))
        })
}

/// Reassign one stored entry, e.g. when a mentor cancels their week.
pub fn reassign_entry<S: ScheduleStore>(
    store: &mut S,
    course: &Course,
    at: DateTime<Utc>,
    mentor: MentorId,
) -> StoreResult<(), S::Error> {
    let mut schedule = store
        .load_schedule(course.id)
        .map_err(WorkflowError::Store)?
        .ok_or_else(|| {
            EngineError::InvalidParticipant(format!("course {} has no schedule yet", course.id))
        })?;
    schedule.reassign(course, at, mentor)?;
    store
        .update_entry(course.id, at, mentor)
        .map_err(WorkflowError::Store)?;
    tracing::info!(course = %course.id, %at, %mentor, "schedule entry reassigned");
    Ok(())
}

/// A co-teaching mentor's next lesson, skipping weeks the partner teaches.
///
/// # Errors
///
/// [`EngineError::InvalidParticipant`] when the mentor does not teach the
/// course or the schedule is missing an instant.
pub fn next_assigned_occurrence(
    course: &Course,
    schedule: Option<&PartnershipSchedule>,
    own: &ExceptionSet,
    roster: &[ExceptionSet],
    reference: DateTime<Utc>,
    config: &EngineConfig,
) -> Result<Option<DateTime<Utc>>> {
    course.ensure_mentor(own.participant)?;
    let series = course.lesson_series(config)?;
    let perspective = Perspective::Mentor { roster };

    let mut from = reference;
    while let Some(at) = next_occurrence(&series, own, perspective, from, config) {
        if mentor_for_instant(course, schedule, at)? == own.participant {
            return Ok(Some(at));
        }
        // Resume strictly after `at` once the mentor grace is re-applied.
        let Some(resume) = at.checked_add_signed(config.mentor_grace()) else {
            break;
        };
        from = resume;
    }
    Ok(None)
}

/// First `weekday` at `time` (local to `tz`) that is at least `lead` after
/// `now`.
///
/// Ambiguous local times resolve to the earlier instant; a local time
/// skipped by a DST jump moves to the following week.
///
/// # Errors
///
/// [`EngineError::InvalidCourse`] if no valid instant exists in the next
/// few weeks.
pub fn course_start_after(
    weekday: Weekday,
    time: NaiveTime,
    tz: Tz,
    now: DateTime<Utc>,
    lead: Duration,
) -> Result<DateTime<Utc>> {
    let earliest = now.checked_add_signed(lead).ok_or_else(|| {
        EngineError::InvalidCourse(format!("no course start {lead} after {now}"))
    })?;
    let local = earliest.with_timezone(&tz);
    let days_ahead = (weekday.num_days_from_monday() as i64
        - local.weekday().num_days_from_monday() as i64
        + 7)
        % 7;
    let mut next = local.date_naive().checked_add_signed(Duration::days(days_ahead));

    for _ in 0..4 {
        let Some(date) = next else {
            break;
        };
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate >= earliest {
                return Ok(candidate);
            }
        }
        next = date.checked_add_signed(Duration::weeks(1));
    }
    Err(EngineError::InvalidCourse(format!(
        "no valid {weekday} {time} in {tz} after {earliest}"
    )))
}
