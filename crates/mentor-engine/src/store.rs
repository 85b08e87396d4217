//! Interfaces to the collaborators that own persistence.
//!
//! The engine never assumes how rows are stored. Each trait is the narrow
//! read/write surface one workflow needs; a transactional backend implements
//! them over a single transaction so every state transition is one
//! read-modify-write. [`InMemoryStore`] backs tests and the CLI.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;

use chrono::{DateTime, Utc};

use crate::model::{Candidate, CandidateRef, CourseId, CourseTypeId, LessonId, MentorId, UserId};
use crate::partnership::{Course, PartnershipSchedule};
use crate::recurrence::{Lesson, SeriesId};
use crate::request::WaitingRequest;

/// Common error type of a storage backend.
pub trait Store {
    type Error: std::error::Error + 'static;
}

/// Supplies candidates that passed the coarse storage-side filters
/// (is a mentor, available by date, has at least one subfield).
pub trait CandidatePoolProvider: Store {
    fn mentor_pool(&self) -> Result<Vec<Candidate>, Self::Error>;
    fn course_pool(&self) -> Result<Vec<Candidate>, Self::Error>;
}

pub trait ExceptionStore: Store {
    /// Excepted occurrences of one participant in one series, ascending.
    fn list_exceptions(
        &self,
        participant: UserId,
        series: SeriesId,
    ) -> Result<Vec<DateTime<Utc>>, Self::Error>;
    fn add_exception(
        &mut self,
        participant: UserId,
        series: SeriesId,
        at: DateTime<Utc>,
    ) -> Result<(), Self::Error>;
}

pub trait LessonStore: Store {
    fn load_lesson(&self, id: LessonId) -> Result<Option<Lesson>, Self::Error>;
    fn save_lesson(&mut self, lesson: Lesson) -> Result<(), Self::Error>;
}

pub trait CourseStore: Store {
    fn load_course(&self, id: CourseId) -> Result<Option<Course>, Self::Error>;
    fn save_course(&mut self, course: Course) -> Result<(), Self::Error>;
}

pub trait ScheduleStore: Store {
    fn load_schedule(&self, course: CourseId) -> Result<Option<PartnershipSchedule>, Self::Error>;
    fn insert_schedule(&mut self, schedule: PartnershipSchedule) -> Result<(), Self::Error>;
    fn update_entry(
        &mut self,
        course: CourseId,
        at: DateTime<Utc>,
        mentor: MentorId,
    ) -> Result<(), Self::Error>;
}

pub trait WaitingPoolStore: Store {
    fn waiting_for(&self, course_type: CourseTypeId) -> Result<Vec<WaitingRequest>, Self::Error>;
    fn enqueue(&mut self, request: WaitingRequest) -> Result<(), Self::Error>;
    fn remove(&mut self, mentor: MentorId, course_type: CourseTypeId) -> Result<(), Self::Error>;
}

/// Process-local store used by tests and the command line tool.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    pub candidates: Vec<Candidate>,
    exceptions: BTreeMap<(UserId, SeriesId), Vec<DateTime<Utc>>>,
    lessons: HashMap<LessonId, Lesson>,
    courses: HashMap<CourseId, Course>,
    schedules: HashMap<CourseId, PartnershipSchedule>,
    waiting: Vec<WaitingRequest>,
}

impl InMemoryStore {
    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }
}

impl Store for InMemoryStore {
    type Error = Infallible;
}

impl CandidatePoolProvider for InMemoryStore {
    fn mentor_pool(&self) -> Result<Vec<Candidate>, Infallible> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| matches!(c.id, CandidateRef::Mentor(_)))
            .cloned()
            .collect())
    }

    fn course_pool(&self) -> Result<Vec<Candidate>, Infallible> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| matches!(c.id, CandidateRef::Course(_)))
            .cloned()
            .collect())
    }
}

impl ExceptionStore for InMemoryStore {
    fn list_exceptions(
        &self,
        participant: UserId,
        series: SeriesId,
    ) -> Result<Vec<DateTime<Utc>>, Infallible> {
        Ok(self
            .exceptions
            .get(&(participant, series))
            .cloned()
            .unwrap_or_default())
    }

    fn add_exception(
        &mut self,
        participant: UserId,
        series: SeriesId,
        at: DateTime<Utc>,
    ) -> Result<(), Infallible> {
        let dates = self.exceptions.entry((participant, series)).or_default();
        if let Err(pos) = dates.binary_search(&at) {
            dates.insert(pos, at);
        }
        Ok(())
    }
}

impl LessonStore for InMemoryStore {
    fn load_lesson(&self, id: LessonId) -> Result<Option<Lesson>, Infallible> {
        Ok(self.lessons.get(&id).cloned())
    }

    fn save_lesson(&mut self, lesson: Lesson) -> Result<(), Infallible> {
        self.lessons.insert(lesson.id, lesson);
        Ok(())
    }
}

impl CourseStore for InMemoryStore {
    fn load_course(&self, id: CourseId) -> Result<Option<Course>, Infallible> {
        Ok(self.courses.get(&id).cloned())
    }

    fn save_course(&mut self, course: Course) -> Result<(), Infallible> {
        self.courses.insert(course.id, course);
        Ok(())
    }
}

impl ScheduleStore for InMemoryStore {
    fn load_schedule(&self, course: CourseId) -> Result<Option<PartnershipSchedule>, Infallible> {
        Ok(self.schedules.get(&course).cloned())
    }

    fn insert_schedule(&mut self, schedule: PartnershipSchedule) -> Result<(), Infallible> {
        self.schedules.entry(schedule.course).or_insert(schedule);
        Ok(())
    }

    fn update_entry(
        &mut self,
        course: CourseId,
        at: DateTime<Utc>,
        mentor: MentorId,
    ) -> Result<(), Infallible> {
        if let Some(entry) = self
            .schedules
            .get_mut(&course)
            .and_then(|s| s.entries.iter_mut().find(|e| e.lesson_at == at))
        {
            entry.mentor = mentor;
        }
        Ok(())
    }
}

impl WaitingPoolStore for InMemoryStore {
    fn waiting_for(&self, course_type: CourseTypeId) -> Result<Vec<WaitingRequest>, Infallible> {
        Ok(self
            .waiting
            .iter()
            .filter(|w| w.course_type == course_type)
            .cloned()
            .collect())
    }

    fn enqueue(&mut self, request: WaitingRequest) -> Result<(), Infallible> {
        if !self.waiting.contains(&request) {
            self.waiting.push(request);
        }
        Ok(())
    }

    fn remove(&mut self, mentor: MentorId, course_type: CourseTypeId) -> Result<(), Infallible> {
        self.waiting
            .retain(|w| !(w.mentor == mentor && w.course_type == course_type));
        Ok(())
    }
}
