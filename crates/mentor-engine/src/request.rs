//! Lifecycle of a mentor-to-mentor partnership proposal.
//!
//! A mentor looking for a partner searches the waiting pool, opens a
//! request with one waiting mentor (the receiver), and the receiver accepts
//! or rejects it. The sender may withdraw it, and an external sweep expires
//! requests nobody answered. Acceptance seeds a [`Course`]; every other
//! terminal state puts the receiver back into the waiting pool.
//!
//! Transitions here only mutate the request value. [`apply_outcome`] commits
//! the side effects through the store, inside the caller's transaction.

use std::fmt;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreResult, WorkflowError};
use crate::matcher::MatchQuery;
use crate::model::{Candidate, CandidateRef, CourseId, CourseTypeId, MentorId, RequestId};
use crate::partnership::{course_start_after, Course, CourseType};
use crate::store::{CourseStore, WaitingPoolStore};

/// A mentor waiting to be paired for a partnership course type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaitingRequest {
    pub mentor: MentorId,
    pub course_type: CourseTypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Canceled,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Canceled => "canceled",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposal from `sender` to co-teach a course with `receiver` on a
/// weekly slot, expressed in the sender's local timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnershipRequest {
    pub id: RequestId,
    pub sender: MentorId,
    pub receiver: MentorId,
    pub course_type: CourseType,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub timezone: Tz,
    pub sent_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Side effect to commit after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Both mentors leave the waiting pool and the course is stored.
    Accepted(Course),
    /// The receiver goes back into the waiting pool.
    Requeued(WaitingRequest),
}

impl PartnershipRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RequestId,
        sender: MentorId,
        receiver: MentorId,
        course_type: CourseType,
        day_of_week: Weekday,
        start_time: NaiveTime,
        timezone: Tz,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sender,
            receiver,
            course_type,
            day_of_week,
            start_time,
            timezone,
            sent_at,
            status: RequestStatus::Pending,
            closed_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn involves(&self, mentor: MentorId) -> bool {
        self.sender == mentor || self.receiver == mentor
    }

    /// Whether this request was between `a` and `b`, in either direction.
    pub fn same_pair(&self, a: MentorId, b: MentorId) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }

    /// A pending request nobody answered within the expiry window.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>, config: &EngineConfig) -> bool {
        self.is_live()
            && self
                .sent_at
                .checked_add_signed(config.request_expiry())
                .is_some_and(|due| now >= due)
    }

    /// End of the re-match cooldown for a closed request. Every terminal
    /// state cools down, acceptance included.
    pub fn cooldown_until(&self, config: &EngineConfig) -> Option<DateTime<Utc>> {
        if !self.status.is_terminal() {
            return None;
        }
        self.closed_at.map(|closed| {
            closed
                .checked_add_signed(config.rematch_cooldown())
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Receiver accepts; returns the course to create.
    ///
    /// The course starts at the first requested weekday and time, in the
    /// request's timezone, that leaves the configured lead time.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParticipant`] unless `actor` is the receiver,
    /// and [`EngineError::InvalidTransition`] when the request is no longer
    /// pending or already overdue for expiry.
    pub fn accept(
        &mut self,
        actor: MentorId,
        course_id: CourseId,
        now: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Result<Course> {
        self.ensure_pending("accept")?;
        self.ensure_actor(actor, self.receiver, "accept")?;
        if self.is_due_for_expiry(now, config) {
            return Err(EngineError::InvalidTransition {
                action: "accept",
                status: RequestStatus::Expired.as_str(),
            });
        }

        let start = course_start_after(
            self.day_of_week,
            self.start_time,
            self.timezone,
            now,
            config.course_start_lead(),
        )?;
        let course = Course {
            id: course_id,
            course_type: self.course_type,
            mentors: vec![self.sender, self.receiver],
            students: Vec::new(),
            start,
            has_started: false,
        };
        course.validate()?;

        self.close(RequestStatus::Accepted, now);
        Ok(course)
    }

    /// Receiver declines; the receiver is re-queued.
    pub fn reject(&mut self, actor: MentorId, now: DateTime<Utc>) -> Result<WaitingRequest> {
        self.ensure_pending("reject")?;
        self.ensure_actor(actor, self.receiver, "reject")?;
        self.close(RequestStatus::Rejected, now);
        Ok(self.requeue_receiver())
    }

    /// Sender withdraws; the receiver is re-queued.
    pub fn cancel(&mut self, actor: MentorId, now: DateTime<Utc>) -> Result<WaitingRequest> {
        self.ensure_pending("cancel")?;
        self.ensure_actor(actor, self.sender, "cancel")?;
        self.close(RequestStatus::Canceled, now);
        Ok(self.requeue_receiver())
    }

    /// Called by the expiry sweep; handled like a rejection.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] when the request is not pending or
    /// the expiry window has not elapsed yet.
    pub fn expire(&mut self, now: DateTime<Utc>, config: &EngineConfig) -> Result<WaitingRequest> {
        self.ensure_pending("expire")?;
        if !self.is_due_for_expiry(now, config) {
            return Err(EngineError::InvalidTransition {
                action: "expire",
                status: "still within its response window",
            });
        }
        self.close(RequestStatus::Expired, now);
        Ok(self.requeue_receiver())
    }

    fn ensure_pending(&self, action: &'static str) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                action,
                status: self.status.as_str(),
            })
        }
    }

    fn ensure_actor(&self, actor: MentorId, expected: MentorId, action: &str) -> Result<()> {
        if actor == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidParticipant(format!(
                "mentor {actor} cannot {action} request {}",
                self.id
            )))
        }
    }

    fn close(&mut self, status: RequestStatus, now: DateTime<Utc>) {
        tracing::info!(
            request = %self.id,
            sender = %self.sender,
            receiver = %self.receiver,
            %status,
            "partnership request closed"
        );
        self.status = status;
        self.closed_at = Some(now);
    }

    fn requeue_receiver(&self) -> WaitingRequest {
        WaitingRequest {
            mentor: self.receiver,
            course_type: self.course_type.id,
        }
    }
}

/// Whether `sender` may open a new request with `receiver`.
///
/// Neither mentor may have a live request, and a closed request between the
/// same two mentors blocks a new one until its cooldown has passed.
/// Requests with other mentors never block.
///
/// # Errors
///
/// [`EngineError::LiveRequestExists`] or [`EngineError::RematchCooldown`];
/// [`EngineError::InvalidParticipant`] when a mentor would pair with
/// themselves.
pub fn check_can_request(
    sender: MentorId,
    receiver: MentorId,
    history: &[PartnershipRequest],
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> Result<()> {
    if sender == receiver {
        return Err(EngineError::InvalidParticipant(format!(
            "mentor {sender} cannot partner with themselves"
        )));
    }
    for mentor in [sender, receiver] {
        if history.iter().any(|r| r.is_live() && r.involves(mentor)) {
            return Err(EngineError::LiveRequestExists { mentor });
        }
    }

    let until = history
        .iter()
        .filter(|r| r.same_pair(sender, receiver))
        .filter_map(|r| r.cooldown_until(config))
        .filter(|until| *until > now)
        .max();
    match until {
        Some(until) => Err(EngineError::RematchCooldown {
            sender,
            receiver,
            until,
        }),
        None => Ok(()),
    }
}

/// Waiting mentors for `course_type` that match `query` and that `sender`
/// may open a request with, in waiting-pool order.
#[allow(clippy::too_many_arguments)]
pub fn search_waiting_pool<'a>(
    sender: MentorId,
    course_type: CourseTypeId,
    waiting: &[WaitingRequest],
    candidates: &'a [Candidate],
    query: &MatchQuery,
    history: &[PartnershipRequest],
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> Vec<&'a Candidate> {
    let prepared = query.prepare();
    let found: Vec<&Candidate> = waiting
        .iter()
        .filter(|w| w.course_type == course_type)
        .filter(|w| check_can_request(sender, w.mentor, history, now, config).is_ok())
        .filter_map(|w| {
            candidates
                .iter()
                .find(|c| c.id == CandidateRef::Mentor(w.mentor))
        })
        .filter(|c| prepared.matches(c))
        .collect();
    tracing::debug!(
        %sender,
        %course_type,
        waiting = waiting.len(),
        found = found.len(),
        "searched waiting pool"
    );
    found
}

/// Validate and record a new request. The receiver leaves the waiting
/// pool while the request is live.
pub fn open_request<S: WaitingPoolStore>(
    store: &mut S,
    request: &PartnershipRequest,
    history: &[PartnershipRequest],
    config: &EngineConfig,
) -> StoreResult<(), S::Error> {
    check_can_request(request.sender, request.receiver, history, request.sent_at, config)?;
    store
        .remove(request.receiver, request.course_type.id)
        .map_err(WorkflowError::Store)?;
    tracing::info!(
        request = %request.id,
        sender = %request.sender,
        receiver = %request.receiver,
        "partnership request opened"
    );
    Ok(())
}

/// Commit the side effects of a transition. Safe to re-run.
pub fn apply_outcome<S: WaitingPoolStore + CourseStore>(
    store: &mut S,
    outcome: RequestOutcome,
) -> StoreResult<(), S::Error> {
    match outcome {
        RequestOutcome::Accepted(course) => {
            for &mentor in &course.mentors {
                store
                    .remove(mentor, course.course_type.id)
                    .map_err(WorkflowError::Store)?;
            }
            store.save_course(course).map_err(WorkflowError::Store)
        }
        RequestOutcome::Requeued(waiting) => store.enqueue(waiting).map_err(WorkflowError::Store),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::AvailabilityWindow;
    use crate::matcher::SubjectFilter;
    use crate::model::fixtures::capability;
    use crate::model::{FieldId, UserId};
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    const A: MentorId = UserId(1);
    const B: MentorId = UserId(2);
    const C: MentorId = UserId(3);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn course_type() -> CourseType {
        CourseType {
            id: CourseTypeId(4),
            duration_months: 3,
            is_with_partner: true,
        }
    }

    fn request(
        id: u64,
        sender: MentorId,
        receiver: MentorId,
        sent_at: DateTime<Utc>,
    ) -> PartnershipRequest {
        PartnershipRequest::new(
            RequestId(id),
            sender,
            receiver,
            course_type(),
            Weekday::Thu,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            Tz::UTC,
            sent_at,
        )
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_accept_creates_course_with_lead_time() {
        let mut r = request(1, B, A, t0());
        let now = t0() + Duration::hours(1);
        let course = r.accept(A, CourseId(9), now, &config()).unwrap();

        assert_eq!(r.status, RequestStatus::Accepted);
        assert_eq!(r.closed_at, Some(now));
        assert_eq!(course.mentors, vec![B, A]);
        // Monday 10:00 + 48h is Wednesday 10:00; next Thursday 18:00.
        assert_eq!(course.start, Utc.with_ymd_and_hms(2026, 3, 5, 18, 0, 0).unwrap());
        assert!(course.start >= now + Duration::hours(48));
    }

    #[test]
    fn test_only_receiver_accepts_or_rejects() {
        let mut r = request(1, B, A, t0());
        assert!(matches!(
            r.accept(B, CourseId(9), t0(), &config()),
            Err(EngineError::InvalidParticipant(_))
        ));
        assert!(matches!(r.reject(C, t0()), Err(EngineError::InvalidParticipant(_))));
        assert!(matches!(r.cancel(A, t0()), Err(EngineError::InvalidParticipant(_))));
        assert!(r.is_live());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut r = request(1, B, A, t0());
        r.reject(A, t0()).unwrap();
        let err = r.cancel(B, t0()).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                action: "cancel",
                status: "rejected"
            }
        );
        assert!(r.accept(A, CourseId(1), t0(), &config()).is_err());
    }

    #[test]
    fn test_reject_and_cancel_requeue_receiver() {
        let expected = WaitingRequest {
            mentor: A,
            course_type: CourseTypeId(4),
        };
        let mut rejected = request(1, B, A, t0());
        assert_eq!(rejected.reject(A, t0()).unwrap(), expected);
        let mut canceled = request(2, B, A, t0());
        assert_eq!(canceled.cancel(B, t0()).unwrap(), expected);
        assert_eq!(canceled.status, RequestStatus::Canceled);
    }

    #[test]
    fn test_expiry_window() {
        let mut r = request(1, B, A, t0());
        let early = t0() + Duration::hours(47);
        assert!(!r.is_due_for_expiry(early, &config()));
        assert!(r.expire(early, &config()).is_err());

        let due = t0() + Duration::hours(48);
        assert!(r.is_due_for_expiry(due, &config()));
        assert!(r.clone().accept(A, CourseId(1), due, &config()).is_err());
        assert_eq!(r.expire(due, &config()).unwrap().mentor, A);
        assert_eq!(r.status, RequestStatus::Expired);
    }

    #[test]
    fn test_live_request_blocks_both_mentors() {
        let history = vec![request(1, B, C, t0())];
        assert_eq!(
            check_can_request(B, A, &history, t0(), &config()),
            Err(EngineError::LiveRequestExists { mentor: B })
        );
        assert_eq!(
            check_can_request(A, C, &history, t0(), &config()),
            Err(EngineError::LiveRequestExists { mentor: C })
        );
    }

    #[test]
    fn test_rejection_cooldown_is_per_pair() {
        let mut r = request(1, B, A, t0());
        r.reject(A, t0()).unwrap();
        let history = vec![r];

        let until = t0() + Duration::hours(168);
        assert_eq!(
            check_can_request(B, A, &history, until - Duration::seconds(1), &config()),
            Err(EngineError::RematchCooldown {
                sender: B,
                receiver: A,
                until
            })
        );
        // Direction does not matter.
        assert!(check_can_request(A, B, &history, t0(), &config()).is_err());
        assert!(check_can_request(B, A, &history, until, &config()).is_ok());
        // Other pairs are unaffected.
        assert!(check_can_request(B, C, &history, t0(), &config()).is_ok());
    }

    #[test]
    fn test_expired_requests_cool_down_like_rejections() {
        let mut r = request(1, B, A, t0());
        let due = t0() + Duration::hours(48);
        r.expire(due, &config()).unwrap();
        let history = vec![r];
        let still_cooling = due + Duration::hours(167);
        assert!(check_can_request(B, A, &history, still_cooling, &config()).is_err());
        let cooled = due + Duration::hours(168);
        assert!(check_can_request(B, A, &history, cooled, &config()).is_ok());
    }

    #[test]
    fn test_accepted_request_cools_down() {
        let mut r = request(1, B, A, t0());
        let accepted_at = t0() + Duration::hours(1);
        r.accept(A, CourseId(9), accepted_at, &config()).unwrap();
        assert_eq!(r.cooldown_until(&config()), Some(accepted_at + Duration::hours(168)));
        let history = vec![r];

        // Not live any more, but the pair still waits out the cooldown.
        let until = accepted_at + Duration::hours(168);
        assert_eq!(
            check_can_request(A, B, &history, t0() + Duration::hours(2), &config()),
            Err(EngineError::RematchCooldown {
                sender: A,
                receiver: B,
                until
            })
        );
        assert!(check_can_request(A, B, &history, until, &config()).is_ok());
        assert!(check_can_request(A, C, &history, t0() + Duration::hours(2), &config()).is_ok());
    }

    #[test]
    fn test_pending_request_has_no_cooldown() {
        assert_eq!(request(1, B, A, t0()).cooldown_until(&config()), None);
    }

    #[test]
    fn test_self_request_rejected() {
        assert!(matches!(
            check_can_request(A, A, &[], t0(), &config()),
            Err(EngineError::InvalidParticipant(_))
        ));
    }

    #[test]
    fn test_search_waiting_pool() {
        let window = AvailabilityWindow::new(Weekday::Thu, "5:00 PM", "8:00 PM");
        let candidates = vec![
            Candidate::mentor(A)
                .with_subject(capability(1, 10, &[]))
                .with_window(window.clone()),
            Candidate::mentor(C)
                .with_subject(capability(2, 20, &[]))
                .with_window(window.clone()),
            Candidate::mentor(UserId(4))
                .with_subject(capability(1, 11, &[]))
                .with_window(window.clone()),
        ];
        let waiting = vec![
            WaitingRequest {
                mentor: A,
                course_type: CourseTypeId(4),
            },
            WaitingRequest {
                mentor: C,
                course_type: CourseTypeId(4),
            },
            WaitingRequest {
                mentor: UserId(4),
                course_type: CourseTypeId(5),
            },
        ];
        let query = MatchQuery {
            subject: Some(SubjectFilter::field(FieldId(1))),
            availability: vec![AvailabilityWindow::new(Weekday::Thu, "6:00 PM", "7:00 PM")],
        };

        let found = search_waiting_pool(
            B,
            CourseTypeId(4),
            &waiting,
            &candidates,
            &query,
            &[],
            t0(),
            &config(),
        );
        let ids: Vec<CandidateRef> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![CandidateRef::Mentor(A)]);

        let mut rejected = request(1, B, A, t0());
        rejected.reject(A, t0()).unwrap();
        let found = search_waiting_pool(
            B,
            CourseTypeId(4),
            &waiting,
            &candidates,
            &query,
            &[rejected],
            t0(),
            &config(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_search_waiting_pool_skips_mentor_with_live_request() {
        const D: MentorId = UserId(5);
        const E: MentorId = UserId(6);
        let window = AvailabilityWindow::new(Weekday::Thu, "5:00 PM", "8:00 PM");
        let candidates = vec![
            Candidate::mentor(A)
                .with_subject(capability(1, 10, &[]))
                .with_window(window.clone()),
            Candidate::mentor(D)
                .with_subject(capability(1, 12, &[]))
                .with_window(window.clone()),
        ];
        let waiting = vec![
            WaitingRequest {
                mentor: A,
                course_type: CourseTypeId(4),
            },
            WaitingRequest {
                mentor: D,
                course_type: CourseTypeId(4),
            },
        ];
        let query = MatchQuery {
            subject: Some(SubjectFilter::field(FieldId(1))),
            availability: vec![AvailabilityWindow::new(Weekday::Thu, "6:00 PM", "7:00 PM")],
        };
        let search = |history: &[PartnershipRequest]| -> Vec<CandidateRef> {
            search_waiting_pool(
                B,
                CourseTypeId(4),
                &waiting,
                &candidates,
                &query,
                history,
                t0(),
                &config(),
            )
            .iter()
            .map(|c| c.id)
            .collect()
        };

        assert_eq!(search(&[]), vec![CandidateRef::Mentor(A), CandidateRef::Mentor(D)]);

        // D is already negotiating with E.
        let pending = request(1, E, D, t0());
        assert_eq!(search(&[pending.clone()]), vec![CandidateRef::Mentor(A)]);

        // Once that request is closed, D is found again.
        let mut withdrawn = pending;
        withdrawn.cancel(E, t0()).unwrap();
        assert_eq!(search(&[withdrawn]), vec![CandidateRef::Mentor(A), CandidateRef::Mentor(D)]);

        // A live request of the searching mentor blocks every receiver.
        assert!(search(&[request(2, B, C, t0())]).is_empty());
    }

    #[test]
    fn test_store_workflow_reject_then_accept() {
        let mut store = InMemoryStore::default();
        let waiting_a = WaitingRequest {
            mentor: A,
            course_type: CourseTypeId(4),
        };
        store.enqueue(waiting_a.clone()).unwrap();

        let mut first = request(1, B, A, t0());
        open_request(&mut store, &first, &[], &config()).unwrap();
        assert!(store.waiting_for(CourseTypeId(4)).unwrap().is_empty());

        let requeued = first.reject(A, t0()).unwrap();
        apply_outcome(&mut store, RequestOutcome::Requeued(requeued.clone())).unwrap();
        apply_outcome(&mut store, RequestOutcome::Requeued(requeued)).unwrap();
        assert_eq!(store.waiting_for(CourseTypeId(4)).unwrap(), vec![waiting_a]);

        let history = vec![first];
        let second = request(2, C, A, t0() + Duration::hours(1));
        open_request(&mut store, &second, &history, &config()).unwrap();
        let mut second = second;
        let course = second
            .accept(A, CourseId(7), t0() + Duration::hours(2), &config())
            .unwrap();
        apply_outcome(&mut store, RequestOutcome::Accepted(course.clone())).unwrap();
        assert_eq!(store.load_course(CourseId(7)).unwrap(), Some(course));
        assert!(store.waiting_for(CourseTypeId(4)).unwrap().is_empty());
    }

    #[test]
    fn test_request_serializes_timezone_by_name() {
        let mut r = request(1, B, A, t0());
        r.timezone = chrono_tz::Asia::Jerusalem;
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["timezone"], "Asia/Jerusalem");
        assert_eq!(json["status"], "pending");
        let back: PartnershipRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
