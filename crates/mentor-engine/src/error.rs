//! Error types for mentor-engine operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::MentorId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Malformed time input: {0}")]
    MalformedTimeInput(String),

    #[error("Invalid availability window: {0}")]
    InvalidWindow(String),

    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    #[error("Invalid occurrence: {0}")]
    InvalidOccurrence(String),

    #[error("Invalid lesson series: {0}")]
    InvalidSeries(String),

    #[error("Invalid course: {0}")]
    InvalidCourse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Mentor {mentor} already has a live partnership request")]
    LiveRequestExists { mentor: MentorId },

    #[error("Mentors {sender} and {receiver} cannot be rematched before {until}")]
    RematchCooldown {
        sender: MentorId,
        receiver: MentorId,
        until: DateTime<Utc>,
    },

    #[error("Cannot {action} a partnership request that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure of a workflow that reads or writes through an external store.
///
/// Engine rule violations and store failures are kept apart so callers can
/// retry the latter inside a fresh transaction.
#[derive(Error, Debug)]
pub enum WorkflowError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("store error: {0}")]
    Store(#[source] E),
}

pub type StoreResult<T, E> = std::result::Result<T, WorkflowError<E>>;
