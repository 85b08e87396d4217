//! mentor-match: run one matching or scheduling operation over JSON input.
//!
//! # Usage
//!
//! ```bash
//! # Eligible mentors for a query, best preferred-window fit first
//! mentor-match match --pool pool.json --query query.json --rank
//!
//! # Next lesson for a student, with recorded cancellations
//! mentor-match next --lesson lesson.json --participant 20 \
//!     --at 2026-03-10T00:00:00Z --exceptions exceptions.json
//!
//! # Alternating table for a two-mentor course
//! mentor-match schedule --course course.json
//! ```
//!
//! Results are printed as JSON on stdout; logs go to stderr.

#![allow(clippy::print_stdout)]

mod logging;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use mentor_engine::interval::parse_weekday;
use mentor_engine::store::{ExceptionStore, LessonStore};
use mentor_engine::{
    build_taxonomy, course_start_after, filter_candidates, generate_schedule, next_lesson_for,
    previous_occurrence, rank_candidates, Candidate, Course, EngineConfig, ExceptionSet,
    InMemoryStore, Lesson, MatchQuery, TimeOfDay, UserId,
};

use crate::logging::{init_logging, LogFormat};

/// Availability matching and recurring lesson resolution for mentorship
/// scheduling.
#[derive(Parser, Debug)]
#[command(name = "mentor-match")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration (JSON). Missing fields take their defaults.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter a candidate pool against a subject/availability query
    Match {
        /// Candidate pool (JSON array)
        #[arg(long)]
        pool: PathBuf,
        /// Match query (JSON object); omit to keep every complete candidate
        #[arg(long)]
        query: Option<PathBuf>,
        /// Order by preferred-window overlaps and include the score
        #[arg(long)]
        rank: bool,
    },
    /// Build the popularity-ranked field/subfield/skill tree of a pool
    Taxonomy {
        #[arg(long)]
        pool: PathBuf,
    },
    /// Next occurrence of a lesson for one participant
    Next {
        #[arg(long)]
        lesson: PathBuf,
        #[arg(long)]
        participant: u64,
        /// Reference instant (RFC 3339)
        #[arg(long)]
        at: DateTime<Utc>,
        /// Exception sets (JSON array of {participant, dates})
        #[arg(long)]
        exceptions: Option<PathBuf>,
    },
    /// Latest occurrence of a lesson before the reference instant
    Previous {
        #[arg(long)]
        lesson: PathBuf,
        #[arg(long)]
        participant: u64,
        #[arg(long)]
        at: DateTime<Utc>,
        #[arg(long)]
        exceptions: Option<PathBuf>,
    },
    /// Generate the alternating schedule of a two-mentor course
    Schedule {
        #[arg(long)]
        course: PathBuf,
    },
    /// First start instant for a weekly slot after the configured lead time
    CourseStart {
        #[arg(long, value_parser = weekday_arg)]
        weekday: Weekday,
        /// Local start time, 12- or 24-hour clock
        #[arg(long, value_parser = time_arg)]
        time: NaiveTime,
        /// IANA timezone name, e.g. Asia/Jerusalem
        #[arg(long, value_parser = timezone_arg, default_value = "UTC")]
        timezone: Tz,
        #[arg(long)]
        now: DateTime<Utc>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Match { pool, query, rank } => {
            let pool: Vec<Candidate> = read_json(&pool)?;
            let query: MatchQuery = match query {
                Some(path) => read_json(&path)?,
                None => MatchQuery::default(),
            };
            if rank {
                print_json(&rank_candidates(&pool, &query))
            } else {
                print_json(&filter_candidates(&pool, &query))
            }
        }
        Command::Taxonomy { pool } => {
            let pool: Vec<Candidate> = read_json(&pool)?;
            print_json(&build_taxonomy(&pool))
        }
        Command::Next {
            lesson,
            participant,
            at,
            exceptions,
        } => {
            let lesson: Lesson = read_json(&lesson)?;
            let mut store = InMemoryStore::default();
            let series = lesson.series().id;
            for set in load_exceptions(exceptions.as_deref())? {
                for &date in set.dates() {
                    store.add_exception(set.participant, series, date)?;
                }
            }
            store.save_lesson(lesson.clone())?;
            let next = next_lesson_for(&store, &lesson, UserId(participant), at, &config)?;
            print_json(&json!({ "lesson": lesson.id, "participant": participant, "next": next }))
        }
        Command::Previous {
            lesson,
            participant,
            at,
            exceptions,
        } => {
            let lesson: Lesson = read_json(&lesson)?;
            let participant = UserId(participant);
            if participant != lesson.mentor && !lesson.students.contains(&participant) {
                bail!("user {participant} is not part of lesson {}", lesson.id);
            }
            let own = load_exceptions(exceptions.as_deref())?
                .into_iter()
                .find(|set| set.participant == participant)
                .unwrap_or_else(|| ExceptionSet::empty(participant));
            let previous = previous_occurrence(&lesson.series(), &own, at);
            print_json(&json!({
                "lesson": lesson.id,
                "participant": participant,
                "previous": previous
            }))
        }
        Command::Schedule { course } => {
            let course: Course = read_json(&course)?;
            let schedule = generate_schedule(&course, &config)
                .with_context(|| format!("cannot schedule course {}", course.id))?;
            print_json(&schedule)
        }
        Command::CourseStart {
            weekday,
            time,
            timezone,
            now,
        } => {
            let start =
                course_start_after(weekday, time, timezone, now, config.course_start_lead())?;
            print_json(&json!({
                "start": start,
                "local": start.with_timezone(&timezone).to_rfc3339()
            }))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => read_json(path)?,
        None => EngineConfig::default(),
    };
    config.validate().context("invalid engine configuration")?;
    tracing::debug!(?config, "engine configuration loaded");
    Ok(config)
}

fn load_exceptions(path: Option<&Path>) -> Result<Vec<ExceptionSet>> {
    path.map_or_else(|| Ok(Vec::new()), read_json)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

fn weekday_arg(s: &str) -> Result<Weekday, String> {
    parse_weekday(s).ok_or_else(|| format!("unknown weekday '{s}'"))
}

fn time_arg(s: &str) -> Result<NaiveTime, String> {
    let time = TimeOfDay::parse(s).map_err(|e| e.to_string())?;
    if time == TimeOfDay::END_OF_DAY {
        return Err("24:00 is not a start time".to_string());
    }
    let minutes = u32::from(time.minutes());
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
        .ok_or_else(|| format!("invalid time '{s}'"))
}

fn timezone_arg(s: &str) -> Result<Tz, String> {
    s.parse::<Tz>().map_err(|e| e.to_string())
}
