//! Weekly availability windows as comparable minute intervals.
//!
//! Availability arrives as `(weekday, from, to)` triples with clock strings
//! such as `"9:30 PM"`. A window whose `to` is earlier than its `from`
//! crosses midnight and is split by [`TimeWindow::expand`] into one piece on
//! its own day and one on the following day. Both sides of a comparison
//! must be expanded before [`TimeWindow::overlaps`] is meaningful.
//!
//! # Interval convention
//!
//! Windows are half-open minute ranges `[from, to)`. Two windows overlap
//! iff they share a weekday and `a.from < b.to && b.from < a.to`, so
//! windows that merely touch (`a.to == b.from`) do not match. The end of
//! the day is minute 1440, which keeps the first half of an expanded
//! window covering its last minute.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EngineError, Result};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// A wall-clock time with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    /// Exclusive upper bound of a day. Rendered as `23:59`, the last
    /// minute it still covers.
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY);

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour == 24 && minute == 0 {
            return Some(Self::END_OF_DAY);
        }
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self((hour * 60 + minute) as u16))
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Parse a clock string.
    ///
    /// Accepts 12-hour (`"2pm"`, `"2:30 PM"`, `"12:05 am"`) and 24-hour
    /// (`"14:30"`, `"14:30:00"`) forms. Seconds are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedTimeInput`] when the string is not a
    /// recognizable time.
    pub fn parse(s: &str) -> Result<Self> {
        parse_clock(s).ok_or_else(|| EngineError::MalformedTimeInput(format!("'{}'", s.trim())))
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = if *self == Self::END_OF_DAY {
            MINUTES_PER_DAY - 1
        } else {
            self.0
        };
        write!(f, "{:02}:{:02}", minutes / 60, minutes % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Availability exactly as a user entered it.
///
/// Clock strings stay unparsed so a single bad entry can be skipped at match
/// time instead of rejecting the whole profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub day_of_week: Weekday,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub is_preferred: bool,
}

impl AvailabilityWindow {
    pub fn new(day_of_week: Weekday, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            day_of_week,
            from: from.into(),
            to: to.into(),
            is_preferred: false,
        }
    }

    #[must_use]
    pub fn preferred(mut self) -> Self {
        self.is_preferred = true;
        self
    }

    /// Parse the clock strings into a comparable window.
    ///
    /// # Errors
    ///
    /// [`EngineError::MalformedTimeInput`] for an unparseable time, or
    /// [`EngineError::InvalidWindow`] when `from == to`.
    pub fn normalize(&self) -> Result<TimeWindow> {
        let from = TimeOfDay::parse(&self.from)?;
        let to = TimeOfDay::parse(&self.to)?;
        TimeWindow::new(self.day_of_week, from, to).map(|w| TimeWindow {
            preferred: self.is_preferred,
            ..w
        })
    }
}

/// A parsed weekly window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub day: Weekday,
    pub from: TimeOfDay,
    pub to: TimeOfDay,
    #[serde(default)]
    pub preferred: bool,
}

impl TimeWindow {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWindow`] when `from == to`.
    pub fn new(day: Weekday, from: TimeOfDay, to: TimeOfDay) -> Result<Self> {
        if from == to {
            return Err(EngineError::InvalidWindow(format!(
                "{day} {from}-{to} has zero length"
            )));
        }
        Ok(Self {
            day,
            from,
            to,
            preferred: false,
        })
    }

    /// Whether the window runs past midnight into the next day.
    pub fn wraps(&self) -> bool {
        self.to < self.from
    }

    /// Split a midnight-crossing window into same-day pieces.
    ///
    /// A wrapping window becomes `[from, end of day)` on its own day plus
    /// `[00:00, to)` on the next day; the second piece is omitted when `to`
    /// is exactly midnight. Other windows are returned unchanged.
    pub fn expand(&self) -> Vec<TimeWindow> {
        if !self.wraps() {
            return vec![*self];
        }
        let mut pieces = vec![TimeWindow {
            to: TimeOfDay::END_OF_DAY,
            ..*self
        }];
        if self.to > TimeOfDay::MIDNIGHT {
            pieces.push(TimeWindow {
                day: self.day.succ(),
                from: TimeOfDay::MIDNIGHT,
                ..*self
            });
        }
        pieces
    }

    /// Half-open overlap test between two already-expanded windows.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.day == other.day && self.from < other.to && other.from < self.to
    }

    /// Whether the minute starting at `at` on `day` falls inside this
    /// already-expanded window.
    pub fn contains(&self, day: Weekday, at: TimeOfDay) -> bool {
        self.day == day && self.from <= at && at < self.to
    }

    pub fn duration_minutes(&self) -> u16 {
        if self.wraps() {
            MINUTES_PER_DAY - self.from.0 + self.to.0
        } else {
            self.to.0 - self.from.0
        }
    }
}

/// Normalize and expand a list of raw windows.
///
/// Windows that fail to parse are skipped and logged; they can never match.
pub fn expand_all(windows: &[AvailabilityWindow]) -> Vec<TimeWindow> {
    windows
        .iter()
        .filter_map(|raw| match raw.normalize() {
            Ok(window) => Some(window),
            Err(err) => {
                tracing::warn!(
                    day = %raw.day_of_week,
                    from = %raw.from,
                    to = %raw.to,
                    error = %err,
                    "skipping unusable availability window"
                );
                None
            }
        })
        .flat_map(|w| w.expand())
        .collect()
}

/// Whether any window of `left` overlaps any window of `right`.
///
/// Both slices must already be expanded.
pub fn any_overlap(left: &[TimeWindow], right: &[TimeWindow]) -> bool {
    left.iter().any(|a| right.iter().any(|b| a.overlaps(b)))
}

// ── Parsing helpers ─────────────────────────────────────────────────────────

/// Parse a weekday name (case-insensitive, full or abbreviated).
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.trim().to_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_clock(s: &str) -> Option<TimeOfDay> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    if s == "24:00" {
        return Some(TimeOfDay::END_OF_DAY);
    }

    // 24-hour format: "14:00", "14:30:00"
    if let Ok(t) = NaiveTime::parse_from_str(&s, "%H:%M:%S") {
        return Some(t.into());
    }
    if let Ok(t) = NaiveTime::parse_from_str(&s, "%H:%M") {
        return Some(t.into());
    }

    // 12-hour format: "2pm", "2:30pm", "2:30:00 pm", "2 p.m."
    let compact: String = s.chars().filter(|c| !c.is_whitespace() && *c != '.').collect();
    let (time_part, is_pm) = if let Some(rest) = compact.strip_suffix("pm") {
        (rest, true)
    } else if let Some(rest) = compact.strip_suffix("am") {
        (rest, false)
    } else {
        return None;
    };

    let mut parts = time_part.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    if let Some(sec) = parts.next() {
        let _: u32 = sec.parse().ok()?;
    }
    if parts.next().is_some() || !(1..=12).contains(&hour) {
        return None;
    }

    let hour24 = match (hour, is_pm) {
        (12, true) => 12,
        (12, false) => 0,
        (h, true) => h + 12,
        (h, false) => h,
    };
    TimeOfDay::from_hm(hour24, minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    fn window(day: Weekday, from: &str, to: &str) -> TimeWindow {
        TimeWindow::new(day, t(from), t(to)).unwrap()
    }

    // ── parsing ─────────────────────────────────────────────────────────

    #[test]
    fn test_parse_12_hour_forms() {
        assert_eq!(t("2pm").minutes(), 14 * 60);
        assert_eq!(t("2:30 PM").minutes(), 14 * 60 + 30);
        assert_eq!(t("12:05 am").minutes(), 5);
        assert_eq!(t("12:00 PM").minutes(), 12 * 60);
        assert_eq!(t("11:59 p.m.").minutes(), 23 * 60 + 59);
    }

    #[test]
    fn test_parse_24_hour_forms() {
        assert_eq!(t("14:30").minutes(), 14 * 60 + 30);
        assert_eq!(t("00:00").minutes(), 0);
        assert_eq!(t("09:15:42").minutes(), 9 * 60 + 15);
        assert_eq!(t("24:00"), TimeOfDay::END_OF_DAY);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "noon-ish", "13pm", "25:00", "2:61 pm", "0am", "1:2:3:4pm"] {
            let err = TimeOfDay::parse(bad).unwrap_err();
            assert!(matches!(err, EngineError::MalformedTimeInput(_)), "{bad}");
        }
    }

    #[test]
    fn test_display_end_of_day_as_last_minute() {
        assert_eq!(t("9:05 am").to_string(), "09:05");
        assert_eq!(TimeOfDay::END_OF_DAY.to_string(), "23:59");
    }

    #[test]
    fn test_parse_weekday_names() {
        assert_eq!(parse_weekday("Tuesday"), Some(Weekday::Tue));
        assert_eq!(parse_weekday(" sun "), Some(Weekday::Sun));
        assert_eq!(parse_weekday("someday"), None);
    }

    // ── windows ─────────────────────────────────────────────────────────

    #[test]
    fn test_zero_length_window_rejected() {
        let raw = AvailabilityWindow::new(Weekday::Mon, "9:00 AM", "09:00");
        assert!(matches!(raw.normalize(), Err(EngineError::InvalidWindow(_))));
    }

    #[test]
    fn test_normalize_keeps_preference() {
        let raw = AvailabilityWindow::new(Weekday::Mon, "9:00 AM", "10:00 AM").preferred();
        assert!(raw.normalize().unwrap().preferred);
    }

    #[test]
    fn test_expand_plain_window_unchanged() {
        let w = window(Weekday::Mon, "09:00", "11:00");
        assert_eq!(w.expand(), vec![w]);
    }

    #[test]
    fn test_expand_wrapping_window() {
        let w = window(Weekday::Tue, "23:00", "01:00");
        let pieces = w.expand();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].day, Weekday::Tue);
        assert_eq!(pieces[0].from, t("23:00"));
        assert_eq!(pieces[0].to, TimeOfDay::END_OF_DAY);
        assert_eq!(pieces[1].day, Weekday::Wed);
        assert_eq!(pieces[1].from, TimeOfDay::MIDNIGHT);
        assert_eq!(pieces[1].to, t("01:00"));
    }

    #[test]
    fn test_expand_sunday_wraps_to_monday() {
        let pieces = window(Weekday::Sun, "10:00 PM", "2:00 AM").expand();
        assert_eq!(pieces[1].day, Weekday::Mon);
    }

    #[test]
    fn test_expand_window_ending_at_midnight() {
        let pieces = window(Weekday::Fri, "22:00", "00:00").expand();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].to, TimeOfDay::END_OF_DAY);
    }

    #[test]
    fn test_wrapping_filter_matches_next_day_candidate() {
        let filter = window(Weekday::Tue, "23:00", "01:00").expand();
        let candidate = window(Weekday::Wed, "00:30", "02:00").expand();
        assert!(any_overlap(&filter, &candidate));
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = window(Weekday::Mon, "09:00", "10:00");
        let touching = window(Weekday::Mon, "10:00", "11:00");
        let inside = window(Weekday::Mon, "09:15", "09:45");
        let straddling = window(Weekday::Mon, "09:59", "10:30");
        assert!(!a.overlaps(&touching));
        assert!(!touching.overlaps(&a));
        assert!(a.overlaps(&inside));
        assert!(inside.overlaps(&a));
        assert!(a.overlaps(&straddling));
    }

    #[test]
    fn test_overlap_requires_same_day() {
        let a = window(Weekday::Mon, "09:00", "10:00");
        let b = window(Weekday::Tue, "09:00", "10:00");
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_expand_all_skips_malformed() {
        let raw = vec![
            AvailabilityWindow::new(Weekday::Mon, "whenever", "10:00"),
            AvailabilityWindow::new(Weekday::Mon, "9:00 AM", "10:00 AM"),
        ];
        let windows = expand_all(&raw);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].from, t("09:00"));
    }

    #[test]
    fn test_window_serde_shape() {
        let json = r#"{"day_of_week":"Tue","from":"11:00 PM","to":"1:00 AM"}"#;
        let raw: AvailabilityWindow = serde_json::from_str(json).unwrap();
        assert_eq!(raw.day_of_week, Weekday::Tue);
        assert!(!raw.is_preferred);
        assert!(raw.normalize().unwrap().wraps());
    }

    fn weekday_strategy() -> impl Strategy<Value = Weekday> {
        (0u8..7).prop_map(|n| Weekday::try_from(n).unwrap())
    }

    proptest! {
        #[test]
        fn prop_expanded_pieces_cover_wrap_span_once(
            day in weekday_strategy(),
            from in 1u16..1440,
            to in 0u16..1439,
        ) {
            prop_assume!(to < from);
            let w = TimeWindow::new(
                day,
                TimeOfDay::from_minutes(from).unwrap(),
                TimeOfDay::from_minutes(to).unwrap(),
            ).unwrap();
            let pieces = w.expand();

            let covered: u16 = pieces.iter().map(|p| p.duration_minutes()).sum();
            prop_assert_eq!(covered, w.duration_minutes());

            // Every minute of the original span is in exactly one piece.
            for offset in 0..w.duration_minutes() {
                let absolute = from + offset;
                let (point_day, minute) = if absolute >= 1440 {
                    (day.succ(), absolute - 1440)
                } else {
                    (day, absolute)
                };
                let at = TimeOfDay::from_minutes(minute).unwrap();
                let hits = pieces.iter().filter(|p| p.contains(point_day, at)).count();
                prop_assert_eq!(hits, 1);
            }
        }

        #[test]
        fn prop_overlap_is_symmetric(
            day in weekday_strategy(),
            a in (0u16..1440, 1u16..=1440),
            b in (0u16..1440, 1u16..=1440),
        ) {
            prop_assume!(a.0 < a.1 && b.0 < b.1);
            let at = |m: u16| TimeOfDay::from_minutes(m).unwrap();
            let wa = TimeWindow::new(day, at(a.0), at(a.1)).unwrap();
            let wb = TimeWindow::new(day, at(b.0), at(b.1)).unwrap();
            prop_assert_eq!(wa.overlaps(&wb), wb.overlaps(&wa));
        }
    }
}
