//! Rewrites the leading timestamps of canned log fixtures so the last stamped
//! line lands on "now" and every other line keeps its distance to it.
//!
//! The reference is the last stamped line in file order, not the maximum, so
//! fixtures are expected to be chronological. The offset of each line is
//! taken apart into a calendar period between the two dates plus the
//! difference of the two clock times, then subtracted from "now" in that
//! order.

use std::fs;
use std::path::{Path, PathBuf};

use agent_acceptance_core::{AcceptanceError, Result};
use regex_lite::{Captures, Regex};
use serde::Serialize;
use time::macros::format_description;
use time::{Date, Duration, Month, PrimitiveDateTime, Time, Weekday};
use tracing::{debug, info};

/// Extensions of files rewritten when a whole directory is rebased.
pub const LOG_EXTENSIONS: [&str; 4] = ["log", "dg", "rcp", "rct"];

const ISO_PATTERN: &str = r"^([0-9]{4})-([0-9]{2})-([0-9]{2})T([0-9]{2}):([0-9]{2}):([0-9]{2})";
const AGENT_PATTERN: &str =
    r"^([F-W][a-u][d-u]) ([A-S][a-u][b-y]) ([0-9, ][0-9]) ([0-9]{2}):([0-9]{2}):([0-9]{2}) ([0-9]{4})";

const MONTH_NAMES: [&str; 12] =
    ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimestampDialect {
    /// `2024-06-01T09:30:00`
    Iso,
    /// `Sat Jun  1 09:30:00 2024`, written only by the agent's own log.
    Agent,
}

impl TimestampDialect {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Agent => "agent",
        }
    }

    fn pattern(self) -> Result<Regex> {
        let source = match self {
            Self::Iso => ISO_PATTERN,
            Self::Agent => AGENT_PATTERN,
        };
        Regex::new(source)
            .map_err(|err| AcceptanceError::Parse(format!("invalid timestamp pattern: {err}")))
    }

    fn parse(self, caps: &Captures<'_>) -> Result<PrimitiveDateTime> {
        let text = caps.get(0).map_or("", |m| m.as_str());
        match self {
            Self::Iso => {
                let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
                PrimitiveDateTime::parse(text, &format)
                    .map_err(|err| AcceptanceError::Parse(format!("bad timestamp {text:?}: {err}")))
            }
            Self::Agent => parse_agent(caps, text),
        }
    }

    fn format(self, value: PrimitiveDateTime) -> Result<String> {
        match self {
            Self::Iso => {
                let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
                value
                    .format(&format)
                    .map_err(|err| AcceptanceError::Parse(format!("cannot format {value}: {err}")))
            }
            Self::Agent => Ok(format!(
                "{} {} {:>2} {:02}:{:02}:{:02} {}",
                weekday_name(value.weekday()),
                MONTH_NAMES[usize::from(u8::from(value.month())) - 1],
                value.day(),
                value.hour(),
                value.minute(),
                value.second(),
                value.year()
            )),
        }
    }
}

fn capture<'h>(caps: &Captures<'h>, index: usize) -> &'h str {
    caps.get(index).map_or("", |m| m.as_str())
}

fn number<T: std::str::FromStr>(raw: &str, text: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AcceptanceError::Parse(format!("bad timestamp {text:?}: {raw:?} is not a number")))
}

fn parse_agent(caps: &Captures<'_>, text: &str) -> Result<PrimitiveDateTime> {
    let bad = |reason: &str| AcceptanceError::Parse(format!("bad timestamp {text:?}: {reason}"));

    let month_index = MONTH_NAMES
        .iter()
        .position(|name| *name == capture(caps, 2))
        .ok_or_else(|| bad("unknown month"))?;
    let month = Month::try_from(u8::try_from(month_index + 1).map_err(|_| bad("unknown month"))?)
        .map_err(|_| bad("unknown month"))?;

    let date = Date::from_calendar_date(
        number(capture(caps, 7), text)?,
        month,
        number(capture(caps, 3), text)?,
    )
    .map_err(|err| bad(&err.to_string()))?;
    let time = Time::from_hms(
        number(capture(caps, 4), text)?,
        number(capture(caps, 5), text)?,
        number(capture(caps, 6), text)?,
    )
    .map_err(|err| bad(&err.to_string()))?;

    if weekday_name(date.weekday()) != capture(caps, 1) {
        return Err(bad(&format!("{date} is not a {}", capture(caps, 1))));
    }
    Ok(date.with_time(time))
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Monday => "Mon",
        Weekday::Tuesday => "Tue",
        Weekday::Wednesday => "Wed",
        Weekday::Thursday => "Thu",
        Weekday::Friday => "Fri",
        Weekday::Saturday => "Sat",
        Weekday::Sunday => "Sun",
    }
}

fn add_months(date: Date, months: i32) -> Result<Date> {
    let index = date.year() * 12 + i32::from(u8::from(date.month())) - 1 + months;
    let year = index.div_euclid(12);
    let month = u8::try_from(index.rem_euclid(12) + 1)
        .ok()
        .and_then(|month| Month::try_from(month).ok())
        .ok_or_else(|| AcceptanceError::Parse(format!("{date} shifted by {months} months is out of range")))?;
    let day = date.day().min(time::util::days_in_year_month(year, month));
    Date::from_calendar_date(year, month, day)
        .map_err(|err| AcceptanceError::Parse(format!("{date} shifted by {months} months: {err}")))
}

/// Months and days between two dates, borrowing a month when the day
/// difference has the opposite sign.
fn calendar_period(start: Date, end: Date) -> Result<(i32, i64)> {
    let month_index = |date: Date| date.year() * 12 + i32::from(u8::from(date.month()));
    let mut months = month_index(end) - month_index(start);
    let mut days = i64::from(end.day()) - i64::from(start.day());

    if months > 0 && days < 0 {
        months -= 1;
        let borrowed = add_months(start, months)?;
        days = i64::from(end.to_julian_day() - borrowed.to_julian_day());
    } else if months < 0 && days > 0 {
        months += 1;
        days -= i64::from(time::util::days_in_year_month(end.year(), end.month()));
    }
    Ok((months, days))
}

fn rebase_one(
    stamp: PrimitiveDateTime,
    reference: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<PrimitiveDateTime> {
    let (months, days) = calendar_period(stamp.date(), reference.date())?;
    let clock = (reference - reference.date().with_time(stamp.time())).whole_seconds();
    let (hours, minutes, seconds) = (clock / 3600, (clock % 3600) / 60, clock % 60);

    let shifted = add_months(now.date(), -months)?.with_time(now.time());
    let offset = Duration::days(days)
        + Duration::hours(hours)
        + Duration::minutes(minutes)
        + Duration::seconds(seconds);
    shifted.checked_sub(offset).ok_or_else(|| {
        AcceptanceError::Parse(format!("rebasing {stamp} onto {now} leaves the calendar"))
    })
}

/// A timestamp at the start of a line, after any indentation.
struct LeadingStamp {
    value: PrimitiveDateTime,
    start: usize,
    end: usize,
}

fn leading_stamp(dialect: TimestampDialect, regex: &Regex, line: &str) -> Result<Option<LeadingStamp>> {
    let body = line.trim_start();
    let start = line.len() - body.len();
    let Some(caps) = regex.captures(body) else {
        return Ok(None);
    };
    let end = start + caps.get(0).map_or(0, |m| m.end());
    Ok(Some(LeadingStamp { value: dialect.parse(&caps)?, start, end }))
}

/// Rewrite every leading timestamp of `text` relative to `now`.
///
/// Sub-second precision of `now` is dropped. Lines keep their original ending
/// style, and a byte-order mark at the start of a line is removed.
///
/// # Errors
/// Returns a parse error when no line carries a timestamp of `dialect` or a
/// matching prefix is not a real date.
pub fn rebase_text(text: &str, dialect: TimestampDialect, now: PrimitiveDateTime) -> Result<String> {
    let regex = dialect.pattern()?;
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let lines: Vec<&str> =
        text.lines().map(|line| line.strip_prefix('\u{feff}').unwrap_or(line)).collect();

    let mut reference = None;
    for line in &lines {
        if let Some(stamp) = leading_stamp(dialect, &regex, line)? {
            reference = Some(stamp.value);
        }
    }
    let reference = reference.ok_or_else(|| {
        AcceptanceError::Parse(format!("no line starts with a {} timestamp", dialect.as_str()))
    })?;
    let now = now
        .replace_nanosecond(0)
        .map_err(|err| AcceptanceError::Parse(format!("cannot truncate {now}: {err}")))?;

    let mut out = String::with_capacity(text.len());
    for line in lines {
        match leading_stamp(dialect, &regex, line)? {
            Some(stamp) => {
                let rebased = rebase_one(stamp.value, reference, now)?;
                out.push_str(&line[..stamp.start]);
                out.push_str(&dialect.format(rebased)?);
                out.push_str(&line[stamp.end..]);
            }
            None => out.push_str(line),
        }
        out.push_str(newline);
    }
    Ok(out)
}

/// Rebase `input` into `output`; the two may be the same file.
///
/// The result is written next to `output` first and renamed over it.
///
/// # Errors
/// Returns an I/O error for unreadable or unwritable files and the errors of
/// [`rebase_text`].
pub fn rebase_file_to(
    input: &Path,
    output: &Path,
    dialect: TimestampDialect,
    now: PrimitiveDateTime,
) -> Result<()> {
    let bytes = fs::read(input).map_err(|err| AcceptanceError::io(input, err))?;
    let text = String::from_utf8_lossy(&bytes);
    let rebased = rebase_text(&text, dialect, now).map_err(|err| match err {
        AcceptanceError::Parse(message) => {
            AcceptanceError::Parse(format!("{}: {message}", input.display()))
        }
        other => other,
    })?;

    let mut staging = output.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, rebased).map_err(|err| AcceptanceError::io(&staging, err))?;
    fs::rename(&staging, output).map_err(|err| AcceptanceError::io(output, err))?;

    debug!(input = %input.display(), output = %output.display(), dialect = dialect.as_str(), "rebased file");
    Ok(())
}

/// # Errors
/// See [`rebase_file_to`].
pub fn rebase_file(path: &Path, dialect: TimestampDialect, now: PrimitiveDateTime) -> Result<()> {
    rebase_file_to(path, path, dialect, now)
}

#[must_use]
pub fn is_log_like(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| LOG_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Rebases staged files against one frozen "now", choosing the dialect by
/// file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebaser {
    agent_log_name: String,
    now: PrimitiveDateTime,
}

impl Rebaser {
    #[must_use]
    pub fn new(agent_log_name: impl Into<String>, now: PrimitiveDateTime) -> Self {
        Self { agent_log_name: agent_log_name.into(), now }
    }

    #[must_use]
    pub fn now(&self) -> PrimitiveDateTime {
        self.now
    }

    #[must_use]
    pub fn dialect_for(&self, path: &Path) -> TimestampDialect {
        let is_agent_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name == self.agent_log_name);
        if is_agent_log {
            TimestampDialect::Agent
        } else {
            TimestampDialect::Iso
        }
    }

    /// Rebase `path` in place when it is log-like. Returns whether it was touched.
    ///
    /// # Errors
    /// See [`rebase_file_to`].
    pub fn rebase_in_place(&self, path: &Path) -> Result<bool> {
        if !is_log_like(path) {
            return Ok(false);
        }
        let dialect = self.dialect_for(path);
        info!(path = %path.display(), dialect = dialect.as_str(), "updating dates in log file");
        rebase_file(path, dialect, self.now)?;
        Ok(true)
    }
}
