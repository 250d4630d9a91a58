//! Timezone-aware time helpers.
//!
//! Storage timestamps are always UTC with an explicit `+00:00` offset.
//! The configured IANA timezone is used only for ID stamps and local-day
//! windows (e.g. daily rollups), which must be DST-correct: a spring-forward
//! day spans 23 hours, a fall-back day 25.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Errors from timezone resolution and window computation.
#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    /// The configured timezone name is not a valid IANA identifier.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    /// The requested date has no representable midnight (should not occur
    /// for real IANA zones, where DST gaps never cover midnight... almost).
    #[error("no valid local time for {date} in {tz}")]
    UnrepresentableDate {
        /// The local date.
        date: NaiveDate,
        /// The timezone name.
        tz: String,
    },
}

/// Parse an IANA timezone name.
///
/// # Errors
///
/// Returns [`TimeError::UnknownTimezone`] for unrecognized names.
pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.parse::<Tz>()
        .map_err(|_| TimeError::UnknownTimezone(name.to_owned()))
}

/// Format a UTC timestamp as ISO-8601 with an explicit `+00:00` offset.
///
/// This is the canonical on-disk and on-wire timestamp format.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Parse a canonical ISO-8601 timestamp back to UTC.
///
/// Accepts any valid RFC 3339 offset and normalizes to UTC.
///
/// # Errors
///
/// Returns a `chrono` parse error for malformed input.
pub fn parse_utc(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// UTC boundaries `[start, end)` of a local calendar day.
///
/// `end - start` is 24 h on ordinary days, 23 h across spring-forward,
/// and 25 h across fall-back.
///
/// # Errors
///
/// Returns [`TimeError::UnrepresentableDate`] if neither midnight nor any
/// minute of the first local hour exists (pathological zone data).
pub fn local_day_bounds(
    tz: Tz,
    date: NaiveDate,
) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeError> {
    let start = first_instant_of_day(tz, date)?;
    let next = date
        .succ_opt()
        .ok_or_else(|| TimeError::UnrepresentableDate {
            date,
            tz: tz.to_string(),
        })?;
    let end = first_instant_of_day(tz, next)?;
    Ok((start, end))
}

/// The first valid instant of a local day, in UTC.
///
/// Midnight usually exists; when a DST gap swallows it (e.g. `America/Sao_Paulo`
/// historically sprang forward at 00:00) the scan walks forward minute by
/// minute until a representable local time is found.
fn first_instant_of_day(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>, TimeError> {
    let mut candidate = date.and_hms_opt(0, 0, 0);
    for _ in 0..120 {
        let Some(naive) = candidate else { break };
        match tz.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) => return Ok(dt.with_timezone(&Utc)),
            // Fall-back ambiguity: the earlier instant starts the day.
            chrono::LocalResult::Ambiguous(earliest, _) => {
                return Ok(earliest.with_timezone(&Utc));
            }
            chrono::LocalResult::None => {
                candidate = naive.checked_add_signed(Duration::minutes(1));
            }
        }
    }
    Err(TimeError::UnrepresentableDate {
        date,
        tz: tz.to_string(),
    })
}

/// Today's date in the given timezone.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Minute-precision local timestamp for entity ID stamps (`YYYYMMDD-HHmm`).
pub fn id_stamp(tz: Tz, now: DateTime<Utc>) -> String {
    now.with_timezone(&tz).format("%Y%m%d-%H%M").to_string()
}
