//! Spaced-repetition review reminders as an iCalendar file.
//!
//! One `VEVENT` per configured review day (default +1, +3, +7 days), each at
//! the configured local hour, lasting `duration_minutes`, with one display
//! alarm `alarm_minutes` before the start. Times are written in UTC basic
//! format. The output is a pure function of the topic, the clock reading,
//! and the config.

use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone, Utc};

use crate::config::CalendarConfig;

/// File name offered for the export.
pub const ICS_FILE_NAME: &str = "spaced-repetition-reviews.ics";

const PRODID: &str = "-//Cogno//Lesson Reviews//EN";

/// Build the calendar for `topic`, scheduling relative to `now` in the time
/// zone `now` carries.
pub fn generate_ics<Tz: TimeZone>(topic: &str, now: &DateTime<Tz>, config: &CalendarConfig) -> String {
    let stamp = format_utc(&now.with_timezone(&Utc));
    let topic_text = escape_text(topic);

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", PRODID),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
    ];

    for (n, days) in config.review_days.iter().enumerate() {
        let Some(start) = review_start(now, *days, config.hour) else {
            tracing::warn!(days, "review date out of range; skipping");
            continue;
        };
        let end = start + Duration::minutes(i64::from(config.duration_minutes));
        let start_text = format_utc(&start);

        lines.extend([
            "BEGIN:VEVENT".to_string(),
            format!("UID:review-{}-{}@cogno", n + 1, start_text),
            format!("DTSTAMP:{}", stamp),
            format!("DTSTART:{}", start_text),
            format!("DTEND:{}", format_utc(&end)),
            format!("SUMMARY:Review {}: {}", n + 1, topic_text),
            format!(
                "DESCRIPTION:Spaced repetition review for optimal retention. Review your notes on: {}",
                topic_text
            ),
            "BEGIN:VALARM".to_string(),
            format!("TRIGGER:-PT{}M", config.alarm_minutes),
            "ACTION:DISPLAY".to_string(),
            "DESCRIPTION:Review reminder".to_string(),
            "END:VALARM".to_string(),
            "END:VEVENT".to_string(),
        ]);
    }

    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in &lines {
        out.push_str(&fold(line));
        out.push_str("\r\n");
    }
    out
}

/// `days` after `now`'s local date, at `hour`:00 local time, in UTC.
fn review_start<Tz: TimeZone>(now: &DateTime<Tz>, days: u32, hour: u32) -> Option<DateTime<Utc>> {
    let date = now
        .date_naive()
        .checked_add_days(Days::new(u64::from(days)))?;
    let local = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0)?);
    let tz = now.timezone();
    // In a DST gap the hour does not exist locally; take the next one.
    let resolved = tz
        .from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())?;
    Some(resolved.with_timezone(&Utc))
}

fn format_utc(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Escape a TEXT value.
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// Fold a content line at 75 octets, never inside a UTF-8 sequence.
fn fold(line: &str) -> String {
    const LIMIT: usize = 75;
    if line.len() <= LIMIT {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + line.len() / LIMIT * 3);
    let mut width = 0;
    for c in line.chars() {
        // Continuation lines start with a space, which counts.
        if width + c.len_utf8() > LIMIT {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += c.len_utf8();
    }
    out
}
