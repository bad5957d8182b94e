//! Calendar parsing and `date_diff` arithmetic on `time::Date`.

use edc_core::ExpressionError;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// Parse `YYYY-MM-DD`. The date part of an ISO datetime is accepted too, so
/// datetime fields can take part in date arithmetic.
pub fn parse_date(s: &str) -> Option<Date> {
    let date_part = match s.char_indices().nth(10) {
        Some((idx, 'T' | ' ')) => &s[..idx],
        Some(_) => return None,
        None => s,
    };
    Date::parse(date_part, format_description!("[year]-[month]-[day]")).ok()
}

pub fn parse_datetime(s: &str) -> Option<PrimitiveDateTime> {
    let normalized = s.replacen(' ', "T", 1);
    PrimitiveDateTime::parse(
        &normalized,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            &normalized,
            format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        )
    })
    .ok()
    .or_else(|| {
        OffsetDateTime::parse(&normalized, &Rfc3339)
            .ok()
            .map(|dt| PrimitiveDateTime::new(dt.date(), dt.time()))
    })
}

pub fn parse_time(s: &str) -> Option<Time> {
    Time::parse(s, format_description!("[hour]:[minute]:[second]"))
        .or_else(|_| Time::parse(s, format_description!("[hour]:[minute]")))
        .ok()
}

pub fn format_date(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day())
}

/// `d` moved by whole calendar years. Feb 29 lands on Feb 28 in a common
/// year.
pub fn shift_years(d: Date, years: i32) -> Date {
    let year = d.year() + years;
    d.replace_year(year)
        .or_else(|_| d.replace_day(28).and_then(|d| d.replace_year(year)))
        .unwrap_or(d)
}

// ──────────────────────────────────────────────
// date_diff
// ──────────────────────────────────────────────

/// Whole `unit`s from `from` to `to`, truncated toward zero. Negative when
/// `to` is earlier.
pub fn date_diff(from: Date, to: Date, unit: &str) -> Result<i64, ExpressionError> {
    match unit.trim().to_ascii_lowercase().as_str() {
        "day" | "days" => Ok((to - from).whole_days()),
        "week" | "weeks" => Ok((to - from).whole_days() / 7),
        "month" | "months" => Ok(months_between(from, to)),
        "year" | "years" => Ok(months_between(from, to) / 12),
        other => Err(ExpressionError::type_mismatch(format!(
            "date_diff unit must be days, weeks, months or years, got '{}'",
            other
        ))),
    }
}

fn months_between(from: Date, to: Date) -> i64 {
    if to < from {
        return -months_between(to, from);
    }
    let mut months = i64::from(to.year() - from.year()) * 12
        + i64::from(u8::from(to.month()))
        - i64::from(u8::from(from.month()));
    if to.day() < from.day() {
        months -= 1;
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn shift_years_clamps_leap_day() {
        assert_eq!(shift_years(date!(2024 - 02 - 29), 1), date!(2025 - 02 - 28));
        assert_eq!(shift_years(date!(2026 - 10 - 15), -100), date!(1926 - 10 - 15));
    }

    #[test]
    fn parses_dates_and_datetime_prefixes() {
        assert_eq!(parse_date("2024-03-15"), Some(date!(2024 - 03 - 15)));
        assert_eq!(parse_date("2024-03-15T08:30:00"), Some(date!(2024 - 03 - 15)));
        assert_eq!(parse_date("2024-03-15 08:30"), Some(date!(2024 - 03 - 15)));
        assert_eq!(parse_date("15/03/2024"), None);
        assert_eq!(parse_date("2024-13-01"), None);
    }

    #[test]
    fn parses_datetimes_and_times() {
        assert!(parse_datetime("2024-03-15T08:30").is_some());
        assert!(parse_datetime("2024-03-15 08:30:15").is_some());
        assert!(parse_datetime("2024-03-15T08:30:15Z").is_some());
        assert!(parse_datetime("2024-03-15").is_none());
        assert!(parse_time("23:59").is_some());
        assert!(parse_time("24:00").is_none());
    }

    #[test]
    fn day_and_week_differences() {
        let a = date!(2024 - 01 - 01);
        let b = date!(2024 - 01 - 20);
        assert_eq!(date_diff(a, b, "days").unwrap(), 19);
        assert_eq!(date_diff(a, b, "weeks").unwrap(), 2);
        assert_eq!(date_diff(b, a, "weeks").unwrap(), -2);
    }

    #[test]
    fn age_in_years_counts_birthdays() {
        let born = date!(1990 - 06 - 15);
        assert_eq!(date_diff(born, date!(2024 - 06 - 14), "years").unwrap(), 33);
        assert_eq!(date_diff(born, date!(2024 - 06 - 15), "years").unwrap(), 34);
        assert_eq!(date_diff(date!(2024 - 06 - 15), born, "years").unwrap(), -34);
    }

    #[test]
    fn month_difference_respects_day_of_month() {
        let a = date!(2024 - 01 - 31);
        assert_eq!(date_diff(a, date!(2024 - 02 - 29), "months").unwrap(), 0);
        assert_eq!(date_diff(a, date!(2024 - 03 - 31), "months").unwrap(), 2);
    }

    #[test]
    fn unknown_unit_is_type_mismatch() {
        let a = date!(2024 - 01 - 01);
        let err = date_diff(a, a, "fortnights").unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }
}
