use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| format!("'{value}' must be YYYY-MM-DD"))
}

/// Shifts `date` by a signed number of days. `None` when the result leaves
/// chrono's supported range.
pub fn offset_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

pub fn date_string_with_offset(date: NaiveDate, days: i64) -> Option<String> {
    offset_date(date, days).map(format_date)
}

pub fn today_in(timezone: &Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(timezone).date_naive()
}

pub fn format_time(instant: DateTime<Utc>, timezone: &Tz) -> String {
    instant.with_timezone(timezone).format(TIME_FORMAT).to_string()
}

/// The local day as a half-open UTC range: start of `date` up to start of the
/// following day.
pub fn day_window(date: NaiveDate, timezone: &Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = start_of_day(date, timezone)?;
    let end = start_of_day(offset_date(date, 1)?, timezone)?;
    Some((start, end))
}

fn start_of_day(date: NaiveDate, timezone: &Tz) -> Option<DateTime<Utc>> {
    let midnight = date.and_time(NaiveTime::MIN);
    // Zones that skip midnight on DST changes start the day at the first valid hour.
    timezone
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            let one_am = NaiveTime::from_hms_opt(1, 0, 0)?;
            timezone.from_local_datetime(&date.and_time(one_am)).earliest()
        })
        .map(|value| value.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(value: &str) -> NaiveDate {
        parse_date(value).expect("valid date")
    }

    #[test]
    fn parse_and_format_use_fixed_day_format() {
        assert_eq!(format_date(date("2024-06-15")), "2024-06-15");
        assert!(parse_date("15/06/2024").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn offsets_cross_month_and_year_boundaries() {
        assert_eq!(
            date_string_with_offset(date("2024-12-31"), 1).as_deref(),
            Some("2025-01-01")
        );
        assert_eq!(
            date_string_with_offset(date("2024-03-01"), -1).as_deref(),
            Some("2024-02-29")
        );
        assert_eq!(offset_date(date("2024-06-15"), i64::MAX), None);
        assert_eq!(offset_date(date("2024-06-15"), i64::MIN), None);
    }

    #[test]
    fn day_window_spans_one_local_day() {
        let tz: Tz = "Europe/Madrid".parse().expect("known timezone");
        let (start, end) = day_window(date("2024-06-15"), &tz).expect("window");
        assert_eq!(start.to_rfc3339(), "2024-06-14T22:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-06-15T22:00:00+00:00");
    }

    #[test]
    fn day_window_follows_dst_transition() {
        let tz: Tz = "Europe/Madrid".parse().expect("known timezone");
        let (start, end) = day_window(date("2024-03-31"), &tz).expect("window");
        assert_eq!((end - start).num_hours(), 23);
    }

    #[test]
    fn today_is_resolved_in_configured_timezone() {
        let now = DateTime::parse_from_rfc3339("2024-06-15T23:30:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let tokyo: Tz = "Asia/Tokyo".parse().expect("known timezone");
        assert_eq!(today_in(&Tz::UTC, now), date("2024-06-15"));
        assert_eq!(today_in(&tokyo, now), date("2024-06-16"));
        assert_eq!(format_time(now, &tokyo), "08:30");
    }

    proptest! {
        #[test]
        fn offset_then_reverse_offset_is_identity(days in -20_000i64..20_000) {
            let origin = date("2024-06-15");
            let shifted = offset_date(origin, days).expect("in range");
            prop_assert_eq!(offset_date(shifted, -days), Some(origin));
        }
    }
}
