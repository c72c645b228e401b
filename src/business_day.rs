//! Business calendar arithmetic in the platform's operating timezone.
//!
//! All rent-cycle rules (penalty idempotency, reminder windows, scheduler
//! triggers) are defined against East Africa Time, UTC+3. Kenya observes no
//! daylight saving, so a fixed offset is correct here; porting this backend
//! to a DST-observing market requires replacing this module with a proper
//! tzdb lookup.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};

const EAT_OFFSET_SECS: i32 = 3 * 3600;

fn eat() -> FixedOffset {
    FixedOffset::east_opt(EAT_OFFSET_SECS).expect("valid fixed offset")
}

/// `at` expressed in business time. Callers needing provider-facing local
/// timestamps format this instead of re-deriving the offset.
pub fn business_datetime(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.with_timezone(&eat())
}

/// Calendar date of `at` in business time.
pub fn business_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&eat()).date_naive()
}

/// True when both instants fall on the same business calendar day.
pub fn same_business_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    business_date(a) == business_date(b)
}

/// Day-of-month of `at` in business time (1-31).
pub fn business_day_of_month(at: DateTime<Utc>) -> u32 {
    business_date(at).day()
}

/// Hour and minute of `at` in business time.
pub fn business_hour_minute(at: DateTime<Utc>) -> (u32, u32) {
    let local = at.with_timezone(&eat());
    (local.hour(), local.minute())
}

/// UTC bounds `[start, end)` of the business calendar day containing `at`.
pub fn business_day_utc_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = business_date(at);
    let start_local = eat()
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight exists"))
        .single()
        .expect("fixed offset is unambiguous");
    let start = start_local.with_timezone(&Utc);
    (start, start + Duration::days(1))
}

/// UTC instant of 23:59:59 business time on the given date. Used for
/// invoice due dates so "due on the 5th" means the whole of the 5th locally.
pub fn end_of_business_day(date: NaiveDate) -> DateTime<Utc> {
    let local = eat()
        .from_local_datetime(&date.and_hms_opt(23, 59, 59).expect("valid time"))
        .single()
        .expect("fixed offset is unambiguous");
    local.with_timezone(&Utc)
}

/// First day of the billing month containing `at`, in business time.
pub fn billing_month(at: DateTime<Utc>) -> NaiveDate {
    let date = business_date(at);
    date.with_day(1).expect("day 1 exists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn shifts_date_across_utc_midnight() {
        // 22:30 UTC is already the next day in EAT.
        let late = Utc.with_ymd_and_hms(2025, 3, 10, 22, 30, 0).unwrap();
        assert_eq!(business_date(late), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());

        let noon = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(business_date(noon), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    }

    #[test]
    fn same_business_day_respects_offset() {
        let a = Utc.with_ymd_and_hms(2025, 3, 10, 21, 5, 0).unwrap(); // Mar 11 EAT
        let b = Utc.with_ymd_and_hms(2025, 3, 11, 8, 0, 0).unwrap(); // Mar 11 EAT
        let c = Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap(); // Mar 10 EAT
        assert!(same_business_day(a, b));
        assert!(!same_business_day(a, c));
    }

    #[test]
    fn day_bounds_are_utc_shifted() {
        let at = Utc.with_ymd_and_hms(2025, 3, 11, 8, 0, 0).unwrap();
        let (start, end) = business_day_utc_bounds(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 10, 21, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 3, 11, 21, 0, 0).unwrap());
    }

    #[test]
    fn billing_month_is_first_of_month() {
        let at = Utc.with_ymd_and_hms(2025, 6, 17, 10, 0, 0).unwrap();
        assert_eq!(billing_month(at), NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        // 21:30 UTC on Jun 30 is Jul 1 in EAT.
        let rollover = Utc.with_ymd_and_hms(2025, 6, 30, 21, 30, 0).unwrap();
        assert_eq!(billing_month(rollover), NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
    }
}
