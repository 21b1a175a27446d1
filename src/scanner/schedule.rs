//! Daily launch schedule.

use chrono::{DateTime, Days, NaiveTime, TimeZone};

/// Next wall-clock occurrence of `at` no earlier than `now`. A time equal
/// to `now` fires immediately; an earlier time fires tomorrow.
///
/// When the local date has no such instant (a DST gap) the next valid day
/// is used; an ambiguous instant resolves to the earlier one.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();
    loop {
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate >= *now {
                return candidate;
            }
        }
        day = match day.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => return now.clone(),
        };
    }
}
