//! Resumption point for the next scan.

use chrono::{DateTime, Duration, TimeZone};

use crate::db::ledger::JobLedger;
use crate::db::DatabaseError;
use crate::models::ObjectId;

/// Every scan looks back this far past the last successful scan start so
/// late updates and deletions are picked up again.
pub const OVERLAP_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    /// Object id the scan resumes from.
    pub oid: ObjectId,
    /// `YYYY-MM-DD` date the scan looks back to.
    pub from_date: String,
}

/// Compute the watermark from the ledger. Without a successful task (or
/// with a zero watermark) the scan starts at `first_oid`, looking back from `now`.
pub fn resume_point<Tz: TimeZone>(
    ledger: &JobLedger,
    first_oid: ObjectId,
    now: &DateTime<Tz>,
) -> Result<Watermark, DatabaseError>
where
    Tz::Offset: std::fmt::Display,
{
    let last_oid = ledger.latest_oid_end()?.unwrap_or(0);
    let last_start = ledger.last_status()?.map(|s| s.scanner_start);

    let (oid, since) = match (last_oid, last_start) {
        (oid, Some(start)) if oid != 0 => {
            let since = now
                .timezone()
                .timestamp_opt(start, 0)
                .earliest()
                .unwrap_or_else(|| now.clone());
            (oid, since)
        }
        _ => (first_oid, now.clone()),
    };

    let from = since - Duration::seconds(OVERLAP_SECS);
    Ok(Watermark {
        oid,
        from_date: from.format("%Y-%m-%d").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskRecord, STATUS_SUCCESS};
    use chrono::Utc;

    fn record(task_id: u64, oid_end: u64, status: i64) -> TaskRecord {
        let t = task_id as i64;
        TaskRecord {
            task_id,
            oid_start: 0,
            oid_end,
            scanner_start: t,
            builder_start: t,
            extractor_start: t,
            extractor_end: t,
            n_scanned: 1,
            n_deleted: 0,
            n_indexed: 1,
            n_extracted: 0,
            status,
        }
    }

    #[test]
    fn empty_ledger_uses_first_oid_and_now() {
        let ledger = JobLedger::open_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        let wm = resume_point(&ledger, 5000, &now).unwrap();
        assert_eq!(
            wm,
            Watermark {
                oid: 5000,
                from_date: "2024-03-09".into()
            }
        );
    }

    #[test]
    fn resumes_from_last_success_minus_a_day() {
        let ledger = JobLedger::open_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap().timestamp() as u64;
        ledger.record(&record(start, 7000, STATUS_SUCCESS)).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        let wm = resume_point(&ledger, 5000, &now).unwrap();
        assert_eq!(wm.oid, 7000);
        assert_eq!(wm.from_date, "2023-12-31");
    }

    #[test]
    fn zero_watermark_falls_back_to_first_oid() {
        let ledger = JobLedger::open_memory().unwrap();
        ledger.record(&record(1000, 0, STATUS_SUCCESS)).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        let wm = resume_point(&ledger, 42, &now).unwrap();
        assert_eq!(wm.oid, 42);
        assert_eq!(wm.from_date, "2024-03-09");
    }
}
