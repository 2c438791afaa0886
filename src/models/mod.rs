use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RepackerError;

/// All batch dates use the dashed form, e.g. "2023-01-01".
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a YYYY-MM-DD date string.
pub fn parse_date(s: &str) -> Result<NaiveDate, RepackerError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| RepackerError::InvalidDate(s.to_string()))
}

/// Format a date in the YYYY-MM-DD form used throughout the job protocol.
pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Every date in [start, end), in calendar order.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    let mut dates = Vec::new();
    let mut d = start;
    while d < end {
        dates.push(format_date(d));
        d = d.succ_opt().expect("date overflow");
    }
    dates
}

/// A single date task with its lease bookkeeping timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Updated")]
    pub updated: DateTime<Utc>,
}

/// Outcome of a lease attempt.
#[derive(Debug, PartialEq)]
pub enum Lease {
    /// A date was popped from the pending queue and is now leased.
    Granted(String),
    /// Nothing pending, but leased jobs remain; more dates may return.
    Wait,
    /// Nothing pending and nothing leased; the work set is drained.
    Empty,
}

/// The job server's entire state: every known date is in exactly one of
/// `pending`, `leased`, or `completed`. Serialized field names match the
/// on-disk state file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsState {
    #[serde(rename = "Pending", default)]
    pub pending: VecDeque<String>,
    #[serde(rename = "Leased", default)]
    pub leased: BTreeMap<String, Job>,
    #[serde(rename = "Completed", default)]
    pub completed: BTreeMap<String, Job>,
}

impl JobsState {
    /// Hard-reset the state to all dates in [start, end) pending. Any prior
    /// pending, leased, or completed entries are discarded.
    pub fn init_range(&mut self, start: NaiveDate, end: NaiveDate) {
        *self = JobsState::default();
        self.pending = date_range(start, end).into();
    }

    /// Pop the front of the pending queue into the leased set.
    pub fn lease(&mut self, now: DateTime<Utc>) -> Lease {
        match self.pending.pop_front() {
            Some(date) => {
                self.leased.insert(
                    date.clone(),
                    Job {
                        date: date.clone(),
                        updated: now,
                    },
                );
                Lease::Granted(date)
            }
            None if self.leased.is_empty() => Lease::Empty,
            None => Lease::Wait,
        }
    }

    /// Refresh the lease timestamp for a date. Returns false when the date
    /// is not currently leased.
    pub fn update(&mut self, date: &str, now: DateTime<Utc>) -> bool {
        match self.leased.get_mut(date) {
            Some(job) => {
                job.updated = now;
                true
            }
            None => false,
        }
    }

    /// Move a leased date to the completed set. Returns false when the date
    /// is not currently leased.
    pub fn complete(&mut self, date: &str, now: DateTime<Utc>) -> bool {
        match self.leased.remove(date) {
            Some(mut job) => {
                job.updated = now;
                self.completed.insert(date.to_string(), job);
                true
            }
            None => false,
        }
    }

    /// Return every leased job older than `timeout` to the back of the
    /// pending queue. Returns the reclaimed dates.
    pub fn reclaim_expired(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, job)| now - job.updated > timeout)
            .map(|(date, _)| date.clone())
            .collect();
        for date in &expired {
            self.leased.remove(date);
            self.pending.push_back(date.clone());
        }
        expired
    }

    /// Total number of known dates across all three sets.
    pub fn len(&self) -> usize {
        self.pending.len() + self.leased.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_parse_date_valid() {
        assert_eq!(
            parse_date("2023-01-01").unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date("20230101").is_err());
        assert!(parse_date("2023-13-01").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_date_range_end_exclusive() {
        let dates = date_range(date("2023-01-01"), date("2023-01-03"));
        assert_eq!(dates, vec!["2023-01-01", "2023-01-02"]);
    }

    #[test]
    fn test_date_range_start_after_end_is_empty() {
        assert!(date_range(date("2023-01-03"), date("2023-01-01")).is_empty());
        assert!(date_range(date("2023-01-01"), date("2023-01-01")).is_empty());
    }

    #[test]
    fn test_date_range_crosses_month_boundary() {
        let dates = date_range(date("2023-01-30"), date("2023-02-02"));
        assert_eq!(dates, vec!["2023-01-30", "2023-01-31", "2023-02-01"]);
    }

    // -----------------------------------------------------------------------
    // JobsState lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn test_lease_then_complete_happy_path() {
        // Init with 2023-01-01..2023-01-03 yields two pending dates; lease
        // takes the first; complete moves it to completed.
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-03"));
        assert_eq!(jobs.pending, vec!["2023-01-01", "2023-01-02"]);

        let now = Utc::now();
        assert_eq!(jobs.lease(now), Lease::Granted("2023-01-01".to_string()));
        assert_eq!(jobs.leased.len(), 1);
        assert_eq!(jobs.pending, vec!["2023-01-02"]);

        assert!(jobs.complete("2023-01-01", now));
        assert_eq!(jobs.completed.len(), 1);
        assert!(jobs.leased.is_empty());
        assert_eq!(jobs.pending, vec!["2023-01-02"]);
    }

    #[test]
    fn test_lease_empty_vs_wait() {
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-01"));
        // Nothing pending, nothing leased: fully drained.
        assert_eq!(jobs.lease(Utc::now()), Lease::Empty);

        jobs.init_range(date("2023-01-01"), date("2023-01-02"));
        let now = Utc::now();
        assert_eq!(jobs.lease(now), Lease::Granted("2023-01-01".to_string()));
        // Nothing pending but one lease outstanding: transient empty.
        assert_eq!(jobs.lease(now), Lease::Wait);
    }

    #[test]
    fn test_update_refreshes_lease() {
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-02"));
        let t0 = Utc::now();
        jobs.lease(t0);
        let t1 = t0 + Duration::seconds(30);
        assert!(jobs.update("2023-01-01", t1));
        assert_eq!(jobs.leased["2023-01-01"].updated, t1);
    }

    #[test]
    fn test_update_unknown_date_fails() {
        let mut jobs = JobsState::default();
        assert!(!jobs.update("2023-01-01", Utc::now()));
        assert!(!jobs.complete("2023-01-01", Utc::now()));
    }

    #[test]
    fn test_init_is_hard_reset() {
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-03"));
        let now = Utc::now();
        jobs.lease(now);
        jobs.complete("2023-01-01", now);

        jobs.init_range(date("2023-02-01"), date("2023-02-02"));
        assert_eq!(jobs.pending, vec!["2023-02-01"]);
        assert!(jobs.leased.is_empty());
        assert!(jobs.completed.is_empty());
    }

    #[test]
    fn test_reclaim_expired_returns_to_pending_tail() {
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-03"));
        let t0 = Utc::now();
        jobs.lease(t0);
        // 2 seconds later with a 1 second timeout, the lease is stale.
        let reclaimed = jobs.reclaim_expired(t0 + Duration::seconds(2), Duration::seconds(1));
        assert_eq!(reclaimed, vec!["2023-01-01"]);
        assert!(jobs.leased.is_empty());
        // Reclaimed dates append to the end of the queue.
        assert_eq!(jobs.pending, vec!["2023-01-02", "2023-01-01"]);
    }

    #[test]
    fn test_reclaim_leaves_fresh_leases() {
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-02"));
        let t0 = Utc::now();
        jobs.lease(t0);
        let reclaimed = jobs.reclaim_expired(t0, Duration::seconds(60));
        assert!(reclaimed.is_empty());
        assert_eq!(jobs.leased.len(), 1);
    }

    #[test]
    fn test_every_date_in_exactly_one_set() {
        // Set disjointness and size conservation across the full lifecycle.
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-04"));
        let total = jobs.len();
        let now = Utc::now();

        jobs.lease(now);
        assert_eq!(jobs.len(), total);
        jobs.update("2023-01-01", now);
        assert_eq!(jobs.len(), total);
        jobs.complete("2023-01-01", now);
        assert_eq!(jobs.len(), total);

        jobs.lease(now);
        jobs.reclaim_expired(now + Duration::seconds(10), Duration::seconds(1));
        assert_eq!(jobs.len(), total);

        for d in ["2023-01-01", "2023-01-02", "2023-01-03"] {
            let places = [
                jobs.pending.contains(&d.to_string()),
                jobs.leased.contains_key(d),
                jobs.completed.contains_key(d),
            ];
            assert_eq!(places.iter().filter(|p| **p).count(), 1, "date {}", d);
        }
    }

    #[test]
    fn test_state_serialization_shape() {
        let mut jobs = JobsState::default();
        jobs.init_range(date("2023-01-01"), date("2023-01-03"));
        jobs.lease(Utc::now());

        let json = serde_json::to_string_pretty(&jobs).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(v["Pending"].is_array());
        assert!(v["Leased"]["2023-01-01"]["Updated"].is_string());
        assert_eq!(v["Leased"]["2023-01-01"]["Date"], "2023-01-01");

        let back: JobsState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pending, jobs.pending);
        assert_eq!(back.leased.len(), 1);
    }
}
