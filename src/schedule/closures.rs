use chrono::{Days, NaiveDate};
use std::collections::HashSet;
use thiserror::Error;

/// An institution-wide period with no lessons. Both ends are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureRange {
    pub id: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub reason: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("closure range {start}..={end} ends before it starts")]
pub struct InvalidRange {
    pub id: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ClosureRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        let range = Self {
            id: None,
            start,
            end,
            reason: None,
            kind: None,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), InvalidRange> {
        if self.start > self.end {
            return Err(InvalidRange {
                id: self.id.clone(),
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Days of the range that fall inside `from..=to`.
    pub fn days_within(&self, from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
        let start = self.start.max(from);
        let end = self.end.min(to);
        start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Point-membership index over closure days plus any extra dates the
/// planner wants kept free (manual lessons, other packages).
#[derive(Debug, Clone, Default)]
pub struct BlockedSet {
    dates: HashSet<NaiveDate>,
    rejected: Vec<InvalidRange>,
}

impl BlockedSet {
    /// Expands every valid range, keeping only the days inside `from..=to`
    /// (the planning window). Malformed ranges are skipped and kept in
    /// `rejected` so callers can surface them.
    pub fn build_within(ranges: &[ClosureRange], from: NaiveDate, to: NaiveDate) -> Self {
        let mut set = Self::default();
        for range in ranges {
            match range.validate() {
                Ok(()) => set.dates.extend(range.days_within(from, to)),
                Err(bad) => {
                    tracing::warn!(
                        closure_id = bad.id.as_deref().unwrap_or("-"),
                        start = %bad.start,
                        end = %bad.end,
                        "skipping malformed closure range"
                    );
                    set.rejected.push(bad);
                }
            }
        }
        set
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn block<I>(&mut self, dates: I)
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        self.dates.extend(dates);
    }

    pub fn rejected(&self) -> &[InvalidRange] {
        &self.rejected
    }
}

/// Adds `days` to `date`, saturating at the calendar maximum.
pub(crate) fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days))
        .unwrap_or(NaiveDate::MAX)
}
