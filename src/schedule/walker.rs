use super::closures::{add_days, BlockedSet};
use chrono::{Datelike, NaiveDate, Weekday};

/// One or two distinct lesson weekdays, kept in Monday-first order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekdaySet(Vec<Weekday>);

impl WeekdaySet {
    pub fn new<I>(days: I) -> Self
    where
        I: IntoIterator<Item = Weekday>,
    {
        let mut out: Vec<Weekday> = Vec::new();
        for day in days {
            if !out.contains(&day) {
                out.push(day);
            }
        }
        out.sort_by_key(|d| d.num_days_from_monday());
        Self(out)
    }

    pub fn single(day: Weekday) -> Self {
        Self(vec![day])
    }

    /// Picks the weekdays a package uses: an 8-lesson package with two
    /// distinct configured days uses both, anything else only the primary.
    pub fn for_package(primary: Weekday, secondary: Option<Weekday>, package_size: u32) -> Self {
        match secondary {
            Some(second) if package_size == 8 && second != primary => {
                let mut days = vec![primary, second];
                days.sort_by_key(|d| d.num_days_from_monday());
                Self(days)
            }
            _ => Self::single(primary),
        }
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0.contains(&day)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Monday=0 .. Sunday=6.
    pub fn indexes(&self) -> Vec<u32> {
        self.0.iter().map(|d| d.num_days_from_monday()).collect()
    }
}

/// Parses a Monday=0 .. Sunday=6 index.
pub fn weekday_from_index(idx: i64) -> Option<Weekday> {
    match idx {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Latest date the walker may accept: `anchor + horizon_days`, or the
/// cutoff when that comes first.
pub fn horizon_for(anchor: NaiveDate, horizon_days: u32, cutoff: Option<NaiveDate>) -> NaiveDate {
    let default = add_days(anchor, u64::from(horizon_days));
    match cutoff {
        Some(end) if end < default => end,
        _ => default,
    }
}

/// Collects up to `need` dates from `anchor` (inclusive) that fall on one of
/// `weekdays` and are not blocked, never looking past `horizon`.
pub fn walk(
    anchor: NaiveDate,
    weekdays: &WeekdaySet,
    blocked: &BlockedSet,
    need: usize,
    horizon: NaiveDate,
) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    if need == 0 || weekdays.is_empty() {
        return out;
    }
    for day in anchor.iter_days() {
        if day > horizon || out.len() >= need {
            break;
        }
        if weekdays.contains(day.weekday()) && !blocked.contains(day) {
            out.push(day);
        }
    }
    if out.len() < need {
        tracing::debug!(
            %anchor,
            %horizon,
            need,
            found = out.len(),
            "horizon reached before all dates were found"
        );
    }
    out
}
