use super::closures::{BlockedSet, ClosureRange, InvalidRange};
use super::walker::{horizon_for, walk, WeekdaySet};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_HORIZON_DAYS: u32 = 730;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no lesson weekday configured")]
    MissingWeekdays,
    #[error("package size must be positive, got {0}")]
    NonPositiveTargetSize(i64),
    #[error("start date {anchor} is after the last schedulable date {horizon}")]
    AnchorAfterHorizon {
        anchor: NaiveDate,
        horizon: NaiveDate,
    },
}

/// A lesson already pinned by a person. Its date is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualLesson {
    pub lesson_id: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct PackagePlanRequest {
    pub anchor: NaiveDate,
    pub weekdays: WeekdaySet,
    pub target_size: i64,
    pub end_date: Option<NaiveDate>,
    pub manual_lessons: Vec<ManualLesson>,
    /// Days booked elsewhere for the same student; blocked like closures.
    pub reserved_dates: Vec<NaiveDate>,
    pub horizon_days: u32,
}

impl PackagePlanRequest {
    pub fn new(anchor: NaiveDate, weekdays: WeekdaySet, target_size: i64) -> Self {
        Self {
            anchor,
            weekdays,
            target_size,
            end_date: None,
            manual_lessons: Vec::new(),
            reserved_dates: Vec::new(),
            horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }

    pub fn end_date(mut self, end: Option<NaiveDate>) -> Self {
        self.end_date = end;
        self
    }

    pub fn manual_lessons(mut self, lessons: Vec<ManualLesson>) -> Self {
        self.manual_lessons = lessons;
        self
    }

    pub fn reserved_dates(mut self, dates: Vec<NaiveDate>) -> Self {
        self.reserved_dates = dates;
        self
    }

    pub fn horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOrigin {
    Generated,
    Manual { lesson_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonSlot {
    pub date: NaiveDate,
    pub sequence_number: u32,
    pub is_first: bool,
    pub origin: SlotOrigin,
}

impl LessonSlot {
    pub fn is_manual(&self) -> bool {
        matches!(self.origin, SlotOrigin::Manual { .. })
    }

    pub fn manual_lesson_id(&self) -> Option<&str> {
        match &self.origin {
            SlotOrigin::Manual { lesson_id } => Some(lesson_id),
            SlotOrigin::Generated => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanStatus {
    Complete,
    /// The horizon ran out before the package was filled.
    Partial,
    /// No generated and no manual lessons: nothing to schedule.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePlan {
    pub slots: Vec<LessonSlot>,
    pub requested: usize,
    pub horizon: NaiveDate,
    pub skipped_closures: Vec<InvalidRange>,
}

impl PackagePlan {
    pub fn status(&self) -> PlanStatus {
        if self.slots.is_empty() {
            PlanStatus::Empty
        } else if self.slots.len() < self.requested {
            PlanStatus::Partial
        } else {
            PlanStatus::Complete
        }
    }

    pub fn first_lesson_date(&self) -> Option<NaiveDate> {
        self.slots.iter().find(|s| s.is_first).map(|s| s.date)
    }

    pub fn generated_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_manual()).count()
    }
}

/// Resolves where scanning starts: explicit start, then registration date,
/// then today.
pub fn resolve_anchor(
    start_from: Option<NaiveDate>,
    registered: Option<NaiveDate>,
    today: NaiveDate,
) -> NaiveDate {
    start_from.or(registered).unwrap_or(today)
}

/// Sorts slots by date (stable) and assigns 1-based sequence numbers plus
/// the first-lesson flag.
pub fn number_slots(mut slots: Vec<LessonSlot>) -> Vec<LessonSlot> {
    slots.sort_by_key(|s| s.date);
    for (i, slot) in slots.iter_mut().enumerate() {
        slot.sequence_number = (i + 1) as u32;
        slot.is_first = i == 0;
    }
    slots
}

fn drop_latest_generated(slots: &mut Vec<LessonSlot>, target: usize) {
    while slots.len() > target {
        let Some(idx) = slots.iter().rposition(|s| !s.is_manual()) else {
            break;
        };
        slots.remove(idx);
    }
}

/// Computes the lesson dates for one package.
///
/// Manual lessons always survive: they are merged at their own dates, kept
/// even when they exceed the package size, and their days are withheld
/// from generation. Generated dates fill the remaining slots on the
/// configured weekdays, skipping closures, up to the horizon. A plan
/// shorter than requested is returned as-is; see [`PackagePlan::status`].
pub fn plan_package(
    req: &PackagePlanRequest,
    closures: &[ClosureRange],
) -> Result<PackagePlan, PlanError> {
    if req.weekdays.is_empty() {
        return Err(PlanError::MissingWeekdays);
    }
    if req.target_size <= 0 {
        return Err(PlanError::NonPositiveTargetSize(req.target_size));
    }
    let horizon = horizon_for(req.anchor, req.horizon_days, req.end_date);
    if req.anchor > horizon {
        return Err(PlanError::AnchorAfterHorizon {
            anchor: req.anchor,
            horizon,
        });
    }

    let target = req.target_size as usize;
    let mut blocked = BlockedSet::build_within(closures, req.anchor, horizon);
    let skipped_closures = blocked.rejected().to_vec();

    let mut slots: Vec<LessonSlot> = req
        .manual_lessons
        .iter()
        .map(|m| LessonSlot {
            date: m.date,
            sequence_number: 0,
            is_first: false,
            origin: SlotOrigin::Manual {
                lesson_id: m.lesson_id.clone(),
            },
        })
        .collect();

    let remaining = target.saturating_sub(slots.len());
    if remaining > 0 {
        blocked.block(req.manual_lessons.iter().map(|m| m.date));
        blocked.block(req.reserved_dates.iter().copied());
        let generated = walk(req.anchor, &req.weekdays, &blocked, remaining, horizon);
        slots.extend(generated.into_iter().map(|date| LessonSlot {
            date,
            sequence_number: 0,
            is_first: false,
            origin: SlotOrigin::Generated,
        }));
    }

    let mut slots = number_slots(slots);
    if slots.len() > target {
        drop_latest_generated(&mut slots, target);
        slots = number_slots(slots);
    }

    let plan = PackagePlan {
        slots,
        requested: target,
        horizon,
        skipped_closures,
    };
    match plan.status() {
        PlanStatus::Complete => {}
        PlanStatus::Partial => tracing::info!(
            anchor = %req.anchor,
            %horizon,
            requested = target,
            planned = plan.slots.len(),
            "package only partly scheduled before horizon"
        ),
        PlanStatus::Empty => tracing::info!(
            anchor = %req.anchor,
            %horizon,
            "no lessons possible for package"
        ),
    }
    Ok(plan)
}
