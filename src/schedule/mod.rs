//! Lesson-date scheduling: closure index, weekday walker and the package
//! planner. Everything here is pure; callers load closures and manual
//! lessons and persist the resulting slots.

mod closures;
mod planner;
mod walker;

pub use closures::ClosureRange;
pub use planner::{
    plan_package, resolve_anchor, ManualLesson, PackagePlan, PackagePlanRequest, PlanError,
    DEFAULT_HORIZON_DAYS,
};
pub use walker::{weekday_from_index, WeekdaySet};
