//! Chat warnings and escalation

pub mod engine;
pub mod filter;
pub mod tracker;

pub use engine::{WarningEffects, WarningEngine, WarningSettings};
pub use filter::{FilterMatch, FilterSet};
pub use tracker::{WarnOutcome, Warning, WarningTracker};
