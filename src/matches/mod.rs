//! Match aggregation

pub mod aggregate;
pub mod summarizer;

pub use aggregate::{ApplyError, MatchAggregate, PlayerSummary, Round, SealedMatch, TeamSummary};
pub use summarizer::{MatchBook, MatchSummarizer, Transition};
