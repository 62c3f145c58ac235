//! Event model, log classification and fan-out bus

pub mod bus;
pub mod classify;
pub mod envelope;

pub use bus::{BusError, EventBus, Interest, PublishReport, Subscription};
pub use classify::{Classified, Classifier, LogClassifier};
pub use envelope::{
    AttrValue, Attributes, Envelope, EventKind, Payload, PlayerRef, Score, ServerRef, SteamId, Team,
};
