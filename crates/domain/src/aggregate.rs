//! Event-sourcing traits shared by every aggregate in this crate.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded by an aggregate, named in the past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name, used as the stored event type.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// Mutating operations validate first and then record their events: each
/// recorded event is applied to the state and queued as pending until the
/// unit of work persists it. A failed operation records nothing.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    /// Business rule violations raised by the mutating operations.
    type Error: std::error::Error + Send + Sync;

    /// Stored alongside each envelope, e.g. `"Order"`.
    fn aggregate_type() -> &'static str;

    /// `None` until the first event has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// Version of the last persisted event. 0 for a new aggregate.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Folds one event into the state. Deterministic and infallible.
    fn apply(&mut self, event: Self::Event);

    /// Events recorded since the aggregate was loaded or last committed.
    fn pending_events(&self) -> &[Self::Event];

    /// Drains the pending events.
    fn take_pending_events(&mut self) -> Vec<Self::Event>;

    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Rebuilds an aggregate from its persisted history.
    fn from_history(events: impl IntoIterator<Item = Self::Event>, version: Version) -> Self {
        let mut aggregate = Self::default();
        aggregate.apply_events(events);
        aggregate.set_version(version);
        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TallyEvent {
        Opened { id: AggregateId },
        Counted(u32),
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Opened { .. } => "TallyOpened",
                TallyEvent::Counted(_) => "TallyCounted",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Tally {
        id: Option<AggregateId>,
        total: u32,
        version: Version,
        pending: Vec<TallyEvent>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("tally is closed")]
    struct Closed;

    impl Tally {
        fn count(&mut self, n: u32) {
            let event = TallyEvent::Counted(n);
            self.apply(event.clone());
            self.pending.push(event);
        }
    }

    impl Aggregate for Tally {
        type Event = TallyEvent;
        type Error = Closed;

        fn aggregate_type() -> &'static str {
            "Tally"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: TallyEvent) {
            match event {
                TallyEvent::Opened { id } => self.id = Some(id),
                TallyEvent::Counted(n) => self.total += n,
            }
        }

        fn pending_events(&self) -> &[TallyEvent] {
            &self.pending
        }

        fn take_pending_events(&mut self) -> Vec<TallyEvent> {
            std::mem::take(&mut self.pending)
        }
    }

    #[test]
    fn replay_rebuilds_state_without_pending_events() {
        let id = AggregateId::new();
        let tally = Tally::from_history(
            [
                TallyEvent::Opened { id },
                TallyEvent::Counted(3),
                TallyEvent::Counted(4),
            ],
            Version::new(3),
        );

        assert_eq!(tally.id(), Some(id));
        assert_eq!(tally.total, 7);
        assert_eq!(tally.version(), Version::new(3));
        assert!(!tally.has_pending_events());
    }

    #[test]
    fn recorded_events_stay_pending_until_taken() {
        let mut tally = Tally::default();
        tally.count(2);
        tally.count(5);

        assert_eq!(tally.total, 7);
        assert_eq!(tally.pending_events().len(), 2);

        let taken = tally.take_pending_events();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].event_type(), "TallyCounted");
        assert!(!tally.has_pending_events());
    }
}
