//! Rounds that wait for the full participant set.

use crate::collection::Collection;
use crate::{Payload, PayloadError, Round, RoundInitError};
use conclave_types::{Event, Participant, RoundId, SynchronizedData};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

/// Configuration for [`CollectDifferentUntilAll`].
#[derive(Debug, Clone)]
pub struct DifferentUntilAllConfig {
    /// Emitted once every participant has submitted.
    pub done_event: Event,

    /// Snapshot key receiving the full sender-keyed collection.
    pub collection_key: &'static str,
}

/// Collects a distinct payload from every participant.
///
/// Each sender submits exactly once and no value may repeat; the round
/// resolves only when the collection covers the whole participant set.
#[derive(Debug)]
pub struct CollectDifferentUntilAll {
    collection: Collection,
    data: SynchronizedData,
    config: DifferentUntilAllConfig,
}

impl CollectDifferentUntilAll {
    /// Create the round from the latest snapshot.
    pub fn new(
        id: RoundId,
        data: SynchronizedData,
        config: DifferentUntilAllConfig,
    ) -> Result<Self, RoundInitError> {
        let collection = Collection::from_snapshot(id, &data)?;
        Ok(Self {
            collection,
            data,
            config,
        })
    }
}

impl Round for CollectDifferentUntilAll {
    fn id(&self) -> RoundId {
        self.collection.round_id()
    }

    fn check_payload(&self, payload: &Payload) -> Result<(), PayloadError> {
        self.collection.check_distinct(payload)
    }

    fn process_payload(&mut self, payload: Payload) -> Result<(), PayloadError> {
        self.collection.record_distinct(payload)
    }

    fn end_of_block(&mut self) -> Option<(SynchronizedData, Event)> {
        if !self.collection.is_full() {
            return None;
        }
        let updated = self.data.update([(
            self.config.collection_key.to_owned(),
            self.collection.as_json(),
        )]);
        Some((updated, self.config.done_event))
    }

    fn collection(&self) -> &IndexMap<Participant, Value> {
        self.collection.entries()
    }

    fn threshold_reached(&self) -> bool {
        self.collection.is_full()
    }
}

/// Configuration for [`CollectSameUntilAll`].
#[derive(Debug, Clone)]
pub struct SameUntilAllConfig {
    /// Emitted once unanimity has held for the settle window.
    pub done_event: Event,

    /// Snapshot key receiving the agreed value.
    pub collection_key: &'static str,

    /// Extra end-of-block evaluations to wait after everyone has submitted,
    /// admitting late-rejoining senders before finalizing.
    pub required_confirmations: u64,
}

/// Collects the same payload from every participant.
///
/// Divergent values are rejected at submission, so the collection only ever
/// holds one distinct value. After the last participant submits, a settle
/// counter increments once per end-of-block and the round resolves only once
/// the counter exceeds the configured confirmation window.
#[derive(Debug)]
pub struct CollectSameUntilAll {
    collection: Collection,
    data: SynchronizedData,
    config: SameUntilAllConfig,
    confirmations: u64,
}

impl CollectSameUntilAll {
    /// Create the round from the latest snapshot.
    pub fn new(
        id: RoundId,
        data: SynchronizedData,
        config: SameUntilAllConfig,
    ) -> Result<Self, RoundInitError> {
        let collection = Collection::from_snapshot(id, &data)?;
        Ok(Self {
            collection,
            data,
            config,
            confirmations: 0,
        })
    }

    /// End-of-block evaluations seen since unanimity was reached.
    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }
}

impl Round for CollectSameUntilAll {
    fn id(&self) -> RoundId {
        self.collection.round_id()
    }

    fn check_payload(&self, payload: &Payload) -> Result<(), PayloadError> {
        self.collection.check_unanimous(payload)
    }

    fn process_payload(&mut self, payload: Payload) -> Result<(), PayloadError> {
        self.collection.record_unanimous(payload)
    }

    fn end_of_block(&mut self) -> Option<(SynchronizedData, Event)> {
        if !self.collection.is_full() {
            return None;
        }
        self.confirmations += 1;
        if self.confirmations <= self.config.required_confirmations {
            debug!(
                round = %self.id(),
                confirmations = self.confirmations,
                required = self.config.required_confirmations,
                "unanimity reached, waiting out the settle window"
            );
            return None;
        }
        let agreed = self
            .collection
            .entries()
            .values()
            .next()
            .cloned()
            .unwrap_or(Value::Null);
        let updated = self
            .data
            .update([(self.config.collection_key.to_owned(), agreed)]);
        Some((updated, self.config.done_event))
    }

    fn collection(&self) -> &IndexMap<Participant, Value> {
        self.collection.entries()
    }

    fn threshold_reached(&self) -> bool {
        self.collection.is_full()
    }
}
