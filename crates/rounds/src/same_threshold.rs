//! Same-payload-until-threshold round.

use crate::collection::Collection;
use crate::{Payload, PayloadError, Round, RoundInitError};
use conclave_types::{Event, Participant, QuorumStrategy, RoundId, SynchronizedData};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

/// Configuration for [`CollectSameUntilThreshold`].
#[derive(Debug, Clone)]
pub struct SameThresholdConfig {
    /// Emitted when a non-null value reaches the threshold.
    pub done_event: Event,

    /// Emitted when the winning value is null (no sender had a result).
    pub none_event: Event,

    /// Emitted once no value can reach the threshold anymore.
    pub no_majority_event: Event,

    /// Snapshot key receiving the full sender-keyed collection.
    pub collection_key: &'static str,

    /// Snapshot key receiving the winning value.
    pub selection_key: &'static str,

    /// Threshold rule; defaults to the `> 2/3` quorum.
    pub quorum: QuorumStrategy,
}

/// Collects the same payload from a quorum of agents.
///
/// Resolves DONE once the most common value's tally reaches the quorum of
/// the participant set snapshotted at round start, and NO_MAJORITY as soon
/// as divergent votes make a quorum mathematically impossible.
#[derive(Debug)]
pub struct CollectSameUntilThreshold {
    collection: Collection,
    data: SynchronizedData,
    config: SameThresholdConfig,
}

impl CollectSameUntilThreshold {
    /// Create the round from the latest snapshot.
    pub fn new(
        id: RoundId,
        data: SynchronizedData,
        config: SameThresholdConfig,
    ) -> Result<Self, RoundInitError> {
        let collection = Collection::from_snapshot(id, &data)?;
        Ok(Self {
            collection,
            data,
            config,
        })
    }

    fn threshold(&self) -> usize {
        self.config
            .quorum
            .threshold(self.collection.participant_count())
    }

    /// The most common value so far, if any payload has been collected.
    pub fn most_voted(&self) -> Option<&Value> {
        self.collection.most_voted().map(|(value, _)| value)
    }
}

impl Round for CollectSameUntilThreshold {
    fn id(&self) -> RoundId {
        self.collection.round_id()
    }

    fn check_payload(&self, payload: &Payload) -> Result<(), PayloadError> {
        self.collection.check_same(payload)
    }

    fn process_payload(&mut self, payload: Payload) -> Result<(), PayloadError> {
        self.collection.record_same(payload)
    }

    fn end_of_block(&mut self) -> Option<(SynchronizedData, Event)> {
        let threshold = self.threshold();
        if let Some((value, count)) = self.collection.most_voted() {
            if count >= threshold {
                if value.is_null() {
                    return Some((self.data.clone(), self.config.none_event));
                }
                let winner = value.clone();
                let updated = self.data.update([
                    (
                        self.config.collection_key.to_owned(),
                        self.collection.as_json(),
                    ),
                    (self.config.selection_key.to_owned(), winner),
                ]);
                return Some((updated, self.config.done_event));
            }
        }
        if !self.collection.majority_possible(threshold) {
            debug!(
                round = %self.id(),
                collected = self.collection.len(),
                threshold,
                "no value can reach quorum anymore"
            );
            return Some((self.data.clone(), self.config.no_majority_event));
        }
        None
    }

    fn collection(&self) -> &IndexMap<Participant, Value> {
        self.collection.entries()
    }

    fn threshold_reached(&self) -> bool {
        self.collection
            .most_voted()
            .is_some_and(|(_, count)| count >= self.threshold())
    }
}
