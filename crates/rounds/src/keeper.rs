//! Only-keeper-sends round.

use crate::collection::Collection;
use crate::{Payload, PayloadError, Round, RoundInitError};
use conclave_types::{Event, Participant, RoundId, SyncDataError, SynchronizedData};
use indexmap::IndexMap;
use serde_json::Value;

/// Configuration for [`OnlyKeeperSends`].
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// Emitted when the keeper submits a non-null value.
    pub done_event: Event,

    /// Emitted when the keeper submits null (it could not produce a result).
    pub fail_event: Event,

    /// Snapshot key holding the elected keeper's address.
    pub keeper_key: &'static str,

    /// Snapshot key receiving the keeper's value.
    pub payload_key: &'static str,
}

/// Round resolved by a single distinguished sender.
///
/// The keeper address is read from the snapshot at round start; payloads
/// from every other sender are rejected and have no effect on the outcome.
#[derive(Debug)]
pub struct OnlyKeeperSends {
    collection: Collection,
    keeper: Participant,
    data: SynchronizedData,
    config: KeeperConfig,
}

impl OnlyKeeperSends {
    /// Create the round from the latest snapshot.
    ///
    /// Fails if the keeper key is absent or not an address string; the
    /// composition-time precondition check makes that a wiring bug.
    pub fn new(
        id: RoundId,
        data: SynchronizedData,
        config: KeeperConfig,
    ) -> Result<Self, RoundInitError> {
        let collection = Collection::from_snapshot(id, &data)?;
        let keeper = data
            .get_strict(config.keeper_key)
            .and_then(|value| {
                value
                    .as_str()
                    .map(Participant::new)
                    .ok_or_else(|| SyncDataError::MalformedKey {
                        key: config.keeper_key.to_owned(),
                        reason: "expected an address string".to_owned(),
                    })
            })
            .map_err(|source| RoundInitError::Snapshot { round: id, source })?;
        Ok(Self {
            collection,
            keeper,
            data,
            config,
        })
    }

    /// The elected keeper for this round.
    pub fn keeper(&self) -> &Participant {
        &self.keeper
    }

    fn keeper_value(&self) -> Option<&Value> {
        self.collection.entries().get(&self.keeper)
    }
}

impl Round for OnlyKeeperSends {
    fn id(&self) -> RoundId {
        self.collection.round_id()
    }

    fn check_payload(&self, payload: &Payload) -> Result<(), PayloadError> {
        self.collection.check_same(payload)?;
        if payload.sender != self.keeper {
            return Err(PayloadError::NotKeeper {
                round: self.id(),
                sender: payload.sender.clone(),
            });
        }
        if self.keeper_value().is_some() {
            return Err(PayloadError::AlreadySubmitted {
                round: self.id(),
                sender: payload.sender.clone(),
            });
        }
        Ok(())
    }

    fn process_payload(&mut self, payload: Payload) -> Result<(), PayloadError> {
        self.check_payload(&payload)?;
        self.collection.record_same(payload)
    }

    fn end_of_block(&mut self) -> Option<(SynchronizedData, Event)> {
        let value = self.keeper_value()?;
        if value.is_null() {
            return Some((self.data.clone(), self.config.fail_event));
        }
        let updated = self
            .data
            .update([(self.config.payload_key.to_owned(), value.clone())]);
        Some((updated, self.config.done_event))
    }

    fn collection(&self) -> &IndexMap<Participant, Value> {
        self.collection.entries()
    }

    fn threshold_reached(&self) -> bool {
        self.keeper_value().is_some()
    }
}
