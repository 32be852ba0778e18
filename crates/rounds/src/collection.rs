//! Shared payload-collection state for the concrete round strategies.

use crate::{Payload, PayloadError, RoundInitError};
use conclave_types::{Participant, RoundId, SynchronizedData};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// Sender-keyed payload collection with the participant set snapshotted at
/// round start.
///
/// Iteration order is insertion order throughout, so tally tie-breaking and
/// error messages are deterministic across agents replaying the same block
/// sequence.
#[derive(Debug)]
pub(crate) struct Collection {
    round_id: RoundId,
    participants: IndexSet<Participant>,
    entries: IndexMap<Participant, Value>,
}

impl Collection {
    /// Snapshot the participant set from the latest synchronized data.
    pub(crate) fn from_snapshot(
        round_id: RoundId,
        data: &SynchronizedData,
    ) -> Result<Self, RoundInitError> {
        let participants = data
            .participants()
            .map_err(|source| RoundInitError::Snapshot {
                round: round_id,
                source,
            })?;
        Ok(Self {
            round_id,
            participants,
            entries: IndexMap::new(),
        })
    }

    pub(crate) fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub(crate) fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub(crate) fn entries(&self) -> &IndexMap<Participant, Value> {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether every recognized participant has submitted.
    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= self.participants.len()
    }

    fn check_recognized(&self, sender: &Participant) -> Result<(), PayloadError> {
        if self.participants.contains(sender) {
            Ok(())
        } else {
            Err(PayloadError::UnknownSender {
                round: self.round_id,
                sender: sender.clone(),
            })
        }
    }

    /// Validate a payload for a same-value round: re-submitting the identical
    /// value is a no-op, a different value from the same sender conflicts.
    pub(crate) fn check_same(&self, payload: &Payload) -> Result<(), PayloadError> {
        self.check_recognized(&payload.sender)?;
        match self.entries.get(&payload.sender) {
            Some(existing) if *existing != payload.value => Err(PayloadError::ConflictingPayload {
                round: self.round_id,
                sender: payload.sender.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn record_same(&mut self, payload: Payload) -> Result<(), PayloadError> {
        self.check_same(&payload)?;
        self.entries.insert(payload.sender, payload.value);
        Ok(())
    }

    /// Validate a payload for a distinct-value round: each sender submits
    /// exactly once and no value may repeat across senders.
    pub(crate) fn check_distinct(&self, payload: &Payload) -> Result<(), PayloadError> {
        self.check_recognized(&payload.sender)?;
        if self.entries.contains_key(&payload.sender) {
            return Err(PayloadError::AlreadySubmitted {
                round: self.round_id,
                sender: payload.sender.clone(),
            });
        }
        if self.entries.values().any(|value| *value == payload.value) {
            return Err(PayloadError::DuplicateValue {
                round: self.round_id,
                value: payload.value.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn record_distinct(&mut self, payload: Payload) -> Result<(), PayloadError> {
        self.check_distinct(&payload)?;
        self.entries.insert(payload.sender, payload.value);
        Ok(())
    }

    /// Validate a payload for a unanimity round: any value diverging from
    /// what the round already holds is rejected outright.
    pub(crate) fn check_unanimous(&self, payload: &Payload) -> Result<(), PayloadError> {
        self.check_recognized(&payload.sender)?;
        if self
            .entries
            .values()
            .any(|value| *value != payload.value)
        {
            return Err(PayloadError::ConflictingPayload {
                round: self.round_id,
                sender: payload.sender.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn record_unanimous(&mut self, payload: Payload) -> Result<(), PayloadError> {
        self.check_unanimous(&payload)?;
        self.entries.insert(payload.sender, payload.value);
        Ok(())
    }

    /// Count submissions per distinct value, in first-seen order.
    pub(crate) fn tally(&self) -> Vec<(&Value, usize)> {
        let mut counts: Vec<(&Value, usize)> = Vec::new();
        for value in self.entries.values() {
            match counts.iter_mut().find(|(seen, _)| *seen == value) {
                Some((_, count)) => *count += 1,
                None => counts.push((value, 1)),
            }
        }
        counts
    }

    /// The most common value and its count; ties break to the value seen
    /// first.
    pub(crate) fn most_voted(&self) -> Option<(&Value, usize)> {
        self.tally().into_iter().max_by_key(|(_, count)| *count)
    }

    /// Whether some value can still reach `threshold` given the senders not
    /// yet heard from. Once false, the round can fail early with
    /// NO_MAJORITY instead of waiting out its timeout.
    pub(crate) fn majority_possible(&self, threshold: usize) -> bool {
        let largest = self
            .most_voted()
            .map(|(_, count)| count)
            .unwrap_or_default();
        let remaining = self.participants.len().saturating_sub(self.entries.len());
        largest + remaining >= threshold
    }

    /// The collection as a JSON object keyed by sender address, for writing
    /// under a round's collection key.
    pub(crate) fn as_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(sender, value)| (sender.as_str().to_owned(), value.clone()))
                .collect(),
        )
    }
}
