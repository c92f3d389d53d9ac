//! Per-stream projection cursors.
//!
//! A cursor records the last applied `sequence_number` per aggregate stream,
//! which makes projections idempotent under at-least-once delivery: anything at
//! or below the cursor is skipped. Envelopes that arrive ahead of the cursor
//! are held until the missing ones show up, so each stream is applied strictly
//! in sequence order whatever order the bus delivers it in.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use serde_json::Value as JsonValue;

use babel_core::AggregateId;
use babel_events::EventEnvelope;

/// Zero sequence number; nothing valid is ever stored at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub last: u64,
    pub found: u64,
}

type Held = BTreeMap<u64, EventEnvelope<JsonValue>>;

#[derive(Debug, Default)]
pub struct StreamCursors {
    cursors: RwLock<HashMap<AggregateId, u64>>,
    held: Mutex<HashMap<AggregateId, Held>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(c) => c.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Envelopes waiting for an earlier sequence number of their stream.
    pub fn held(&self, aggregate_id: AggregateId) -> usize {
        match self.held.lock() {
            Ok(h) => h.get(&aggregate_id).map_or(0, |s| s.len()),
            Err(_) => 0,
        }
    }

    /// Feed one envelope through the cursor.
    ///
    /// `apply` runs for the envelope once it is next in its stream, followed
    /// by any held envelopes it unblocks. The cursor moves only past envelopes
    /// `apply` accepted; a failed one is held again for a later attempt.
    pub fn apply_in_order<E, F>(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        mut apply: F,
    ) -> Result<(), E>
    where
        E: From<SequenceGap>,
        F: FnMut(&EventEnvelope<JsonValue>) -> Result<(), E>,
    {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.last(aggregate_id);
        if seq == 0 {
            return Err(SequenceGap { last, found: seq }.into());
        }
        if seq <= last {
            return Ok(());
        }
        if seq > last + 1 {
            self.hold(envelope.clone());
            return Ok(());
        }

        apply(envelope)?;
        self.advance(aggregate_id, seq);

        while let Some(next) = self.take_next(aggregate_id) {
            if let Err(e) = apply(&next) {
                self.hold(next);
                return Err(e);
            }
            self.advance(aggregate_id, next.sequence_number());
        }
        Ok(())
    }

    pub fn advance(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut c) = self.cursors.write() {
            let last = c.entry(aggregate_id).or_insert(0);
            *last = (*last).max(seq);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut c) = self.cursors.write() {
            c.clear();
        }
        if let Ok(mut h) = self.held.lock() {
            h.clear();
        }
    }

    fn hold(&self, envelope: EventEnvelope<JsonValue>) {
        if let Ok(mut h) = self.held.lock() {
            h.entry(envelope.aggregate_id())
                .or_default()
                .insert(envelope.sequence_number(), envelope);
        }
    }

    /// Pop the held envelope right after the cursor, dropping stale ones.
    fn take_next(&self, aggregate_id: AggregateId) -> Option<EventEnvelope<JsonValue>> {
        let last = self.last(aggregate_id);
        let mut h = self.held.lock().ok()?;
        let stream = h.get_mut(&aggregate_id)?;
        *stream = stream.split_off(&(last + 1));
        let next = stream.remove(&(last + 1));
        if stream.is_empty() {
            h.remove(&aggregate_id);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(id: AggregateId, seq: u64) -> EventEnvelope<JsonValue> {
        let payload = json!({ "seq": seq });
        EventEnvelope::new(Uuid::now_v7(), id, "test", "test.event", seq, seq, payload)
    }

    fn feed(cursors: &StreamCursors, env: &EventEnvelope<JsonValue>, seen: &mut Vec<u64>) {
        cursors
            .apply_in_order(env, |e| {
                seen.push(e.sequence_number());
                Ok::<(), SequenceGap>(())
            })
            .unwrap();
    }

    #[test]
    fn redelivery_is_skipped() {
        let cursors = StreamCursors::new();
        let id = AggregateId::new();
        let mut seen = Vec::new();

        feed(&cursors, &envelope(id, 1), &mut seen);
        feed(&cursors, &envelope(id, 1), &mut seen);
        assert_eq!(seen, vec![1]);
        assert_eq!(cursors.last(id), 1);

        let zero = cursors.apply_in_order(&envelope(id, 0), |_| Ok::<(), SequenceGap>(()));
        assert_eq!(zero, Err(SequenceGap { last: 1, found: 0 }));

        cursors.clear();
        assert_eq!(cursors.last(id), 0);
    }

    #[test]
    fn early_envelopes_wait_for_the_gap_to_fill() {
        let cursors = StreamCursors::new();
        let id = AggregateId::new();
        let mut seen = Vec::new();

        feed(&cursors, &envelope(id, 1), &mut seen);
        feed(&cursors, &envelope(id, 3), &mut seen);
        assert_eq!(seen, vec![1]);
        assert_eq!(cursors.held(id), 1);

        feed(&cursors, &envelope(id, 2), &mut seen);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(cursors.last(id), 3);
        assert_eq!(cursors.held(id), 0);
    }

    #[test]
    fn failed_held_envelope_is_kept_for_retry() {
        let cursors = StreamCursors::new();
        let id = AggregateId::new();
        let mut seen = Vec::new();
        feed(&cursors, &envelope(id, 2), &mut seen);

        let err = cursors.apply_in_order(&envelope(id, 1), |e| {
            if e.sequence_number() == 2 {
                Err(SequenceGap { last: 1, found: 2 })
            } else {
                Ok(())
            }
        });
        assert!(err.is_err());
        assert_eq!(cursors.last(id), 1);
        assert_eq!(cursors.held(id), 1);
    }
}
