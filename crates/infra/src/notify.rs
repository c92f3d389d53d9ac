//! Change notifications for term and translation writes.
//!
//! Notifications only flow once the bootstrap import has finished, so a
//! fresh start does not flood the transport with the initial catalog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use babel_events::{EventEnvelope, Projection};
use babel_terms::{Family, LanguageCode, TermEvent, TermId};

use crate::projections::cursor::{SequenceGap, StreamCursors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub family: Family,
    pub term_id: TermId,
    pub name: Option<String>,
    /// Set for translation-level changes.
    pub language: Option<LanguageCode>,
}

/// Transport for change notifications.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, notification: &ChangeNotification);
}

/// Default transport: structured log line per change.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl ChangeNotifier for TracingNotifier {
    fn notify(&self, n: &ChangeNotification) {
        info!(
            kind = ?n.kind,
            family = %n.family,
            term_id = %n.term_id,
            name = n.name.as_deref().unwrap_or(""),
            language = n.language.as_ref().map(LanguageCode::as_str).unwrap_or(""),
            "catalog change"
        );
    }
}

/// Hands notifications to an in-process receiver.
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<ChangeNotification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::Receiver<ChangeNotification>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ChangeNotifier for ChannelNotifier {
    fn notify(&self, notification: &ChangeNotification) {
        // A dropped receiver just means nobody listens anymore.
        let _ = self.tx.send(notification.clone());
    }
}

/// Opened once the bootstrap import is done (or skipped).
#[derive(Debug, Default)]
pub struct BootstrapGate {
    open: AtomicBool,
}

impl BootstrapGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("failed to deserialize term event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

impl From<SequenceGap> for NotificationError {
    fn from(gap: SequenceGap) -> Self {
        Self::NonMonotonicSequence {
            last: gap.last,
            found: gap.found,
        }
    }
}

/// Turns a family's term events into notifications.
pub struct NotificationProjection {
    family: Family,
    notifier: Arc<dyn ChangeNotifier>,
    gate: Arc<BootstrapGate>,
    enabled: bool,
    cursors: StreamCursors,
    name: String,
}

impl core::fmt::Debug for NotificationProjection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationProjection")
            .field("family", &self.family)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl NotificationProjection {
    pub fn new(
        family: Family,
        notifier: Arc<dyn ChangeNotifier>,
        gate: Arc<BootstrapGate>,
        enabled: bool,
    ) -> Self {
        Self {
            family,
            notifier,
            gate,
            enabled,
            cursors: StreamCursors::new(),
            name: format!("{}.notifications", family.aggregate_type()),
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), NotificationError> {
        if envelope.aggregate_type() != self.family.aggregate_type() {
            return Ok(());
        }
        self.cursors.apply_in_order(envelope, |env| {
            if self.enabled && self.gate.is_open() {
                let ev: TermEvent = serde_json::from_value(env.payload().clone())
                    .map_err(|e| NotificationError::Deserialize(e.to_string()))?;
                self.notifier.notify(&notification_for(ev));
            }
            Ok(())
        })
    }
}

fn notification_for(ev: TermEvent) -> ChangeNotification {
    let (kind, name, language) = match &ev {
        TermEvent::TermCreated(e) => (ChangeKind::Insert, Some(e.name.clone()), None),
        TermEvent::TermUpdated(e) => (ChangeKind::Update, Some(e.name.clone()), None),
        TermEvent::TermDeleted(e) => (ChangeKind::Delete, Some(e.name.clone()), None),
        TermEvent::TranslationCreated(e) => (ChangeKind::Insert, None, Some(e.language.clone())),
        TermEvent::TranslationUpdated(e) => (ChangeKind::Update, None, Some(e.language.clone())),
        TermEvent::TranslationDeleted(e) => (ChangeKind::Delete, None, Some(e.language.clone())),
    };
    ChangeNotification {
        kind,
        family: ev.family(),
        term_id: ev.term_id(),
        name,
        language,
    }
}

impl Projection for NotificationProjection {
    type Error = NotificationError;

    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate_types(&self) -> Vec<String> {
        vec![self.family.aggregate_type().to_string()]
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        NotificationProjection::apply_envelope(self, envelope)
    }

    /// Notifications are never replayed; only the cursors are dropped.
    fn reset(&self) {
        self.cursors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use babel_events::Event;
    use babel_terms::{TermCreated, TermDeleted};
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope(ev: TermEvent, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            ev.term_id().0,
            ev.family().aggregate_type(),
            ev.event_type(),
            seq,
            seq,
            serde_json::to_value(&ev).unwrap(),
        )
    }

    fn created(term_id: TermId) -> TermEvent {
        TermEvent::TermCreated(TermCreated {
            family: Family::Message,
            term_id,
            name: "err.io".to_string(),
            category: None,
            translations: vec![],
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn nothing_is_sent_before_bootstrap_completes() {
        let (notifier, rx) = ChannelNotifier::new();
        let gate = Arc::new(BootstrapGate::new());
        let p =
            NotificationProjection::new(Family::Message, Arc::new(notifier), gate.clone(), true);
        let id = TermId::generate();

        p.apply_envelope(&envelope(created(id), 1)).unwrap();
        assert!(rx.try_recv().is_err());

        gate.open();
        let deleted = TermEvent::TermDeleted(TermDeleted {
            family: Family::Message,
            term_id: id,
            name: "err.io".to_string(),
            occurred_at: Utc::now(),
        });
        p.apply_envelope(&envelope(deleted, 2)).unwrap();

        let n = rx.try_recv().unwrap();
        assert_eq!(n.kind, ChangeKind::Delete);
        assert_eq!(n.term_id, id);
        assert_eq!(n.name.as_deref(), Some("err.io"));
    }

    #[test]
    fn disabled_notifications_stay_silent() {
        let (notifier, rx) = ChannelNotifier::new();
        let gate = Arc::new(BootstrapGate::new());
        gate.open();
        let p = NotificationProjection::new(Family::Message, Arc::new(notifier), gate, false);

        p.apply_envelope(&envelope(created(TermId::generate()), 1)).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn redelivered_events_notify_once() {
        let (notifier, rx) = ChannelNotifier::new();
        let gate = Arc::new(BootstrapGate::new());
        gate.open();
        let p = NotificationProjection::new(Family::Message, Arc::new(notifier), gate, true);
        let env = envelope(created(TermId::generate()), 1);

        p.apply_envelope(&env).unwrap();
        p.apply_envelope(&env).unwrap();
        assert_eq!(rx.try_iter().count(), 1);
    }
}
