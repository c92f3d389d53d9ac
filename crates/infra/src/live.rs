//! Live queries over a family's query projection.
//!
//! A subscription returns the current answer and a stream of later updates
//! that concern the query. The change receiver is taken before the initial
//! read, so an update racing the read is delivered rather than lost (it may
//! repeat what the initial value already shows).

use std::pin::Pin;

use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use babel_terms::TermId;

use crate::projections::terms::{TermChange, TermQueryProjection, TermRecord, TermUpdate};
use crate::read_model::ReadStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveQuery {
    ById(TermId),
    ByName(String),
    /// Every term of the family.
    All,
}

impl LiveQuery {
    pub fn matches(&self, change: &TermChange) -> bool {
        match self {
            LiveQuery::ById(id) => change.term_id == *id,
            LiveQuery::ByName(name) => {
                change.current_name() == name || change.previous_name.as_deref() == Some(name)
            }
            LiveQuery::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveSnapshot {
    Single(Option<TermRecord>),
    Many(Vec<TermRecord>),
}

pub type UpdateStream = Pin<Box<dyn Stream<Item = TermUpdate> + Send>>;

pub struct LiveSubscription {
    pub initial: LiveSnapshot,
    pub updates: UpdateStream,
}

impl core::fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}

pub fn subscribe<S>(projection: &TermQueryProjection<S>, query: LiveQuery) -> LiveSubscription
where
    S: ReadStore<TermId, TermRecord>,
{
    let rx = projection.subscribe();

    let initial = match &query {
        LiveQuery::ById(id) => LiveSnapshot::Single(projection.get_by_id(id)),
        LiveQuery::ByName(name) => LiveSnapshot::Single(projection.get_by_name(name)),
        LiveQuery::All => LiveSnapshot::Many(projection.list_all()),
    };

    let family = projection.family();
    let updates = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(change) if query.matches(&change) => Some(change.update),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(%family, skipped, "live query subscriber lagged; updates dropped");
            None
        }
    });

    LiveSubscription {
        initial,
        updates: Box::pin(updates),
    }
}
