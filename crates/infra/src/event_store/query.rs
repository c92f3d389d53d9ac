//! Event query interface for replay and inspection.
//!
//! Read-only, paginated access to the store-wide log in global order.

use chrono::{DateTime, Utc};
use babel_core::AggregateId;
use serde::{Deserialize, Serialize};

use crate::event_store::{EventStoreError, InMemoryEventStore, StoredEvent};

/// Pagination parameters for event queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of events to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria for event queries. All set fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub aggregate_id: Option<AggregateId>,
    /// Any of these aggregate types (e.g. `catalog.label`); empty means all.
    pub aggregate_types: Vec<String>,
    pub event_type: Option<String>,
    /// Only events strictly after this global position.
    pub after_position: Option<u64>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, e: &StoredEvent) -> bool {
        self.aggregate_id.is_none_or(|id| id == e.aggregate_id)
            && (self.aggregate_types.is_empty()
                || self.aggregate_types.iter().any(|t| *t == e.aggregate_type))
            && self.event_type.as_ref().is_none_or(|t| *t == e.event_type)
            && self.after_position.is_none_or(|p| e.global_position > p)
            && self.occurred_after.is_none_or(|t| e.occurred_at > t)
            && self.occurred_before.is_none_or(|t| e.occurred_at < t)
    }
}

/// Paginated event query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQueryResult {
    pub events: Vec<StoredEvent>,
    /// Total number of events matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Async query interface over the event log.
#[async_trait::async_trait]
pub trait EventQuery: Send + Sync {
    /// Events matching `filter`, ordered by global position (ascending).
    async fn query_events(
        &self,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError>;

    /// Events of one aggregate stream.
    async fn get_aggregate_events(
        &self,
        aggregate_id: AggregateId,
        pagination: Option<Pagination>,
    ) -> Result<EventQueryResult, EventStoreError> {
        let filter = EventFilter {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        };
        self.query_events(filter, pagination.unwrap_or_default()).await
    }

    async fn get_event_by_id(
        &self,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError>;
}

#[async_trait::async_trait]
impl EventQuery for InMemoryEventStore {
    async fn query_events(
        &self,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        let matching: Vec<StoredEvent> = self
            .all_events()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();

        let total = matching.len() as u64;
        let offset = pagination.offset as usize;
        let events: Vec<StoredEvent> = matching
            .into_iter()
            .skip(offset)
            .take(pagination.limit as usize)
            .collect();
        let has_more = (offset + events.len()) < total as usize;

        Ok(EventQueryResult {
            events,
            total,
            pagination,
            has_more,
        })
    }

    async fn get_event_by_id(
        &self,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        Ok(self
            .all_events()?
            .into_iter()
            .find(|e| e.event_id == event_id))
    }
}

#[async_trait::async_trait]
impl<Q> EventQuery for std::sync::Arc<Q>
where
    Q: EventQuery + ?Sized,
{
    async fn query_events(
        &self,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        (**self).query_events(filter, pagination).await
    }

    async fn get_event_by_id(
        &self,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        (**self).get_event_by_id(event_id).await
    }
}
