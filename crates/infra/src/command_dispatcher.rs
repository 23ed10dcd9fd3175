//! Command execution pipeline (application-level orchestration).
//!
//! `CommandDispatcher` implements the command lifecycle every aggregate
//! shares:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (projections, orchestrators)
//! ```
//!
//! Step 4 is where the overselling defect dies: the append is conditioned on
//! `ExpectedVersion::Exact(version loaded in step 1)`, so a decision made
//! against stale counters can never be persisted. The loser of a race gets a
//! retriable [`DispatchError::Concurrency`] and re-runs the whole cycle -
//! [`CommandDispatcher::dispatch_with_retry`] is that bounded loop, written
//! out explicitly at the call site as the concurrency model requires.
//!
//! Events are persisted before publication; if publication fails the events
//! are already durable and re-publication is safe (at-least-once).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockline_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use stockline_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Default bound for the conflict-retry loop.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version). Retriable:
    /// reload and re-execute the command.
    Concurrency(String),
    /// Deterministic domain failure, surfaced unchanged to the caller.
    Domain(DomainError),
    /// Loaded stream is inconsistent (wrong aggregate, broken ordering).
    StreamIntegrity(String),
    /// Failed to deserialize historical event payloads into the aggregate
    /// event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may
    /// duplicate).
    Publish(String),
}

impl DispatchError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }

    /// The domain error carried by this failure, if it is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Domain(other),
        }
    }
}

impl core::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DispatchError::Concurrency(msg) => {
                write!(f, "optimistic concurrency check failed: {msg}")
            }
            DispatchError::Domain(e) => write!(f, "{e}"),
            DispatchError::StreamIntegrity(msg) => write!(f, "stream integrity violation: {msg}"),
            DispatchError::Deserialize(msg) => write!(f, "event deserialization failed: {msg}"),
            DispatchError::Store(e) => write!(f, "event store failure: {e}"),
            DispatchError::Publish(msg) => write!(f, "event publication failed: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run against the in-memory pair and
/// embedders can swap in their own backends without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without dispatching anything.
    ///
    /// Services use this for read-side checks (transfer validation, deletion
    /// guards, invariant verification). The returned aggregate's `version()`
    /// is the concurrency token current at load time.
    pub fn load_aggregate<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline once.
    ///
    /// Returns the committed `StoredEvent`s (with assigned sequence numbers);
    /// an empty vector means the command was a successful no-op. A
    /// `Concurrency` error means a writer raced past this one - the caller
    /// decides whether to retry ([`Self::dispatch_with_retry`]) or surface
    /// the conflict.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: &A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockline_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Dispatch with a bounded read-modify-write retry on conflicts.
    ///
    /// Every attempt reloads the stream and re-runs the aggregate's decision
    /// against fresh state, so a reservation retried after a conflict checks
    /// availability again instead of replaying a stale decision. Non-conflict
    /// errors abort immediately; after `max_attempts` conflicts the last
    /// conflict is surfaced to the caller.
    pub fn dispatch_with_retry<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
        max_attempts: u32,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockline_events::Event + Serialize + DeserializeOwned,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.dispatch(aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(err) if err.is_retriable() && attempt < max_attempts => {
                    tracing::debug!(
                        %aggregate_id,
                        aggregate_type,
                        attempt,
                        "concurrency conflict, retrying command"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Defense in depth: even a buggy backend must not feed this aggregate
    // another aggregate's events or a reordered stream.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::StreamIntegrity(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::StreamIntegrity(
                "stored event has sequence_number=0".to_string(),
            ));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::StreamIntegrity(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
