//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Persist events (append-only, ExpectedVersion::Exact)
//!   ↓
//! 5. Publish committed envelopes to the bus
//! ```
//!
//! The dispatcher holds no state of its own and performs no IO except through
//! the injected `EventStore` and `EventBus`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockroom_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use stockroom_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// The aggregate refused the command because of its current state
    /// (e.g. registering an existing variant).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("not found")]
    NotFound,
    #[error("insufficient stock: requested {requested}, {available} available")]
    InsufficientStock { requested: i64, available: i64 },
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// Historical payloads did not deserialize into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InsufficientStock {
                requested,
                available,
            } => DispatchError::InsufficientStock {
                requested,
                available,
            },
            DomainError::InvalidTransition(msg) => DispatchError::InvalidTransition(msg),
        }
    }
}

/// Outcome of one dispatched command: the committed rows and the typed events
/// they carry, in the same order. Empty when the command was a no-op.
#[derive(Debug, Clone)]
pub struct Dispatched<E> {
    pub stored: Vec<StoredEvent>,
    pub events: Vec<E>,
}

impl<E> Dispatched<E> {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }

    fn noop() -> Self {
        Self {
            stored: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Domain errors, version conflicts and store failures are mapped into
/// [`DispatchError`]. Publication happens only after a successful append; a
/// failed publish is logged and does not undo or fail the command, since the
/// events are already durable and read models rebuild from the store.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load, rehydrate, decide, append with `ExpectedVersion::Exact`, publish.
    ///
    /// A version conflict is returned as [`DispatchError::Concurrency`]; the
    /// caller decides whether re-deciding is safe.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockroom_events::Event + Serialize + DeserializeOwned,
    {
        let (aggregate, version) = self.rehydrate(aggregate_id, make_aggregate)?;
        self.decide_and_append(&aggregate, version, aggregate_id, aggregate_type, &command)
    }

    /// Dispatch only if the stream is still at `expected_version`, the version
    /// the caller read before deciding.
    ///
    /// Unlike [`dispatch`](Self::dispatch), a moved stream is a conflict even
    /// when the command would be a no-op against the fresh state.
    pub fn dispatch_at<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected_version: u64,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockroom_events::Event + Serialize + DeserializeOwned,
    {
        let (aggregate, version) = self.rehydrate(aggregate_id, make_aggregate)?;
        if version != expected_version {
            return Err(DispatchError::Concurrency(format!(
                "expected version {expected_version}, stream is at {version}"
            )));
        }
        self.decide_and_append(&aggregate, version, aggregate_id, aggregate_type, &command)
    }

    /// Dispatch a command that is re-decided against fresh state on every
    /// attempt. Only version conflicts are retried, at most `attempts` times in
    /// total; every other failure (including the domain rejecting the command
    /// on fresh state) is returned immediately.
    ///
    /// This is how ledger counters get atomic increments without a lock: each
    /// attempt is a read-modify-write guarded by the stream version.
    pub fn dispatch_with_retry<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        attempts: u32,
        make_aggregate: impl Fn(AggregateId) -> A,
        mut decide: impl FnMut(&A) -> Result<A::Command, DispatchError>,
    ) -> Result<Dispatched<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockroom_events::Event + Serialize + DeserializeOwned,
    {
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (aggregate, version) = self.rehydrate(aggregate_id, &make_aggregate)?;
            let command = decide(&aggregate)?;

            match self.decide_and_append(&aggregate, version, aggregate_id, aggregate_type, &command) {
                Err(DispatchError::Concurrency(msg)) if attempt < attempts => {
                    tracing::debug!(
                        aggregate_id = %aggregate_id,
                        aggregate_type,
                        attempt,
                        reason = %msg,
                        "version conflict; re-deciding against fresh state"
                    );
                }
                other => return other,
            }
        }
    }

    /// Rehydrate an aggregate from its stream without dispatching anything.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        self.rehydrate(aggregate_id, make_aggregate).map(|(a, _)| a)
    }

    fn rehydrate<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<(A, u64), DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok((aggregate, stream_version(&history)))
    }

    fn decide_and_append<A>(
        &self,
        aggregate: &A,
        version: u64,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
    ) -> Result<Dispatched<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockroom_events::Event + Serialize,
    {
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(Dispatched::noop());
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let stored = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(version))?;

        for committed in &stored {
            if let Err(err) = self.bus.publish(committed.to_envelope()) {
                tracing::warn!(
                    event_id = %committed.event_id,
                    event_type = %committed.event_type,
                    error = ?err,
                    "failed to publish committed event"
                );
            }
        }

        Ok(Dispatched {
            stored,
            events: decided,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
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
