use stockline_core::AggregateId;

/// A command targets a specific aggregate.
///
/// Commands represent **intent** - a request to perform an action on one
/// aggregate instance. They are transient (not persisted) and are transformed
/// into events (which are persisted). A command is rejected with a typed
/// domain error if invalid; events represent accepted changes.
///
/// `target_aggregate_id()` lets infrastructure route a command to the correct
/// stream and keeps each command scoped to a single aggregate - which is also
/// the optimistic-concurrency boundary.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
