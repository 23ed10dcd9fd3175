/// Execute an aggregate command deterministically (no IO, no async).
///
/// The canonical lifecycle in one step:
///
/// 1. **Decide**: `aggregate.handle(command)` produces events (pure).
/// 2. **Evolve**: each event is applied via `aggregate.apply(event)`.
///
/// This mutates the aggregate in place and is the workhorse of domain tests
/// and inline processing. For the full pipeline (persistence, optimistic
/// concurrency, publication) use `CommandDispatcher::dispatch` in the infra
/// crate.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockline_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
