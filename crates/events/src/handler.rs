/// Execute an aggregate command deterministically (no IO, no async).
///
/// 1. **Decide**: `aggregate.handle(command)` produces events without mutation
/// 2. **Evolve**: each event is applied to the aggregate
///
/// The aggregate is mutated in place. For persistence and publication use
/// `CommandDispatcher::dispatch()` in `babel-infra`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: babel_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
