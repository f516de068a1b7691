/// Execute an aggregate command deterministically (no IO).
///
/// Decide (`handle`) then evolve (`apply`) in one step, mutating the aggregate
/// in place. Domain tests use this to walk an aggregate through its lifecycle;
/// production paths go through the infrastructure `CommandDispatcher`, which
/// adds persistence, optimistic concurrency and publication.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockroom_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
