use std::sync::{Mutex, MutexGuard, PoisonError};

/// A mutex-guarded state with atomic transitions.
///
/// The constructor is `const`, so a `StateMachine` can live in a `static` and
/// act as the single owner of process-wide lifecycle state.
///
/// # Example
///
/// ```rust
/// use smolanalyst_common::state_machine::StateMachine;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Phase {
///     Inactive,
///     Active,
/// }
///
/// static PHASE: StateMachine<Phase> = StateMachine::new(Phase::Inactive);
///
/// let entered = PHASE.transition(|phase| match phase {
///     Phase::Inactive => {
///         *phase = Phase::Active;
///         Ok(())
///     }
///     Phase::Active => Err("already active"),
/// });
///
/// assert!(entered.is_ok());
/// assert_eq!(PHASE.get(), Phase::Active);
/// ```
#[derive(Debug)]
pub struct StateMachine<S> {
    state: Mutex<S>,
}

impl<S> StateMachine<S> {
    /// Creates a new `StateMachine` in the given initial state.
    pub const fn new(initial_state: S) -> Self {
        Self {
            state: Mutex::new(initial_state),
        }
    }

    /// Lock the state for direct inspection.
    ///
    /// A poisoned lock is recovered: a panic inside an earlier transition must
    /// not wedge every later one, and transitions only ever store whole states.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Perform an atomic transition on the state.
    ///
    /// The closure runs with the lock held and may both inspect and replace
    /// the state. Its return value is handed back to the caller.
    pub fn transition<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.lock();
        f(&mut state)
    }

    /// Replace the state unconditionally, returning the previous one.
    pub fn replace(&self, next: S) -> S {
        std::mem::replace(&mut *self.lock(), next)
    }
}

impl<S: Clone> StateMachine<S> {
    /// Snapshot of the current state.
    pub fn get(&self) -> S {
        self.lock().clone()
    }
}
