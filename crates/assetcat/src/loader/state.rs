//! Loader lifecycle state machine.
//!
//! ```text
//! Uninitialized --StartReadOnly--> ReadOnlyStandby --BecomeLeader--> Leader
//!                                        ^                              |
//!                                        +---------Relinquish-----------+
//! any --Shutdown--> ShuttingDown
//! ```

use std::fmt;

use super::error::LoaderError;

/// Where a loader is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderState {
    /// Created, nothing parsed yet.
    Uninitialized,
    /// Sources parsed and watched; never writes to the store.
    ReadOnlyStandby,
    /// Reconciles the store against the sources.
    Leader,
    /// Stopped; no further transitions.
    ShuttingDown,
}

impl LoaderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderState::Uninitialized => "uninitialized",
            LoaderState::ReadOnlyStandby => "read_only_standby",
            LoaderState::Leader => "leader",
            LoaderState::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartReadOnly,
    BecomeLeader,
    Relinquish,
    Shutdown,
}

/// The single transition function.
///
/// Repeated `StartReadOnly`, `Relinquish` while standby and any `Shutdown`
/// after shutdown are no-ops rather than errors.
pub fn apply(state: LoaderState, transition: Transition) -> Result<LoaderState, LoaderError> {
    use LoaderState::*;
    use Transition::*;

    match (state, transition) {
        (_, Shutdown) => Ok(ShuttingDown),
        (ShuttingDown, _) => Err(LoaderError::ShuttingDown),

        (Uninitialized, StartReadOnly) => Ok(ReadOnlyStandby),
        (ReadOnlyStandby, StartReadOnly) => Ok(ReadOnlyStandby),
        (Leader, StartReadOnly) => Ok(Leader),

        (ReadOnlyStandby, BecomeLeader) => Ok(Leader),
        (Leader, BecomeLeader) => Err(LoaderError::AlreadyLeader),
        (Uninitialized, BecomeLeader) => Err(LoaderError::NotStarted),

        (Leader, Relinquish) => Ok(ReadOnlyStandby),
        (ReadOnlyStandby, Relinquish) => Ok(ReadOnlyStandby),
        (Uninitialized, Relinquish) => Ok(Uninitialized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LoaderState::*;
    use Transition::*;

    #[test]
    fn test_happy_path() {
        let s = apply(Uninitialized, StartReadOnly).unwrap();
        assert_eq!(s, ReadOnlyStandby);
        let s = apply(s, BecomeLeader).unwrap();
        assert_eq!(s, Leader);
        let s = apply(s, Relinquish).unwrap();
        assert_eq!(s, ReadOnlyStandby);
        let s = apply(s, Shutdown).unwrap();
        assert_eq!(s, ShuttingDown);
    }

    #[test]
    fn test_double_leader_rejected() {
        assert!(matches!(apply(Leader, BecomeLeader), Err(LoaderError::AlreadyLeader)));
    }

    #[test]
    fn test_leader_requires_start() {
        assert!(matches!(apply(Uninitialized, BecomeLeader), Err(LoaderError::NotStarted)));
    }

    #[test]
    fn test_shutdown_is_terminal_and_idempotent() {
        for state in [Uninitialized, ReadOnlyStandby, Leader, ShuttingDown] {
            assert_eq!(apply(state, Shutdown).unwrap(), ShuttingDown);
        }
        for t in [StartReadOnly, BecomeLeader, Relinquish] {
            assert!(matches!(apply(ShuttingDown, t), Err(LoaderError::ShuttingDown)));
        }
    }

    #[test]
    fn test_relinquish_is_idempotent() {
        assert_eq!(apply(ReadOnlyStandby, Relinquish).unwrap(), ReadOnlyStandby);
    }
}
