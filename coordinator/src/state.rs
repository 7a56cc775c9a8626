//! Transaction manager lifecycle state.

/// Operational state of a [`crate::TransactionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Created but not started.
    Starting,
    /// Accepting new transactions.
    Running,
    /// Refusing new transactions; existing ones may still finish.
    ShuttingDown,
    /// Stopped.
    Stopped,
}

impl CoordinatorState {
    /// Whether new transactions may begin.
    pub fn accepts_transactions(&self) -> bool {
        matches!(self, CoordinatorState::Starting | CoordinatorState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_transactions() {
        assert!(CoordinatorState::Starting.accepts_transactions());
        assert!(CoordinatorState::Running.accepts_transactions());
        assert!(!CoordinatorState::ShuttingDown.accepts_transactions());
        assert!(!CoordinatorState::Stopped.accepts_transactions());
        assert!(CoordinatorState::Stopped.is_terminal());
    }
}
