use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Process-wide fault injection flag.
///
/// Starts out cleared when the process starts. The phase scheduler is the only writer: it sets the flag once when the
/// fault window opens and clears it once when the window closes. The traffic generator reads it on every tick to decide
/// whether the stress action should target a nonexistent item.
///
/// Handles are cheap to clone and all clones observe the same flag. Ticks and dispatches can run concurrently with the
/// scheduler, so the flag is an atomic cell rather than a plain boolean.
#[derive(Clone, Debug, Default)]
pub struct FaultState {
    active: Arc<AtomicBool>,
}

impl FaultState {
    /// Creates a new `FaultState` with the fault cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if faults are currently being injected.
    pub fn get(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Sets whether or not faults should be injected.
    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_cleared() {
        assert!(!FaultState::new().get());
    }

    #[test]
    fn clones_share_state() {
        let writer = FaultState::new();
        let reader = writer.clone();

        writer.set(true);
        assert!(reader.get());

        writer.set(false);
        assert!(!reader.get());
    }

    #[test]
    fn visible_across_threads() {
        let state = FaultState::new();
        let remote = state.clone();

        std::thread::spawn(move || remote.set(true)).join().unwrap();
        assert!(state.get());
    }
}
