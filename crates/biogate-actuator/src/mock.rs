//! Mock actuator for tests.

use crate::RelayActuator;
use biogate_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every pulse instead of touching hardware.
#[derive(Debug)]
pub struct MockActuator {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    opens: Mutex<Vec<u64>>,
    closes: Mutex<u32>,
    fail: AtomicBool,
}

/// Test-side view of a [`MockActuator`].
#[derive(Debug, Clone)]
pub struct MockActuatorHandle {
    shared: Arc<Shared>,
}

impl MockActuator {
    #[must_use]
    pub fn new() -> (Self, MockActuatorHandle) {
        let shared = Arc::new(Shared::default());
        (
            MockActuator {
                shared: Arc::clone(&shared),
            },
            MockActuatorHandle { shared },
        )
    }
}

impl MockActuatorHandle {
    /// Durations (seconds) of every `open` call so far.
    #[must_use]
    pub fn opens(&self) -> Vec<u64> {
        self.shared.opens.lock().expect("mock lock poisoned").clone()
    }

    /// Number of `close` calls so far.
    #[must_use]
    pub fn close_count(&self) -> u32 {
        *self.shared.closes.lock().expect("mock lock poisoned")
    }

    /// Make subsequent calls fail with an actuation error.
    pub fn set_fail(&self, fail: bool) {
        self.shared.fail.store(fail, Ordering::SeqCst);
    }
}

impl RelayActuator for MockActuator {
    async fn open(&mut self, duration: Duration) -> Result<()> {
        if self.shared.fail.load(Ordering::SeqCst) {
            return Err(Error::actuation("Mock relay set to fail"));
        }
        self.shared
            .opens
            .lock()
            .expect("mock lock poisoned")
            .push(duration.as_secs());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.shared.fail.load(Ordering::SeqCst) {
            return Err(Error::actuation("Mock relay set to fail"));
        }
        *self.shared.closes.lock().expect("mock lock poisoned") += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_pulses() {
        let (mut actuator, handle) = MockActuator::new();
        actuator.open(Duration::from_secs(5)).await.unwrap();
        actuator.open(Duration::from_secs(3)).await.unwrap();
        actuator.close().await.unwrap();

        assert_eq!(handle.opens(), vec![5, 3]);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let (mut actuator, handle) = MockActuator::new();
        handle.set_fail(true);
        assert!(actuator.open(Duration::from_secs(5)).await.is_err());
        assert!(handle.opens().is_empty());
    }
}
