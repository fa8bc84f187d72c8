//! One-shot handoff of a value from a producer thread to a consumer thread
//!
//! The producer publishes exactly once (or reports a failure) and the consumer takes the value.
//! Independently the consumer can ask the producer to stop, which the producer observes while
//! waiting between frames.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Ready(T),
    Taken,
    Failed(String),
}

#[derive(Debug)]
struct State<T> {
    slot: Slot<T>,
    stop_requested: bool,
}

/// Hands a single value from one thread to another.
#[derive(Debug)]
pub struct Handoff<T> {
    state: Mutex<State<T>>,
    signal: Condvar,
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Handoff<T> {
    /// Creates an empty handoff.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slot: Slot::Pending,
                stop_requested: false,
            }),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Neither side panics while holding the lock
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publishes the value and wakes the consumer. Fails if something was already published.
    pub fn publish(&self, value: T) -> anyhow::Result<()> {
        let mut state = self.lock();
        if !matches!(state.slot, Slot::Pending) {
            anyhow::bail!("Handoff value was already published");
        }
        state.slot = Slot::Ready(value);
        self.signal.notify_all();
        debug!("Handoff value published");
        Ok(())
    }

    /// Reports that the value will never be published.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if matches!(state.slot, Slot::Pending) {
            state.slot = Slot::Failed(message.into());
            self.signal.notify_all();
        }
    }

    /// Returns a guard that reports `message` as a failure when dropped before anything was
    /// published. Holding it for the whole producer keeps the consumer from waiting forever on
    /// an early return or a panic.
    pub fn fail_unless_published(&self, message: impl Into<String>) -> PublishGuard<'_, T> {
        PublishGuard {
            handoff: self,
            message: message.into(),
        }
    }

    /// Blocks until the value is published and takes it.
    pub fn take(&self) -> anyhow::Result<T> {
        let mut state = self.lock();
        while matches!(state.slot, Slot::Pending) {
            state = self
                .signal
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Self::take_slot(&mut state)
    }

    /// Like [`Handoff::take`] but gives up after `timeout`, returning `Ok(None)`.
    pub fn take_timeout(&self, timeout: Duration) -> anyhow::Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while matches!(state.slot, Slot::Pending) {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .signal
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        Self::take_slot(&mut state).map(Some)
    }

    fn take_slot(state: &mut State<T>) -> anyhow::Result<T> {
        match std::mem::replace(&mut state.slot, Slot::Taken) {
            Slot::Ready(value) => Ok(value),
            Slot::Failed(message) => {
                state.slot = Slot::Failed(message.clone());
                anyhow::bail!("Producer failed: {message}")
            }
            Slot::Taken => anyhow::bail!("Handoff value was already taken"),
            Slot::Pending => unreachable!("take_slot is only called once the slot is filled"),
        }
    }

    /// Asks the producer to stop.
    pub fn request_stop(&self) {
        let mut state = self.lock();
        state.stop_requested = true;
        self.signal.notify_all();
    }

    /// Returns whether stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Waits up to `timeout` for a stop request. Returns `true` if stop was requested.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.stop_requested {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .signal
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        true
    }
}

/// See [`Handoff::fail_unless_published`].
#[must_use = "the guard reports the failure when it is dropped"]
pub struct PublishGuard<'a, T> {
    handoff: &'a Handoff<T>,
    message: String,
}

impl<T> Drop for PublishGuard<'_, T> {
    fn drop(&mut self) {
        // No-op once something was published or a failure was reported
        self.handoff.fail(std::mem::take(&mut self.message));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn value_crosses_threads() {
        let handoff = Arc::new(Handoff::new());
        let producer = {
            let handoff = handoff.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                handoff.publish(42_i32).unwrap();
            })
        };

        assert_eq!(handoff.take().unwrap(), 42);
        producer.join().unwrap();
    }

    #[test]
    fn value_is_taken_once() {
        let handoff = Handoff::new();
        handoff.publish("fd").unwrap();
        assert_eq!(handoff.take().unwrap(), "fd");
        assert!(handoff.take().is_err());
    }

    #[test]
    fn second_publish_fails() {
        let handoff = Handoff::new();
        handoff.publish(1).unwrap();
        assert!(handoff.publish(2).is_err());
        assert_eq!(handoff.take().unwrap(), 1);
    }

    #[test]
    fn failure_reaches_consumer() {
        let handoff = Arc::new(Handoff::<u32>::new());
        let producer = {
            let handoff = handoff.clone();
            thread::spawn(move || handoff.fail("no device"))
        };

        let err = handoff.take().unwrap_err();
        assert!(err.to_string().contains("no device"));
        // The failure sticks
        assert!(handoff.take().is_err());
        producer.join().unwrap();
    }

    #[test]
    fn panicking_producer_releases_consumer() {
        let handoff = Arc::new(Handoff::<u32>::new());
        let producer = {
            let handoff = handoff.clone();
            thread::spawn(move || {
                let _guard = handoff.fail_unless_published("Producer thread exited");
                panic!("device lost during setup");
            })
        };

        let err = handoff.take_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("Producer thread exited"));
        assert!(producer.join().is_err());
    }

    #[test]
    fn guard_keeps_published_value() {
        let handoff = Handoff::new();
        {
            let _guard = handoff.fail_unless_published("Producer thread exited");
            handoff.publish(5_u32).unwrap();
        }
        assert_eq!(handoff.take().unwrap(), 5);
    }

    #[test]
    fn guard_keeps_first_failure() {
        let handoff = Handoff::<u32>::new();
        {
            let _guard = handoff.fail_unless_published("Producer thread exited");
            handoff.fail("no device");
        }
        assert!(handoff.take().unwrap_err().to_string().contains("no device"));
    }

    #[test]
    fn take_timeout_gives_up() {
        let handoff = Handoff::<u32>::new();
        assert!(handoff.take_timeout(Duration::from_millis(10)).unwrap().is_none());
        handoff.publish(7).unwrap();
        assert_eq!(handoff.take_timeout(Duration::from_millis(10)).unwrap(), Some(7));
    }

    #[test]
    fn wait_for_stop_times_out_without_request() {
        let handoff = Handoff::<()>::new();
        let start = Instant::now();
        assert!(!handoff.wait_for_stop(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn publish_does_not_end_stop_wait() {
        let handoff = Arc::new(Handoff::new());
        let waiter = {
            let handoff = handoff.clone();
            thread::spawn(move || handoff.wait_for_stop(Duration::from_millis(50)))
        };
        thread::sleep(Duration::from_millis(5));
        handoff.publish(1).unwrap();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn stop_request_wakes_producer() {
        let handoff = Arc::new(Handoff::<()>::new());
        let producer = {
            let handoff = handoff.clone();
            thread::spawn(move || while !handoff.wait_for_stop(Duration::from_millis(5)) {})
        };

        thread::sleep(Duration::from_millis(30));
        handoff.request_stop();
        assert!(handoff.stop_requested());
        producer.join().unwrap();
    }
}
