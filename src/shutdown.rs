//! Cooperative shutdown signal shared by the mirror tasks.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A cloneable shutdown handle.
///
/// Nothing is ever sent on the inner channel, [trigger](Shutdown::trigger) drops the only
/// sender so every receiver observes a disconnect, which wakes up all blocking waiters.
#[derive(Clone, Debug)]
pub struct Shutdown {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// create a new, untriggered signal.
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Shutdown {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Ask every task holding this signal to stop.
    pub fn trigger(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }

    /// Returns true once [trigger](Shutdown::trigger) has been called.
    pub fn is_triggered(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block current thread until the signal is triggered.
    pub fn wait(&self) {
        while self.receiver.recv().is_ok() {}
    }

    /// Block at most `timeout`, returns true if the signal is triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Receiver which disconnects on trigger, usable inside `crossbeam::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        assert!(!shutdown.wait_timeout(Duration::from_millis(5)));

        let cloned = shutdown.clone();
        cloned.trigger();
        assert!(shutdown.is_triggered());
        assert!(shutdown.wait_timeout(Duration::from_millis(5)));
        // trigger twice is fine.
        shutdown.trigger();
        assert!(cloned.is_triggered());
    }

    #[test]
    fn test_wait_wakes_up_on_trigger() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = std::thread::spawn(move || {
            waiter.wait();
            true
        });
        std::thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert!(handle.join().unwrap());
    }
}
