//! Broadcast-based change emitter with explicit close.

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Single-producer, multi-consumer change channel.
///
/// Non-blocking: `emit` never awaits. Slow receivers lag rather than block
/// the sender. [`close`](Self::close) drops the sender exactly once; every
/// receiver then observes `RecvError::Closed` after draining.
pub struct ChangeEmitter<T> {
    tx: Mutex<Option<broadcast::Sender<T>>>,
}

impl<T: Clone> ChangeEmitter<T> {
    /// Create an emitter buffering up to `capacity` values per receiver.
    ///
    /// Zero is raised to one; broadcast channels cannot be empty.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Emit a value to all subscribers. Returns the number of receivers
    /// reached; 0 when there are none or the emitter is closed.
    pub fn emit(&self, value: T) -> usize {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to values emitted after this call.
    ///
    /// After close, returns a receiver that is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Drop the sender. Returns true on the first call only.
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[test]
    fn emit_with_no_subscribers() {
        let emitter: ChangeEmitter<u32> = ChangeEmitter::with_capacity(4);
        assert_eq!(emitter.emit(1), 0);
    }

    #[tokio::test]
    async fn values_arrive_in_order() {
        let emitter = ChangeEmitter::with_capacity(8);
        let mut rx = emitter.subscribe();
        for i in 0..5u32 {
            let _ = emitter.emit(i);
        }
        for i in 0..5u32 {
            assert_eq!(rx.recv().await.unwrap(), i);
        }
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let emitter = ChangeEmitter::with_capacity(8);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        assert_eq!(emitter.emit("x"), 2);
        assert_eq!(rx1.recv().await.unwrap(), "x");
        assert_eq!(rx2.recv().await.unwrap(), "x");
    }

    #[tokio::test]
    async fn close_is_observed_after_drain() {
        let emitter = ChangeEmitter::with_capacity(8);
        let mut rx = emitter.subscribe();
        let _ = emitter.emit(7u8);

        assert!(emitter.close());
        assert!(!emitter.close());

        assert_eq!(rx.recv().await.unwrap(), 7);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn emit_after_close_is_dropped() {
        let emitter = ChangeEmitter::with_capacity(8);
        let _ = emitter.close();
        assert_eq!(emitter.emit(1u8), 0);

        let mut rx = emitter.subscribe();
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let emitter = ChangeEmitter::with_capacity(2);
        let mut rx = emitter.subscribe();
        let _ = emitter.emit(1u8);
        let _ = emitter.emit(2u8);
        let _ = emitter.emit(3u8);
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn zero_capacity_is_raised_to_one() {
        let emitter = ChangeEmitter::with_capacity(0);
        let mut rx = emitter.subscribe();
        assert_eq!(emitter.emit(5u8), 1);
        assert_eq!(rx.recv().await.unwrap(), 5);
    }
}
