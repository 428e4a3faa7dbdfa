//! Retransmission timer table.
//!
//! Each in-flight sequence number owns one scheduled task; the table maps
//! sequence numbers to their task handles so an acknowledgment can cancel
//! exactly the right timer.  Cancellation races are resolved by the window
//! state, not here: a timer that fires after its record was acknowledged
//! gets [`crate::send_window::TimerVerdict::Lapsed`] and does nothing, so
//! aborting a task that is mid-firing is safe.
//!
//! Dropping the table cancels everything, which is what guarantees that no
//! timer outlives its connection.

use std::collections::HashMap;

use tokio::task::JoinHandle;

/// Per-sequence retransmission tasks for one connection.
#[derive(Debug, Default)]
pub struct TimerTable {
    handles: HashMap<u64, JoinHandle<()>>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the timer task for `sequence`, cancelling any predecessor.
    pub fn arm(&mut self, sequence: u64, handle: JoinHandle<()>) {
        if let Some(old) = self.handles.insert(sequence, handle) {
            old.abort();
        }
    }

    /// Cancel the timer for `sequence`, if one is armed.
    pub fn cancel(&mut self, sequence: u64) {
        if let Some(handle) = self.handles.remove(&sequence) {
            handle.abort();
        }
    }

    /// Cancel every outstanding timer (connection teardown).
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    pub fn armed_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn sleeper(fired: Arc<AtomicBool>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fired.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let mut table = TimerTable::new();
        table.arm(1, sleeper(fired.clone(), Duration::from_millis(20)));
        table.cancel(1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(table.armed_count(), 0);
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_timer() {
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let mut table = TimerTable::new();
        table.arm(1, sleeper(first.clone(), Duration::from_millis(20)));
        table.arm(1, sleeper(second.clone(), Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!first.load(Ordering::SeqCst), "replaced timer must not fire");
        assert!(second.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_cancels_everything() {
        let fired = Arc::new(AtomicBool::new(false));
        {
            let mut table = TimerTable::new();
            table.arm(1, sleeper(fired.clone(), Duration::from_millis(20)));
            table.arm(2, sleeper(fired.clone(), Duration::from_millis(20)));
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
