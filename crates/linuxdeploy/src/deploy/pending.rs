use std::sync::{Arc, Condvar, Mutex};

/// Counts work that is queued or being produced. A token is minted before
/// the work it covers is enqueued or its producer thread is spawned, so the
/// counter can never be observed at zero while fan-out is still possible.
pub struct PendingWork {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingWork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        })
    }

    pub fn enter(self: &Arc<Self>) -> WorkToken {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        WorkToken {
            pending: Arc::clone(self),
        }
    }

    /// Block until every outstanding token has been dropped.
    pub fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// One unit of pending work; dropping it marks the unit finished.
pub struct WorkToken {
    pending: Arc<PendingWork>,
}

impl Drop for WorkToken {
    fn drop(&mut self) {
        self.pending.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_idle_returns_immediately_with_no_work() {
        let pending = PendingWork::new();
        pending.wait_idle();
    }

    #[test]
    fn wait_idle_blocks_until_last_token_drops() {
        let pending = PendingWork::new();
        let outer = pending.enter();

        let waiter = {
            let pending = Arc::clone(&pending);
            thread::spawn(move || pending.wait_idle())
        };

        // A token minted while another is live keeps the latch closed after
        // the first drop.
        let inner = pending.enter();
        drop(outer);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(inner);
        waiter.join().expect("waiter joins");
    }

    #[test]
    fn tokens_travel_across_threads() {
        let pending = PendingWork::new();
        let token = pending.enter();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            drop(token);
        });
        pending.wait_idle();
        handle.join().expect("worker joins");
    }
}
