//! Background thread helper for periodic maintenance work.
//!
//! Used for the session sweep and the per-pod metrics refresh loops. The
//! thread stops when the owning handle is dropped, so lifetime is tied to the
//! owner and a loop can never be stopped twice.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::debug;

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a thread that runs `task` every `interval`, forever.
    ///
    /// The interval is counted from the end of one run to the start of the
    /// next. Dropping the returned handle signals the thread and joins it.
    pub fn spawn<F>(interval: Duration, name: &'static str, task: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let handle = thread::spawn(move || loop {
            let mut waited = Duration::ZERO;
            while waited < interval {
                if stop.load(Ordering::Relaxed) {
                    debug!(task = name, "periodic task received shutdown signal");
                    return;
                }
                let step = SHUTDOWN_POLL.min(interval - waited);
                thread::sleep(step);
                waited += step;
            }
            if stop.load(Ordering::Relaxed) {
                debug!(task = name, "periodic task received shutdown signal");
                return;
            }
            task();
        });

        Self {
            name,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => debug!(task = self.name, "periodic task shut down cleanly"),
                Err(_) => debug!(task = self.name, "periodic task panicked during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::Instant,
    };

    use super::*;

    #[test]
    fn test_task_executes_periodically() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let _task = PeriodicTask::spawn(Duration::from_millis(100), "test", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(350));
        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_drop_stops_long_interval_task() {
        let task = PeriodicTask::spawn(Duration::from_secs(60), "test", || {});

        let start = Instant::now();
        drop(task);

        // Shutdown is bounded by the poll step, not by the interval.
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
