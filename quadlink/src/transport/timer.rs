//! Fixed-interval background task
//!
//! Runs a closure on a dedicated OS thread every `interval` until stopped.
//! The sleep between runs is sliced so that `stop()` takes effect within a
//! few milliseconds rather than a full interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between stop-flag checks
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Periodic task on its own thread
pub struct LoopTimer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LoopTimer {
    /// Spawn a thread calling `tick` every `interval`, first call immediately
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                log::debug!("{} started ({:?} interval)", thread_name(), interval);
                while flag.load(Ordering::Relaxed) {
                    let cycle_start = Instant::now();
                    tick();

                    while flag.load(Ordering::Relaxed) {
                        let elapsed = cycle_start.elapsed();
                        if elapsed >= interval {
                            break;
                        }
                        thread::sleep((interval - elapsed).min(SLEEP_SLICE));
                    }
                }
                log::debug!("{} stopped", thread_name());
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// True until `stop()` is called
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for the thread to exit
    ///
    /// Safe to call from inside the tick closure: the thread is then left to
    /// finish on its own instead of joining itself.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for LoopTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn thread_name() -> String {
    thread::current()
        .name()
        .unwrap_or("loop-timer")
        .to_string()
}
