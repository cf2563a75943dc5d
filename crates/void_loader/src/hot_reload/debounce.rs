//! Collapse bursts of calls into one delayed action

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Action = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Schedule { attempt: u64, action: Action },
    Cancel,
}

/// Runs only the last of a burst of scheduled actions
///
/// Every [`execute`](Debouncer::execute) bumps an attempt counter and
/// restarts the timer. When the timer elapses with no newer call, the pending
/// action runs if its attempt still matches the counter; earlier actions are
/// dropped without running. Actions run on a background thread owned by the
/// debouncer.
pub struct Debouncer {
    delay: Duration,
    attempts: Arc<AtomicU64>,
    commands: Sender<Command>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        let (commands, rx) = crossbeam_channel::unbounded();
        let attempts = Arc::new(AtomicU64::new(0));

        let counter = attempts.clone();
        let spawned = thread::Builder::new()
            .name("void-loader-debounce".into())
            .spawn(move || run(rx, delay, counter));
        if let Err(e) = spawned {
            log::error!("Failed to start debounce thread: {}", e);
        }

        Self {
            delay,
            attempts,
            commands,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of calls to `execute` so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Schedule `action`, superseding anything still pending
    pub fn execute<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .commands
            .send(Command::Schedule {
                attempt,
                action: Box::new(action),
            })
            .is_err()
        {
            log::warn!("Debounce thread is gone; dropping attempt {}", attempt);
        }
    }

    /// Drop the pending action, if any
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run(rx: Receiver<Command>, delay: Duration, attempts: Arc<AtomicU64>) {
    let mut pending: Option<(u64, Action)> = None;

    loop {
        let received = if pending.is_some() {
            rx.recv_timeout(delay)
        } else {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        match received {
            Ok(Command::Schedule { attempt, action }) => pending = Some((attempt, action)),
            Ok(Command::Cancel) => pending = None,
            Err(RecvTimeoutError::Timeout) => {
                let Some((attempt, action)) = pending.take() else {
                    continue;
                };
                // A newer call may have bumped the counter without reaching us yet
                if attempt != attempts.load(Ordering::SeqCst) {
                    continue;
                }
                if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                    log::error!("Debounced action {} panicked", attempt);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::trace!("Debounce thread exiting");
}
