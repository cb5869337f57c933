use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

struct Running {
    // Dropping the sender is the stop signal.
    _stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A repeating background task bound to the lifetime of a session.
///
/// `start` replaces any running loop, `stop` ends it, and dropping the
/// `Heartbeat` stops it too. A beat that is already in flight is allowed to
/// finish, but no new beat starts once the loop has been stopped.
pub struct Heartbeat {
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl Heartbeat {
    pub fn new(period: Duration) -> Self {
        Self {
            // tokio's interval rejects a zero period
            period: period.max(Duration::from_millis(1)),
            running: Mutex::new(None),
        }
    }

    /// Spawns the loop. `beat` runs immediately and then once per period
    /// until it returns `ControlFlow::Break` or the loop is stopped.
    pub fn start<F, Fut>(&self, beat: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run(self.period, stop_rx, beat));

        let previous = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Running {
                _stop: stop_tx,
                handle,
            });
        if previous.is_some() {
            debug!("Replaced running heartbeat");
        }
    }

    /// Returns `true` if a loop was running.
    pub fn stop(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<F, Fut>(period: Duration, mut stop: oneshot::Receiver<()>, mut beat: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        if beat().await.is_break() {
            break;
        }
    }

    debug!("Heartbeat loop finished");
}
