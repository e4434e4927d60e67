use std::{
    ops::ControlFlow,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use tracing::debug;

use crate::Error;

/// A fixed interval at which [`every`] runs a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interval {
    /// Every five seconds.
    FiveSecs,

    /// Every minute.
    Minute,

    /// Every hour.
    Hour,

    /// Every day.
    Day,
}

impl Interval {
    /// Returns the length of the interval.
    pub const fn as_duration(self) -> Duration {
        match self {
            Interval::FiveSecs => Duration::from_secs(5),
            Interval::Minute => Duration::from_secs(60),
            Interval::Hour => Duration::from_secs(60 * 60),
            Interval::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// A handle to a callback running on a fixed interval.
///
/// Dropping the handle detaches the callback, which then keeps running until the process exits. Call
/// [`Schedule::cancel`] to stop it.
#[derive(Debug)]
pub struct Schedule {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl Schedule {
    /// Stops the callback and waits for its thread to exit.
    ///
    /// If the callback is running when this is called, it finishes first.
    pub fn cancel(self) {
        let _ = self.stop_tx.send(());
        let _ = self.thread.join();
    }

    /// Returns `true` if the callback is no longer scheduled.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Runs `callback` repeatedly, once per `interval`.
///
/// The callback runs on a dedicated thread. The first run happens after one full interval has elapsed, not
/// immediately. This can be used to collect and report periodic statistics.
///
/// # Errors
///
/// If the background thread cannot be spawned, an error is returned.
pub fn every<F>(interval: Interval, mut callback: F) -> Result<Schedule, Error>
where
    F: FnMut() + Send + 'static,
{
    spawn_repeating(interval.as_duration(), move || {
        callback();
        ControlFlow::Continue(())
    })
}

/// Runs `callback` once per `period` until it breaks or the schedule is cancelled.
pub(crate) fn spawn_repeating<F>(period: Duration, mut callback: F) -> Result<Schedule, Error>
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let thread = thread::Builder::new()
        .name("hastur-schedule".to_string())
        .spawn(move || run(period, &mut callback, stop_rx))
        .map_err(|_| Error::Backend)?;

    Ok(Schedule { stop_tx, thread })
}

fn run<F>(period: Duration, callback: &mut F, mut stop_rx: Receiver<()>)
where
    F: FnMut() -> ControlFlow<()>,
{
    let ticker = tick(period);
    debug!(?period, "Started repeating schedule.");

    loop {
        let mut detached = false;
        select! {
            recv(ticker) -> _ => {
                if callback().is_break() {
                    break;
                }
            }
            recv(stop_rx) -> msg => {
                if msg.is_ok() {
                    break;
                }
                detached = true;
            }
        }

        // The handle was dropped without cancelling, so keep running.
        if detached {
            stop_rx = never();
        }
    }

    debug!(?period, "Stopped repeating schedule.");
}
