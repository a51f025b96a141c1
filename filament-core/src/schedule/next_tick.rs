//! Deferred Execution
//!
//! `next_tick` guarantees "run after the current synchronous work settles."
//! All callbacks registered before the batch drains share one underlying
//! trigger; repeated calls just enqueue into the same batch.
//!
//! # Backends
//!
//! The drain is armed through the best mechanism available, probed per arm:
//!
//! 1. A resident tokio runtime (`Handle::try_current`) — the drain task
//!    runs as soon as the current synchronous section yields.
//! 2. A lazily spawned dedicated timer thread, fed over a channel.
//! 3. A freshly spawned one-shot thread.
//! 4. An inline drain, if even thread spawning fails.
//!
//! On a current-thread flavored runtime the spawned drain task cannot run
//! until the caller yields to the executor. For callers that block instead,
//! an additional timer-thread nudge re-checks shortly after arming and
//! drains a still-pending batch itself. Draining swaps the batch out first,
//! so concurrent drain attempts are idempotent.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;

use crate::error::{report, DynError, Phase};

type TickCallback = Box<dyn FnOnce() + Send>;

fn callbacks() -> &'static Mutex<Vec<TickCallback>> {
    static CALLBACKS: OnceLock<Mutex<Vec<TickCallback>>> = OnceLock::new();
    CALLBACKS.get_or_init(|| Mutex::new(Vec::new()))
}

static PENDING: AtomicBool = AtomicBool::new(false);

/// Drain the current batch.
///
/// The pending flag clears and the batch swaps out before any callback
/// runs, so callbacks enqueued while draining land in a fresh batch with
/// its own trigger.
fn flush_callbacks() {
    PENDING.store(false, Ordering::Release);
    let batch: Vec<TickCallback> = std::mem::take(&mut *callbacks().lock());
    for callback in batch {
        callback();
    }
}

/// Queue a callback into the current batch, arming a drain if none is
/// armed yet.
fn enqueue(callback: TickCallback) {
    callbacks().lock().push(callback);
    if !PENDING.swap(true, Ordering::AcqRel) {
        arm();
    }
}

/// Crate-internal deferral hook for the scheduler.
pub(crate) fn defer(f: fn()) {
    enqueue(Box::new(f));
}

enum TimerRequest {
    Drain,
    /// Re-check after a delay; drain if the batch is still pending.
    Nudge(Duration),
}

fn timer_thread() -> Option<&'static Mutex<mpsc::Sender<TimerRequest>>> {
    static SENDER: OnceLock<Option<Mutex<mpsc::Sender<TimerRequest>>>> = OnceLock::new();
    SENDER
        .get_or_init(|| {
            let (tx, rx) = mpsc::channel::<TimerRequest>();
            let spawned = std::thread::Builder::new()
                .name("filament-tick".into())
                .spawn(move || {
                    while let Ok(request) = rx.recv() {
                        match request {
                            TimerRequest::Drain => flush_callbacks(),
                            TimerRequest::Nudge(delay) => {
                                std::thread::sleep(delay);
                                if PENDING.load(Ordering::Acquire) {
                                    flush_callbacks();
                                }
                            }
                        }
                    }
                });
            match spawned {
                Ok(_) => Some(Mutex::new(tx)),
                Err(_) => None,
            }
        })
        .as_ref()
}

fn nudge(delay: Duration) {
    if let Some(sender) = timer_thread() {
        let _ = sender.lock().send(TimerRequest::Nudge(delay));
    }
}

/// Delay before the timer-thread re-check on current-thread runtimes.
/// Long enough that a caller about to yield drains through the spawned
/// task first; short enough to unstick a caller that blocks instead.
const NUDGE_DELAY: Duration = Duration::from_millis(25);

/// Arm exactly one drain for the current batch, best backend first.
fn arm() {
    if let Ok(handle) = Handle::try_current() {
        let current_thread = handle.runtime_flavor() == RuntimeFlavor::CurrentThread;
        handle.spawn(async { flush_callbacks() });
        if current_thread {
            nudge(NUDGE_DELAY);
        }
        return;
    }
    if let Some(sender) = timer_thread() {
        if sender.lock().send(TimerRequest::Drain).is_ok() {
            return;
        }
    }
    if std::thread::Builder::new().spawn(flush_callbacks).is_ok() {
        return;
    }
    flush_callbacks();
}

/// Run `callback` once the current synchronous work settles.
///
/// Errors are isolated per callback: a failing callback is reported through
/// the usual sink and the rest of the batch still runs.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() -> Result<(), DynError> + Send + 'static,
{
    enqueue(Box::new(move || {
        if let Err(err) = callback() {
            report(&err, "next_tick", Phase::DeferredCallback);
        }
    }));
}

/// A future resolving once the batch that is current right now drains.
///
/// Watchers scheduled before this call have run by the time it resolves.
pub fn next_tick_future() -> NextTickFuture {
    let (tx, rx) = oneshot::channel();
    enqueue(Box::new(move || {
        let _ = tx.send(());
    }));
    NextTickFuture { receiver: rx }
}

/// Future returned by [`next_tick_future`]. Resolves exactly once.
pub struct NextTickFuture {
    receiver: oneshot::Receiver<()>,
}

impl Future for NextTickFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// The batch is process-global; these tests must not overlap.
    fn serial() -> parking_lot::MutexGuard<'static, ()> {
        static LOCK: Mutex<()> = Mutex::new(());
        LOCK.lock()
    }

    #[test]
    fn callbacks_run_in_enqueue_order() {
        let _serial = serial();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        let log1 = log.clone();
        next_tick(move || {
            log1.lock().push(1);
            Ok(())
        });
        let log2 = log.clone();
        next_tick(move || {
            log2.lock().push(2);
            Ok(())
        });
        next_tick(move || {
            let _ = tx.send(());
            Ok(())
        });

        rx.recv_timeout(Duration::from_secs(5)).expect("batch drained");
        let drained = log.lock().clone();
        assert_eq!(drained, vec![1, 2]);
    }

    #[test]
    fn a_failing_callback_does_not_block_the_batch() {
        let _serial = serial();
        let (tx, rx) = mpsc::channel();

        next_tick(|| Err("deliberate failure".into()));
        next_tick(move || {
            let _ = tx.send(());
            Ok(())
        });

        // The second callback still runs.
        rx.recv_timeout(Duration::from_secs(5)).expect("batch drained");
    }

    #[tokio::test]
    async fn future_resolves_after_earlier_callbacks() {
        let _serial = serial();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        next_tick(move || {
            log_clone.lock().push("callback");
            Ok(())
        });

        next_tick_future().await;
        assert_eq!(log.lock().clone(), vec!["callback"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn future_resolves_on_a_multi_thread_runtime() {
        let _serial = serial();
        next_tick_future().await;
    }
}
