use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use babel_events::{EventBus, Routed, Subscription};

use super::tracker::PositionTracker;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Aggregate types a worker hands to its handler. Empty means everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFilter {
    aggregate_types: BTreeSet<String>,
}

impl RouteFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(aggregate_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aggregate_types: aggregate_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, aggregate_type: &str) -> bool {
        self.aggregate_types.is_empty() || self.aggregate_types.contains(aggregate_type)
    }
}

/// Generic processing-group loop.
///
/// - Subscribes to the bus before the thread starts, so nothing published
///   after `spawn` returns is missed
/// - Hands matching messages to the handler, one at a time, in bus order
/// - Marks every message's global position on the tracker, matched or not
/// - A handler failure is logged and recorded as a fault on the tracker
///   instead of a mark; the group keeps consuming
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a worker thread that processes events from the bus subscription.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe).
    pub fn spawn<M, B, H, E>(
        name: impl Into<String>,
        bus: &B,
        route: RouteFilter,
        tracker: Option<Arc<PositionTracker>>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: Routed + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let thread_name = name.clone();
        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            worker_loop(&thread_name, sub, shutdown_rx, &route, tracker.as_deref(), &mut handler)
        })?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    route: &RouteFilter,
    tracker: Option<&PositionTracker>,
    handler: &mut H,
) where
    M: Routed,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking); a dropped handle stops the group too.
        if !matches!(shutdown_rx.try_recv(), Err(mpsc::TryRecvError::Empty)) {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                let position = msg.global_position();
                let handled = if route.accepts(msg.aggregate_type()) {
                    handler(msg)
                } else {
                    Ok(())
                };
                match (handled, tracker) {
                    (Ok(()), Some(t)) => t.mark(position),
                    (Err(err), t) => {
                        warn!(
                            worker = name,
                            position,
                            error = %err,
                            "processing group handler failed"
                        );
                        if let Some(t) = t {
                            t.fail(position);
                        }
                    }
                    (Ok(()), None) => {}
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "processing group stopped");
}
