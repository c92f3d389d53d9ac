use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Progress {
    /// Every position up to and including this one has been handled.
    contiguous: u64,
    /// Handled positions beyond a gap (published out of order).
    ahead: BTreeSet<u64>,
    /// Positions whose handler failed; the watermark never passes them.
    failed: BTreeSet<u64>,
}

impl Progress {
    fn fault_at_or_below(&self, target: u64) -> bool {
        self.failed.range(..=target).next().is_some()
    }
}

/// Low watermark of the global positions a processing group has handled.
///
/// Concurrent dispatches may publish out of position order, so the watermark
/// only moves over a contiguous prefix. A position whose handler failed is
/// recorded as a fault instead: the watermark stops below it and waiting past
/// it fails at once.
#[derive(Debug, Default)]
pub struct PositionTracker {
    progress: Mutex<Progress>,
    moved: Condvar,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, position: u64) {
        let Ok(mut p) = self.progress.lock() else {
            return;
        };
        if position <= p.contiguous {
            return;
        }
        p.ahead.insert(position);
        let p = &mut *p;
        while p.ahead.remove(&(p.contiguous + 1)) {
            p.contiguous += 1;
        }
        self.moved.notify_all();
    }

    /// Record that handling `position` failed and wake every waiter.
    pub fn fail(&self, position: u64) {
        let Ok(mut p) = self.progress.lock() else {
            return;
        };
        if position <= p.contiguous {
            return;
        }
        p.failed.insert(position);
        self.moved.notify_all();
    }

    /// Lowest position whose handler failed, if any.
    pub fn first_fault(&self) -> Option<u64> {
        self.progress
            .lock()
            .ok()
            .and_then(|p| p.failed.first().copied())
    }

    /// Treat everything up to `position` as handled (after a replay).
    pub fn advance_to(&self, position: u64) {
        let Ok(mut p) = self.progress.lock() else {
            return;
        };
        if position <= p.contiguous {
            return;
        }
        p.contiguous = position;
        p.ahead = p.ahead.split_off(&(position + 1));
        p.failed = p.failed.split_off(&(position + 1));
        let p = &mut *p;
        while p.ahead.remove(&(p.contiguous + 1)) {
            p.contiguous += 1;
        }
        self.moved.notify_all();
    }

    pub fn position(&self) -> u64 {
        self.progress.lock().map(|p| p.contiguous).unwrap_or(0)
    }

    /// Block until the watermark reaches `target`. Returns false on timeout,
    /// or as soon as a position up to `target` is known to have failed.
    pub fn wait_for(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut p) = self.progress.lock() else {
            return false;
        };
        while p.contiguous < target {
            if p.fault_at_or_below(target) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            p = match self.moved.wait_timeout(p, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return false,
            };
        }
        true
    }
}
