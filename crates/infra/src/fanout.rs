//! Bounded parallel fan-out for bulk command batches.

use std::sync::Mutex;
use std::thread;

/// Run `f` over every item on at most `parallelism` threads and wait for all.
///
/// Results come back in input order. A failing item does not stop the others.
pub fn fan_out<T, R, E, F>(items: Vec<T>, parallelism: usize, f: F) -> Vec<Result<R, E>>
where
    T: Send,
    R: Send,
    E: Send,
    F: Fn(T) -> Result<R, E> + Sync,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let queue = Mutex::new(items.into_iter().enumerate());
    let results: Mutex<Vec<Option<Result<R, E>>>> =
        Mutex::new((0..total).map(|_| None).collect());
    let workers = parallelism.clamp(1, total);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let next = match queue.lock() {
                        Ok(mut q) => q.next(),
                        Err(_) => None,
                    };
                    let Some((idx, item)) = next else {
                        break;
                    };
                    let outcome = f(item);
                    if let Ok(mut r) = results.lock() {
                        r[idx] = Some(outcome);
                    }
                }
            });
        }
    });

    results
        .into_inner()
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .collect()
}
