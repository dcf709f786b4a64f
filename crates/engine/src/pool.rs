//! Bounded worker pool for per-tier probe batches.
//!
//! Workers pop a shared queue and exit when it drains or the stop token is
//! raised. `run_batch` returns only when every worker has finished, which
//! is the barrier the tier ordering guarantee rests on: no tier-N+1 work is
//! submitted while tier-N probes are in flight.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub async fn run_batch<T, F, Fut>(items: Vec<T>, workers: usize, stop: &Arc<AtomicBool>, handler: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if items.is_empty() {
        return;
    }
    let workers = workers.min(items.len()).max(1);
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = queue.clone();
        let stop = stop.clone();
        let handler = handler.clone();
        handles.push(tokio::spawn(async move {
            loop {
                // stop is observed at every dequeue
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let item = { queue.lock().await.pop_front() };
                match item {
                    Some(item) => handler(item).await,
                    None => break,
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}
