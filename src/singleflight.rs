// Per-key call deduplication.
// The first caller for a key starts the work on its own task; later callers wait on its result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::{LensError, Result};

type Slot<T> = watch::Receiver<Option<Result<T>>>;

struct Flight<T> {
    id: u64,
    rx: Slot<T>,
}

type Flights<K, T> = Arc<Mutex<HashMap<K, Flight<T>>>>;

/// Whether a caller started the shared work or joined an existing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Map from key to in-flight completion handle.
///
/// Work runs on a spawned task, so a caller that is cancelled or times out
/// does not abort it; the result still reaches every other waiter.
pub struct SingleFlight<K, T> {
    flights: Flights<K, T>,
    next_id: AtomicU64,
}

/// Removes the flight entry if the task ends without publishing (e.g. panics).
struct FlightGuard<K: Eq + Hash, T> {
    flights: Flights<K, T>,
    key: Option<K>,
    id: u64,
}

impl<K: Eq + Hash, T> Drop for FlightGuard<K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut flights = lock(&self.flights);
            if flights.get(&key).is_some_and(|f| f.id == self.id) {
                flights.remove(&key);
            }
        }
    }
}

fn lock<K, T>(flights: &Flights<K, T>) -> MutexGuard<'_, HashMap<K, Flight<T>>> {
    match flights.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with work in progress.
    pub fn len(&self) -> usize {
        lock(&self.flights).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `work` for `key` unless a call for `key` is already in flight, in
    /// which case wait for that call's outcome instead.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> (Result<T>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (rx, role) = {
            let mut flights = lock(&self.flights);
            match flights.get(&key) {
                Some(flight) => (flight.rx.clone(), Role::Follower),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    flights.insert(
                        key.clone(),
                        Flight {
                            id,
                            rx: rx.clone(),
                        },
                    );
                    self.spawn(key, id, tx, work());
                    (rx, Role::Leader)
                }
            }
        };

        (wait(rx).await, role)
    }

    fn spawn<Fut>(&self, key: K, id: u64, tx: watch::Sender<Option<Result<T>>>, work: Fut)
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut guard = FlightGuard {
            flights: Arc::clone(&self.flights),
            key: Some(key),
            id,
        };
        tokio::spawn(async move {
            let result = work.await;
            let mut flights = lock(&guard.flights);
            if let Some(key) = guard.key.take() {
                if flights.get(&key).is_some_and(|f| f.id == guard.id) {
                    flights.remove(&key);
                }
            }
            // Publish while holding the lock so no caller can join a finished flight.
            tx.send_replace(Some(result));
            drop(flights);
        });
    }

    /// Wait until every flight in progress at the time of the call has finished.
    pub async fn drain(&self) {
        let pending: Vec<Slot<T>> = lock(&self.flights)
            .values()
            .map(|f| f.rx.clone())
            .collect();
        for rx in pending {
            let _ = wait(rx).await;
        }
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn wait<T: Clone>(mut rx: Slot<T>) -> Result<T> {
    match rx.wait_for(Option::is_some).await {
        Ok(slot) => slot.clone().unwrap_or_else(|| {
            Err(LensError::UpstreamUnavailable(
                "shared call published an empty result".into(),
            ))
        }),
        Err(_) => Err(LensError::UpstreamUnavailable(
            "shared call ended without a result".into(),
        )),
    }
}
