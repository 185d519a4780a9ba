//! Deduplicating fetch coordinator.
//!
//! Concurrent fetches for the same transport identity (the request URL) share
//! one network task. Every caller holds a subscription; dropping the caller's
//! future withdraws it, and the network task is aborted only when the last
//! subscription goes away.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::domain::entities::{RequestOptions, TransportRequest};
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::{ImageTransport, SessionPair, TransportResponse};

type FetchResult = ImageResult<Bytes>;

/// Bookkeeping for one running fetch.
struct InFlightEntry {
    generation: Uuid,
    abort: AbortHandle,
    result: watch::Receiver<Option<FetchResult>>,
    subscribers: HashSet<Uuid>,
}

type Registry = Mutex<HashMap<String, InFlightEntry>>;

/// Runs network fetches at most once per identity at a time.
pub struct FetchCoordinator {
    sessions: SessionPair,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    /// Creates a coordinator over the given sessions.
    #[must_use]
    pub fn new(sessions: SessionPair) -> Self {
        Self {
            sessions,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the sessions used for fetching.
    #[must_use]
    pub const fn sessions(&self) -> &SessionPair {
        &self.sessions
    }

    /// Fetches the body of `request`, joining an in-flight fetch for the same
    /// URL when there is one.
    ///
    /// The session is chosen from `options` by whichever caller starts the
    /// fetch. Dropping the returned future withdraws this caller only.
    ///
    /// # Errors
    /// Returns the shared fetch's error, or `ImageError::Cancelled` if the
    /// fetch was torn down without producing a result.
    pub async fn fetch_bytes(
        &self,
        request: &TransportRequest,
        options: &RequestOptions,
    ) -> ImageResult<Bytes> {
        let (subscription, mut result) = self.subscribe(request, options);

        let value = match result.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(Err(ImageError::Cancelled)),
            Err(_) => Err(ImageError::Cancelled),
        };

        subscription.complete();
        value
    }

    /// Like [`fetch_bytes`](Self::fetch_bytes), but gives up with
    /// `ImageError::Cancelled` as soon as `token` is cancelled.
    ///
    /// # Errors
    /// See [`fetch_bytes`](Self::fetch_bytes).
    pub async fn fetch_bytes_cancellable(
        &self,
        request: &TransportRequest,
        options: &RequestOptions,
        token: &CancellationToken,
    ) -> ImageResult<Bytes> {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(identity = %request.identity(), "Fetch cancelled by caller");
                Err(ImageError::Cancelled)
            }
            result = self.fetch_bytes(request, options) => result,
        }
    }

    /// Returns the number of running fetches.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Returns true if a fetch for `identity` is running.
    #[must_use]
    pub fn is_in_flight(&self, identity: &str) -> bool {
        self.registry.lock().contains_key(identity)
    }

    /// Returns the number of callers waiting on `identity`.
    #[must_use]
    pub fn subscriber_count(&self, identity: &str) -> usize {
        self.registry
            .lock()
            .get(identity)
            .map_or(0, |entry| entry.subscribers.len())
    }

    fn subscribe(
        &self,
        request: &TransportRequest,
        options: &RequestOptions,
    ) -> (Subscription, watch::Receiver<Option<FetchResult>>) {
        let identity = request.identity();
        let id = Uuid::new_v4();

        let result = {
            let mut registry = self.registry.lock();
            let entry = match registry.entry(identity.clone()) {
                std::collections::hash_map::Entry::Occupied(occupied) => {
                    debug!(identity = %identity, "Joining in-flight fetch");
                    occupied.into_mut()
                }
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    vacant.insert(self.start(request, options, identity.clone()))
                }
            };
            entry.subscribers.insert(id);
            entry.result.clone()
        };

        let subscription = Subscription {
            registry: Arc::downgrade(&self.registry),
            identity,
            id,
            armed: true,
        };
        (subscription, result)
    }

    /// Spawns the network task. Called with the registry locked; the task
    /// itself only touches the registry once it finishes.
    fn start(
        &self,
        request: &TransportRequest,
        options: &RequestOptions,
        identity: String,
    ) -> InFlightEntry {
        let generation = Uuid::new_v4();
        let (tx, rx) = watch::channel(None);
        let transport = Arc::clone(self.sessions.select(options));
        let request = request.clone();
        let cleanup = EntryCleanup {
            registry: Arc::downgrade(&self.registry),
            identity,
            generation,
        };

        debug!(identity = %cleanup.identity, "Starting network fetch");

        let handle = tokio::spawn(async move {
            let result = perform_validated(transport.as_ref(), &request).await;
            trace!(identity = %cleanup.identity, ok = result.is_ok(), "Network fetch finished");
            // Deregister before publishing so a caller that sees the result
            // never finds a stale entry.
            drop(cleanup);
            tx.send_replace(Some(result));
        });

        InFlightEntry {
            generation,
            abort: handle.abort_handle(),
            result: rx,
            subscribers: HashSet::new(),
        }
    }
}

/// Performs the request and checks the status code.
async fn perform_validated(
    transport: &dyn ImageTransport,
    request: &TransportRequest,
) -> FetchResult {
    let response = transport.perform(request).await?;
    validate(&response)?;
    Ok(response.body)
}

/// Accepts non-HTTP responses and HTTP statuses in `200..400`.
///
/// # Errors
/// Returns `ImageError::UnacceptableStatus` for any other status.
pub fn validate(response: &TransportResponse) -> ImageResult<()> {
    match response.status {
        Some(code) if !(200..400).contains(&code) => Err(ImageError::UnacceptableStatus(code)),
        _ => Ok(()),
    }
}

/// Removes the subscription; aborts and deregisters the fetch if it was the
/// last one.
fn unsubscribe(registry: &Registry, identity: &str, id: Uuid) {
    let removed = {
        let mut map = registry.lock();
        let Some(entry) = map.get_mut(identity) else {
            return;
        };
        if !entry.subscribers.remove(&id) || !entry.subscribers.is_empty() {
            trace!(identity, remaining = entry.subscribers.len(), "Subscriber left");
            return;
        }
        map.remove(identity)
    };

    if let Some(entry) = removed {
        debug!(identity, "Last subscriber left, cancelling fetch");
        entry.abort.abort();
    }
}

/// One caller's attachment to an in-flight fetch.
struct Subscription {
    registry: Weak<Registry>,
    identity: String,
    id: Uuid,
    armed: bool,
}

impl Subscription {
    /// Marks the subscription as served; dropping it no longer unsubscribes.
    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.armed
            && let Some(registry) = self.registry.upgrade()
        {
            unsubscribe(&registry, &self.identity, self.id);
        }
    }
}

/// Deregisters the owning task's entry when dropped: on completion, panic or
/// abort. An entry that was already replaced by a newer fetch is left alone.
struct EntryCleanup {
    registry: Weak<Registry>,
    identity: String,
    generation: Uuid,
}

impl Drop for EntryCleanup {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut map = registry.lock();
        if map
            .get(&self.identity)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            map.remove(&self.identity);
        }
    }
}
