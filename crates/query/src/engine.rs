//! Query engine: owns the fetch and subscription lifecycle of one binding.
//!
//! The engine has a single owner that issues filter changes and reads
//! results. Fetches run as spawned Tokio tasks and store callbacks may fire
//! on any thread; both only enqueue messages. The owner applies them in
//! [`QueryEngine::process_pending`] or [`QueryEngine::next_events`], so a
//! snapshot swap never races a read. Readers hold an `Arc`-backed
//! [`QueryResults`], which keeps seeing its own snapshot after a swap.
//!
//! Store notifications are handled by refetching the whole result set.
//! At most one fetch is in flight per binding: notifications that arrive
//! during a fetch collapse into a single follow-up fetch, and a filter
//! change aborts the in-flight fetch and bumps the binding generation so a
//! late result for the old specification is discarded.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use record_store::{
    ChangeCallback, ChangeNotification, FetchSpec, RecordHandle, RecordStore, Subscription,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::emitter::{EventEmitter, ListenerId};
use crate::event::QueryEvent;
use crate::filter::QueryFilter;
use crate::queryable::Queryable;
use crate::results::QueryResults;
use crate::{QueryError, Result};

/// Messages marshaled onto the engine's owner.
enum Inbound {
    Fetched {
        generation: u64,
        outcome: record_store::Result<Vec<RecordHandle>>,
    },
    StoreChanged {
        generation: u64,
        notification: ChangeNotification,
    },
}

/// Lifecycle state of a [`QueryEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Store or filter missing.
    Unbound,
    /// Store and filter set, but no fetch in flight and no live subscription.
    BoundIdle,
    /// A fetch is in flight. Readers still see the previous snapshot.
    Fetching,
    /// A subscription is live and no fetch is in flight.
    Active,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Unbound => write!(f, "Unbound"),
            EngineState::BoundIdle => write!(f, "BoundIdle"),
            EngineState::Fetching => write!(f, "Fetching"),
            EngineState::Active => write!(f, "Active"),
        }
    }
}

/// Keeps one projected, filtered view of a record store current.
///
/// Must be driven from within a Tokio runtime.
pub struct QueryEngine<T: Queryable> {
    store: Option<Arc<dyn RecordStore>>,
    filter: Option<T::Filter>,
    spec: Option<FetchSpec>,
    subscription: Option<Subscription>,
    in_flight: Option<JoinHandle<()>>,
    refetch_queued: bool,
    /// Bumped whenever the store or fetch specification changes.
    generation: u64,
    results: QueryResults<T>,
    /// Number of snapshots published so far.
    revision: u64,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    emitter: EventEmitter<QueryEvent>,
}

impl<T: Queryable> QueryEngine<T> {
    /// Creates an unbound engine.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            store: None,
            filter: None,
            spec: None,
            subscription: None,
            in_flight: None,
            refetch_queued: false,
            generation: 0,
            results: QueryResults::empty(),
            revision: 0,
            inbound_tx,
            inbound_rx,
            emitter: EventEmitter::new(),
        }
    }

    /// Binds the engine to a store and filter.
    ///
    /// Binding to a different store resets the subscription and forces a
    /// fresh fetch. Returns true if a fetch was issued.
    #[tracing::instrument(skip_all)]
    pub fn bind(&mut self, store: Arc<dyn RecordStore>, filter: T::Filter) -> bool {
        let same_store = self
            .store
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(&store)));

        if !same_store {
            if self.store.is_some() {
                tracing::info!("rebinding query to a different record store");
            }
            self.reset_binding();
            self.store = Some(store);
        }

        self.set_filter(filter)
    }

    /// Supplies a filter value.
    ///
    /// The filter is compiled against the bound store's schema. If the
    /// resulting specification equals the current one nothing happens;
    /// otherwise the subscription is replaced and a new fetch is issued.
    /// Returns true if a fetch was issued.
    #[tracing::instrument(skip_all)]
    pub fn set_filter(&mut self, filter: T::Filter) -> bool {
        self.filter = Some(filter);
        self.fetch_if_necessary()
    }

    /// Explicitly re-runs the current fetch.
    ///
    /// If a fetch is already in flight, one follow-up fetch is queued.
    #[tracing::instrument(skip_all)]
    pub fn refetch(&mut self) -> Result<()> {
        self.require_bound()?;
        if !self.fetch_if_necessary() {
            self.schedule_fetch();
        }
        Ok(())
    }

    /// Returns the most recently published snapshot.
    ///
    /// Fails with [`QueryError::Unbound`] until both a store and a filter
    /// are set, so "not configured" is never confused with "empty".
    pub fn current_results(&self) -> Result<QueryResults<T>> {
        self.require_bound()?;
        Ok(self.results.clone())
    }

    pub fn state(&self) -> EngineState {
        if self.store.is_none() || self.filter.is_none() {
            EngineState::Unbound
        } else if self.in_flight.is_some() {
            EngineState::Fetching
        } else if self.subscription.is_some() {
            EngineState::Active
        } else {
            EngineState::BoundIdle
        }
    }

    pub fn filter(&self) -> Option<&T::Filter> {
        self.filter.as_ref()
    }

    /// The specification of the current binding, once one has been issued.
    pub fn fetch_spec(&self) -> Option<&FetchSpec> {
        self.spec.as_ref()
    }

    /// Number of snapshots published so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Registers a listener for change signals.
    pub fn on_change(&self, callback: impl Fn(&QueryEvent) + Send + Sync + 'static) -> ListenerId {
        self.emitter.on(callback)
    }

    /// Removes a change listener.
    pub fn off(&self, id: ListenerId) {
        self.emitter.off(id);
    }

    /// Applies every queued fetch result and store notification without
    /// waiting, and returns the events published as a result.
    pub fn process_pending(&mut self) -> Vec<QueryEvent> {
        let mut events = Vec::new();
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            self.apply(inbound, &mut events);
        }
        events
    }

    /// Waits until at least one event is published and returns it along
    /// with anything else that was ready.
    ///
    /// Fails with [`QueryError::Idle`] when no fetch is in flight and no
    /// subscription is live, since nothing could ever arrive.
    pub async fn next_events(&mut self) -> Result<Vec<QueryEvent>> {
        self.require_bound()?;
        loop {
            let events = self.process_pending();
            if !events.is_empty() {
                return Ok(events);
            }
            if self.in_flight.is_none() && self.subscription.is_none() {
                return Err(QueryError::Idle);
            }

            let Some(inbound) = self.inbound_rx.recv().await else {
                return Err(QueryError::Idle);
            };
            let mut events = Vec::new();
            self.apply(inbound, &mut events);
            if !events.is_empty() {
                events.extend(self.process_pending());
                return Ok(events);
            }
        }
    }

    fn require_bound(&self) -> Result<()> {
        if self.store.is_none() {
            return Err(QueryError::Unbound("no record store is bound"));
        }
        if self.filter.is_none() {
            return Err(QueryError::Unbound("no filter is set"));
        }
        Ok(())
    }

    fn fetch_if_necessary(&mut self) -> bool {
        let (Some(store), Some(filter)) = (&self.store, &self.filter) else {
            return false;
        };
        let spec = filter.fetch_spec(store.schema());

        if self.spec.as_ref() == Some(&spec) {
            tracing::trace!(generation = self.generation, "fetch spec unchanged");
            return false;
        }

        self.reset_binding();
        tracing::debug!(
            generation = self.generation,
            entity = %spec.entity,
            "fetch spec changed"
        );
        self.spec = Some(spec);
        self.issue_fetch();
        true
    }

    /// Drops the subscription and any in-flight fetch, and starts a new
    /// generation.
    fn reset_binding(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
            metrics::counter!("query_fetches_superseded_total").increment(1);
            tracing::debug!(generation = self.generation, "superseded in-flight fetch");
        }
        self.subscription = None;
        self.spec = None;
        self.refetch_queued = false;
        self.generation += 1;
    }

    fn schedule_fetch(&mut self) {
        if self.in_flight.is_some() {
            self.refetch_queued = true;
        } else {
            self.issue_fetch();
        }
    }

    fn issue_fetch(&mut self) {
        let (Some(store), Some(spec)) = (self.store.clone(), self.spec.clone()) else {
            return;
        };
        let generation = self.generation;

        // The subscription is live before the fetch reads the store, so a
        // write racing the fetch queues a follow-up fetch.
        if self.subscription.is_none() {
            match Subscription::new(Arc::clone(&store), spec.clone(), self.change_callback()) {
                Ok(subscription) => {
                    tracing::debug!(
                        generation,
                        subscription = %subscription.id(),
                        "subscribed to store changes"
                    );
                    self.subscription = Some(subscription);
                }
                Err(error) => {
                    tracing::warn!(generation, %error, "subscription failed");
                    let _ = self.inbound_tx.send(Inbound::Fetched {
                        generation,
                        outcome: Err(error),
                    });
                    return;
                }
            }
        }

        metrics::counter!("query_fetches_total").increment(1);
        tracing::debug!(generation, entity = %spec.entity, "issuing fetch");

        let tx = self.inbound_tx.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = store.fetch(&spec).await;
            metrics::histogram!("query_fetch_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            let _ = tx.send(Inbound::Fetched {
                generation,
                outcome,
            });
        });
        self.in_flight = Some(task);
    }

    fn change_callback(&self) -> ChangeCallback {
        let tx = self.inbound_tx.clone();
        let generation = self.generation;
        Arc::new(move |notification| {
            let _ = tx.send(Inbound::StoreChanged {
                generation,
                notification,
            });
        })
    }

    fn apply(&mut self, inbound: Inbound, events: &mut Vec<QueryEvent>) {
        match inbound {
            Inbound::Fetched {
                generation,
                outcome,
            } => {
                if generation != self.generation {
                    tracing::debug!(
                        generation,
                        current = self.generation,
                        "discarding result of superseded fetch"
                    );
                    return;
                }
                self.in_flight = None;

                match outcome {
                    Ok(handles) => self.publish(handles, events),
                    Err(error) => {
                        metrics::counter!("query_fetch_failures_total").increment(1);
                        tracing::warn!(generation, %error, "fetch failed; keeping last snapshot");
                        self.signal(
                            QueryEvent::Failed {
                                error: Arc::new(error),
                            },
                            events,
                        );
                    }
                }

                if std::mem::take(&mut self.refetch_queued) {
                    self.issue_fetch();
                }
            }
            Inbound::StoreChanged {
                generation,
                notification,
            } => {
                if generation != self.generation || notification.is_empty() {
                    return;
                }
                metrics::counter!("query_notifications_total").increment(1);
                tracing::debug!(
                    generation,
                    changed = notification.len(),
                    "store reported changes"
                );
                self.schedule_fetch();
            }
        }
    }

    fn publish(&mut self, handles: Vec<RecordHandle>, events: &mut Vec<QueryEvent>) {
        let next = QueryResults::from_handles(handles);
        if self.revision > 0 && next.same_content(&self.results) {
            tracing::trace!(revision = self.revision, "fetch produced identical snapshot");
            return;
        }

        self.results = next;
        self.revision += 1;
        metrics::counter!("query_snapshots_published_total").increment(1);
        tracing::debug!(
            revision = self.revision,
            count = self.results.len(),
            "snapshot published"
        );
        self.signal(
            QueryEvent::Changed {
                revision: self.revision,
                count: self.results.len(),
            },
            events,
        );
    }

    fn signal(&self, event: QueryEvent, events: &mut Vec<QueryEvent>) {
        self.emitter.emit(&event);
        events.push(event);
    }
}

impl<T: Queryable> Default for QueryEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Queryable> Drop for QueryEngine<T> {
    fn drop(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }
}

impl<T: Queryable> fmt::Debug for QueryEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEngine")
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("revision", &self.revision)
            .field("spec", &self.spec)
            .field("results", &self.results)
            .finish()
    }
}
