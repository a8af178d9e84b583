//! Host-facing binding adapter.
//!
//! A [`Query`] is what a host view holds. On every re-evaluation the host
//! calls [`Query::update`] with its [`QueryEnvironment`]; the adapter hands
//! the current filter to its engine and refreshes its cached results. The
//! engine decides whether anything needs fetching.

use std::fmt;
use std::sync::Arc;

use record_store::RecordStore;

use crate::emitter::ListenerId;
use crate::engine::QueryEngine;
use crate::event::QueryEvent;
use crate::queryable::Queryable;
use crate::results::QueryResults;
use crate::{QueryError, Result};

/// Configuration a host passes to its queries.
#[derive(Clone, Default)]
pub struct QueryEnvironment {
    store: Option<Arc<dyn RecordStore>>,
}

impl QueryEnvironment {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store: Some(store) }
    }

    /// An environment with no store. Updating a query with it fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&Arc<dyn RecordStore>> {
        self.store.as_ref()
    }
}

impl fmt::Debug for QueryEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEnvironment")
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// A live, filtered collection of `T` bound to a host.
pub struct Query<T: Queryable> {
    filter: T::Filter,
    engine: QueryEngine<T>,
    cached: Option<QueryResults<T>>,
    invalidation: Option<ListenerId>,
}

impl<T: Queryable> Query<T> {
    pub fn new(filter: T::Filter) -> Self {
        Self {
            filter,
            engine: QueryEngine::new(),
            cached: None,
            invalidation: None,
        }
    }

    pub fn filter(&self) -> &T::Filter {
        &self.filter
    }

    /// Replaces the filter. Takes effect on the next [`Query::update`].
    pub fn set_filter(&mut self, filter: T::Filter) {
        self.filter = filter;
    }

    /// Re-evaluates the binding against `env`.
    ///
    /// Fails with [`QueryError::Unbound`] if `env` carries no store.
    #[tracing::instrument(skip_all)]
    pub fn update(&mut self, env: &QueryEnvironment) -> Result<()> {
        let store = env
            .store()
            .ok_or(QueryError::Unbound("query environment has no record store"))?;
        self.engine.bind(Arc::clone(store), self.filter.clone());
        self.refresh_if_needed();
        Ok(())
    }

    /// Applies whatever the engine has received and refreshes the cached
    /// results. Returns true if a new snapshot was published.
    pub fn refresh_if_needed(&mut self) -> bool {
        let events = self.engine.process_pending();
        self.recache(&events)
    }

    /// Waits for the next batch of events and refreshes the cached results.
    pub async fn next_change(&mut self) -> Result<Vec<QueryEvent>> {
        let events = self.engine.next_events().await?;
        self.recache(&events);
        Ok(events)
    }

    /// The results as of the last refresh.
    pub fn results(&self) -> Result<&QueryResults<T>> {
        self.cached
            .as_ref()
            .ok_or(QueryError::Unbound("query has not been updated with a store"))
    }

    /// Sets the callback fired whenever the engine publishes an event,
    /// replacing any previous one.
    pub fn on_invalidate(&mut self, callback: impl Fn(&QueryEvent) + Send + Sync + 'static) {
        let id = self.engine.on_change(callback);
        if let Some(previous) = self.invalidation.replace(id) {
            self.engine.off(previous);
        }
    }

    pub fn engine(&self) -> &QueryEngine<T> {
        &self.engine
    }

    fn recache(&mut self, events: &[QueryEvent]) -> bool {
        let changed = events.iter().any(QueryEvent::is_change);
        if changed || self.cached.is_none() {
            self.cached = self.engine.current_results().ok();
        }
        changed
    }
}

impl<T: Queryable> Drop for Query<T> {
    fn drop(&mut self) {
        if let Some(id) = self.invalidation.take() {
            self.engine.off(id);
        }
    }
}

impl<T: Queryable> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("engine", &self.engine)
            .field("has_results", &self.cached.is_some())
            .finish()
    }
}
