use std::sync::Arc;

use async_trait::async_trait;

use crate::fetch::FetchSpec;
use crate::record::RecordHandle;
use crate::schema::Schema;
use crate::{RecordId, Result};

/// Identifier of a live change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Records that may have changed relative to a subscribed fetch.
///
/// `inserted` records now match the fetch, `removed` records no longer do,
/// and `updated` records matched before and after a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotification {
    pub inserted: Vec<RecordId>,
    pub updated: Vec<RecordId>,
    pub removed: Vec<RecordId>,
}

impl ChangeNotification {
    /// Returns true when the notification reports no records at all.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of records reported.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len()
    }
}

/// Callback invoked by a store when a subscribed fetch may have changed.
///
/// Stores may call it from any thread.
pub type ChangeCallback = Arc<dyn Fn(ChangeNotification) + Send + Sync>;

/// Core trait for record stores.
///
/// A record store retrieves records by predicate and ordering, and reports
/// changes to subscribers. All implementations must be thread-safe
/// (Send + Sync).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the schema fetch specifications are compiled against.
    fn schema(&self) -> &Schema;

    /// Retrieves the records matching a specification, in its order.
    async fn fetch(&self, spec: &FetchSpec) -> Result<Vec<RecordHandle>>;

    /// Registers a callback for changes to records matching a specification.
    fn subscribe(&self, spec: FetchSpec, on_change: ChangeCallback) -> Result<SubscriptionId>;

    /// Removes a subscription.
    ///
    /// Unknown IDs are ignored, so it is safe to call more than once.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// A live subscription that unsubscribes when dropped.
pub struct Subscription {
    id: SubscriptionId,
    store: Arc<dyn RecordStore>,
}

impl Subscription {
    /// Subscribes to `spec` on `store`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        spec: FetchSpec,
        on_change: ChangeCallback,
    ) -> Result<Self> {
        let id = store.subscribe(spec, on_change)?;
        Ok(Self { id, store })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        tracing::trace!(subscription = %self.id, "releasing subscription");
        self.store.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
