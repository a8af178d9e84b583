use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::{
    RecordId, Result, StoreError,
    fetch::FetchSpec,
    record::{Fields, Record, RecordHandle},
    schema::Schema,
    store::{ChangeCallback, ChangeNotification, RecordStore, SubscriptionId},
};

struct SubscriptionEntry {
    spec: FetchSpec,
    callback: ChangeCallback,
}

#[derive(Default)]
struct Inner {
    schema: Schema,
    records: RwLock<Vec<RecordHandle>>,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
    next_subscription: AtomicU64,
    fetch_count: AtomicU64,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    #[cfg(test)]
    write_hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

/// In-memory record store implementation for tests and previews.
///
/// Records are kept in insertion order. Writes notify every subscription
/// whose fetch the written record matched before or after the write.
/// Callbacks run on the writing thread, after all store locks are released.
///
/// A write copies the subscription list while holding the records lock, so
/// a subscription added after that copy has its first fetch blocked until
/// the write lands.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    inner: Arc<Inner>,
}

impl InMemoryRecordStore {
    /// Creates a new empty store over `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                ..Default::default()
            }),
        }
    }

    /// Returns the total number of records stored.
    pub fn record_count(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Returns how many fetches have been requested so far.
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetch_count.load(Ordering::SeqCst)
    }

    /// Returns the number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Makes every subsequent fetch fail with `Unavailable` while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every subsequent fetch by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    /// Looks up a record by ID.
    pub fn get(&self, id: RecordId) -> Option<RecordHandle> {
        self.inner
            .records
            .read()
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    /// Inserts a new record.
    pub fn insert(&self, entity: &str, fields: Fields) -> Result<RecordHandle> {
        self.check_fields(entity, &fields)?;
        let record = Arc::new(Record::new(entity, fields));

        let subscribers = {
            let mut records = self.inner.records.write();
            let subscribers = self.subscribers();
            self.write_window();
            records.push(Arc::clone(&record));
            subscribers
        };

        let deliveries = subscribers
            .into_iter()
            .filter(|(spec, _)| spec.matches(&record))
            .map(|(_, callback)| {
                let notification = ChangeNotification {
                    inserted: vec![record.id()],
                    ..Default::default()
                };
                (callback, notification)
            })
            .collect();

        metrics::counter!("record_store_writes_total", "op" => "insert").increment(1);
        tracing::debug!(record_id = %record.id(), entity, "record inserted");
        deliver(deliveries);
        Ok(record)
    }

    /// Merges `changes` into an existing record's fields.
    ///
    /// Subscribers are notified even if every value was already current.
    pub fn update(&self, id: RecordId, changes: Fields) -> Result<RecordHandle> {
        let (record, subscribers, before, changed) = {
            let records = self.inner.records.write();
            let record = records
                .iter()
                .find(|r| r.id() == id)
                .cloned()
                .ok_or(StoreError::RecordNotFound(id))?;
            self.check_fields(record.entity(), &changes)?;

            let subscribers = self.subscribers();
            let before: Vec<bool> = subscribers
                .iter()
                .map(|(spec, _)| spec.matches(&record))
                .collect();
            self.write_window();
            let changed = record.merge(changes);
            (record, subscribers, before, changed)
        };

        let deliveries = subscribers
            .into_iter()
            .zip(before)
            .filter_map(|((spec, callback), matched_before)| {
                classify(id, matched_before, spec.matches(&record)).map(|n| (callback, n))
            })
            .collect();

        metrics::counter!("record_store_writes_total", "op" => "update").increment(1);
        tracing::debug!(record_id = %id, changed, "record updated");
        deliver(deliveries);
        Ok(record)
    }

    /// Deletes a record.
    ///
    /// Handles held elsewhere keep reading the record's last fields.
    pub fn delete(&self, id: RecordId) -> Result<()> {
        let (record, subscribers) = {
            let mut records = self.inner.records.write();
            let position = records
                .iter()
                .position(|r| r.id() == id)
                .ok_or(StoreError::RecordNotFound(id))?;
            let subscribers = self.subscribers();
            self.write_window();
            (records.remove(position), subscribers)
        };

        let deliveries = subscribers
            .into_iter()
            .filter(|(spec, _)| spec.matches(&record))
            .map(|(_, callback)| {
                let notification = ChangeNotification {
                    removed: vec![id],
                    ..Default::default()
                };
                (callback, notification)
            })
            .collect();

        metrics::counter!("record_store_writes_total", "op" => "delete").increment(1);
        tracing::debug!(record_id = %id, "record deleted");
        deliver(deliveries);
        Ok(())
    }

    fn check_fields(&self, entity: &str, fields: &Fields) -> Result<()> {
        let schema = self.inner.schema.require(entity)?;
        for field in fields.keys() {
            if !schema.has_field(field) {
                return Err(StoreError::UnknownField {
                    entity: entity.to_string(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    fn subscribers(&self) -> Vec<(FetchSpec, ChangeCallback)> {
        self.inner
            .subscriptions
            .lock()
            .values()
            .map(|entry| (entry.spec.clone(), Arc::clone(&entry.callback)))
            .collect()
    }

    #[cfg(test)]
    fn set_write_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.write_hook.lock() = Some(Arc::new(hook));
    }

    /// Runs between copying the subscription list and mutating the records.
    #[cfg(test)]
    fn write_window(&self) {
        let hook = self.inner.write_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    #[cfg(not(test))]
    fn write_window(&self) {}

    fn select(&self, spec: &FetchSpec) -> Result<Vec<RecordHandle>> {
        self.inner.schema.validate(spec)?;

        let records = self.inner.records.read();
        let mut matched: Vec<(Fields, RecordHandle)> = records
            .iter()
            .filter(|r| spec.matches(r))
            .map(|r| (r.fields(), Arc::clone(r)))
            .collect();
        drop(records);

        // Stable sort keeps insertion order between equal keys.
        matched.sort_by(|(a, _), (b, _)| spec.compare(a, b));

        let limit = spec.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().take(limit).map(|(_, r)| r).collect())
    }
}

fn classify(id: RecordId, before: bool, after: bool) -> Option<ChangeNotification> {
    let mut notification = ChangeNotification::default();
    match (before, after) {
        (true, true) => notification.updated.push(id),
        (false, true) => notification.inserted.push(id),
        (true, false) => notification.removed.push(id),
        (false, false) => return None,
    }
    Some(notification)
}

fn deliver(deliveries: Vec<(ChangeCallback, ChangeNotification)>) {
    for (callback, notification) in deliveries {
        callback(notification);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    async fn fetch(&self, spec: &FetchSpec) -> Result<Vec<RecordHandle>> {
        self.inner.fetch_count.fetch_add(1, Ordering::SeqCst);

        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }

        let records = self.select(spec)?;
        tracing::debug!(entity = %spec.entity, count = records.len(), "fetch served");
        Ok(records)
    }

    fn subscribe(&self, spec: FetchSpec, on_change: ChangeCallback) -> Result<SubscriptionId> {
        self.inner.schema.validate(&spec)?;
        let id = SubscriptionId::new(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.inner.subscriptions.lock().insert(
            id,
            SubscriptionEntry {
                spec,
                callback: on_change,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscriptions.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Predicate, SortDescriptor};
    use crate::schema::EntitySchema;
    use crate::store::Subscription;
    use serde_json::{Value, json};

    fn test_store() -> InMemoryRecordStore {
        InMemoryRecordStore::new(
            Schema::new().with_entity(
                EntitySchema::new("Item")
                    .field("timestamp")
                    .field("title")
                    .default_order(SortDescriptor::ascending("timestamp")),
            ),
        )
    }

    fn item(timestamp: i64) -> Fields {
        json!({ "timestamp": timestamp }).as_object().cloned().unwrap()
    }

    fn by_timestamp() -> FetchSpec {
        FetchSpec::for_entity("Item").order_by(SortDescriptor::ascending("timestamp"))
    }

    fn timestamps(records: &[RecordHandle]) -> Vec<i64> {
        records
            .iter()
            .map(|r| r.get::<i64>("timestamp").unwrap())
            .collect()
    }

    fn recording_callback() -> (ChangeCallback, Arc<Mutex<Vec<ChangeNotification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ChangeCallback = Arc::new(move |n: ChangeNotification| sink.lock().push(n));
        (callback, seen)
    }

    #[tokio::test]
    async fn fetch_orders_records() {
        let store = test_store();
        for ts in [3, 1, 2] {
            store.insert("Item", item(ts)).unwrap();
        }

        let records = store.fetch(&by_timestamp()).await.unwrap();
        assert_eq!(timestamps(&records), vec![1, 2, 3]);

        let descending =
            FetchSpec::for_entity("Item").order_by(SortDescriptor::descending("timestamp"));
        let records = store.fetch(&descending).await.unwrap();
        assert_eq!(timestamps(&records), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn fetch_applies_predicate_and_limit() {
        let store = test_store();
        for ts in 1..=5 {
            store.insert("Item", item(ts)).unwrap();
        }

        let spec = by_timestamp()
            .predicate(Predicate::greater_than("timestamp", 1))
            .limit(2);
        let records = store.fetch(&spec).await.unwrap();
        assert_eq!(timestamps(&records), vec![2, 3]);
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn fetch_rejects_unknown_fields() {
        let store = test_store();
        let spec = FetchSpec::for_entity("Item").order_by(SortDescriptor::ascending("priority"));
        let result = store.fetch(&spec).await;
        assert!(matches!(result, Err(StoreError::UnknownField { .. })));
    }

    #[tokio::test]
    async fn offline_store_fails_fetches() {
        let store = test_store();
        store.set_offline(true);
        let result = store.fetch(&by_timestamp()).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        store.set_offline(false);
        assert!(store.fetch(&by_timestamp()).await.is_ok());
    }

    #[test]
    fn insert_rejects_undeclared_fields() {
        let store = test_store();
        let fields = json!({ "priority": 1 }).as_object().cloned().unwrap();
        assert!(matches!(
            store.insert("Item", fields),
            Err(StoreError::UnknownField { .. })
        ));
        assert!(matches!(
            store.insert("Widget", Fields::new()),
            Err(StoreError::UnknownEntity(_))
        ));
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn writes_notify_matching_subscriptions() {
        let store = test_store();
        let spec = by_timestamp().predicate(Predicate::at_most("timestamp", 10));
        let (callback, seen) = recording_callback();
        store.subscribe(spec, callback).unwrap();

        let inside = store.insert("Item", item(5)).unwrap();
        store.insert("Item", item(50)).unwrap();
        store.update(inside.id(), item(6)).unwrap();
        store.update(inside.id(), item(60)).unwrap();
        store.update(inside.id(), item(7)).unwrap();
        store.delete(inside.id()).unwrap();

        let seen = seen.lock();
        let id = inside.id();
        assert_eq!(
            *seen,
            vec![
                ChangeNotification { inserted: vec![id], ..Default::default() },
                ChangeNotification { updated: vec![id], ..Default::default() },
                ChangeNotification { removed: vec![id], ..Default::default() },
                ChangeNotification { inserted: vec![id], ..Default::default() },
                ChangeNotification { removed: vec![id], ..Default::default() },
            ]
        );
    }

    #[test]
    fn unchanged_update_still_notifies_without_new_revision() {
        let store = test_store();
        let (callback, seen) = recording_callback();
        store.subscribe(by_timestamp(), callback).unwrap();

        let record = store.insert("Item", item(1)).unwrap();
        store.update(record.id(), item(1)).unwrap();

        assert_eq!(record.revision(), 1);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn subscription_guard_unsubscribes_on_drop() {
        let store = test_store();
        let (callback, seen) = recording_callback();

        let dyn_store: Arc<dyn RecordStore> = Arc::new(store.clone());
        let subscription = Subscription::new(dyn_store, by_timestamp(), callback).unwrap();
        assert_eq!(store.subscription_count(), 1);

        drop(subscription);
        assert_eq!(store.subscription_count(), 0);

        store.insert("Item", item(1)).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn deleted_handles_keep_last_fields() {
        let store = test_store();
        let record = store.insert("Item", item(9)).unwrap();
        store.delete(record.id()).unwrap();

        assert!(store.get(record.id()).is_none());
        assert_eq!(record.value("timestamp"), Some(Value::from(9)));
        assert!(matches!(
            store.delete(record.id()),
            Err(StoreError::RecordNotFound(_))
        ));
    }

    type PendingFetch = Arc<Mutex<Option<std::thread::JoinHandle<Vec<i64>>>>>;

    /// Subscribes and starts a fetch from another thread while the next
    /// write is between copying subscribers and touching the records.
    fn subscribe_during_next_write(
        store: &InMemoryRecordStore,
        callback: ChangeCallback,
    ) -> PendingFetch {
        let fetch: PendingFetch = Arc::new(Mutex::new(None));
        let pending = Mutex::new(Some(callback));
        let hook_store = store.clone();
        let hook_fetch = Arc::clone(&fetch);
        store.set_write_hook(move || {
            let Some(callback) = pending.lock().take() else {
                return;
            };
            hook_store.subscribe(by_timestamp(), callback).unwrap();
            let fetch_store = hook_store.clone();
            *hook_fetch.lock() = Some(std::thread::spawn(move || {
                timestamps(&fetch_store.select(&by_timestamp()).unwrap())
            }));
        });
        fetch
    }

    fn join_fetch(fetch: &PendingFetch) -> Vec<i64> {
        let handle = fetch.lock().take().expect("write did not reach the hook");
        handle.join().unwrap()
    }

    #[test]
    fn fetch_after_subscribing_mid_insert_sees_the_insert() {
        let store = test_store();
        store.insert("Item", item(1)).unwrap();

        let (callback, seen) = recording_callback();
        let fetch = subscribe_during_next_write(&store, callback);
        store.insert("Item", item(2)).unwrap();

        assert_eq!(join_fetch(&fetch), vec![1, 2]);
        assert!(seen.lock().is_empty());
        assert_eq!(store.subscription_count(), 1);
    }

    #[test]
    fn fetch_after_subscribing_mid_update_sees_the_update() {
        let store = test_store();
        let record = store.insert("Item", item(1)).unwrap();
        store.insert("Item", item(5)).unwrap();

        let (callback, _seen) = recording_callback();
        let fetch = subscribe_during_next_write(&store, callback);
        store.update(record.id(), item(9)).unwrap();

        assert_eq!(join_fetch(&fetch), vec![5, 9]);
    }

    #[test]
    fn fetch_after_subscribing_mid_delete_misses_the_record() {
        let store = test_store();
        let record = store.insert("Item", item(1)).unwrap();
        store.insert("Item", item(2)).unwrap();

        let (callback, seen) = recording_callback();
        let fetch = subscribe_during_next_write(&store, callback);
        store.delete(record.id()).unwrap();

        assert_eq!(join_fetch(&fetch), vec![2]);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn fetch_waits_for_configured_latency() {
        let store = test_store();
        store.set_latency(Some(Duration::from_millis(20)));
        let started = std::time::Instant::now();
        store.fetch(&by_timestamp()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
