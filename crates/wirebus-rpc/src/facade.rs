use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::ConnectionEvent;
use crate::error::{Result, RpcError};

/// The resource operations a remote service exposes, and that the
/// reconnecting facade wraps.
///
/// [`ServiceProxy`](crate::ServiceProxy) implements this over the wire; the
/// trait seam lets the facade be tested against an in-process fake.
pub trait ResourceService: Send + Sync {
    fn read(&self, resource: &str) -> Result<Value>;
    fn save(&self, resource: &str, content: &Value) -> Result<()>;
    fn close(&self) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

/// A facade over a [`ResourceService`] that rides out disconnections.
///
/// While disconnected, saves are queued per resource in FIFO order instead
/// of failing. On reconnect the queues are flushed; a flush failure leaves
/// the failed save at the front for the next attempt. A read always flushes
/// its resource's queue first so it cannot observe stale content, and any
/// flush error is the reader's error.
pub struct ReconnectingClient<S: ResourceService> {
    inner: S,
    connected: AtomicBool,
    closed: AtomicBool,
    queues: Mutex<HashMap<String, Arc<Mutex<VecDeque<Value>>>>>,
}

impl<S: ResourceService> ReconnectingClient<S> {
    /// Wrap a service that is currently connected.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Whether operations currently go straight to the inner service.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Total number of saves queued across all resources.
    pub fn pending(&self) -> usize {
        lock(&self.queues)
            .values()
            .map(|queue| lock(queue).len())
            .sum()
    }

    /// Update the connectivity flag. Transitioning to connected flushes all
    /// queues; flush failures are logged and the affected saves stay queued
    /// for the next transition.
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if connected && !was {
            debug!("reconnected; flushing queued saves");
            self.flush_all();
        }
    }

    /// Drive the connectivity flag from connection lifecycle events.
    pub fn drive_events(
        self: &Arc<Self>,
        events: mpsc::Receiver<ConnectionEvent>,
    ) -> JoinHandle<()>
    where
        S: 'static,
    {
        let client = Arc::clone(self);
        std::thread::spawn(move || {
            for event in events {
                match event {
                    ConnectionEvent::Opened => client.set_connected(true),
                    ConnectionEvent::Closed => client.set_connected(false),
                }
                if client.closed.load(Ordering::SeqCst) {
                    return;
                }
            }
        })
    }

    /// Read a resource, flushing its queued saves first.
    pub fn read(&self, resource: &str) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Closed);
        }
        let queue = self.queue_for(resource);
        let mut pending = lock(&queue);
        // A queued save that cannot be delivered means the content the
        // reader would get is stale; the flush error is the read's error.
        self.drain(resource, &mut pending)?;
        self.inner.read(resource)
    }

    /// Save a resource, queueing the content if currently disconnected.
    pub fn save(&self, resource: &str, content: &Value) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Closed);
        }
        let queue = self.queue_for(resource);
        let mut pending = lock(&queue);
        if !self.is_connected() {
            pending.push_back(content.clone());
            return Ok(());
        }
        self.drain(resource, &mut pending)?;
        self.inner.save(resource, content)
    }

    /// Close the facade. Queued saves are flushed best-effort, the inner
    /// service is closed, and all later operations are rejected. Always
    /// succeeds; delivery failures at this point are only logged.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_all();
        if let Err(err) = self.inner.close() {
            warn!(%err, "inner service close failed");
        }
        Ok(())
    }

    fn queue_for(&self, resource: &str) -> Arc<Mutex<VecDeque<Value>>> {
        Arc::clone(
            lock(&self.queues)
                .entry(resource.to_string())
                .or_default(),
        )
    }

    /// Flush every resource queue in arrival order within each resource.
    /// Resources are independent: one resource's failure does not stop the
    /// others from flushing.
    fn flush_all(&self) {
        let queues: Vec<(String, Arc<Mutex<VecDeque<Value>>>)> = lock(&self.queues)
            .iter()
            .map(|(resource, queue)| (resource.clone(), Arc::clone(queue)))
            .collect();

        for (resource, queue) in &queues {
            let mut pending = lock(queue);
            if let Err(err) = self.drain(resource, &mut pending) {
                warn!(
                    resource = %resource,
                    remaining = pending.len(),
                    %err,
                    "flush failed; saves stay queued"
                );
            }
        }
        drop(queues);

        // Drop drained queues so the map does not grow with every resource
        // name ever saved. A queue some other caller still holds a handle
        // to stays until the next flush.
        lock(&self.queues)
            .retain(|_, queue| Arc::strong_count(queue) > 1 || !lock(queue).is_empty());
    }

    fn drain(&self, resource: &str, pending: &mut VecDeque<Value>) -> Result<()> {
        while let Some(content) = pending.front() {
            // Delivered before dequeued, so a failure leaves the save at
            // the front for the next flush.
            self.inner.save(resource, content)?;
            pending.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    /// In-process service whose availability the test controls.
    struct FakeStore {
        online: AtomicBool,
        contents: Mutex<HashMap<String, Value>>,
        saves: Mutex<Vec<(String, Value)>>,
        closed: AtomicBool,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                online: AtomicBool::new(true),
                contents: Mutex::new(HashMap::new()),
                saves: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }
        }

        fn content(&self, resource: &str) -> Value {
            self.contents.lock().expect("lock")[resource].clone()
        }
    }

    impl ResourceService for Arc<FakeStore> {
        fn read(&self, resource: &str) -> Result<Value> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(RpcError::Disconnected("store offline".to_string()));
            }
            self.contents
                .lock()
                .expect("lock")
                .get(resource)
                .cloned()
                .ok_or_else(|| RpcError::Protocol(format!("unknown resource {resource}")))
        }

        fn save(&self, resource: &str, content: &Value) -> Result<()> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(RpcError::Disconnected("store offline".to_string()));
            }
            self.contents
                .lock()
                .expect("lock")
                .insert(resource.to_string(), content.clone());
            self.saves
                .lock()
                .expect("lock")
                .push((resource.to_string(), content.clone()));
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fixture() -> (Arc<FakeStore>, ReconnectingClient<Arc<FakeStore>>) {
        let store = Arc::new(FakeStore::new());
        let client = ReconnectingClient::new(Arc::clone(&store));
        (store, client)
    }

    #[test]
    fn connected_saves_pass_straight_through() {
        let (store, client) = fixture();
        client
            .save("a.txt", &json!("one"))
            .expect("save should succeed");
        assert_eq!(client.pending(), 0);
        assert_eq!(store.content("a.txt"), json!("one"));
    }

    #[test]
    fn disconnected_saves_queue_and_flush_in_order() {
        let (store, client) = fixture();
        client.set_connected(false);

        client.save("a.txt", &json!("one")).expect("queued save");
        client.save("a.txt", &json!("two")).expect("queued save");
        client.save("a.txt", &json!("three")).expect("queued save");
        assert_eq!(client.pending(), 3);
        assert!(store.saves.lock().expect("lock").is_empty());

        client.set_connected(true);
        assert_eq!(client.pending(), 0);
        let saves = store.saves.lock().expect("lock").clone();
        assert_eq!(
            saves,
            vec![
                ("a.txt".to_string(), json!("one")),
                ("a.txt".to_string(), json!("two")),
                ("a.txt".to_string(), json!("three")),
            ]
        );
        assert_eq!(store.content("a.txt"), json!("three"));
    }

    #[test]
    fn drained_queues_are_dropped_from_the_map() {
        let (_store, client) = fixture();
        client.set_connected(false);
        for name in ["a.txt", "b.txt", "c.txt"] {
            client.save(name, &json!("content")).expect("queued save");
        }
        assert_eq!(lock(&client.queues).len(), 3);

        client.set_connected(true);
        assert_eq!(client.pending(), 0);
        assert!(lock(&client.queues).is_empty());
    }

    #[test]
    fn failed_flushes_keep_their_queue_entries() {
        let (store, client) = fixture();
        client.set_connected(false);
        client.save("a.txt", &json!("stuck")).expect("queued save");

        store.online.store(false, Ordering::SeqCst);
        client.set_connected(true);
        assert_eq!(client.pending(), 1);
        assert_eq!(lock(&client.queues).len(), 1);
    }

    #[test]
    fn read_flushes_the_resource_queue_first() {
        let (store, client) = fixture();
        client.set_connected(false);
        client.save("a.txt", &json!("queued")).expect("queued save");

        // Reconnect silently, without triggering the flush transition.
        store.online.store(true, Ordering::SeqCst);
        client.connected.store(true, Ordering::SeqCst);

        let content = client.read("a.txt").expect("read should succeed");
        assert_eq!(content, json!("queued"));
        assert_eq!(client.pending(), 0);
    }

    #[test]
    fn read_propagates_flush_errors() {
        let (store, client) = fixture();
        client.set_connected(false);
        client.save("a.txt", &json!("stuck")).expect("queued save");

        // Flag says connected but the store still refuses saves.
        store.online.store(false, Ordering::SeqCst);
        client.connected.store(true, Ordering::SeqCst);

        let err = client.read("a.txt").unwrap_err();
        assert!(matches!(err, RpcError::Disconnected(_)));
        // The failed save is still queued.
        assert_eq!(client.pending(), 1);
    }

    #[test]
    fn failed_flush_retries_on_the_next_reconnect() {
        let (store, client) = fixture();
        client.set_connected(false);
        client
            .save("a.txt", &json!("persistent"))
            .expect("queued save");

        // First reconnect fails to deliver.
        store.online.store(false, Ordering::SeqCst);
        client.set_connected(true);
        assert_eq!(client.pending(), 1);

        // Second reconnect succeeds.
        client.set_connected(false);
        store.online.store(true, Ordering::SeqCst);
        client.set_connected(true);
        assert_eq!(client.pending(), 0);
        assert_eq!(store.content("a.txt"), json!("persistent"));
    }

    #[test]
    fn resources_flush_independently() {
        let (store, client) = fixture();
        client.set_connected(false);
        client.save("a.txt", &json!("for-a")).expect("queued save");
        client.save("b.txt", &json!("for-b")).expect("queued save");

        client.set_connected(true);
        assert_eq!(client.pending(), 0);
        assert_eq!(store.content("a.txt"), json!("for-a"));
        assert_eq!(store.content("b.txt"), json!("for-b"));
    }

    /// A store that rejects saves for one particular resource.
    struct PickyStore {
        inner: Arc<FakeStore>,
        rejected: String,
    }

    impl ResourceService for PickyStore {
        fn read(&self, resource: &str) -> Result<Value> {
            self.inner.read(resource)
        }

        fn save(&self, resource: &str, content: &Value) -> Result<()> {
            if resource == self.rejected {
                return Err(RpcError::Disconnected("resource unavailable".to_string()));
            }
            self.inner.save(resource, content)
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn one_stuck_resource_does_not_block_the_others() {
        let store = Arc::new(FakeStore::new());
        let client = ReconnectingClient::new(PickyStore {
            inner: Arc::clone(&store),
            rejected: "stuck.txt".to_string(),
        });

        client.set_connected(false);
        client
            .save("stuck.txt", &json!("never-lands"))
            .expect("queued save");
        client.save("fine.txt", &json!("lands")).expect("queued save");

        client.set_connected(true);
        assert_eq!(client.pending(), 1);
        assert_eq!(store.content("fine.txt"), json!("lands"));
    }

    #[test]
    fn close_flushes_then_rejects_further_operations() {
        let (store, client) = fixture();
        client.set_connected(false);
        client
            .save("a.txt", &json!("last-words"))
            .expect("queued save");

        client.set_connected(true);
        client.close().expect("close should succeed");
        assert!(store.closed.load(Ordering::SeqCst));
        assert_eq!(store.content("a.txt"), json!("last-words"));

        assert!(matches!(
            client.save("a.txt", &json!("late")),
            Err(RpcError::Closed)
        ));
        assert!(matches!(client.read("a.txt"), Err(RpcError::Closed)));
        // Close is idempotent.
        client.close().expect("second close should succeed");
    }

    #[test]
    fn close_succeeds_even_when_delivery_fails() {
        let (store, client) = fixture();
        client.set_connected(false);
        client
            .save("a.txt", &json!("undeliverable"))
            .expect("queued save");

        store.online.store(false, Ordering::SeqCst);
        client.connected.store(true, Ordering::SeqCst);
        client.close().expect("close should still succeed");
        assert!(store.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn events_drive_the_connectivity_flag() {
        let (store, client) = fixture();
        let client = Arc::new(client);
        let (tx, rx) = mpsc::channel();
        let pump = client.drive_events(rx);

        tx.send(ConnectionEvent::Closed).expect("send");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while client.is_connected() {
            assert!(std::time::Instant::now() < deadline, "flag should drop");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        client
            .save("a.txt", &json!("while-down"))
            .expect("queued save");
        assert_eq!(client.pending(), 1);

        tx.send(ConnectionEvent::Opened).expect("send");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while client.pending() > 0 {
            assert!(std::time::Instant::now() < deadline, "queue should flush");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(store.content("a.txt"), json!("while-down"));

        drop(tx);
        pump.join().expect("event pump should finish");
    }
}
