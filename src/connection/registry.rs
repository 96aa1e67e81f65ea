use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use log::{info, warn};

use crate::protocol::{Closer, error::CapacityError};

/// Bookkeeping for one admitted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub id: u32,
    pub client_addr: SocketAddr,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub query_count: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub username: Option<String>,
    pub database: Option<String>,
    /// Why the session ended, when it did not end cleanly.
    pub failure: Option<String>,
}

impl ConnectionRecord {
    fn new(id: u32, client_addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            client_addr,
            created_at: now,
            last_activity: now,
            query_count: 0,
            bytes_received: 0,
            bytes_sent: 0,
            username: None,
            database: None,
            failure: None,
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub current_connections: usize,
    pub max_connections: usize,
    pub total_admitted: u64,
    pub total_rejected: u64,
    pub total_reclaimed: u64,
    /// Connections whose session ended with a recorded failure.
    pub total_failed: u64,
    pub uptime: Duration,
}

struct Tracked {
    record: ConnectionRecord,
    closer: Arc<dyn Closer>,
}

struct Inner {
    next_id: Option<u32>,
    connections: HashMap<u32, Tracked>,
}

/// The set of live connections.
///
/// Every mutation goes through one mutex and holds it only for a single map
/// update. Sockets are closed after the lock is released.
pub struct Registry {
    max_connections: usize,
    inner: Mutex<Inner>,
    shutting_down: AtomicBool,
    total_admitted: AtomicU64,
    total_rejected: AtomicU64,
    total_reclaimed: AtomicU64,
    total_failed: AtomicU64,
    started_at: Instant,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            inner: Mutex::new(Inner {
                next_id: Some(1),
                connections: HashMap::new(),
            }),
            shutting_down: AtomicBool::new(false),
            total_admitted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_reclaimed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Records stay consistent across a panicking holder: every update is a
        // single field write.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new connection, allocating the next id.
    pub fn admit(
        &self,
        closer: Arc<dyn Closer>,
        client_addr: SocketAddr,
    ) -> Result<ConnectionRecord, CapacityError> {
        let result = self.try_admit(closer, client_addr);
        match &result {
            Ok(record) => {
                self.total_admitted.fetch_add(1, Ordering::Relaxed);
                info!("(id={}) admitted connection from {client_addr}", record.id);
            }
            Err(e) => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                warn!("rejected connection from {client_addr}: {e}");
            }
        }
        result
    }

    fn try_admit(
        &self,
        closer: Arc<dyn Closer>,
        client_addr: SocketAddr,
    ) -> Result<ConnectionRecord, CapacityError> {
        // Checked under the lock: `shutdown` sets the flag before collecting
        // closers under the same lock, so no admitted record escapes it.
        let mut inner = self.lock();
        if self.is_shutting_down() {
            return Err(CapacityError::ShuttingDown);
        }
        if inner.connections.len() >= self.max_connections {
            return Err(CapacityError::TooManyConnections {
                limit: self.max_connections,
            });
        }

        let id = inner.next_id.ok_or(CapacityError::IdsExhausted)?;
        inner.next_id = id.checked_add(1);

        let record = ConnectionRecord::new(id, client_addr, Instant::now());
        inner.connections.insert(
            id,
            Tracked {
                record: record.clone(),
                closer,
            },
        );
        Ok(record)
    }

    fn update<F>(&self, id: u32, f: F) -> bool
    where
        F: FnOnce(&mut ConnectionRecord),
    {
        match self.lock().connections.get_mut(&id) {
            Some(tracked) => {
                f(&mut tracked.record);
                true
            }
            None => false,
        }
    }

    /// Marks the connection active and adds to its traffic counters.
    /// Returns `false` if the connection is no longer tracked.
    pub fn record_activity(&self, id: u32, bytes_in: u64, bytes_out: u64) -> bool {
        self.update(id, |record| {
            record.last_activity = Instant::now();
            record.bytes_received += bytes_in;
            record.bytes_sent += bytes_out;
        })
    }

    pub fn record_query(&self, id: u32) -> bool {
        self.update(id, |record| record.query_count += 1)
    }

    pub fn set_identity(&self, id: u32, username: &str, database: Option<&str>) -> bool {
        self.update(id, |record| {
            record.username = Some(username.to_string());
            record.database = database.map(str::to_string);
        })
    }

    pub fn set_database(&self, id: u32, database: Option<&str>) -> bool {
        self.update(id, |record| record.database = database.map(str::to_string))
    }

    pub fn record_failure(&self, id: u32, failure: &str) -> bool {
        self.update(id, |record| record.failure = Some(failure.to_string()))
    }

    /// Deregisters a connection. Returns its final record.
    pub fn remove(&self, id: u32) -> Option<ConnectionRecord> {
        let record = self.lock().connections.remove(&id)?.record;
        let summary = format!(
            "after {:.2?}, queries: {}, in: {}B, out: {}B",
            record.created_at.elapsed(),
            record.query_count,
            record.bytes_received,
            record.bytes_sent
        );
        match &record.failure {
            Some(failure) => {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                warn!("(id={id}) connection failed {summary}: {failure}");
            }
            None => info!("(id={id}) connection closed {summary}"),
        }
        Some(record)
    }

    /// Removes and closes every connection idle for longer than `threshold`.
    pub fn reclaim_idle(&self, threshold: Duration) -> Vec<ConnectionRecord> {
        self.reclaim_idle_at(Instant::now(), threshold)
    }

    pub fn reclaim_idle_at(&self, now: Instant, threshold: Duration) -> Vec<ConnectionRecord> {
        let reclaimed: Vec<Tracked> = {
            let mut inner = self.lock();
            let idle: Vec<u32> = inner
                .connections
                .values()
                .filter(|tracked| tracked.record.idle_for(now) > threshold)
                .map(|tracked| tracked.record.id)
                .collect();
            idle.into_iter()
                .filter_map(|id| inner.connections.remove(&id))
                .collect()
        };

        if !reclaimed.is_empty() {
            info!("reclaiming {} idle connections", reclaimed.len());
        }
        self.total_reclaimed
            .fetch_add(reclaimed.len() as u64, Ordering::Relaxed);

        reclaimed
            .into_iter()
            .map(|tracked| {
                tracked.closer.close();
                info!(
                    "(id={}) reclaimed after {:.2?} idle",
                    tracked.record.id,
                    tracked.record.idle_for(now)
                );
                tracked.record
            })
            .collect()
    }

    /// Stops admissions and closes every tracked transport. Sessions observe
    /// the close at their next read or write and deregister themselves.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let closers: Vec<Arc<dyn Closer>> = self
            .lock()
            .connections
            .values()
            .map(|tracked| Arc::clone(&tracked.closer))
            .collect();
        info!("shutting down {} connections", closers.len());
        for closer in closers {
            closer.close();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: u32) -> Option<ConnectionRecord> {
        self.lock()
            .connections
            .get(&id)
            .map(|tracked| tracked.record.clone())
    }

    pub fn contains(&self, id: u32) -> bool {
        self.lock().connections.contains_key(&id)
    }

    /// Records of all live connections, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> = self
            .lock()
            .connections
            .values()
            .map(|tracked| tracked.record.clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            current_connections: self.len(),
            max_connections: self.max_connections,
            total_admitted: self.total_admitted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_reclaimed: self.total_reclaimed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// A session's non-owning view of its record.
///
/// Dropping the handle deregisters the connection, so the registry is
/// notified exactly once however the session ends.
pub struct ConnectionHandle {
    id: u32,
    registry: Arc<Registry>,
}

impl ConnectionHandle {
    pub fn new(id: u32, registry: Arc<Registry>) -> Self {
        Self { id, registry }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn record_activity(&self, bytes_in: u64, bytes_out: u64) {
        self.registry.record_activity(self.id, bytes_in, bytes_out);
    }

    pub fn record_query(&self) {
        self.registry.record_query(self.id);
    }

    pub fn set_identity(&self, username: &str, database: Option<&str>) {
        self.registry.set_identity(self.id, username, database);
    }

    pub fn set_database(&self, database: Option<&str>) {
        self.registry.set_database(self.id, database);
    }

    pub fn record_failure(&self, failure: &str) {
        self.registry.record_failure(self.id, failure);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.registry.is_shutting_down()
    }

    /// Whether the registry still tracks this connection; `false` once it was
    /// reclaimed.
    pub fn is_tracked(&self) -> bool {
        self.registry.contains(self.id)
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::*, *};

    #[test]
    fn admit_until_capacity() {
        let registry = Registry::new(2);
        registry.admit(closer(), addr()).unwrap();
        let second = registry.admit(closer(), addr()).unwrap();

        let err = registry.admit(closer(), addr()).unwrap_err();
        assert_eq!(err, CapacityError::TooManyConnections { limit: 2 });

        registry.remove(second.id).unwrap();
        assert!(registry.admit(closer(), addr()).is_ok());

        let stats = registry.statistics();
        assert_eq!(stats.total_admitted, 3);
        assert_eq!(stats.total_rejected, 1);
        assert_eq!(stats.current_connections, 2);
    }

    #[test]
    fn ids_strictly_increase_and_are_not_reused() {
        let registry = Registry::new(1);
        let mut last = 0;
        for _ in 0..5 {
            let record = registry.admit(closer(), addr()).unwrap();
            assert!(record.id > last);
            last = record.id;
            registry.remove(record.id);
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn record_activity_updates_counters() {
        let registry = Registry::new(4);
        let record = registry.admit(closer(), addr()).unwrap();

        assert!(registry.record_activity(record.id, 10, 20));
        assert!(registry.record_activity(record.id, 1, 2));
        assert!(registry.record_query(record.id));

        let updated = registry.get(record.id).unwrap();
        assert_eq!(updated.bytes_received, 11);
        assert_eq!(updated.bytes_sent, 22);
        assert_eq!(updated.query_count, 1);
        assert!(updated.last_activity >= record.last_activity);

        registry.remove(record.id);
        assert!(!registry.record_activity(record.id, 1, 1));
    }

    #[test]
    fn reclaim_removes_exactly_the_idle() {
        let registry = Registry::new(4);
        let stale_closer = closer();
        let fresh_closer = closer();
        let stale = registry.admit(stale_closer.clone(), addr()).unwrap();
        let fresh = registry.admit(fresh_closer.clone(), addr()).unwrap();

        // Pretend time passed for both, then refresh one of them.
        let later = Instant::now() + Duration::from_secs(100);
        registry.update(fresh.id, |record| record.last_activity = later);

        let reclaimed = registry.reclaim_idle_at(later, Duration::from_secs(30));
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, stale.id);
        assert!(stale_closer.closed());
        assert!(!fresh_closer.closed());
        assert!(registry.contains(fresh.id));
        assert!(!registry.contains(stale.id));
        assert_eq!(registry.statistics().total_reclaimed, 1);
    }

    #[test]
    fn reclaim_threshold_is_exclusive() {
        let registry = Registry::new(4);
        let record = registry.admit(closer(), addr()).unwrap();

        let at_threshold = record.last_activity + Duration::from_secs(30);
        assert!(
            registry
                .reclaim_idle_at(at_threshold, Duration::from_secs(30))
                .is_empty()
        );
    }

    #[test]
    fn shutdown_closes_everything_and_refuses_admission() {
        let registry = Registry::new(4);
        let first = closer();
        let second = closer();
        registry.admit(first.clone(), addr()).unwrap();
        registry.admit(second.clone(), addr()).unwrap();

        registry.shutdown();
        assert!(first.closed());
        assert!(second.closed());
        assert_eq!(
            registry.admit(closer(), addr()).unwrap_err(),
            CapacityError::ShuttingDown
        );
    }

    #[test]
    fn dropping_handle_removes_record() {
        let registry = Arc::new(Registry::new(4));
        let record = registry.admit(closer(), addr()).unwrap();

        let handle = ConnectionHandle::new(record.id, Arc::clone(&registry));
        handle.set_identity("root", Some("shop"));
        assert_eq!(
            registry.get(record.id).unwrap().username.as_deref(),
            Some("root")
        );

        drop(handle);
        assert!(registry.is_empty());
    }

    #[test]
    fn removed_record_carries_failure() {
        let registry = Arc::new(Registry::new(4));
        let record = registry.admit(closer(), addr()).unwrap();

        assert!(registry.record_failure(record.id, "protocol error: boom"));
        let removed = registry.remove(record.id).unwrap();
        assert_eq!(removed.failure.as_deref(), Some("protocol error: boom"));
        assert_eq!(registry.statistics().total_failed, 1);

        let clean = registry.admit(closer(), addr()).unwrap();
        drop(ConnectionHandle::new(clean.id, Arc::clone(&registry)));
        assert_eq!(registry.statistics().total_failed, 1);
    }

    #[test]
    fn shutdown_closes_concurrently_admitted_connections() {
        let registry = Arc::new(Registry::new(10_000));
        let admitters: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut admitted = Vec::new();
                    for _ in 0..200 {
                        let flag = closer();
                        if registry.admit(flag.clone(), addr()).is_ok() {
                            admitted.push(flag);
                        }
                    }
                    admitted
                })
            })
            .collect();

        registry.shutdown();
        for admitter in admitters {
            for flag in admitter.join().unwrap() {
                assert!(flag.closed());
            }
        }
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let registry = Registry::new(4);
        for _ in 0..3 {
            registry.admit(closer(), addr()).unwrap();
        }
        let ids: Vec<u32> = registry.snapshot().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
