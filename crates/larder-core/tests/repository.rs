use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;

use larder_core::cache::{CollectionStream, EntryStream};
use larder_core::{
    CacheEntry, CacheStore, Clock, FetchCoordinator, Key, ManualClock, MemoryCacheStore,
    RemoteSource, RepoError, Repository, Restaurant, Result, StalenessConfig,
};

// ============================================================================
// Fake remote
// ============================================================================

#[derive(Default)]
struct FakeRemote {
    items: Mutex<BTreeMap<Key, Restaurant>>,
    failure: Mutex<Option<RepoError>>,
    delay: Mutex<StdDuration>,
    fetch_calls: AtomicUsize,
    fetch_all_calls: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeRemote {
    fn put(&self, restaurant: Restaurant) {
        self.items.lock().unwrap().insert(Key::new(restaurant.id.clone()), restaurant);
    }

    fn fail_with(&self, err: RepoError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    fn set_delay(&self, delay: StdDuration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSource<Restaurant> for FakeRemote {
    async fn fetch(&self, key: &Key) -> Result<Restaurant> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        self.items
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(key.clone()))
    }

    async fn fetch_all(&self) -> Result<Vec<Restaurant>> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, entity: &Restaurant) -> Result<Restaurant> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        self.put(entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, entity: &Restaurant) -> Result<Restaurant> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        self.put(entity.clone());
        Ok(entity.clone())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        self.items.lock().unwrap().remove(key);
        Ok(())
    }
}

// ============================================================================
// Slow cache
// ============================================================================

/// Memory store whose reads return a snapshot only after `latency`.
struct SlowCache {
    inner: MemoryCacheStore<Restaurant>,
    latency: StdDuration,
}

#[async_trait]
impl CacheStore<Restaurant> for SlowCache {
    async fn get(&self, key: &Key) -> Option<CacheEntry<Restaurant>> {
        let entry = self.inner.get_entry(key);
        tokio::time::sleep(self.latency).await;
        entry
    }

    async fn upsert(&self, entry: CacheEntry<Restaurant>) {
        self.inner.upsert(entry).await
    }

    async fn upsert_all(&self, entries: Vec<CacheEntry<Restaurant>>) {
        self.inner.upsert_all(entries).await
    }

    async fn delete(&self, key: &Key) {
        self.inner.delete(key).await
    }

    async fn delete_all(&self) {
        self.inner.delete_all().await
    }

    async fn replace_all(&self, entries: Vec<CacheEntry<Restaurant>>) {
        self.inner.replace_all(entries).await
    }

    fn observe(&self, key: &Key) -> EntryStream<Restaurant> {
        self.inner.observe(key)
    }

    fn observe_all(&self) -> CollectionStream<Restaurant> {
        self.inner.observe_all()
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    repo: Repository<Restaurant>,
    cache: Arc<MemoryCacheStore<Restaurant>>,
    remote: Arc<FakeRemote>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let cache: Arc<MemoryCacheStore<Restaurant>> = Arc::new(MemoryCacheStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let repo = Repository::new(
        cache.clone(),
        remote.clone(),
        Arc::new(FetchCoordinator::new()),
        StalenessConfig::new(Duration::hours(1)),
    )
    .with_clock(clock.clone());
    Harness {
        repo,
        cache,
        remote,
        clock,
    }
}

fn pizza() -> Restaurant {
    Restaurant::new("r1", "Pizza Place")
}

fn r1() -> Key {
    Key::from("r1")
}

impl Harness {
    fn seed(&self, restaurant: Restaurant, age: Duration) {
        self.cache
            .upsert_entry(CacheEntry::new(restaurant, self.clock.now() - age));
    }
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_cold_get_fetches_and_caches() {
    let h = harness();
    h.remote.put(pizza());

    let got = h.repo.get(&r1()).await.unwrap();

    assert_eq!(got, pizza());
    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(h.cache.get_entry(&r1()).unwrap().entity, pizza());
}

#[tokio::test]
async fn test_fresh_hit_skips_network() {
    let h = harness();
    h.seed(pizza(), Duration::zero());

    let got = h.repo.get(&r1()).await.unwrap();

    assert_eq!(got, pizza());
    assert_eq!(h.remote.fetches(), 0);
}

#[tokio::test]
async fn test_stale_entry_is_refetched_and_restamped() {
    let h = harness();
    h.seed(Restaurant::new("r1", "Old Name"), Duration::hours(2));
    h.remote.put(pizza());

    let entry = h.repo.get_entry(&r1()).await.unwrap();

    assert_eq!(entry.entity, pizza());
    assert_eq!(entry.cached_at, h.clock.now());
    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(h.cache.get_entry(&r1()).unwrap(), entry);
}

#[tokio::test]
async fn test_each_stale_get_fetches_once() {
    let h = harness();
    h.remote.put(pizza());

    h.repo.get(&r1()).await.unwrap();
    h.clock.advance(Duration::minutes(61));
    h.repo.get(&r1()).await.unwrap();

    assert_eq!(h.remote.fetches(), 2);
}

#[tokio::test]
async fn test_stale_fallback_when_unavailable() {
    let h = harness();
    h.seed(pizza(), Duration::hours(2));
    h.remote.fail_with(RepoError::Unavailable("connection refused".into()));

    let got = h.repo.get(&r1()).await.unwrap();

    assert_eq!(got, pizza());
    assert_eq!(h.remote.fetches(), 1);
}

#[tokio::test]
async fn test_stale_fallback_on_server_error() {
    let h = harness();
    h.seed(pizza(), Duration::days(3));
    h.remote.fail_with(RepoError::ServerError(500));

    assert_eq!(h.repo.get(&r1()).await.unwrap(), pizza());
}

#[tokio::test]
async fn test_unavailable_without_cache_propagates() {
    let h = harness();
    h.remote.fail_with(RepoError::Unavailable("offline".into()));

    let err = h.repo.get(&r1()).await.unwrap_err();

    assert!(matches!(err, RepoError::Unavailable(_)));
}

#[tokio::test]
async fn test_server_error_without_cache_propagates() {
    let h = harness();
    h.remote.fail_with(RepoError::ServerError(503));

    assert_eq!(h.repo.get(&r1()).await.unwrap_err(), RepoError::ServerError(503));
}

#[tokio::test]
async fn test_not_found_never_falls_back() {
    let h = harness();
    h.seed(pizza(), Duration::hours(2));
    // Remote has no r1

    let err = h.repo.get(&r1()).await.unwrap_err();

    assert_eq!(err, RepoError::NotFound(r1()));
    // The stale entry is left for the caller's policy to handle.
    assert!(h.cache.get_entry(&r1()).is_some());
}

#[tokio::test]
async fn test_concurrent_gets_share_one_fetch() {
    let h = harness();
    h.seed(Restaurant::new("r1", "Old Name"), Duration::hours(2));
    h.remote.put(pizza());
    h.remote.set_delay(StdDuration::from_millis(50));

    let key = r1();
    let (a, b) = tokio::join!(h.repo.get(&key), h.repo.get(&key));

    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(a.unwrap(), pizza());
    assert_eq!(b.unwrap(), pizza());
}

#[tokio::test]
async fn test_get_that_read_stale_entry_before_refresh_does_not_refetch() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = Arc::new(SlowCache {
        inner: MemoryCacheStore::new(),
        latency: StdDuration::from_millis(50),
    });
    let old = Restaurant::new("r1", "Old Name");
    cache
        .inner
        .upsert_entry(CacheEntry::new(old, clock.now() - Duration::hours(2)));
    let remote = Arc::new(FakeRemote::default());
    remote.put(pizza());
    remote.set_delay(StdDuration::from_millis(10));
    let repo = Repository::new(
        cache.clone(),
        remote.clone(),
        Arc::new(FetchCoordinator::new()),
        StalenessConfig::new(Duration::hours(1)),
    )
    .with_clock(clock.clone());

    // The second get reads the stale entry while the first is still in
    // flight and reaches the coordinator well after its own read.
    let late = async {
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        repo.get(&r1()).await
    };
    let key = r1();
    let (a, b) = tokio::join!(repo.get(&key), late);

    assert_eq!(remote.fetches(), 1);
    assert_eq!(a.unwrap(), pizza());
    assert_eq!(b.unwrap(), pizza());
}

#[tokio::test]
async fn test_concurrent_gets_share_one_error() {
    let h = harness();
    h.remote.fail_with(RepoError::ServerError(502));
    h.remote.set_delay(StdDuration::from_millis(20));

    let key = r1();
    let (a, b, c) = tokio::join!(h.repo.get(&key), h.repo.get(&key), h.repo.get(&key));

    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(a.unwrap_err(), RepoError::ServerError(502));
    assert_eq!(b.unwrap_err(), RepoError::ServerError(502));
    assert_eq!(c.unwrap_err(), RepoError::ServerError(502));
}

#[tokio::test]
async fn test_cached_never_touches_remote() {
    let h = harness();
    assert!(h.repo.cached(&r1()).await.is_none());

    h.seed(pizza(), Duration::days(10));
    assert_eq!(h.repo.cached(&r1()).await.unwrap().entity, pizza());
    assert_eq!(h.remote.fetches(), 0);
}

#[tokio::test]
async fn test_staleness_queries() {
    let h = harness();
    let r2 = Key::from("r2");
    assert!(h.repo.is_stale(&r1()).await);

    h.seed(pizza(), Duration::minutes(10));
    h.seed(Restaurant::new("r2", "Taco Stand"), Duration::minutes(90));

    assert!(!h.repo.is_stale(&r1()).await);
    assert!(h.repo.is_stale(&r2).await);
    assert!(!h.repo.any_stale([&r1()]).await);
    assert!(h.repo.any_stale([&r1(), &r2]).await);
}

// ============================================================================
// Bulk refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_all_replaces_cache_without_empty_emission() {
    let h = harness();
    for (id, name) in [("a", "A"), ("b", "B"), ("c", "C")] {
        h.seed(Restaurant::new(id, name), Duration::zero());
    }
    h.remote.put(Restaurant::new("x", "X"));
    h.remote.put(Restaurant::new("y", "Y"));

    let mut all = h.repo.observe_all();
    assert_eq!(all.next().await.unwrap().len(), 3);

    let refreshed = h.repo.refresh_all().await.unwrap();
    assert_eq!(refreshed.len(), 2);

    let next = all.next().await.unwrap();
    let ids: Vec<_> = next.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["x", "y"]);
    assert!(all.next().now_or_never().is_none());
    assert_eq!(h.cache.len(), 2);
}

#[tokio::test]
async fn test_refresh_all_failure_leaves_cache() {
    let h = harness();
    h.seed(pizza(), Duration::zero());
    h.remote.fail_with(RepoError::Unavailable("offline".into()));

    assert!(h.repo.refresh_all().await.is_err());
    assert_eq!(h.cache.len(), 1);
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_save_twice_replaces_single_entry() {
    let h = harness();

    h.repo.save(pizza()).await.unwrap();
    h.clock.advance(Duration::minutes(5));
    h.repo.save(pizza()).await.unwrap();

    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.cache.get_entry(&r1()).unwrap().cached_at, h.clock.now());
    assert_eq!(h.remote.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.update_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_save_failure_leaves_cache() {
    let h = harness();
    h.seed(Restaurant::new("r1", "Old Name"), Duration::zero());
    h.remote.fail_with(RepoError::Unavailable("offline".into()));

    assert!(h.repo.save(pizza()).await.is_err());
    assert_eq!(h.cache.get_entry(&r1()).unwrap().entity.name, "Old Name");
}

#[tokio::test]
async fn test_delete_removes_after_remote_success() {
    let h = harness();
    h.remote.put(pizza());
    h.seed(pizza(), Duration::zero());

    h.repo.delete(&r1()).await.unwrap();

    assert!(h.cache.get_entry(&r1()).is_none());
    assert_eq!(h.remote.delete_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delete_failure_leaves_cache() {
    let h = harness();
    h.seed(pizza(), Duration::zero());
    h.remote.fail_with(RepoError::ServerError(500));

    assert_eq!(h.repo.delete(&r1()).await.unwrap_err(), RepoError::ServerError(500));
    assert!(h.cache.get_entry(&r1()).is_some());
}

// ============================================================================
// Observation
// ============================================================================

#[tokio::test]
async fn test_observe_replays_current_value() {
    let h = harness();
    h.seed(pizza(), Duration::zero());

    let first = h.repo.observe(&r1()).next().await.unwrap();
    assert_eq!(first.unwrap().entity, pizza());

    let empty = h.repo.observe(&Key::from("nope")).next().await.unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn test_observers_see_write_through_not_raw_fetch() {
    let h = harness();
    h.remote.put(pizza());

    let mut stream = h.repo.observe(&r1());
    assert!(stream.next().await.unwrap().is_none());

    h.repo.get(&r1()).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().entity, pizza());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_get_does_not_abort_shared_fetch() {
    let h = harness();
    h.remote.put(pizza());
    h.remote.set_delay(StdDuration::from_millis(50));

    let token = CancellationToken::new();
    let canceller = token.clone();
    let key = r1();
    let (cancelled, other, _) = tokio::join!(
        h.repo.get_cancellable(&key, &token),
        h.repo.get(&key),
        async move {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            canceller.cancel();
        }
    );

    assert_eq!(cancelled.unwrap_err(), RepoError::Cancelled);
    assert_eq!(other.unwrap(), pizza());
    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(h.cache.get_entry(&r1()).unwrap().entity, pizza());
}

#[tokio::test]
async fn test_cancelled_leader_still_writes_through() {
    let h = harness();
    h.remote.put(pizza());
    h.remote.set_delay(StdDuration::from_millis(30));

    let token = CancellationToken::new();
    let canceller = token.clone();
    let key = r1();
    let (result, _) = tokio::join!(h.repo.get_cancellable(&key, &token), async move {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        canceller.cancel();
    });
    assert_eq!(result.unwrap_err(), RepoError::Cancelled);

    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert_eq!(h.cache.get_entry(&r1()).unwrap().entity, pizza());
}

#[tokio::test]
async fn test_already_cancelled_save_makes_no_remote_call() {
    let h = harness();
    let token = CancellationToken::new();
    token.cancel();

    let err = h.repo.save_cancellable(pizza(), &token).await.unwrap_err();

    assert_eq!(err, RepoError::Cancelled);
    assert_eq!(h.remote.create_calls.load(Ordering::SeqCst), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_delete_cancellable_completes_when_not_cancelled() {
    let h = harness();
    h.remote.put(pizza());
    h.seed(pizza(), Duration::zero());

    h.repo
        .delete_cancellable(&r1(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.cache.is_empty());
}
