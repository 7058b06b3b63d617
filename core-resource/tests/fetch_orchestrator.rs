//! Fetch orchestration against an in-memory bridge and gateway.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, BridgeRequest, BridgeResponse, HttpClient, HttpRequest, HttpResponse, ManualClock,
    PublishResource, QdnBridge, QdnMetadata, ResourceKey, SearchParams, Service, PLACEHOLDER_SIZE,
};
use core_encoding::object_to_base64_utf8;
use core_resource::{
    FetchOptions, FetchOutcome, GatewayClient, LayeredCache, PriorityRequest, PrioritySource,
    ResourceConfig, ResourceData, ResourceError, ResourceFetcher, ReturnType, SourceQuery,
};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeBridge {
    resources: Mutex<Vec<QdnMetadata>>,
    searches: Mutex<Vec<SearchParams>>,
    published: Mutex<Vec<Vec<PublishResource>>>,
    fail_search: Mutex<bool>,
    fail_publish: Mutex<bool>,
}

impl FakeBridge {
    fn with_resources(resources: Vec<QdnMetadata>) -> Arc<Self> {
        let bridge = Self::default();
        *bridge.resources.lock() = resources;
        Arc::new(bridge)
    }

    fn search(&self, params: &SearchParams) -> Vec<QdnMetadata> {
        let mut found: Vec<QdnMetadata> = self
            .resources
            .lock()
            .iter()
            .filter(|item| params.service.as_ref().map_or(true, |s| *s == item.service))
            .filter(|item| params.names.is_empty() || params.names.contains(&item.name))
            .filter(|item| match &params.identifier {
                Some(id) if params.prefix => item.identifier.starts_with(id.as_str()),
                Some(id) => item.identifier == *id,
                None => true,
            })
            .filter(|item| params.before.map_or(true, |before| item.created < before))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created.cmp(&a.created));
        if params.limit > 0 {
            found.truncate(params.limit);
        }
        found
    }

    fn search_calls(&self) -> Vec<SearchParams> {
        self.searches.lock().clone()
    }
}

#[async_trait]
impl QdnBridge for FakeBridge {
    async fn call(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError> {
        match request {
            BridgeRequest::SearchQdnResources(params) => {
                self.searches.lock().push(params.clone());
                if *self.fail_search.lock() {
                    return Err(BridgeError::OperationFailed("search offline".to_string()));
                }
                Ok(BridgeResponse::Resources(self.search(&params)))
            }
            BridgeRequest::PublishMultipleQdnResources { resources } => {
                if *self.fail_publish.lock() {
                    return Err(BridgeError::OperationFailed("user rejected".to_string()));
                }
                self.published.lock().push(resources);
                Ok(BridgeResponse::Published)
            }
            other => Err(BridgeError::NotAvailable(other.action().to_string())),
        }
    }
}

/// Serves `{"id": identifier}` bodies, optionally slow or failing.
#[derive(Default)]
struct FakeGateway {
    requests: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing(times: usize) -> Arc<Self> {
        let gateway = Self::default();
        gateway.failures_left.store(times, Ordering::SeqCst);
        Arc::new(gateway)
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for FakeGateway {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Ok(HttpResponse::new(500, "node busy"));
        }

        let path = request.url.split('?').next().unwrap_or_default();
        let identifier = path.rsplit('/').next().unwrap_or_default();
        let body = object_to_base64_utf8(&serde_json::json!({ "id": identifier })).unwrap();
        Ok(HttpResponse::new(200, body))
    }
}

struct Harness {
    bridge: Arc<FakeBridge>,
    http: Arc<FakeGateway>,
    fetcher: ResourceFetcher,
    clock: ManualClock,
}

fn harness(bridge: Arc<FakeBridge>, http: Arc<FakeGateway>, warm: bool) -> Harness {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let config = ResourceConfig::default();
    let cache = Arc::new(LayeredCache::new(&config, Arc::new(clock.clone())));
    let gateway = GatewayClient::new(http.clone(), "http://127.0.0.1:12391");
    let fetcher = ResourceFetcher::new(bridge.clone(), gateway, cache, config).with_cache_warming(warm);
    Harness {
        bridge,
        http,
        fetcher,
        clock,
    }
}

fn key(name: &str, id: &str) -> ResourceKey {
    ResourceKey::new(Service::Video, name, id)
}

fn feed(name: &str, count: usize, newest: i64) -> Vec<QdnMetadata> {
    (0..count)
        .map(|i| QdnMetadata::new(key(name, &format!("{}-{:02}", name, i)), 2_048, newest - i as i64))
        .collect()
}

// ---------------------------------------------------------------------------
// Individual fetches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_fetches_share_one_request() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    *h.http.delay.lock() = Duration::from_millis(20);
    let clip = key("alice", "clip1");

    let (first, second) = tokio::join!(
        h.fetcher.fetch_individual(&clip, ReturnType::Json, false),
        h.fetcher.fetch_individual(&clip, ReturnType::Json, false),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(h.http.requests(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.is_ready()).count(), 1);
    assert!(outcomes.contains(&FetchOutcome::InFlight));

    let cached = h
        .fetcher
        .fetch_individual(&clip, ReturnType::Json, false)
        .await
        .unwrap()
        .ready()
        .expect("served from cache");
    assert_eq!(cached.data, ResourceData::Json(serde_json::json!({ "id": "clip1" })));
    assert_eq!(h.http.requests(), 1);
}

#[tokio::test]
async fn test_base64_return_type_keeps_raw_body() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    let outcome = h
        .fetcher
        .fetch_individual(&key("alice", "raw"), ReturnType::Base64, false)
        .await
        .unwrap();

    let resource = outcome.ready().unwrap();
    let expected = object_to_base64_utf8(&serde_json::json!({ "id": "raw" })).unwrap();
    assert_eq!(resource.data.as_base64(), Some(expected.as_str()));
    assert!(h.fetcher.cache().get_publish(&key("alice", "raw")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_body_retries_on_backup_then_caches_absent() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::failing(10), false);
    let clip = key("alice", "broken");

    let started = tokio::time::Instant::now();
    let outcome = h
        .fetcher
        .fetch_individual(&clip, ReturnType::Json, false)
        .await
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Unavailable);
    assert_eq!(h.http.requests(), 3);
    assert!(started.elapsed() >= Duration::from_secs(20));

    let again = h
        .fetcher
        .fetch_individual(&clip, ReturnType::Json, false)
        .await
        .unwrap();
    assert_eq!(again, FetchOutcome::Unavailable);
    assert_eq!(h.http.requests(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_backup_retry_can_recover() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::failing(1), false);
    let outcome = h
        .fetcher
        .fetch_individual(&key("alice", "flaky"), ReturnType::Json, false)
        .await
        .unwrap();

    assert!(outcome.is_ready());
    assert_eq!(h.http.requests(), 2);
}

#[tokio::test]
async fn test_refetch_cancels_in_flight_fetch() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    *h.http.delay.lock() = Duration::from_millis(50);
    let clip = key("alice", "clip1");

    let fetcher = h.fetcher.clone();
    let slow_key = clip.clone();
    let first = tokio::spawn(async move {
        fetcher
            .fetch_individual(&slow_key, ReturnType::Json, false)
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = h
        .fetcher
        .refetch_individual(&clip, ReturnType::Json, false)
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap(), FetchOutcome::Canceled);
    assert!(second.is_ready());
    assert!(h.fetcher.cache().get_resource(&clip, false).is_some());
}

#[tokio::test]
async fn test_cancel_all_releases_key_for_next_fetch() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    *h.http.delay.lock() = Duration::from_millis(50);
    let clip = key("alice", "clip1");

    let fetcher = h.fetcher.clone();
    let slow_key = clip.clone();
    let first = tokio::spawn(async move {
        fetcher
            .fetch_individual(&slow_key, ReturnType::Json, false)
            .await
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    h.fetcher.cancel_all();
    assert_eq!(first.await.unwrap().unwrap(), FetchOutcome::Canceled);
    assert!(h.fetcher.cache().get_resource(&clip, false).is_none());

    *h.http.delay.lock() = Duration::ZERO;
    let again = h
        .fetcher
        .fetch_individual(&clip, ReturnType::Json, false)
        .await
        .unwrap();
    assert!(again.is_ready());
    assert_eq!(h.http.requests(), 2);
}

#[tokio::test]
async fn test_cancel_requests_releases_warming_fetches() {
    let mut resources = feed("alice", 3, 100);
    resources.extend(feed("bob", 2, 50));
    let h = harness(FakeBridge::with_resources(resources), FakeGateway::new(), true);
    *h.http.delay.lock() = Duration::from_millis(50);

    let mut alice = SearchParams::for_service(Service::Video);
    alice.names = vec!["alice".to_string()];
    let warmed = h
        .fetcher
        .fetch_resources(&alice, "alice", ReturnType::Json, FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(warmed.len(), 3);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut bob = SearchParams::for_service(Service::Video);
    bob.names = vec!["bob".to_string()];
    h.fetcher
        .fetch_resources(
            &bob,
            "bob",
            ReturnType::Json,
            FetchOptions::default().with_cancel_requests(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    *h.http.delay.lock() = Duration::ZERO;
    for item in &warmed {
        let outcome = h
            .fetcher
            .fetch_individual(&item.key(), ReturnType::Json, false)
            .await
            .unwrap();
        assert!(outcome.is_ready(), "{} stayed {:?}", item.identifier, outcome);
    }
}

#[tokio::test]
async fn test_deleted_resource_is_unavailable_without_body_fetch() {
    let clip = key("alice", "gone");
    let bridge = FakeBridge::with_resources(vec![QdnMetadata::new(clip.clone(), PLACEHOLDER_SIZE, 10)]);
    let h = harness(bridge, FakeGateway::new(), false);

    let outcome = h
        .fetcher
        .fetch_individual(&clip, ReturnType::Json, true)
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Unavailable);
    assert_eq!(h.http.requests(), 0);
}

#[tokio::test]
async fn test_metadata_attached_when_requested() {
    let clip = key("alice", "clip1");
    let bridge = FakeBridge::with_resources(vec![QdnMetadata::new(clip.clone(), 4_096, 10)]);
    let h = harness(bridge, FakeGateway::new(), false);

    let resource = h
        .fetcher
        .fetch_individual(&clip, ReturnType::Json, true)
        .await
        .unwrap()
        .ready()
        .unwrap();
    assert_eq!(resource.metadata.as_ref().map(|m| m.size), Some(4_096));
}

#[tokio::test]
async fn test_fetch_rejects_nameless_key() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    let err = h
        .fetcher
        .fetch_individual(&key("", "x"), ReturnType::Json, false)
        .await
        .unwrap_err();
    assert!(err.is_contract_violation());
}

// ---------------------------------------------------------------------------
// Search pages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fetch_resources_pages_past_filtered_items() {
    let mut items = feed("alice", 30, 1_000);
    items[3].size = PLACEHOLDER_SIZE;
    items[3].placeholder = true;
    items[7].size = 6 * 1024 * 1024;
    let bridge = FakeBridge::with_resources(items);
    let h = harness(bridge, FakeGateway::new(), false);

    let mut params = SearchParams::for_service(Service::Video);
    params.limit = 20;
    let page = h
        .fetcher
        .fetch_resources(&params, "feed", ReturnType::Json, FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(page.len(), 20);
    assert!(page.iter().all(|item| !item.is_placeholder() && item.size < 5 * 1024 * 1024));

    let calls = h.bridge.search_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].limit, 20);
    assert_eq!(calls[1].limit, 2);
    assert_eq!(calls[1].before, Some(981));

    let cached = h
        .fetcher
        .fetch_resources(&params, "feed", ReturnType::Json, FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(cached, page);
    assert_eq!(h.bridge.search_calls().len(), 2);
    assert!(!h.fetcher.cache().is_list_expired("feed"));
}

#[tokio::test]
async fn test_search_cache_expires_with_clock() {
    let bridge = FakeBridge::with_resources(feed("alice", 5, 100));
    let h = harness(bridge, FakeGateway::new(), false);
    let mut params = SearchParams::for_service(Service::Video);
    params.limit = 5;

    h.fetcher
        .fetch_resources(&params, "feed", ReturnType::Json, FetchOptions::default())
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(5 * 60 + 1));
    assert!(h.fetcher.cache().is_list_expired("feed"));

    h.fetcher
        .fetch_resources(&params, "feed", ReturnType::Json, FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(h.bridge.search_calls().len(), 2);
}

#[tokio::test]
async fn test_unlimited_search_is_single_pass() {
    let bridge = FakeBridge::with_resources(feed("alice", 45, 1_000));
    let h = harness(bridge, FakeGateway::new(), false);

    let params = SearchParams::for_service(Service::Video);
    let page = h
        .fetcher
        .fetch_resources(&params, "all", ReturnType::Json, FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(page.len(), 45);
    assert_eq!(h.bridge.search_calls().len(), 1);
}

#[tokio::test]
async fn test_duplicate_identifiers_filtered_across_names() {
    let mut items = feed("alice", 4, 1_000);
    items.push(QdnMetadata::new(key("mallory", "alice-01"), 2_048, 1_500));
    let bridge = FakeBridge::with_resources(items);
    let h = harness(bridge, FakeGateway::new(), false);

    let mut params = SearchParams::for_service(Service::Video);
    params.limit = 10;
    let existing: HashSet<String> = ["alice-03".to_string()].into_iter().collect();
    let page = h
        .fetcher
        .fetch_resources(
            &params,
            "dedup",
            ReturnType::Json,
            FetchOptions::default().with_duplicate_filter(existing),
        )
        .await
        .unwrap();

    let ids: Vec<(&str, &str)> = page
        .iter()
        .map(|m| (m.name.as_str(), m.identifier.as_str()))
        .collect();
    assert_eq!(
        ids,
        vec![("mallory", "alice-01"), ("alice", "alice-00"), ("alice", "alice-02")]
    );
}

#[tokio::test]
async fn test_search_failure_propagates() {
    let bridge = Arc::new(FakeBridge::default());
    *bridge.fail_search.lock() = true;
    let h = harness(bridge, FakeGateway::new(), false);

    let err = h
        .fetcher
        .fetch_resources(
            &SearchParams::for_service(Service::Video),
            "feed",
            ReturnType::Json,
            FetchOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ResourceError::Bridge(_)));
    assert!(h.fetcher.cache().is_list_expired("feed"));
}

#[tokio::test]
async fn test_search_results_warm_the_resource_cache() {
    let bridge = FakeBridge::with_resources(feed("alice", 3, 100));
    let h = harness(bridge, FakeGateway::new(), true);

    let mut params = SearchParams::for_service(Service::Video);
    params.limit = 3;
    let page = h
        .fetcher
        .fetch_resources(&params, "feed", ReturnType::Json, FetchOptions::default())
        .await
        .unwrap();

    for _ in 0..50 {
        if h.http.requests() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    for item in &page {
        let cached = h.fetcher.cache().get_resource(&item.key(), false);
        assert!(matches!(cached, Some(core_resource::CacheValue::Present(_))));
    }
}

#[tokio::test]
async fn test_preloaded_list_is_sliced_not_searched() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    let mut list = feed("alice", 10, 100);
    list[4].size = PLACEHOLDER_SIZE;
    list[4].placeholder = true;

    let mut params = SearchParams::default();
    params.offset = Some(3);
    params.limit = 4;
    let page = h
        .fetcher
        .fetch_preloaded_resources(&params, &list, "playlist", ReturnType::Json);

    let ids: Vec<&str> = page.iter().map(|m| m.identifier.as_str()).collect();
    assert_eq!(ids, vec!["alice-03", "alice-05", "alice-06"]);
    assert!(h.bridge.search_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Weighted sources
// ---------------------------------------------------------------------------

fn source(name: &str, priority: u32) -> PrioritySource {
    let mut params = SearchParams::for_service(Service::Video);
    params.names = vec![name.to_string()];
    PrioritySource {
        key: name.to_string(),
        priority,
        query: SourceQuery::Search(params),
    }
}

fn priority_request(load_more: bool) -> PriorityRequest {
    PriorityRequest {
        list_name: "home".to_string(),
        target_limit: 20,
        sources: vec![source("alice", 3), source("bob", 1)],
        filter_duplicate_identifiers: false,
        existing_identifiers: HashSet::new(),
        load_more,
        return_type: ReturnType::Json,
    }
}

#[tokio::test]
async fn test_priority_merge_is_weighted_and_unique() {
    let mut items = feed("alice", 40, 10_000);
    items.extend(feed("bob", 40, 10_000));
    let h = harness(FakeBridge::with_resources(items), FakeGateway::new(), false);

    let page = h
        .fetcher
        .fetch_resources_with_priority(&priority_request(false))
        .await
        .unwrap();

    assert_eq!(page.items.len(), 20);
    assert!(!page.exhausted);
    let from_alice = page.items.iter().filter(|m| m.name == "alice").count();
    let from_bob = page.items.iter().filter(|m| m.name == "bob").count();
    assert_eq!((from_alice, from_bob), (15, 5));

    let keys: HashSet<ResourceKey> = page.items.iter().map(QdnMetadata::key).collect();
    assert_eq!(keys.len(), page.items.len());
}

#[tokio::test]
async fn test_priority_load_more_continues_each_source() {
    let mut items = feed("alice", 40, 10_000);
    items.extend(feed("bob", 40, 10_000));
    let h = harness(FakeBridge::with_resources(items), FakeGateway::new(), false);

    let first = h
        .fetcher
        .fetch_resources_with_priority(&priority_request(false))
        .await
        .unwrap();
    let second = h
        .fetcher
        .fetch_resources_with_priority(&priority_request(true))
        .await
        .unwrap();

    let calls = h.bridge.search_calls();
    let alice_second = calls
        .iter()
        .rev()
        .find(|p| p.names == vec!["alice".to_string()])
        .unwrap();
    let bob_second = calls
        .iter()
        .rev()
        .find(|p| p.names == vec!["bob".to_string()])
        .unwrap();
    // alice used 10_000..=9_986, bob 10_000..=9_996
    assert_eq!(alice_second.before, Some(9_986));
    assert_eq!(bob_second.before, Some(9_996));

    let first_keys: HashSet<ResourceKey> = first.items.iter().map(QdnMetadata::key).collect();
    assert!(second.items.iter().all(|m| !first_keys.contains(&m.key())));
}

#[tokio::test]
async fn test_priority_reports_exhaustion() {
    let mut items = feed("alice", 3, 100);
    items.extend(feed("bob", 2, 100));
    let h = harness(FakeBridge::with_resources(items), FakeGateway::new(), false);

    let page = h
        .fetcher
        .fetch_resources_with_priority(&priority_request(false))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert!(page.exhausted);

    let next = h
        .fetcher
        .fetch_resources_with_priority(&priority_request(true))
        .await
        .unwrap();
    assert!(next.items.is_empty());
    assert!(next.exhausted);
}

#[tokio::test]
async fn test_priority_rejects_zero_weight() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    let mut request = priority_request(false);
    request.sources[1].priority = 0;

    let err = h
        .fetcher
        .fetch_resources_with_priority(&request)
        .await
        .unwrap_err();
    assert!(err.is_contract_violation());
    assert!(h.bridge.search_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_publishes_placeholders_and_tombstones() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    let keys = vec![key("alice", "a"), key("alice", "b")];

    h.fetcher.delete_resources(&keys).await.unwrap();

    let published = h.bridge.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].len(), 2);
    assert!(published[0].iter().all(|r| r.data64.is_empty()));

    let listed = vec![
        QdnMetadata::new(key("alice", "a"), 10, 3),
        QdnMetadata::new(key("alice", "c"), 10, 2),
    ];
    let visible = h.fetcher.cache().render_list("feed", listed);
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].identifier, "c");
}

#[tokio::test]
async fn test_failed_delete_writes_no_tombstones() {
    let bridge = Arc::new(FakeBridge::default());
    *bridge.fail_publish.lock() = true;
    let h = harness(bridge, FakeGateway::new(), false);
    let keys = vec![key("alice", "a")];

    assert!(h.fetcher.delete_resources(&keys).await.is_err());
    assert!(!h.fetcher.cache().is_deleted(&keys[0]));
}

#[tokio::test]
async fn test_delete_validates_before_publishing() {
    let h = harness(Arc::new(FakeBridge::default()), FakeGateway::new(), false);
    let keys = vec![key("alice", "a"), key("alice", "")];

    let err = h.fetcher.delete_resources(&keys).await.unwrap_err();
    assert!(err.is_contract_violation());
    assert!(h.bridge.published.lock().is_empty());
    assert!(!h.fetcher.cache().is_deleted(&keys[0]));
}
