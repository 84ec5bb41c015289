//! Visit recorder integration tests
//!
//! These tests run the recorder against in-memory SQLite storage and check the
//! tracking rules, visitor reuse across a session and new-visitor events.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visitrack::config::TrackerConfig;
use visitrack::device::WootheeParser;
use visitrack::events::{NewVisitorEvent, VisitorEventSink};
use visitrack::models::{NewVisit, VisitRecord, Visitor, VisitorUpsert};
use visitrack::session::{
    MemorySessionStore, SessionContext, SessionError, SessionResult, SessionStore,
};
use visitrack::storage::{CachedStorage, SqliteStorage, Storage, StorageError, StorageResult};
use visitrack::{RecordOutcome, RequestInfo, SkipReason, TrackerError, VisitRecorder};

const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";

/// Sink remembering each event together with the number of stored visitors
/// at the moment it was dispatched.
struct RecordingSink {
    storage: Arc<dyn Storage>,
    events: Mutex<Vec<(NewVisitorEvent, i64)>>,
}

impl RecordingSink {
    fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            events: Mutex::new(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn events(&self) -> Vec<(NewVisitorEvent, i64)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisitorEventSink for RecordingSink {
    async fn new_visitor(&self, event: NewVisitorEvent) {
        let stored = self.storage.count_visitors().await.unwrap();
        self.events.lock().unwrap().push((event, stored));
    }
}

/// Storage whose writes always fail.
struct FailingStorage;

#[async_trait]
impl Storage for FailingStorage {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn find_visitor(&self, _id: i64) -> StorageResult<Option<Visitor>> {
        Ok(None)
    }

    async fn find_visitor_by_unique_id(&self, _unique_id: &str) -> StorageResult<Option<Visitor>> {
        Ok(None)
    }

    async fn record_visit(
        &self,
        _visitor: &VisitorUpsert,
        _visit: &NewVisit,
    ) -> StorageResult<(Visitor, VisitRecord)> {
        Err(StorageError::Other(anyhow::anyhow!("database unavailable")))
    }

    async fn list_visits(&self, _visitor_id: i64, _limit: i64) -> StorageResult<Vec<VisitRecord>> {
        Ok(Vec::new())
    }

    async fn count_visitors(&self) -> StorageResult<i64> {
        Ok(0)
    }

    async fn count_visits(&self) -> StorageResult<i64> {
        Ok(0)
    }
}

/// Session store that can be read but rejects writes.
struct ReadOnlySessionStore;

#[async_trait]
impl SessionStore for ReadOnlySessionStore {
    async fn get(&self, _session_id: &str, _key: &str) -> SessionResult<Option<String>> {
        Ok(None)
    }

    async fn put(&self, _session_id: &str, _key: &str, _value: String) -> SessionResult<()> {
        Err(SessionError::Other(anyhow::anyhow!("session backend is read-only")))
    }
}

struct Harness {
    storage: Arc<dyn Storage>,
    sink: Arc<RecordingSink>,
    sessions: Arc<dyn SessionStore>,
    recorder: VisitRecorder,
}

impl Harness {
    async fn new(config: TrackerConfig) -> Self {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(sqlite);

        let sink = Arc::new(RecordingSink::new(Arc::clone(&storage)));
        let recorder = VisitRecorder::new(
            config,
            Arc::clone(&storage),
            Arc::new(WootheeParser::new()),
            sink.clone(),
        );

        Self {
            storage,
            sink,
            sessions: Arc::new(MemorySessionStore::new(100, Duration::from_secs(60))),
            recorder,
        }
    }

    fn session(&self, id: &str) -> SessionContext {
        SessionContext::new(Arc::clone(&self.sessions), id)
    }

    async fn counts(&self) -> (i64, i64) {
        (
            self.storage.count_visitors().await.unwrap(),
            self.storage.count_visits().await.unwrap(),
        )
    }
}

fn config() -> TrackerConfig {
    TrackerConfig {
        skip_routes: vec!["api.health".to_string()],
        allowed_methods: vec!["GET".to_string(), "POST".to_string()],
        track_authenticated_visitors: true,
        track_unauthenticated_visitors: true,
        ..Default::default()
    }
}

fn home_request() -> RequestInfo {
    RequestInfo::new("GET", "/")
        .with_route("home")
        .with_ip("198.51.100.10")
        .with_host("example.com")
        .with_user_agent(FIREFOX)
}

#[tokio::test]
async fn test_skip_route_writes_nothing() {
    let harness = Harness::new(config()).await;
    let session = harness.session("s1");

    let request = RequestInfo::new("GET", "/api/health")
        .with_route("api.health")
        .with_ip("198.51.100.10");
    let outcome = harness.recorder.record_visit(&request, &session).await.unwrap();

    assert!(!outcome.is_recorded());
    assert!(matches!(outcome, RecordOutcome::Skipped(SkipReason::Route)));
    assert_eq!(harness.counts().await, (0, 0));
    assert_eq!(harness.sink.len(), 0);
    assert_eq!(session.visitor_id().await.unwrap(), None);
}

#[tokio::test]
async fn test_disallowed_method_is_skipped() {
    let harness = Harness::new(config()).await;

    for request in [
        RequestInfo::new("DELETE", "/").with_route("home"),
        RequestInfo::new("PUT", "/").with_route("home").with_user(3),
        RequestInfo::new("PATCH", "/anything"),
    ] {
        let outcome = harness
            .recorder
            .record_visit(&request, &harness.session("s1"))
            .await
            .unwrap();
        assert!(matches!(outcome, RecordOutcome::Skipped(SkipReason::Method)));
    }

    assert_eq!(harness.counts().await, (0, 0));
}

#[tokio::test]
async fn test_authenticated_tracking_disabled() {
    let mut config = config();
    config.track_authenticated_visitors = false;
    let harness = Harness::new(config).await;

    let outcome = harness
        .recorder
        .record_visit(&home_request().with_user(5), &harness.session("s1"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RecordOutcome::Skipped(SkipReason::Authenticated)
    ));

    // Anonymous traffic is still recorded
    let outcome = harness
        .recorder
        .record_visit(&home_request(), &harness.session("s2"))
        .await
        .unwrap();
    assert!(outcome.is_recorded());
    assert_eq!(harness.counts().await, (1, 1));
}

#[tokio::test]
async fn test_unauthenticated_tracking_disabled() {
    let mut config = config();
    config.track_unauthenticated_visitors = false;
    let harness = Harness::new(config).await;

    let outcome = harness
        .recorder
        .record_visit(&home_request(), &harness.session("s1"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RecordOutcome::Skipped(SkipReason::Unauthenticated)
    ));
    assert_eq!(harness.counts().await, (0, 0));

    let outcome = harness
        .recorder
        .record_visit(&home_request().with_user(5), &harness.session("s2"))
        .await
        .unwrap();
    assert_eq!(outcome.recorded().unwrap().visitor.user_id, Some(5));
}

#[tokio::test]
async fn test_first_visit_creates_visitor_and_visit() {
    let harness = Harness::new(config()).await;
    let session = harness.session("s1");

    let request = home_request()
        .with_referer("https://search.example/?q=visits")
        .secure(true);
    let outcome = harness.recorder.record_visit(&request, &session).await.unwrap();

    let recorded = outcome.recorded().expect("visit should be recorded");
    assert!(recorded.new_visitor);

    let visitor = &recorded.visitor;
    assert_eq!(visitor.user_id, None);
    assert_eq!(visitor.ip, "198.51.100.10");
    assert_eq!(visitor.user_agent.as_deref(), Some(FIREFOX));
    assert!(visitor.is_desktop);
    assert!(!visitor.is_mobile);
    assert!(!visitor.is_bot);
    assert_eq!(visitor.browser, "Firefox");
    assert_eq!(visitor.unique_id.len(), 32);
    // Location and language columns are not collected by default
    assert_eq!(visitor.country, "");
    assert_eq!(visitor.city, "");
    assert_eq!(visitor.lat, None);
    assert_eq!(visitor.browser_language, "");

    let visit = &recorded.visit;
    assert_eq!(visit.visitor_id, visitor.id);
    assert_eq!(visit.route.as_deref(), Some("home"));
    assert_eq!(visit.method, "GET");
    assert_eq!(visit.domain, "example.com");
    assert_eq!(visit.path, "/");
    assert_eq!(visit.referer.as_deref(), Some("https://search.example/?q=visits"));
    assert!(visit.is_secure);
    assert!(!visit.is_ajax);

    assert_eq!(harness.counts().await, (1, 1));
    assert_eq!(session.visitor_id().await.unwrap(), Some(visitor.id));

    let stored = harness.storage.list_visits(visitor.id, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].route.as_deref(), Some("home"));
    assert_eq!(stored[0].method, "GET");
}

#[tokio::test]
async fn test_new_visitor_event_fires_before_persistence() {
    let harness = Harness::new(config()).await;

    let outcome = harness
        .recorder
        .record_visit(&home_request(), &harness.session("s1"))
        .await
        .unwrap();
    let visitor = &outcome.recorded().unwrap().visitor;

    let events = harness.sink.events();
    assert_eq!(events.len(), 1);

    let (event, visitors_at_dispatch) = &events[0];
    assert_eq!(*visitors_at_dispatch, 0);
    assert_eq!(event.unique_id, visitor.unique_id);
    assert_eq!(event.attributes.ip, "198.51.100.10");
}

#[tokio::test]
async fn test_second_visit_updates_same_visitor() {
    let harness = Harness::new(config()).await;
    let session = harness.session("s1");

    let first = harness
        .recorder
        .record_visit(&home_request(), &session)
        .await
        .unwrap();
    let first = first.recorded().unwrap().clone();

    let second_request = RequestInfo::new("POST", "/contact/")
        .with_route("contact")
        .with_ip("203.0.113.99")
        .with_host("example.com")
        .with_user_agent(IPHONE)
        .ajax(true);
    let second = harness
        .recorder
        .record_visit(&second_request, &session)
        .await
        .unwrap();
    let second = second.recorded().unwrap();

    assert!(!second.new_visitor);
    assert_eq!(second.visitor.id, first.visitor.id);
    assert_eq!(second.visitor.unique_id, first.visitor.unique_id);
    assert_eq!(second.visitor.ip, "203.0.113.99");
    assert!(second.visitor.is_mobile);
    assert!(!second.visitor.is_desktop);
    assert_eq!(second.visitor.browser, "Safari");

    assert_eq!(second.visit.visitor_id, first.visitor.id);
    assert_eq!(second.visit.method, "POST");
    assert_eq!(second.visit.path, "contact");
    assert!(second.visit.is_ajax);

    assert_eq!(harness.counts().await, (1, 2));
    assert_eq!(harness.sink.len(), 1);
}

#[tokio::test]
async fn test_separate_sessions_get_separate_visitors() {
    let harness = Harness::new(config()).await;

    let a = harness
        .recorder
        .record_visit(&home_request(), &harness.session("a"))
        .await
        .unwrap();
    let b = harness
        .recorder
        .record_visit(&home_request(), &harness.session("b"))
        .await
        .unwrap();

    let a = &a.recorded().unwrap().visitor;
    let b = &b.recorded().unwrap().visitor;
    assert_ne!(a.id, b.id);
    assert_ne!(a.unique_id, b.unique_id);
    assert_eq!(harness.counts().await, (2, 2));
    assert_eq!(harness.sink.len(), 2);
}

#[tokio::test]
async fn test_events_not_dispatched_when_disabled() {
    let mut config = config();
    config.events.dispatch = false;
    let harness = Harness::new(config).await;

    let outcome = harness
        .recorder
        .record_visit(&home_request(), &harness.session("s1"))
        .await
        .unwrap();

    assert!(outcome.recorded().unwrap().new_visitor);
    assert_eq!(harness.sink.len(), 0);
}

#[tokio::test]
async fn test_session_with_missing_visitor_starts_over() {
    let harness = Harness::new(config()).await;
    let session = harness.session("stale");
    session.set_visitor_id(999).await.unwrap();

    let outcome = harness
        .recorder
        .record_visit(&home_request(), &session)
        .await
        .unwrap();
    let recorded = outcome.recorded().unwrap();

    assert!(recorded.new_visitor);
    assert_ne!(recorded.visitor.id, 999);
    assert_eq!(session.visitor_id().await.unwrap(), Some(recorded.visitor.id));
    assert_eq!(harness.sink.len(), 1);
}

#[tokio::test]
async fn test_storage_failure_is_an_error() {
    let sessions: Arc<dyn SessionStore> =
        Arc::new(MemorySessionStore::new(10, Duration::from_secs(60)));
    let recorder = VisitRecorder::new(
        config(),
        Arc::new(FailingStorage),
        Arc::new(WootheeParser::new()),
        Arc::new(visitrack::events::NoopEventSink),
    );
    let session = SessionContext::new(sessions, "s1");

    let result = recorder.record_visit(&home_request(), &session).await;

    assert!(matches!(result, Err(TrackerError::Storage(_))));
    assert_eq!(session.visitor_id().await.unwrap(), None);
}

#[tokio::test]
async fn test_skips_do_not_touch_failing_storage() {
    let sessions: Arc<dyn SessionStore> =
        Arc::new(MemorySessionStore::new(10, Duration::from_secs(60)));
    let recorder = VisitRecorder::new(
        config(),
        Arc::new(FailingStorage),
        Arc::new(WootheeParser::new()),
        Arc::new(visitrack::events::NoopEventSink),
    );
    let session = SessionContext::new(sessions, "s1");

    let request = RequestInfo::new("GET", "/api/health").with_route("api.health");
    let outcome = recorder.record_visit(&request, &session).await.unwrap();
    assert!(!outcome.is_recorded());
}

#[tokio::test]
async fn test_session_write_failure_keeps_recorded_visit() {
    let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    sqlite.init().await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(sqlite);

    let recorder = VisitRecorder::new(
        config(),
        Arc::clone(&storage),
        Arc::new(WootheeParser::new()),
        Arc::new(visitrack::events::NoopEventSink),
    );
    let session = SessionContext::new(Arc::new(ReadOnlySessionStore), "s1");

    let outcome = recorder.record_visit(&home_request(), &session).await.unwrap();

    assert!(outcome.is_recorded());
    assert_eq!(storage.count_visitors().await.unwrap(), 1);
    assert_eq!(storage.count_visits().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cached_visitor_deleted_out_of_band_starts_over() {
    let sqlite = Arc::new(SqliteStorage::new("sqlite::memory:", 1).await.unwrap());
    sqlite.init().await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        sqlite.clone(),
        100,
        Duration::from_secs(60),
    ));

    let sink = Arc::new(RecordingSink::new(Arc::clone(&storage)));
    let recorder = VisitRecorder::new(
        config(),
        Arc::clone(&storage),
        Arc::new(WootheeParser::new()),
        sink.clone(),
    );
    let sessions: Arc<dyn SessionStore> =
        Arc::new(MemorySessionStore::new(10, Duration::from_secs(60)));
    let session = SessionContext::new(sessions, "s1");

    let first = recorder.record_visit(&home_request(), &session).await.unwrap();
    let first_id = first.recorded().unwrap().visitor.id;

    // Remove the rows behind the cache's back
    sqlx::query("DELETE FROM visitor_requests")
        .execute(sqlite.pool())
        .await
        .unwrap();
    sqlx::query("DELETE FROM visitors")
        .execute(sqlite.pool())
        .await
        .unwrap();
    assert!(storage.find_visitor(first_id).await.unwrap().is_some());

    let second = recorder.record_visit(&home_request(), &session).await.unwrap();
    let second = second.recorded().unwrap();

    assert!(second.new_visitor);
    assert_ne!(second.visitor.id, first_id);
    assert_eq!(session.visitor_id().await.unwrap(), Some(second.visitor.id));
    assert_eq!(sink.len(), 2);
    assert_eq!(storage.count_visitors().await.unwrap(), 1);
    assert_eq!(storage.count_visits().await.unwrap(), 1);
}
