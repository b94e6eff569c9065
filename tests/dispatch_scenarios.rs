//! End-to-end dispatch scenarios over the in-memory stores.
//!
//! Tickers are driven by calling `tick` with explicit instants, so every
//! scenario runs on a fixed clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use u_dispatch::config::DispatchConfig;
use u_dispatch::engine::DispatchEngine;
use u_dispatch::error::DispatchError;
use u_dispatch::models::{
    CandidateCriteria, Credential, GeoPoint, JobRequest, JobStatus, NewJobRequest,
    NotificationKind, Provider, ProviderId, WeeklySchedule,
};
use u_dispatch::notify::{Notifier, RecordingSink};
use u_dispatch::store::memory::{InMemoryJobStore, InMemoryProviderStore};
use u_dispatch::store::{JobStore, ProviderStore};
use u_dispatch::tickers::{TickReport, Ticker};

const METERS_PER_DEGREE: f64 = 6_371_008.8 * std::f64::consts::PI / 180.0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
}

fn minutes(m: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(m)
}

/// An online plumber; a smaller `idle_minutes` ranks higher.
fn plumber(id: &str, idle_minutes: i64) -> Provider {
    Provider::new(id)
        .with_skill("plumbing")
        .with_primary_document(Credential::permanent())
        .online_since(t0() - Duration::hours(1))
        .with_last_activity(t0() - Duration::minutes(idle_minutes))
}

/// A point `meters` due north of the origin.
fn north_of_origin(meters: f64) -> GeoPoint {
    GeoPoint::new(0.0, meters / METERS_PER_DEGREE)
}

struct Harness {
    engine: DispatchEngine,
    providers: Arc<InMemoryProviderStore>,
    jobs: Arc<InMemoryJobStore>,
    sink: Arc<RecordingSink>,
    tickers: Vec<Arc<dyn Ticker>>,
}

impl Harness {
    fn new(providers: Vec<Provider>) -> Self {
        init_tracing();
        let providers = Arc::new(InMemoryProviderStore::with_providers(providers));
        let jobs = Arc::new(InMemoryJobStore::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = DispatchEngine::new(
            DispatchConfig::default(),
            providers.clone(),
            jobs.clone(),
            Notifier::uniform(sink.clone()),
        )
        .unwrap();
        let tickers = engine.tickers();
        Self {
            engine,
            providers,
            jobs,
            sink,
            tickers,
        }
    }

    async fn tick(&self, name: &str, now: DateTime<Utc>) -> TickReport {
        let ticker = self
            .tickers
            .iter()
            .find(|t| t.name() == name)
            .unwrap();
        ticker.tick(now).await.unwrap()
    }

    async fn provider(&self, id: &str) -> Provider {
        self.providers.get(&ProviderId::new(id)).await.unwrap().unwrap()
    }

    async fn job(&self, job: &JobRequest) -> JobRequest {
        self.jobs.get(&job.id).await.unwrap().unwrap()
    }

    async fn request(&self, now: DateTime<Utc>) -> JobRequest {
        self.engine
            .orchestrator()
            .create_immediate(NewJobRequest::new("C1", "plumbing"), now)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_unanswered_request_falls_back_then_expires() {
    let h = Harness::new(vec![plumber("P1", 1), plumber("P2", 2)]);
    let job = h.request(t0()).await;
    assert_eq!(job.current_provider.as_str(), "P1");

    // Not due yet.
    let report = h.tick("dispatch", minutes(4)).await;
    assert_eq!(report.changed, 0);

    h.tick("dispatch", minutes(5)).await;
    let stored = h.job(&job).await;
    assert_eq!(stored.current_provider.as_str(), "P2");
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(h.provider("P1").await.late_marks, 1);
    assert!(!h.provider("P1").await.reachable);

    // P1 is excluded and nobody else is left: the request waits.
    h.tick("dispatch", minutes(10)).await;
    let stored = h.job(&job).await;
    assert_eq!(stored.current_provider.as_str(), "P2");
    assert_eq!(stored.fallback_count(), 1);

    h.tick("dispatch", minutes(15)).await;
    let stored = h.job(&job).await;
    assert_eq!(stored.status, JobStatus::Canceled);
    assert_eq!(stored.offer.unwrap().expired_at, Some(minutes(15)));
    assert_eq!(h.sink.notifications_of(NotificationKind::RequestExpired).len(), 1);
    assert_eq!(h.sink.notifications_of(NotificationKind::OfferReassigned).len(), 1);
    // Expiry itself is not a penalty.
    assert_eq!(h.provider("P2").await.late_marks, 0);
}

#[tokio::test]
async fn test_rerunning_dispatch_after_cancel_is_noop() {
    let h = Harness::new(vec![plumber("P1", 1)]);
    let job = h.request(t0()).await;

    let first = h.tick("dispatch", minutes(16)).await;
    assert_eq!(first.changed, 1);
    let canceled = h.job(&job).await;

    let second = h.tick("dispatch", minutes(17)).await;
    assert_eq!(second.changed, 0);
    assert_eq!(h.job(&job).await, canceled);
    assert_eq!(h.sink.notifications_of(NotificationKind::RequestExpired).len(), 1);
}

#[tokio::test]
async fn test_offered_providers_only_grow() {
    let h = Harness::new(vec![
        plumber("P1", 1),
        plumber("P2", 2),
        plumber("P3", 3),
        plumber("P4", 4),
    ]);
    let job = h.request(t0()).await;
    let expires_at = job.offer.as_ref().unwrap().expires_at;

    let mut previous = job.offer.clone().unwrap();
    for (step, at) in [(1u32, 5), (2, 10)] {
        h.tick("dispatch", minutes(at)).await;
        let offer = h.job(&job).await.offer.unwrap();

        assert!(offer.offered_providers.starts_with(&previous.offered_providers));
        assert_eq!(offer.offered_providers.len(), previous.offered_providers.len() + 1);
        assert_eq!(offer.fallback_count, step);
        assert_eq!(offer.current_offer_at, minutes(at));
        assert_eq!(offer.expires_at, expires_at);
        previous = offer;
    }

    let ids: Vec<&str> = previous.offered_providers.iter().map(|p| p.as_str()).collect();
    assert_eq!(ids, vec!["P1", "P2", "P3"]);
}

#[tokio::test]
async fn test_third_late_mark_becomes_strike() {
    let h = Harness::new(vec![plumber("P1", 1).with_penalties(2, 0), plumber("P2", 2)]);
    h.request(t0()).await;

    h.tick("dispatch", minutes(5)).await;
    let p1 = h.provider("P1").await;
    assert_eq!(p1.late_marks, 0);
    assert_eq!(p1.strikes, 1);
    assert_eq!(p1.suspended_until, None);
    assert!(h.sink.notifications_of(NotificationKind::Suspended).is_empty());

    // The next scan finds nothing due and leaves the counters alone.
    h.tick("dispatch", minutes(6)).await;
    let p1 = h.provider("P1").await;
    assert_eq!((p1.late_marks, p1.strikes), (0, 1));
}

#[tokio::test]
async fn test_accept_before_fallback_wins() {
    let h = Harness::new(vec![plumber("P1", 1), plumber("P2", 2)]);
    let job = h.request(t0()).await;

    h.engine
        .orchestrator()
        .accept_offer(&job.id, &ProviderId::new("P1"), minutes(4))
        .await
        .unwrap();
    h.tick("dispatch", minutes(5)).await;

    let stored = h.job(&job).await;
    assert_eq!(stored.status, JobStatus::Accepted);
    assert_eq!(stored.current_provider.as_str(), "P1");
    assert_eq!(h.provider("P1").await.late_marks, 0);

    // The displaced candidate cannot take it afterwards.
    let err = h
        .engine
        .orchestrator()
        .accept_offer(&job.id, &ProviderId::new("P2"), minutes(6))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_radius_filter_and_busy_candidates() {
    let h = Harness::new(vec![
        plumber("NEAR", 30).with_location(north_of_origin(1_000.0)),
        plumber("MID", 20).with_location(north_of_origin(4_000.0)),
        plumber("FAR", 1).with_location(north_of_origin(9_000.0)),
    ]);
    let criteria = CandidateCriteria::new().within(GeoPoint::new(0.0, 0.0), 5_000.0);
    let orchestrator = h.engine.orchestrator();
    let request = || NewJobRequest::new("C1", "plumbing").with_criteria(criteria.clone());

    let first = orchestrator.create_immediate(request(), t0()).await.unwrap();
    assert_eq!(first.current_provider.as_str(), "NEAR");

    // NEAR now holds a request for the same slot.
    let second = orchestrator.create_immediate(request(), t0()).await.unwrap();
    assert_eq!(second.current_provider.as_str(), "MID");

    let err = orchestrator.create_immediate(request(), t0()).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoCandidateAvailable { .. }));
}

#[tokio::test]
async fn test_provider_on_a_job_is_busy_for_later_requests() {
    let h = Harness::new(vec![plumber("P1", 1), plumber("P2", 2)]);
    let first = h.request(t0()).await;
    assert_eq!(first.current_provider.as_str(), "P1");
    h.engine
        .orchestrator()
        .accept_offer(&first.id, &ProviderId::new("P1"), t0() + Duration::seconds(10))
        .await
        .unwrap();

    let second = h.request(t0() + Duration::seconds(30)).await;
    assert_eq!(second.current_provider.as_str(), "P2");

    // Pending offers occupy the slot too.
    let err = h
        .engine
        .orchestrator()
        .create_immediate(NewJobRequest::new("C2", "plumbing"), minutes(2))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoCandidateAvailable { .. }));
}

#[tokio::test]
async fn test_suspended_provider_cannot_go_online() {
    let until = t0() + Duration::hours(1);
    let h = Harness::new(vec![plumber("P1", 1).with_suspension(until)]);
    let id = ProviderId::new("P1");
    let availability = h.engine.availability();

    availability.set_availability(&id, false, t0()).await.unwrap();
    let err = availability
        .set_availability(&id, true, t0() + Duration::minutes(30))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Suspended { .. }));
    assert!(!h.provider("P1").await.reachable);

    // Lapsed suspensions need no lifting.
    let p1 = availability
        .set_availability(&id, true, until + Duration::minutes(1))
        .await
        .unwrap();
    assert!(p1.reachable);
}

#[tokio::test]
async fn test_schedule_window_protects_from_inactivity() {
    let evening = Utc.with_ymd_and_hms(2024, 3, 4, 18, 0, 0).unwrap();
    let shift = Provider::new("SHIFT")
        .with_skill("plumbing")
        .with_schedule(WeeklySchedule::every_day("18:00", "23:00"));
    let idle = plumber("IDLE", 30);
    let h = Harness::new(vec![shift, idle]);

    h.tick("schedule", evening - Duration::minutes(1)).await;
    assert!(!h.provider("SHIFT").await.reachable);
    h.tick("schedule", evening).await;
    assert!(h.provider("SHIFT").await.reachable);

    // Two silent hours inside the window.
    let report = h.tick("inactivity", evening + Duration::hours(2)).await;
    assert!(h.provider("SHIFT").await.reachable);
    assert!(!h.provider("IDLE").await.reachable);
    assert_eq!(report.changed, 1);

    // Window end flips it off; the minute after does nothing more.
    h.tick("schedule", evening + Duration::hours(5)).await;
    assert!(!h.provider("SHIFT").await.reachable);
    let report = h
        .tick("schedule", evening + Duration::hours(5) + Duration::minutes(1))
        .await;
    assert_eq!(report.changed, 0);
}

#[tokio::test]
async fn test_heartbeat_keeps_manual_provider_online() {
    let h = Harness::new(vec![plumber("P1", 30)]);
    h.engine
        .availability()
        .record_activity(&ProviderId::new("P1"), t0())
        .await
        .unwrap();

    h.tick("inactivity", t0() + Duration::minutes(5)).await;
    assert!(h.provider("P1").await.reachable);

    h.tick("inactivity", t0() + Duration::minutes(11)).await;
    assert!(!h.provider("P1").await.reachable);
}
