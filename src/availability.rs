//! Availability state machine.
//!
//! A provider's `reachable` flag is driven by three triggers:
//!
//! - **Manual toggle**: the provider's own action. Forces the manual strategy.
//! - **Schedule boundary**: the weekly schedule's verdict, applied only when
//!   the schedule ticker sees a window edge.
//! - **Inactivity timeout**: forces the flag off when heartbeats stop,
//!   except inside an active schedule window.
//!
//! Every write is conditional on the state the decision was made from.
//! Every change of the flag is announced on the live channel.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::models::{
    AvailabilityStrategy, BroadcastTarget, LiveEvent, Notification, NotificationKind,
    OfflineReason, Provider, ProviderId, Recipient, WeeklySchedule,
};
use crate::notify::Notifier;
use crate::store::{CasResult, ProviderGuard, ProviderPatch, ProviderStore};

/// Conditional writes retried by user-driven operations before giving up.
const USER_WRITE_ATTEMPTS: usize = 3;

/// Outcome of a ticker-driven transition on one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The flag flipped.
    Changed,
    /// Nothing to do.
    Unchanged,
    /// The record changed between read and write.
    Raced,
    /// The record no longer exists.
    Gone,
}

impl Transition {
    fn from_cas(result: &CasResult<Provider>) -> Self {
        match result {
            CasResult::Success(_) => Self::Changed,
            CasResult::Mismatch => Self::Raced,
            CasResult::NotFound => Self::Gone,
        }
    }
}

/// Owns transitions of the provider availability flag.
#[derive(Clone)]
pub struct AvailabilityService {
    providers: Arc<dyn ProviderStore>,
    notifier: Notifier,
    tz: Tz,
}

impl AvailabilityService {
    /// Creates the service. Schedules are evaluated in `tz`.
    pub fn new(providers: Arc<dyn ProviderStore>, notifier: Notifier, tz: Tz) -> Self {
        Self {
            providers,
            notifier,
            tz,
        }
    }

    /// Time zone schedules are evaluated in.
    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    async fn load(&self, id: &ProviderId) -> Result<Provider> {
        self.providers
            .get(id)
            .await?
            .ok_or_else(|| DispatchError::ProviderNotFound(id.clone()))
    }

    /// Manual toggle.
    ///
    /// Switches the provider to the manual strategy. Going online while a
    /// suspension is in force is rejected with [`DispatchError::Suspended`].
    pub async fn set_availability(
        &self,
        id: &ProviderId,
        reachable: bool,
        now: DateTime<Utc>,
    ) -> Result<Provider> {
        for _ in 0..USER_WRITE_ATTEMPTS {
            let current = self.load(id).await?;
            if reachable {
                if let Some(until) = current.suspended_until.filter(|u| *u > now) {
                    return Err(DispatchError::Suspended {
                        provider_id: id.clone(),
                        until,
                    });
                }
            }

            let guard = ProviderGuard::any()
                .reachable(current.reachable)
                .strategy(current.strategy);
            let patch = ProviderPatch::availability(reachable, &current, now)
                .with_strategy(AvailabilityStrategy::Manual);

            match self.providers.update_if(id, &guard, &patch).await? {
                CasResult::Success(updated) => {
                    info!(provider_id = %id, reachable, "manual availability set");
                    if current.reachable != reachable {
                        self.announce(id, reachable, now, None).await;
                    }
                    return Ok(updated);
                }
                CasResult::NotFound => return Err(DispatchError::ProviderNotFound(id.clone())),
                CasResult::Mismatch => {
                    debug!(provider_id = %id, "availability toggle raced, retrying");
                }
            }
        }
        Err(DispatchError::PreconditionFailed(format!(
            "provider {id} kept changing during availability toggle"
        )))
    }

    /// Records a heartbeat.
    pub async fn record_activity(&self, id: &ProviderId, now: DateTime<Utc>) -> Result<()> {
        let patch = ProviderPatch {
            last_activity_at: Some(now),
            ..ProviderPatch::default()
        };
        match self.providers.update_if(id, &ProviderGuard::any(), &patch).await? {
            CasResult::NotFound => Err(DispatchError::ProviderNotFound(id.clone())),
            _ => Ok(()),
        }
    }

    /// Enrols the provider in schedule-driven availability.
    ///
    /// The enrolment instant counts as a boundary: the schedule's current
    /// verdict is applied right away (never online while suspended).
    pub async fn set_schedule(
        &self,
        id: &ProviderId,
        schedule: WeeklySchedule,
        now: DateTime<Utc>,
    ) -> Result<Provider> {
        if !schedule.has_valid_windows() {
            return Err(DispatchError::InvalidSchedule(format!(
                "schedule for provider {id} has no usable window"
            )));
        }
        let verdict = schedule.is_active_at(now, self.tz);

        for _ in 0..USER_WRITE_ATTEMPTS {
            let current = self.load(id).await?;
            let reachable = verdict && !current.is_suspended_at(now);
            let guard = ProviderGuard::any()
                .reachable(current.reachable)
                .strategy(current.strategy);
            let patch = ProviderPatch {
                schedule: Some(schedule.clone()),
                ..ProviderPatch::availability(reachable, &current, now)
                    .with_strategy(AvailabilityStrategy::Scheduled)
            };

            match self.providers.update_if(id, &guard, &patch).await? {
                CasResult::Success(updated) => {
                    info!(provider_id = %id, reachable, "schedule enrolled");
                    if current.reachable != reachable {
                        self.announce(id, reachable, now, None).await;
                    }
                    return Ok(updated);
                }
                CasResult::NotFound => return Err(DispatchError::ProviderNotFound(id.clone())),
                CasResult::Mismatch => {
                    debug!(provider_id = %id, "schedule enrolment raced, retrying");
                }
            }
        }
        Err(DispatchError::PreconditionFailed(format!(
            "provider {id} kept changing during schedule enrolment"
        )))
    }

    /// Applies the schedule's verdict at a window boundary.
    ///
    /// The caller decides that `now` is a boundary. Only flips when the
    /// verdict differs from the stored flag, and never turns a suspended
    /// provider on.
    pub async fn apply_schedule_boundary(
        &self,
        provider: &Provider,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        if provider.strategy != AvailabilityStrategy::Scheduled {
            return Ok(Transition::Unchanged);
        }
        let verdict = provider.schedule.is_active_at(now, self.tz);
        if verdict == provider.reachable || (verdict && provider.is_suspended_at(now)) {
            return Ok(Transition::Unchanged);
        }

        let guard = ProviderGuard::any().availability_of(provider);
        let patch = ProviderPatch::availability(verdict, provider, now);
        let result = self.providers.update_if(&provider.id, &guard, &patch).await?;
        let transition = Transition::from_cas(&result);

        if transition == Transition::Changed {
            info!(provider_id = %provider.id, reachable = verdict, "schedule boundary applied");
            let reason = (!verdict).then_some(OfflineReason::ScheduleBoundary);
            self.announce(&provider.id, verdict, now, reason).await;
        }
        Ok(transition)
    }

    /// Forces an idle provider offline and tells them why.
    ///
    /// Skipped while the provider is schedule-driven and inside a window.
    /// The write is guarded on the snapshot's availability and last
    /// heartbeat, so a heartbeat or re-toggle since the read wins.
    pub async fn expire_inactive(
        &self,
        provider: &Provider,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Transition> {
        if !provider.reachable || provider.reachable_since.is_none() {
            return Ok(Transition::Unchanged);
        }
        if provider.strategy == AvailabilityStrategy::Scheduled
            && provider.schedule.is_active_at(now, self.tz)
        {
            return Ok(Transition::Unchanged);
        }
        let idle = provider
            .effective_last_activity()
            .map_or(true, |last| last < now - threshold);
        if !idle {
            return Ok(Transition::Unchanged);
        }

        let guard = ProviderGuard::any()
            .availability_of(provider)
            .activity_of(provider);
        let patch = ProviderPatch::availability(false, provider, now);
        let result = self.providers.update_if(&provider.id, &guard, &patch).await?;
        let transition = Transition::from_cas(&result);

        if transition == Transition::Changed {
            info!(provider_id = %provider.id, "provider went offline for inactivity");
            self.notifier
                .notify(Notification::new(
                    Recipient::Provider(provider.id.clone()),
                    NotificationKind::WentOffline,
                    "You were set offline after a period of inactivity.",
                ))
                .await;
            self.announce(&provider.id, false, now, Some(OfflineReason::Inactivity))
                .await;
        }
        Ok(transition)
    }

    /// Broadcasts a flag change, plus a direct event to the provider when
    /// the change was forced.
    pub(crate) async fn announce(
        &self,
        id: &ProviderId,
        reachable: bool,
        now: DateTime<Utc>,
        forced: Option<OfflineReason>,
    ) {
        self.notifier
            .broadcast(
                BroadcastTarget::Everyone,
                LiveEvent::AvailabilityChanged {
                    provider_id: id.clone(),
                    reachable,
                    timestamp: now,
                },
            )
            .await;
        if let Some(reason) = forced {
            self.notifier
                .broadcast(
                    BroadcastTarget::Only(Recipient::Provider(id.clone())),
                    LiveEvent::ForcedOffline {
                        provider_id: id.clone(),
                        reason,
                        timestamp: now,
                    },
                )
                .await;
        }
    }
}

impl std::fmt::Debug for AvailabilityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityService")
            .field("tz", &self.tz)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;
    use crate::notify::RecordingSink;
    use crate::store::memory::InMemoryProviderStore;
    use chrono::TimeZone;

    /// Monday 2024-03-04.
    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    fn service(
        providers: Vec<Provider>,
    ) -> (AvailabilityService, Arc<InMemoryProviderStore>, Arc<RecordingSink>) {
        let store = Arc::new(InMemoryProviderStore::with_providers(providers));
        let sink = Arc::new(RecordingSink::new());
        let svc = AvailabilityService::new(store.clone(), Notifier::uniform(sink.clone()), Tz::UTC);
        (svc, store, sink)
    }

    #[tokio::test]
    async fn test_manual_toggle_sets_since_and_strategy() {
        let scheduled = Provider::new("P1").with_schedule(WeeklySchedule::every_day("09:00", "18:00"));
        let (svc, _, sink) = service(vec![scheduled]);

        let p = svc.set_availability(&"P1".into(), true, at(8, 0)).await.unwrap();
        assert!(p.reachable);
        assert_eq!(p.strategy, AvailabilityStrategy::Manual);
        assert_eq!(p.reachable_since, Some(at(8, 0)));
        assert_eq!(sink.events().len(), 1);

        let p = svc.set_availability(&"P1".into(), false, at(8, 30)).await.unwrap();
        assert!(!p.reachable);
        assert!(p.reachable_since.is_none());
    }

    #[tokio::test]
    async fn test_suspended_provider_cannot_go_online() {
        let p = Provider::new("P1").with_suspension(at(20, 0));
        let (svc, store, sink) = service(vec![p]);

        let err = svc
            .set_availability(&"P1".into(), true, at(12, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Suspended { .. }));
        assert!(!store.get(&"P1".into()).await.unwrap().unwrap().reachable);
        assert!(sink.events().is_empty());

        // Going offline is always allowed.
        assert!(svc.set_availability(&"P1".into(), false, at(12, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let (svc, _, _) = service(vec![]);
        let err = svc.record_activity(&"ghost".into(), at(9, 0)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_schedule_applies_current_verdict() {
        let (svc, _, _) = service(vec![Provider::new("P1"), Provider::new("P2")]);
        let schedule = WeeklySchedule::every_day("09:00", "18:00");

        let inside = svc.set_schedule(&"P1".into(), schedule.clone(), at(10, 0)).await.unwrap();
        assert!(inside.reachable);
        assert_eq!(inside.strategy, AvailabilityStrategy::Scheduled);

        let outside = svc.set_schedule(&"P2".into(), schedule, at(20, 0)).await.unwrap();
        assert!(!outside.reachable);

        let err = svc
            .set_schedule(&"P1".into(), WeeklySchedule::every_day("10:00", "10:00"), at(10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSchedule(_)));
    }

    #[tokio::test]
    async fn test_schedule_boundary_flips_flag() {
        let p = Provider::new("P1").with_schedule(WeeklySchedule::every_day("09:00", "18:00"));
        let (svc, store, sink) = service(vec![p.clone()]);

        assert_eq!(
            svc.apply_schedule_boundary(&p, at(9, 0)).await.unwrap(),
            Transition::Changed
        );
        let online = store.get(&"P1".into()).await.unwrap().unwrap();
        assert!(online.reachable);

        // Stale read: the stored flag already moved on.
        assert_eq!(
            svc.apply_schedule_boundary(&online.clone(), at(9, 0)).await.unwrap(),
            Transition::Unchanged
        );
        assert_eq!(
            svc.apply_schedule_boundary(&p, at(9, 0)).await.unwrap(),
            Transition::Raced
        );

        assert_eq!(
            svc.apply_schedule_boundary(&online, at(18, 0)).await.unwrap(),
            Transition::Changed
        );
        // Online broadcast, offline broadcast, forced-offline self event.
        assert_eq!(sink.events().len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_boundary_respects_suspension() {
        let p = Provider::new("P1")
            .with_schedule(WeeklySchedule::every_day("09:00", "18:00"))
            .with_suspension(at(23, 0));
        let (svc, _, _) = service(vec![p.clone()]);
        assert_eq!(
            svc.apply_schedule_boundary(&p, at(9, 0)).await.unwrap(),
            Transition::Unchanged
        );
    }

    #[tokio::test]
    async fn test_inactivity_forces_offline() {
        let p = Provider::new("P1")
            .online_since(at(9, 0))
            .with_last_activity(at(9, 5));
        let (svc, store, sink) = service(vec![p.clone()]);
        let threshold = Duration::minutes(10);

        assert_eq!(
            svc.expire_inactive(&p, at(9, 14), threshold).await.unwrap(),
            Transition::Unchanged
        );
        assert_eq!(
            svc.expire_inactive(&p, at(9, 16), threshold).await.unwrap(),
            Transition::Changed
        );
        let stored = store.get(&"P1".into()).await.unwrap().unwrap();
        assert!(!stored.reachable);
        assert!(stored.reachable_since.is_none());

        assert_eq!(sink.notifications_of(NotificationKind::WentOffline).len(), 1);
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            (
                BroadcastTarget::Only(_),
                LiveEvent::ForcedOffline {
                    reason: OfflineReason::Inactivity,
                    ..
                }
            )
        ));
    }

    #[tokio::test]
    async fn test_inactivity_suppressed_inside_window() {
        let p = Provider::new("P1")
            .with_schedule(WeeklySchedule::every_day("09:00", "18:00"))
            .online_since(at(9, 0));
        let (svc, _, _) = service(vec![p.clone()]);

        let later = at(17, 0);
        assert_eq!(
            svc.expire_inactive(&p, later, Duration::minutes(10)).await.unwrap(),
            Transition::Unchanged
        );
        // Outside the window the same silence counts.
        assert_eq!(
            svc.expire_inactive(&p, at(19, 0), Duration::minutes(10)).await.unwrap(),
            Transition::Changed
        );
    }

    #[tokio::test]
    async fn test_heartbeat_after_scan_wins_over_inactivity() {
        let p = Provider::new("P1")
            .online_since(at(11, 0))
            .with_last_activity(at(11, 30));
        let (svc, store, sink) = service(vec![p.clone()]);

        svc.record_activity(&"P1".into(), at(12, 0)).await.unwrap();
        assert_eq!(
            svc.expire_inactive(&p, at(12, 0), Duration::minutes(10)).await.unwrap(),
            Transition::Raced
        );
        let stored = store.get(&"P1".into()).await.unwrap().unwrap();
        assert!(stored.reachable);
        assert_eq!(stored.last_activity_at, Some(at(12, 0)));
        assert!(sink.notifications().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_retoggle_after_scan_wins_over_inactivity() {
        let p = Provider::new("P1").online_since(at(9, 0));
        let (svc, store, _) = service(vec![p.clone()]);

        svc.set_availability(&"P1".into(), false, at(11, 58)).await.unwrap();
        svc.set_availability(&"P1".into(), true, at(11, 59)).await.unwrap();
        assert_eq!(
            svc.expire_inactive(&p, at(12, 0), Duration::minutes(10)).await.unwrap(),
            Transition::Raced
        );
        let stored = store.get(&"P1".into()).await.unwrap().unwrap();
        assert!(stored.reachable);
        assert_eq!(stored.reachable_since, Some(at(11, 59)));
    }
}
