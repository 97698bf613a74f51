//! The poll loop.
//!
//! One cycle evaluates entities in a fixed order: token, profile fields
//! (name, recent artists), followers, followings, playlists, picture. Every
//! network call is sequential and raced against a watchdog. Each accepted
//! change is persisted and notified before the next entity starts.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::detector::{ObservableSet, SetOutcome};
use super::events::{ChangeEvent, EntityKind};
use super::picture::{PictureBaseline, PictureChange, compare_picture, picture_event};
use super::playlist::diff_playlist;
use crate::api::{ApiError, Member, ProfileApi, ProfileSnapshot};
use crate::config::MonitorConfig;
use crate::credentials::{ApiAuth, TokenBroker};
use crate::notification::{NotificationEvent, NotificationSink, OperatorAlert};
use crate::session::SessionState;
use crate::store::BaselineStore;
use crate::{Error, Result};

/// Added to the per-call deadline before the watchdog fires.
const WATCHDOG_GRACE: Duration = Duration::from_secs(5);

/// Token acquisition may take several round trips (server time, retries).
const TOKEN_WATCHDOG_FACTOR: u32 = 10;

/// Transient credential failures are alerted after this many in a row.
const CREDENTIAL_ALERT_AFTER: u32 = 3;

/// Loop settings derived from [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub user_id: String,
    pub check_interval: Duration,
    pub error_interval: Duration,
    pub request_timeout: Duration,
    pub disappeared_threshold: u32,
    pub liveness_interval: Duration,
    pub track_playlists: bool,
    pub track_followers: bool,
    pub track_followings: bool,
    pub track_recent_artists: bool,
    pub track_profile_picture: bool,
    pub notify_errors: bool,
}

impl PollSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            check_interval: config.check_interval(),
            error_interval: config.error_interval(),
            request_timeout: config.request_timeout(),
            disappeared_threshold: config.disappeared_threshold,
            liveness_interval: config.liveness_interval(),
            track_playlists: config.track_playlists,
            track_followers: config.track_followers,
            track_followings: config.track_followings,
            track_recent_artists: config.track_recent_artists,
            track_profile_picture: config.track_profile_picture,
            notify_errors: config.notify_errors,
        }
    }

    /// Wall-clock bound for one API call.
    pub fn watchdog(&self) -> Duration {
        self.request_timeout + WATCHDOG_GRACE
    }

    pub fn token_watchdog(&self) -> Duration {
        self.request_timeout.saturating_mul(TOKEN_WATCHDOG_FACTOR) + WATCHDOG_GRACE
    }

    /// Collection kinds evaluated with the set rules, in cycle order.
    pub fn tracked_sets(&self) -> Vec<EntityKind> {
        [
            (self.track_recent_artists, EntityKind::RecentArtists),
            (self.track_followers, EntityKind::Followers),
            (self.track_followings, EntityKind::Followings),
            (self.track_playlists, EntityKind::Playlists),
        ]
        .into_iter()
        .filter_map(|(enabled, kind)| enabled.then_some(kind))
        .collect()
    }
}

/// Summary of one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Change events emitted.
    pub events: usize,
    /// Empty observations held back by hysteresis.
    pub suppressed: usize,
    /// Entities skipped because their fetch failed.
    pub skipped: Vec<String>,
    /// False when the cycle stopped early on cancellation.
    pub completed: bool,
}

pub struct ProfileMonitor {
    settings: PollSettings,
    broker: TokenBroker,
    api: Arc<dyn ProfileApi>,
    store: Arc<dyn BaselineStore>,
    sink: Arc<dyn NotificationSink>,
}

impl ProfileMonitor {
    pub fn new(
        settings: PollSettings,
        broker: TokenBroker,
        api: Arc<dyn ProfileApi>,
        store: Arc<dyn BaselineStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            settings,
            broker,
            api,
            store,
            sink,
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Fresh session with persisted baselines loaded.
    pub async fn load_session(&self) -> Result<SessionState> {
        let mut state = SessionState::new(self.settings.check_interval);
        for kind in self.settings.tracked_sets() {
            if let Some(baseline) = self.store.load_set(kind).await? {
                info!(kind = %kind, count = baseline.count, "Restored baseline");
                state
                    .sets
                    .insert(kind, ObservableSet::with_baseline(kind, baseline));
            }
        }
        if self.settings.track_profile_picture {
            state.picture = self.store.load_picture().await?;
        }
        Ok(state)
    }

    /// Poll until `cancel` fires. Errors inside a cycle are logged and
    /// retried after the error interval; the loop itself never fails.
    pub async fn run(&self, state: &mut SessionState, cancel: CancellationToken) {
        info!(
            user = %self.settings.user_id,
            backend = %self.broker.kind(),
            interval_secs = self.settings.check_interval.as_secs(),
            "Profile monitor started"
        );
        state.last_liveness.get_or_insert_with(Instant::now);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = match self.run_cycle(state, &cancel).await {
                Ok(report) => {
                    if report.events > 0 || !report.skipped.is_empty() {
                        info!(
                            events = report.events,
                            suppressed = report.suppressed,
                            skipped = report.skipped.len(),
                            "Cycle finished"
                        );
                    } else {
                        debug!(suppressed = report.suppressed, "Cycle finished, no changes");
                    }
                    self.settings.check_interval
                }
                Err(e) => self.handle_cycle_error(&e),
            };

            self.heartbeat(state);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(cycles = state.cycles, "Profile monitor stopped");
    }

    /// Run one cycle. Cancellation is honoured between top-level steps.
    ///
    /// A 401 from any call drops the cached token so the next cycle fetches
    /// a fresh one.
    #[instrument(skip_all, fields(user = %self.settings.user_id, cycle = state.cycles + 1))]
    pub async fn run_cycle(
        &self,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        state.cycles += 1;
        let result = self.evaluate(state, cancel).await;
        if let Err(Error::Api(ApiError::Unauthorized)) = &result {
            warn!("API rejected the access token, refreshing next cycle");
            self.broker.invalidate(&mut state.tokens);
        }
        result
    }

    async fn evaluate(
        &self,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let user_id = self.settings.user_id.as_str();
        let timeout = self.settings.request_timeout;

        let auth = self.acquire_token(state).await?;
        if cancel.is_cancelled() {
            return Ok(report);
        }

        let profile = match self
            .call("fetch_profile", self.api.fetch_profile(&auth, user_id, timeout))
            .await
        {
            Ok(profile) => profile,
            Err(Error::Api(ApiError::NotFound(_))) => {
                self.mark_missing(state).await;
                return Err(Error::EntityNotFound(user_id.to_string()));
            }
            Err(e) => return Err(e),
        };
        self.mark_present(state).await;

        self.check_profile_name(state, &profile, &mut report).await;
        if self.settings.track_recent_artists {
            let artists = profile.recent_artists.clone();
            self.observe_set(state, EntityKind::RecentArtists, artists.len() as u64, artists, &mut report)
                .await;
        }
        if cancel.is_cancelled() {
            return Ok(report);
        }

        if self.settings.track_followers {
            match self
                .call("fetch_followers", self.api.fetch_followers(&auth, user_id, timeout))
                .await
            {
                Ok(members) => {
                    self.observe_set(state, EntityKind::Followers, profile.follower_count, members, &mut report)
                        .await
                }
                Err(e) => skip_entity(EntityKind::Followers.as_str(), e, &mut report)?,
            }
            if cancel.is_cancelled() {
                return Ok(report);
            }
        }

        if self.settings.track_followings {
            match self
                .call("fetch_followings", self.api.fetch_followings(&auth, user_id, timeout))
                .await
            {
                Ok(members) => {
                    self.observe_set(state, EntityKind::Followings, profile.following_count, members, &mut report)
                        .await
                }
                Err(e) => skip_entity(EntityKind::Followings.as_str(), e, &mut report)?,
            }
            if cancel.is_cancelled() {
                return Ok(report);
            }
        }

        if self.settings.track_playlists {
            self.check_playlists(state, &auth, &profile, &mut report).await?;
            if cancel.is_cancelled() {
                return Ok(report);
            }
        }

        if self.settings.track_profile_picture {
            self.check_picture(state, &profile, &mut report).await?;
        }

        report.completed = true;
        Ok(report)
    }

    async fn acquire_token(&self, state: &mut SessionState) -> Result<ApiAuth> {
        let watchdog = self.settings.token_watchdog();
        let result = match tokio::time::timeout(watchdog, self.broker.get_token(&mut state.tokens)).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::NetworkTimeout {
                operation: "get_token",
                timeout_secs: watchdog.as_secs(),
            }),
        };

        match result {
            Ok(auth) => {
                let ended = state.credential_failures.clear();
                if ended > 0 {
                    info!(failures = ended, "Token acquisition recovered");
                }
                Ok(auth)
            }
            Err(e) => {
                self.record_credential_failure(state, &e).await;
                Err(e)
            }
        }
    }

    async fn record_credential_failure(&self, state: &mut SessionState, err: &Error) {
        let count = state.credential_failures.record_failure();
        let manual = err.is_auth_fatal();
        if manual {
            error!(backend = %self.broker.kind(), failures = count, error = %err, "Credentials need manual action");
        } else {
            warn!(backend = %self.broker.kind(), failures = count, error = %err, "Token acquisition failed");
        }

        if !self.settings.notify_errors || !(manual || count >= CREDENTIAL_ALERT_AFTER) {
            return;
        }
        if state.credential_failures.take_notification() {
            self.notify(
                OperatorAlert::CredentialFailure {
                    backend: self.broker.kind(),
                    message: err.to_string(),
                    requires_manual_action: manual,
                    timestamp: Utc::now(),
                }
                .into(),
            )
            .await;
        }
    }

    async fn mark_missing(&self, state: &mut SessionState) {
        if state.profile_missing {
            debug!(user = %self.settings.user_id, "Profile still missing");
            return;
        }
        state.profile_missing = true;
        warn!(user = %self.settings.user_id, "Monitored profile not found");
        self.notify(
            OperatorAlert::ProfileDisappeared {
                user_id: self.settings.user_id.clone(),
                timestamp: Utc::now(),
            }
            .into(),
        )
        .await;
    }

    async fn mark_present(&self, state: &mut SessionState) {
        if !state.profile_missing {
            return;
        }
        state.profile_missing = false;
        info!(user = %self.settings.user_id, "Monitored profile is reachable again");
        self.notify(
            OperatorAlert::ProfileReappeared {
                user_id: self.settings.user_id.clone(),
                timestamp: Utc::now(),
            }
            .into(),
        )
        .await;
    }

    async fn check_profile_name(
        &self,
        state: &mut SessionState,
        profile: &ProfileSnapshot,
        report: &mut CycleReport,
    ) {
        let previous = state.profile_name.replace(profile.username.clone());
        if let Some(old) = previous
            && old != profile.username
        {
            let event = ChangeEvent::value(
                EntityKind::ProfileName,
                self.settings.user_id.as_str(),
                Some(old),
                Some(profile.username.clone()),
            );
            self.emit(event, report).await;
        }
    }

    async fn observe_set(
        &self,
        state: &mut SessionState,
        kind: EntityKind,
        count: u64,
        members: Vec<Member>,
        report: &mut CycleReport,
    ) {
        let threshold = self.settings.disappeared_threshold;
        let set = state.set_mut(kind);
        let outcome = set.observe(&self.settings.user_id, count, members, threshold);

        if outcome.baseline_changed()
            && let Some(baseline) = set.baseline().cloned()
            && let Err(e) = self.store.save_set(kind, &baseline).await
        {
            error!(kind = %kind, error = %e, "Failed to persist baseline");
        }

        match outcome {
            SetOutcome::Initialized => debug!(kind = %kind, count, "Baseline initialised"),
            SetOutcome::Unchanged => {}
            SetOutcome::Recovered { after } => {
                info!(kind = %kind, after, "Empty results stopped, collection unchanged")
            }
            SetOutcome::Suppressed { streak } => {
                info!(kind = %kind, streak, threshold, "Empty result suppressed as a provider glitch");
                report.suppressed += 1;
            }
            SetOutcome::Changed(event) => {
                if event.recovered {
                    info!(kind = %kind, "Recovered from suppressed empty results");
                }
                self.emit(event, report).await;
            }
        }
    }

    async fn check_playlists(
        &self,
        state: &mut SessionState,
        auth: &ApiAuth,
        profile: &ProfileSnapshot,
        report: &mut CycleReport,
    ) -> Result<()> {
        let now = Utc::now();
        let timeout = self.settings.request_timeout;
        state
            .fetch_failures
            .retain_ids(profile.playlists.iter().map(|p| p.id.as_str()));

        let mut observed = Vec::with_capacity(profile.playlists.len());
        for reference in &profile.playlists {
            let result = self
                .call("fetch_playlist", self.api.fetch_playlist(auth, &reference.id, timeout))
                .await;
            match result {
                Ok(record) => {
                    if let Some(streak) = state.fetch_failures.clear(&reference.id) {
                        info!(
                            playlist = %reference.id,
                            failures = streak.count,
                            last_error = %streak.last_error,
                            "Playlist fetch recovered"
                        );
                    }
                    if let Some(previous) = state.playlists.get(&reference.id) {
                        for event in diff_playlist(previous, &record, now) {
                            self.emit(event, report).await;
                        }
                    }
                    let name = if record.name.is_empty() {
                        reference.name.clone()
                    } else {
                        record.name.clone()
                    };
                    state.playlists.insert(reference.id.clone(), record);
                    observed.push(Member::new(reference.id.as_str(), name));
                }
                Err(e) if is_entity_skippable(&e) => {
                    let streak = state
                        .fetch_failures
                        .record(&reference.id, &e.to_string(), now);
                    report.skipped.push(reference.id.clone());

                    let known = state
                        .set(EntityKind::Playlists)
                        .and_then(ObservableSet::baseline)
                        .and_then(|b| b.members.iter().find(|m| m.id == reference.id))
                        .cloned();
                    match known {
                        Some(member) if state.fetch_failures.is_suppressed(&reference.id, now) => {
                            warn!(playlist = %reference.id, streak, error = %e, "Playlist fetch failed, keeping last known state");
                            observed.push(member);
                        }
                        Some(_) => {
                            warn!(playlist = %reference.id, streak, error = %e, "Playlist fetch keeps failing, treating it as gone");
                        }
                        None => {
                            warn!(playlist = %reference.id, error = %e, "Playlist fetch failed, will retry next cycle");
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let count = observed.len() as u64;
        self.observe_set(state, EntityKind::Playlists, count, observed, report)
            .await;

        if let Some(baseline) = state
            .sets
            .get(&EntityKind::Playlists)
            .and_then(ObservableSet::baseline)
        {
            let live: HashSet<&str> = baseline.members.iter().map(|m| m.id.as_str()).collect();
            state.playlists.retain(|uri, _| live.contains(uri.as_str()));
        }
        Ok(())
    }

    async fn check_picture(
        &self,
        state: &mut SessionState,
        profile: &ProfileSnapshot,
        report: &mut CycleReport,
    ) -> Result<()> {
        let current = match &profile.image_url {
            Some(url) => {
                match self
                    .call("download_image", self.api.download_image(url, self.settings.request_timeout))
                    .await
                {
                    Ok(blob) => Some(blob),
                    Err(e) => return skip_entity(EntityKind::ProfilePicture.as_str(), e, report),
                }
            }
            None => None,
        };

        let Some(previous) = state.picture.as_ref() else {
            let baseline = PictureBaseline::new(current);
            self.persist_picture(&baseline).await;
            state.picture = Some(baseline);
            debug!("Picture baseline initialised");
            return Ok(());
        };

        let change = compare_picture(previous.image.as_ref(), current.as_ref());
        if change == PictureChange::Unchanged {
            return Ok(());
        }

        let event = picture_event(&self.settings.user_id, previous.image.as_ref(), current.as_ref());
        let baseline = PictureBaseline::new(current);
        self.persist_picture(&baseline).await;
        state.picture = Some(baseline);
        info!(change = change.as_str(), "Profile picture changed");
        self.emit(event, report).await;
        Ok(())
    }

    async fn persist_picture(&self, baseline: &PictureBaseline) {
        if let Err(e) = self.store.save_picture(baseline).await {
            error!(error = %e, "Failed to persist picture baseline");
        }
    }

    /// Decide the delay before the next cycle after a failed one.
    fn handle_cycle_error(&self, err: &Error) -> Duration {
        match err {
            Error::EntityNotFound(_) => return self.settings.check_interval,
            Error::Api(ApiError::Unauthorized) | Error::Credential(_) => {}
            e if e.is_retryable() => warn!(error = %e, "Cycle failed, will retry"),
            e => error!(error = %e, "Cycle failed"),
        }
        self.settings.error_interval
    }

    fn heartbeat(&self, state: &mut SessionState) {
        let now = Instant::now();
        let due = state
            .last_liveness
            .is_none_or(|last| now.duration_since(last) >= self.settings.liveness_interval);
        if due {
            info!(
                user = %self.settings.user_id,
                cycles = state.cycles,
                "Profile monitor alive"
            );
            state.last_liveness = Some(now);
        }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ApiError>>,
    {
        let watchdog = self.settings.watchdog();
        match tokio::time::timeout(watchdog, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::NetworkTimeout {
                operation,
                timeout_secs: watchdog.as_secs(),
            }),
        }
    }

    async fn emit(&self, event: ChangeEvent, report: &mut CycleReport) {
        report.events += 1;
        self.notify(NotificationEvent::Change(event)).await;
    }

    async fn notify(&self, event: NotificationEvent) {
        if let Err(e) = self.sink.send(&event).await {
            warn!(sink = self.sink.name(), error = %e, "Failed to deliver notification");
        }
    }
}

/// A single failed entity fetch skips that entity; a rejected token fails
/// the whole cycle.
fn is_entity_skippable(err: &Error) -> bool {
    match err {
        Error::NetworkTimeout { .. } => true,
        Error::Api(ApiError::Unauthorized) => false,
        Error::Api(_) => true,
        _ => false,
    }
}

fn skip_entity(entity: &str, err: Error, report: &mut CycleReport) -> Result<()> {
    if !is_entity_skippable(&err) {
        return Err(err);
    }
    warn!(entity, error = %err, "Fetch failed, skipping for this cycle");
    report.skipped.push(entity.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PollSettings {
        PollSettings::from_config(&MonitorConfig {
            user_id: "alice".into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_watchdog_exceeds_request_timeout() {
        let settings = settings();
        assert_eq!(settings.watchdog(), settings.request_timeout + WATCHDOG_GRACE);
        assert!(settings.token_watchdog() > settings.watchdog());
    }

    #[test]
    fn test_tracked_sets_follow_toggles_in_cycle_order() {
        let mut settings = settings();
        settings.track_recent_artists = true;
        settings.track_followers = true;
        settings.track_followings = false;
        settings.track_playlists = true;
        assert_eq!(
            settings.tracked_sets(),
            vec![EntityKind::RecentArtists, EntityKind::Followers, EntityKind::Playlists]
        );
    }

    #[test]
    fn test_skippable_errors() {
        assert!(is_entity_skippable(&Error::Api(ApiError::Status {
            status: 502,
            endpoint: "playlists".into()
        })));
        assert!(is_entity_skippable(&Error::NetworkTimeout {
            operation: "fetch_playlist",
            timeout_secs: 35
        }));
        assert!(!is_entity_skippable(&Error::Api(ApiError::Unauthorized)));
        assert!(!is_entity_skippable(&Error::config("x")));
    }
}
