/*
 *  resource.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  Scheduled-refresh data cache shared by every widget. Polls an injected
 *  fetcher on an interval, keeps the last good value across failures and
 *  never lets a cancelled cycle write back.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::FetchError;
use crate::timebase::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Loading,
    Ready,
    Error,
}

/// Render-ready snapshot of a resource.
///
/// `Ready` always carries data and `Error` always carries an error. A failed
/// refresh leaves any earlier data in place.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
    pub status: FetchStatus,
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self::loading()
    }
}

impl<T> FetchState<T> {
    pub fn loading() -> Self {
        Self { status: FetchStatus::Loading, data: None, error: None, last_fetched_at: None }
    }

    fn apply(&mut self, outcome: Result<T, FetchError>, now: DateTime<Utc>) {
        match outcome {
            Ok(data) => {
                self.status = FetchStatus::Ready;
                self.data = Some(data);
                self.error = None;
                self.last_fetched_at = Some(now);
            }
            Err(e) => {
                self.status = FetchStatus::Error;
                self.error = Some(e);
            }
        }
    }

    /// Showing an older value alongside an error.
    pub fn is_stale(&self) -> bool {
        self.status == FetchStatus::Error && self.data.is_some()
    }
}

/// Poll cadence plus how early credentials are renewed ahead of expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub interval: Duration,
    pub renew_before_expiry: Duration,
}

impl RefreshPolicy {
    pub const DEFAULT_RENEW_BEFORE_EXPIRY: Duration = Duration::from_secs(5 * 60);

    pub fn every(interval: Duration) -> Self {
        Self { interval, renew_before_expiry: Self::DEFAULT_RENEW_BEFORE_EXPIRY }
    }

    pub fn with_renew_before_expiry(mut self, renew_before_expiry: Duration) -> Self {
        self.renew_before_expiry = renew_before_expiry;
        self
    }
}

/// A data source for one widget.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, FetchError>;
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<T, FetchError> {
        (self)().await
    }
}

#[derive(Debug, Default)]
struct Cycle {
    generation: u64,
    running: bool,
    in_flight: bool,
    /// Manual refresh requests for the current generation only.
    trigger: Option<Arc<Notify>>,
}

struct Shared<T> {
    cycle: Mutex<Cycle>,
    state_tx: watch::Sender<FetchState<T>>,
    clock: Arc<dyn Clock>,
}

fn lock<G>(m: &Mutex<G>) -> MutexGuard<'_, G> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    /// One fetch. Returns false when the polling loop should end.
    async fn run_cycle(&self, name: &str, fetcher: &dyn Fetcher<T>, generation: u64) -> bool {
        {
            let mut cycle = lock(&self.cycle);
            if cycle.generation != generation {
                return false;
            }
            if cycle.in_flight {
                debug!("{name}: fetch already in flight, skipping");
                return true;
            }
            cycle.in_flight = true;
        }

        let outcome = fetcher.fetch().await;
        let now = self.clock.now();

        let mut cycle = lock(&self.cycle);
        if cycle.generation != generation {
            debug!("{name}: discarding result of a cancelled fetch");
            return false;
        }
        cycle.in_flight = false;

        let halt = matches!(outcome, Err(FetchError::Config(_)));
        match &outcome {
            Ok(_) => info!("{name} refresh successful."),
            Err(e @ FetchError::Config(_)) => error!("{name}: {e}, polling halted"),
            Err(e) => warn!("{name} refresh failed: {e}"),
        }
        self.state_tx.send_modify(|state| state.apply(outcome, now));
        if halt {
            cycle.running = false;
        }
        !halt
    }
}

/// Scheduled-fetch cache around one data source.
pub struct RefreshableResource<T> {
    name: String,
    shared: Arc<Shared<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> RefreshableResource<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let (state_tx, _) = watch::channel(FetchState::loading());
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                cycle: Mutex::new(Cycle::default()),
                state_tx,
                clock,
            }),
            task: Mutex::new(None),
        }
    }

    /// Begin polling: one fetch now, then one every `policy.interval`.
    ///
    /// Restarting a running resource cancels the previous loop first and
    /// resets the state to `Loading`.
    pub fn start<F>(&self, fetcher: F, policy: RefreshPolicy)
    where
        F: Fetcher<T> + 'static,
    {
        self.stop();

        let trigger = Arc::new(Notify::new());
        let generation = {
            let mut cycle = lock(&self.shared.cycle);
            cycle.generation += 1;
            cycle.running = true;
            cycle.in_flight = false;
            cycle.trigger = Some(Arc::clone(&trigger));
            self.shared.state_tx.send_replace(FetchState::loading());
            cycle.generation
        };

        info!("{}: polling every {:?}", self.name, policy.interval);
        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(policy.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = trigger.notified() => {
                        debug!("{name}: manual refresh");
                        ticker.reset();
                    }
                }
                if !shared.run_cycle(&name, &fetcher, generation).await {
                    break;
                }
            }
        });
        *lock(&self.task) = Some(handle);
    }

    /// Ask for an immediate fetch. Returns false when the request was
    /// coalesced into an outstanding fetch or the resource is not polling.
    pub fn refresh_now(&self) -> bool {
        let cycle = lock(&self.shared.cycle);
        match &cycle.trigger {
            Some(trigger) if cycle.running && !cycle.in_flight => {
                trigger.notify_one();
                true
            }
            _ => false,
        }
    }

    /// Cancel polling. Idempotent; nothing mutates the state after this returns.
    pub fn stop(&self) {
        let was_running = {
            let mut cycle = lock(&self.shared.cycle);
            cycle.generation += 1;
            cycle.in_flight = false;
            cycle.trigger = None;
            std::mem::replace(&mut cycle.running, false)
        };
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        if was_running {
            info!("{}: polling stopped.", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.cycle).running
    }

    pub fn state(&self) -> FetchState<T> {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.shared.state_tx.subscribe()
    }
}

impl<T> Drop for RefreshableResource<T> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::ManualClock;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        temp: i32,
    }

    const INTERVAL: Duration = Duration::from_secs(60);

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn scripted(
        outcomes: Vec<Result<Reading, FetchError>>,
    ) -> (impl Fetcher<Reading> + 'static, Arc<AtomicUsize>) {
        let script = Arc::new(Mutex::new(VecDeque::from(outcomes)));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let next = script.lock().unwrap().pop_front();
            async move { next.unwrap_or_else(|| Err(FetchError::network("script exhausted"))) }
        };
        (fetcher, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_runs_immediately_then_on_interval() {
        let resource = RefreshableResource::new("weather");
        let (fetcher, calls) = scripted(vec![Ok(Reading { temp: 12 }), Ok(Reading { temp: 13 })]);
        assert_eq!(resource.state().status, FetchStatus::Loading);

        resource.start(fetcher, RefreshPolicy::every(INTERVAL));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let state = resource.state();
        assert_eq!(state.status, FetchStatus::Ready);
        assert_eq!(state.data, Some(Reading { temp: 12 }));
        assert!(state.last_fetched_at.is_some());

        tokio::time::advance(INTERVAL - Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resource.state().data, Some(Reading { temp: 13 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_last_good_data() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let resource = RefreshableResource::with_clock("weather", clock.clone());
        let (fetcher, _) = scripted(vec![
            Ok(Reading { temp: 12 }),
            Err(FetchError::network("connection reset")),
        ]);

        resource.start(fetcher, RefreshPolicy::every(INTERVAL));
        settle().await;
        let fetched_at = resource.state().last_fetched_at;

        clock.advance_ms(60_000);
        tokio::time::advance(INTERVAL).await;
        settle().await;

        let state = resource.state();
        assert_eq!(state.status, FetchStatus::Error);
        assert_eq!(state.data, Some(Reading { temp: 12 }));
        assert_eq!(state.error, Some(FetchError::network("connection reset")));
        assert_eq!(state.last_fetched_at, fetched_at);
        assert!(state.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_without_prior_data_has_no_data() {
        let resource = RefreshableResource::new("rail");
        let (fetcher, _) = scripted(vec![Err(FetchError::from_status(500, "boom"))]);
        resource.start(fetcher, RefreshPolicy::every(INTERVAL));
        settle().await;

        let state = resource.state();
        assert_eq!(state.status, FetchStatus::Error);
        assert!(state.data.is_none());
        assert!(!state.is_stale());
        assert!(resource.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_error_halts_polling() {
        let resource = RefreshableResource::new("headlines");
        let (fetcher, calls) = scripted(vec![Err(FetchError::Config("api_key".into()))]);
        resource.start(fetcher, RefreshPolicy::every(INTERVAL));
        settle().await;

        tokio::time::advance(INTERVAL * 3).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!resource.is_running());
        assert_eq!(resource.state().error, Some(FetchError::Config("api_key".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_while_in_flight_is_coalesced() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok(Reading { temp: 7 })
                }
            }
        };

        let resource = RefreshableResource::new("photos");
        resource.start(fetcher, RefreshPolicy::every(INTERVAL));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(!resource.refresh_now());
        assert!(!resource.refresh_now());
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        settle().await;
        assert_eq!(resource.state().data, Some(Reading { temp: 7 }));

        assert!(resource.refresh_now());
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        gate.notify_one();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let gate = Arc::new(Notify::new());
        let fetcher = {
            let gate = Arc::clone(&gate);
            move || {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok(Reading { temp: 99 })
                }
            }
        };

        let resource = RefreshableResource::new("forecast");
        resource.start(fetcher, RefreshPolicy::every(INTERVAL));
        settle().await;

        resource.stop();
        resource.stop();
        gate.notify_one();
        tokio::time::advance(INTERVAL * 2).await;
        settle().await;

        let state = resource.state();
        assert_eq!(state.status, FetchStatus::Loading);
        assert!(state.data.is_none());
        assert!(!resource.is_running());
        assert!(!resource.refresh_now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let resource = RefreshableResource::new("weather");
        let (first, _) = scripted(vec![Ok(Reading { temp: 1 })]);
        resource.start(first, RefreshPolicy::every(INTERVAL));
        settle().await;
        resource.stop();

        let (second, calls) = scripted(vec![Ok(Reading { temp: 2 })]);
        resource.start(second, RefreshPolicy::every(INTERVAL));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.state().data, Some(Reading { temp: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_request_does_not_survive_stop() {
        let resource = RefreshableResource::new("headlines");
        let (first, _) = scripted(vec![Ok(Reading { temp: 1 }), Ok(Reading { temp: 1 })]);
        resource.start(first, RefreshPolicy::every(INTERVAL));
        settle().await;

        assert!(resource.refresh_now());
        resource.stop();

        let (second, calls) = scripted(vec![Ok(Reading { temp: 2 }), Ok(Reading { temp: 3 })]);
        resource.start(second, RefreshPolicy::every(INTERVAL));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.state().data, Some(Reading { temp: 2 }));

        tokio::time::advance(INTERVAL - Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_updates() {
        let resource = RefreshableResource::new("weather");
        let mut rx = resource.subscribe();
        let (fetcher, _) = scripted(vec![Ok(Reading { temp: 3 })]);
        resource.start(fetcher, RefreshPolicy::every(INTERVAL));

        rx.wait_for(|s| s.status == FetchStatus::Ready).await.unwrap();
        assert_eq!(rx.borrow().data, Some(Reading { temp: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_always_has_data_over_mixed_outcomes() {
        let resource = RefreshableResource::new("rail");
        let (fetcher, _) = scripted(vec![
            Err(FetchError::network("down")),
            Ok(Reading { temp: 1 }),
            Err(FetchError::from_status(503, "busy")),
            Err(FetchError::NoData("No departures found".into())),
            Ok(Reading { temp: 2 }),
        ]);
        resource.start(fetcher, RefreshPolicy::every(INTERVAL));
        settle().await;

        let mut had_data = false;
        for _ in 0..5 {
            let state = resource.state();
            if state.status == FetchStatus::Ready {
                assert!(state.data.is_some());
            }
            if state.status == FetchStatus::Error {
                assert!(state.error.is_some());
            }
            if had_data {
                assert!(state.data.is_some());
            }
            had_data |= state.data.is_some();
            tokio::time::advance(INTERVAL).await;
            settle().await;
        }
        assert!(had_data);
    }
}
