//! Schedule poller: the periodic loop that turns roster changes into events.
//!
//! Each cycle fetches every configured schedule concurrently, records the
//! snapshot in the [`DutyRegistry`] and enqueues one event per started or
//! ended member. A failing schedule is logged and skipped; its previous
//! state is left untouched so the next good fetch diffs against it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use relay_core::config::{PollerConfig, ScheduleConfig, TemplateConfig};
use relay_core::error::{RelayError, Result};
use relay_core::traits::ScheduleSource;
use relay_core::types::{
    EventOrigin, NotificationEvent, Recipient, RosterSnapshot, TransitionKind, TransportKind,
};
use relay_notify::Dispatcher;
use relay_notify::template::render;

use crate::diff::Transition;
use crate::registry::DutyRegistry;

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    fetched: AtomicU64,
    fetch_failures: AtomicU64,
    empty_rosters: AtomicU64,
    started: AtomicU64,
    ended: AtomicU64,
    enqueue_failures: AtomicU64,
}

/// Poller counters for the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub cycles: u64,
    pub fetched: u64,
    pub fetch_failures: u64,
    pub empty_rosters: u64,
    pub started: u64,
    pub ended: u64,
    pub enqueue_failures: u64,
}

/// What one cycle did, per schedule.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub transitions: Vec<(String, Transition)>,
    pub failed: Vec<String>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SchedulePoller {
    source: Arc<dyn ScheduleSource>,
    registry: Arc<DutyRegistry>,
    dispatcher: Dispatcher,
    templates: TemplateConfig,
    interval: Duration,
    fetch_timeout: Duration,
    counters: Counters,
    running: Mutex<Option<Running>>,
}

impl SchedulePoller {
    pub fn new(
        source: Arc<dyn ScheduleSource>,
        registry: Arc<DutyRegistry>,
        dispatcher: Dispatcher,
        config: &PollerConfig,
        templates: TemplateConfig,
    ) -> Self {
        Self {
            source,
            registry,
            dispatcher,
            templates,
            interval: config.interval(),
            fetch_timeout: config.fetch_timeout(),
            counters: Counters::default(),
            running: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<DutyRegistry> {
        &self.registry
    }

    /// Spawn the polling loop. Calling it while already running is a no-op.
    pub async fn start(self: &Arc<Self>, schedules: Vec<ScheduleConfig>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("⏱️ Poller already running");
            return;
        }
        tracing::info!(
            "⏱️ Poller started: {} schedules every {}s via {}",
            schedules.len(),
            self.interval.as_secs(),
            self.source.name()
        );

        let (shutdown, mut rx) = watch::channel(false);
        let poller = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poller.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = rx.changed() => break,
                    _ = interval.tick() => {
                        poller.poll_once(&schedules).await;
                    }
                }
            }
            tracing::info!("⏱️ Poller stopped");
        });
        *running = Some(Running { shutdown, handle });
    }

    /// Stop the loop and wait for an in-progress cycle to finish.
    /// Safe to call when not running.
    pub async fn stop(&self) {
        let Some(Running { shutdown, handle }) = self.running.lock().await.take() else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            tracing::error!("⏱️ Poller task ended abnormally: {e}");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Run one polling cycle over `schedules`.
    pub async fn poll_once(&self, schedules: &[ScheduleConfig]) -> CycleReport {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        let results = futures::future::join_all(schedules.iter().map(|s| self.poll_schedule(s))).await;

        let mut report = CycleReport::default();
        for (schedule, result) in schedules.iter().zip(results) {
            match result {
                Ok(transition) => report.transitions.push((schedule.name.clone(), transition)),
                Err(_) => report.failed.push(schedule.name.clone()),
            }
        }
        report
    }

    async fn poll_schedule(&self, schedule: &ScheduleConfig) -> Result<Transition> {
        let snapshot = match tokio::time::timeout(self.fetch_timeout, self.source.current(schedule)).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("⚠️ Fetch failed for '{}': {e}", schedule.name);
                return Err(e);
            }
            Err(_) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "⚠️ Fetch for '{}' timed out after {}s",
                    schedule.name,
                    self.fetch_timeout.as_secs()
                );
                return Err(RelayError::Timeout(format!("fetch {}", schedule.name)));
            }
        };
        self.counters.fetched.fetch_add(1, Ordering::Relaxed);

        if snapshot.is_empty() && schedule.expect_members {
            self.counters.empty_rosters.fetch_add(1, Ordering::Relaxed);
            tracing::error!("🚫 Schedule '{}' returned nobody on call, skipping", schedule.name);
            return Err(RelayError::EmptyRoster(schedule.name.clone()));
        }

        let transition = self.registry.record(&schedule.name, snapshot.clone()).await;
        if !transition.is_empty() {
            tracing::info!(
                "🔄 '{}': {} started, {} ended",
                schedule.name,
                transition.started.len(),
                transition.ended.len()
            );
        }
        self.emit(schedule, &snapshot, &transition).await;
        Ok(transition)
    }

    async fn emit(&self, schedule: &ScheduleConfig, snapshot: &RosterSnapshot, transition: &Transition) {
        let changes = transition
            .started
            .iter()
            .map(|m| (m, TransitionKind::Started))
            .chain(transition.ended.iter().map(|m| (m, TransitionKind::Ended)));

        for (member, kind) in changes {
            match kind {
                TransitionKind::Started => self.counters.started.fetch_add(1, Ordering::Relaxed),
                TransitionKind::Ended => self.counters.ended.fetch_add(1, Ordering::Relaxed),
            };
            let Some(event) = self.build_event(schedule, snapshot, member, kind) else {
                continue;
            };
            if let Err(e) = self.dispatcher.enqueue_within(event, self.fetch_timeout).await {
                self.counters.enqueue_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("📮 Could not queue {kind:?} event for {member} on '{}': {e}", schedule.name);
            }
        }
    }

    fn build_event(
        &self,
        schedule: &ScheduleConfig,
        snapshot: &RosterSnapshot,
        member: &str,
        kind: TransitionKind,
    ) -> Option<NotificationEvent> {
        let (title, text) = match kind {
            TransitionKind::Started => (&self.templates.start_title, &self.templates.start),
            TransitionKind::Ended => (&self.templates.end_title, &self.templates.end),
        };
        let title = render(title, &schedule.name);
        let text = render(text, &schedule.name);
        let delivery = &snapshot.delivery;

        let event = match (delivery.transport, delivery.transport.push_channel()) {
            (TransportKind::Callback, _) => {
                let Some(url) = delivery.callback_url.as_deref() else {
                    tracing::error!("🔗 Schedule '{}' has no callback_url, dropping event", schedule.name);
                    return None;
                };
                NotificationEvent::callback(url, &title, &text)
            }
            (_, Some(channel)) => NotificationEvent::push(Recipient::user_id(member), channel, &title, &text),
            (_, None) => return None,
        };
        Some(event.with_origin(EventOrigin::Roster {
            schedule: schedule.name.clone(),
            member: member.to_string(),
            transition: kind,
        }))
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            fetched: self.counters.fetched.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            empty_rosters: self.counters.empty_rosters.load(Ordering::Relaxed),
            started: self.counters.started.load(Ordering::Relaxed),
            ended: self.counters.ended.load(Ordering::Relaxed),
            enqueue_failures: self.counters.enqueue_failures.load(Ordering::Relaxed),
        }
    }
}
