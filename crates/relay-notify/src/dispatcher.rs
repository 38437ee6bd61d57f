//! Notification dispatcher: a bounded queue drained by a worker pool.
//!
//! ```text
//!  poller / gateway ──enqueue──▶ [ mpsc queue ] ──▶ DispatchWorker
//!                                                     │  (≤ workers in flight)
//!                                                     ├─ resolve identity
//!                                                     ├─ transport / callback
//!                                                     └─ AuditSink::record
//! ```
//!
//! Producers never wait on delivery. A full queue is reported back to the
//! producer as `QueueFull`; every dequeued event ends in exactly one audit
//! record, success or failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc, watch};

use relay_core::config::DispatcherConfig;
use relay_core::error::{RelayError, Result};
use relay_core::traits::{CallbackClient, Transport};
use relay_core::types::{
    AuditRecord, CallbackPayload, Channel, Delivery, EventOrigin, Identity, NotificationEvent, Recipient,
};

use crate::audit::AuditSink;
use crate::identity::{IdentityResolver, ensure_reachable};

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Dispatcher counters for the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: usize,
    pub capacity: usize,
}

/// Everything a worker needs to deliver one event.
pub struct DeliveryContext {
    pub resolver: Arc<IdentityResolver>,
    pub transport: Arc<dyn Transport>,
    pub callback: Arc<dyn CallbackClient>,
    pub audit: AuditSink,
}

/// Producer handle. Clone freely.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<NotificationEvent>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Create the queue and its (not yet running) worker.
    pub fn new(config: &DispatcherConfig, ctx: DeliveryContext) -> (Self, DispatchWorker) {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        let dispatcher = Self {
            tx,
            capacity,
            counters: counters.clone(),
        };
        let worker = DispatchWorker {
            rx,
            ctx: Arc::new(ctx),
            workers: config.workers.max(1),
            delivery_timeout: config.delivery_timeout(),
            counters,
        };
        (dispatcher, worker)
    }

    /// Queue an event without waiting.
    pub fn enqueue(&self, event: NotificationEvent) -> Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(ev)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("📮 Queue full, rejected {} [{}]", ev.channel_label(), ev.id);
                Err(RelayError::QueueFull(self.capacity))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::QueueClosed)
            }
        }
    }

    /// Queue an event, waiting at most `wait` for room.
    pub async fn enqueue_within(&self, event: NotificationEvent, wait: Duration) -> Result<()> {
        match self.tx.send_timeout(event, wait).await {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::QueueFull(self.capacity))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::QueueClosed)
            }
        }
    }

    /// Events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pending: self.pending(),
            capacity: self.capacity,
        }
    }
}

/// Consumer half: pulls events and runs deliveries concurrently.
pub struct DispatchWorker {
    rx: mpsc::Receiver<NotificationEvent>,
    ctx: Arc<DeliveryContext>,
    workers: usize,
    delivery_timeout: Duration,
    counters: Arc<Counters>,
}

impl DispatchWorker {
    /// Run until shutdown. Events already queued are still delivered and
    /// in-flight deliveries are awaited before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.workers));
        tracing::info!("📮 Dispatcher started ({} workers)", self.workers);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = self.rx.recv() => match next {
                    Some(event) => self.spawn(event, &permits).await,
                    None => break,
                },
            }
        }

        // Refuse new work, finish what was accepted.
        self.rx.close();
        let queued = self.rx.len();
        while let Some(event) = self.rx.recv().await {
            self.spawn(event, &permits).await;
        }
        let _ = permits.acquire_many(self.workers as u32).await;
        tracing::info!("📮 Dispatcher stopped ({queued} queued events drained)");
    }

    async fn spawn(&self, event: NotificationEvent, permits: &Arc<Semaphore>) {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            return;
        };
        let ctx = self.ctx.clone();
        let counters = self.counters.clone();
        let timeout = self.delivery_timeout;
        tokio::spawn(async move {
            let record = deliver(&ctx, &event, timeout).await;
            if record.success {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            ctx.audit.record(record);
            drop(permit);
        });
    }
}

/// Deliver one event and describe the outcome as an audit record.
pub async fn deliver(ctx: &DeliveryContext, event: &NotificationEvent, timeout: Duration) -> AuditRecord {
    let channel = event.channel_label();
    match &event.delivery {
        Delivery::Callback { url } => {
            let user_id = match &event.origin {
                EventOrigin::Roster { member, .. } => member.as_str(),
                EventOrigin::Inbound => "",
            };
            let payload = CallbackPayload::from_event(event);
            let outcome = with_timeout(timeout, ctx.callback.post(url, &payload)).await;
            outcome_record(event, user_id, url, &channel, outcome)
        }
        Delivery::Push { recipient, channel: push } => {
            let identity = match resolve(ctx, recipient, *push).await {
                Ok(identity) => identity,
                Err((user_id, e)) => {
                    tracing::warn!("❌ {channel} [{}] for {user_id}: {e}", event.id);
                    return AuditRecord::new(&user_id, "", &channel, false, &e.to_string());
                }
            };
            let contact = contact_for(&identity, *push);
            let outcome = with_timeout(
                timeout,
                ctx.transport.deliver(*push, &identity, &event.id, &event.message),
            )
            .await;
            outcome_record(event, &identity.id, &contact, &channel, outcome)
        }
    }
}

async fn resolve(
    ctx: &DeliveryContext,
    recipient: &Recipient,
    channel: Channel,
) -> std::result::Result<Identity, (String, RelayError)> {
    match recipient {
        Recipient::Lookup(key) => ctx
            .resolver
            .resolve_for(key, channel)
            .await
            .map_err(|e| (key.as_str().to_string(), e)),
        Recipient::Resolved(identity) => ensure_reachable(identity, channel)
            .map(|()| identity.as_ref().clone())
            .map_err(|e| (identity.id.clone(), e)),
    }
}

fn contact_for(identity: &Identity, channel: Channel) -> String {
    match channel {
        Channel::Phone | Channel::Sms => identity.verified_phone().unwrap_or_default().to_string(),
        Channel::Slack => identity
            .slack_user_id
            .clone()
            .unwrap_or_else(|| identity.id.clone()),
    }
}

async fn with_timeout<F>(timeout: Duration, fut: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| Err(RelayError::Timeout(format!("delivery exceeded {}s", timeout.as_secs()))))
}

fn outcome_record(
    event: &NotificationEvent,
    user_id: &str,
    recipient: &str,
    channel: &str,
    outcome: Result<()>,
) -> AuditRecord {
    match outcome {
        Ok(()) => {
            tracing::info!("✅ {channel} delivered to {recipient} [{}]", event.id);
            AuditRecord::new(user_id, recipient, channel, true, &event.message)
        }
        Err(e) => {
            tracing::warn!("❌ {channel} to {recipient} failed [{}]: {e}", event.id);
            AuditRecord::new(user_id, recipient, channel, false, &e.to_string())
        }
    }
}
