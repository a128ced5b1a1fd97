//! Poll loop and reply-task supervision.

use std::{sync::Arc, time::Duration};

use {
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use {
    crate::inflight::{InFlight, InFlightGuard},
    relais_common::InboundMessage,
    relais_config::RelaisConfig,
    relais_dedup::DedupCache,
    relais_media::MediaStore,
    relais_routing::Router,
    relais_surface::{SurfaceDriver, SurfaceLock},
};

/// Interval between stuck-lock watchdog checks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Owns the poll loop: detects new messages, dedups them, spawns one reply
/// task per group, and supervises shutdown.
pub struct Supervisor {
    config: RelaisConfig,
    driver: Arc<dyn SurfaceDriver>,
    router: Arc<Router>,
    cache: Arc<DedupCache>,
    media: Arc<MediaStore>,
    lock: SurfaceLock,
    inflight: InFlight,
    cancel: CancellationToken,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RelaisConfig,
        driver: Arc<dyn SurfaceDriver>,
        router: Arc<Router>,
        cache: Arc<DedupCache>,
        media: Arc<MediaStore>,
        lock: SurfaceLock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            driver,
            router,
            cache,
            media,
            lock,
            inflight: InFlight::new(),
            cancel,
        }
    }

    /// Run until cancelled, then drain in-flight tasks within the grace
    /// period and abort the rest.
    pub async fn run(mut self) {
        let watchdog = self
            .lock
            .spawn_watchdog(WATCHDOG_INTERVAL, self.cancel.child_token());

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut iteration: u64 = 0;

        info!(
            groups = self.config.groups.len(),
            interval_secs = self.config.poller.interval_secs,
            "supervisor started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            iteration += 1;

            self.reap_finished(&mut tasks);
            self.poll_cycle(&mut tasks).await;

            if iteration % self.config.poller.cleanup_every.max(1) == 0 {
                self.periodic_cleanup().await;
            }

            let sleep = self.cycle_sleep();
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(sleep) => {},
            }
        }

        info!(in_flight = tasks.len(), "supervisor stopping");
        self.drain(tasks).await;
        let _ = watchdog.await;
    }

    /// One poll of the chat surface, spawning reply tasks for new messages.
    async fn poll_cycle(&self, tasks: &mut JoinSet<()>) {
        // Reading the chat surface is UI work too: take the lock, and skip
        // the cycle rather than pile up if a reply task is mid-session.
        let guard = match self
            .lock
            .acquire("poll", self.config.surface.lock_timeout())
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                debug!(error = %e, "surface busy, skipping poll cycle");
                return;
            },
        };

        if let Err(e) = self.driver.switch_to(&self.config.surface.chat_surface).await {
            warn!(error = %e, "cannot reach chat surface");
            return;
        }

        let mut inbound = Vec::new();
        for group in self.config.groups.keys() {
            // A group with a reply task running would only yield messages
            // dispatch drops anyway; don't spend lock time polling it.
            if self.inflight.contains(group) {
                debug!(group, "group busy, skipping poll");
                continue;
            }
            match self.driver.poll_inbound(group).await {
                Ok(messages) => inbound.extend(messages),
                Err(e) if e.is_transient() => {
                    debug!(group, error = %e, "transient poll error");
                },
                Err(e) => warn!(group, error = %e, "poll failed"),
            }
        }
        drop(guard);

        for message in inbound {
            self.dispatch(message, tasks).await;
        }
    }

    /// Dedup-check a message and spawn its reply task.
    async fn dispatch(&self, message: InboundMessage, tasks: &mut JoinSet<()>) {
        if !self.router.is_routable(&message.group) {
            debug!(group = %message.group, "no route, ignoring message");
            return;
        }
        if self.cache.is_cached(&message.group, &message.content).await {
            return;
        }
        let Some(inflight) = self.inflight.try_begin(&message.group) else {
            debug!(group = %message.group, "group busy, deferring message");
            return;
        };

        // Mark before processing: a crash mid-reply drops the reply rather
        // than duplicating it after restart.
        match self.cache.insert(&message.group, &message.content).await {
            Ok(_) => {},
            Err(e) => {
                error!(group = %message.group, error = %e, "cache write failed, not replying");
                return;
            },
        }

        info!(group = %message.group, kind = ?message.kind, "processing message");
        let router = Arc::clone(&self.router);
        let driver = Arc::clone(&self.driver);
        let cache = Arc::clone(&self.cache);
        let lock = self.lock.clone();
        let chat_surface = self.config.surface.chat_surface.clone();
        let lock_timeout = self.config.surface.lock_timeout();
        tasks.spawn(async move {
            process_message(
                router,
                driver,
                cache,
                lock,
                &chat_surface,
                lock_timeout,
                message,
                inflight,
            )
            .await;
        });
    }

    fn reap_finished(&self, tasks: &mut JoinSet<()>) {
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                error!(error = %e, "reply task panicked");
            }
        }
    }

    async fn periodic_cleanup(&self) {
        match self.media.cleanup_older_than(self.config.media.max_age()).await {
            Ok(removed) if removed > 0 => debug!(removed, "temp images cleaned"),
            Ok(_) => {},
            Err(e) => warn!(error = %e, "temp image cleanup failed"),
        }
        match self.cache.purge_expired().await {
            Ok(removed) if removed > 0 => debug!(removed, "cache entries purged"),
            Ok(_) => {},
            Err(e) => warn!(error = %e, "cache purge failed"),
        }
    }

    /// Base interval, stretched by in-flight work when adaptive mode is on.
    fn cycle_sleep(&self) -> Duration {
        let base = self.config.poller.interval();
        if !self.config.poller.adaptive {
            return base;
        }
        let stretched = base.saturating_mul(1 + self.inflight.len() as u32);
        stretched.min(self.config.poller.max_interval())
    }

    async fn drain(&mut self, mut tasks: JoinSet<()>) {
        let grace = self.config.poller.shutdown_grace();
        let deadline = tokio::time::Instant::now() + grace;
        while !tasks.is_empty() {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => {},
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining = tasks.len(), "grace period over, aborting reply tasks");
                    tasks.abort_all();
                    break;
                },
            }
        }
    }
}

/// One reply task: generate via the router, then deliver under the lock.
#[allow(clippy::too_many_arguments)]
async fn process_message(
    router: Arc<Router>,
    driver: Arc<dyn SurfaceDriver>,
    cache: Arc<DedupCache>,
    lock: SurfaceLock,
    chat_surface: &str,
    lock_timeout: Duration,
    message: InboundMessage,
    _inflight: InFlightGuard,
) {
    let payload = match router.route(&message).await {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                group = %message.group,
                transient = e.is_transient(),
                error = %e,
                "reply generation failed"
            );
            return;
        },
    };
    if !payload.has_content() {
        warn!(group = %message.group, "empty reply, nothing to deliver");
        return;
    }

    // Delivery is UI work on the chat surface: serialize it.
    let guard = match lock.acquire(&message.group, lock_timeout).await {
        Ok(guard) => guard,
        Err(e) => {
            warn!(group = %message.group, error = %e, "could not lock surface for delivery");
            return;
        },
    };
    let delivered = async {
        driver.switch_to(chat_surface).await?;
        driver.deliver(&message.group, &payload).await
    }
    .await;
    drop(guard);

    match delivered {
        Ok(()) => {
            info!(group = %message.group, "reply delivered");
            // Cache our own reply so it is not picked up as a new inbound
            // message on the next poll.
            if let Some(text) = &payload.text
                && let Err(e) = cache.insert(&message.group, text).await
            {
                warn!(group = %message.group, error = %e, "could not cache outgoing reply");
            }
        },
        Err(e) => error!(group = %message.group, error = %e, "delivery failed"),
    }
}
