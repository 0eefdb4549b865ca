// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The background worker: session watchdog and beacon sender on one
//! dedicated thread.
//!
//! The worker owns a mailbox of [`AgentAction`]s and a deadline
//! [`Scheduler`]; it wakes up for whichever comes first: a mailbox
//! message (session registration, stop) or a periodic duty (send,
//! split check, cache eviction). Application threads never block on it
//! beyond a bounded channel send.

mod scheduler;

use crate::cache::BeaconCache;
use crate::config::{CacheConfig, OpenKitConfig, ServerConfig};
use crate::core::session::{SessionInner, SessionProxyInner};
use crate::http::{self, HttpClient};
use crate::providers::TimeProvider;
use arc_swap::ArcSwap;
use scheduler::Scheduler;
use std::ops::ControlFlow;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CONTINUE: ControlFlow<()> = ControlFlow::Continue(());
const BREAK: ControlFlow<()> = ControlFlow::Break(());

/// Cadence of the split checks; send and eviction cadences come from
/// the server and cache configurations.
const SPLIT_CHECK_INTERVAL: Duration = Duration::from_millis(1_000);

const MAILBOX_CAPACITY: usize = 5_000;

pub(crate) enum AgentAction {
    RegisterSession {
        proxy: Arc<SessionProxyInner>,
        session: Arc<SessionInner>,
    },
    Lifecycle(LifecycleAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleAction {
    SendData,
    CheckSplits,
    EvictCache,
    Stop,
}

/// Everything the worker shares with the rest of the instance.
pub(crate) struct AgentContext {
    pub config: Arc<OpenKitConfig>,
    pub cache: Arc<BeaconCache>,
    pub cache_config: CacheConfig,
    pub server_config: Arc<ArcSwap<ServerConfig>>,
    pub time: Arc<dyn TimeProvider>,
}

struct AgentWorker {
    context: AgentContext,
    client: Box<dyn HttpClient>,
    mailbox: mpsc::Receiver<AgentAction>,
    cancellation_token: CancellationToken,
    deadlines: Scheduler<LifecycleAction>,
    /// Initial status request succeeded; the server config is live.
    configured: bool,
    proxies: Vec<Arc<SessionProxyInner>>,
    sessions: Vec<Arc<SessionInner>>,
}

impl AgentWorker {
    async fn recv_next_action(&mut self) -> AgentAction {
        let action = if let Some((deadline, deadline_action)) = self.deadlines.next_deadline() {
            if deadline.checked_duration_since(Instant::now()).is_none() {
                return AgentAction::Lifecycle(*deadline_action);
            }
            let deadline_action = *deadline_action;
            match tokio::time::timeout_at(deadline.into(), self.mailbox.recv()).await {
                Ok(mailbox_action) => mailbox_action,
                Err(_) => Some(AgentAction::Lifecycle(deadline_action)),
            }
        } else {
            self.mailbox.recv().await
        };

        // A closed mailbox means the handle is gone; drain and stop.
        action.unwrap_or(AgentAction::Lifecycle(LifecycleAction::Stop))
    }

    async fn run(mut self) {
        let _ = self.deadlines.schedule_events([
            LifecycleAction::SendData,
            LifecycleAction::CheckSplits,
            LifecycleAction::EvictCache,
        ]);
        loop {
            if self.cancellation_token.is_cancelled() {
                return;
            }
            let action = self.recv_next_action().await;
            match self.dispatch(action).await {
                ControlFlow::Continue(()) => {}
                ControlFlow::Break(()) => break,
            }
        }
    }

    async fn dispatch(&mut self, action: AgentAction) -> ControlFlow<()> {
        match action {
            AgentAction::RegisterSession { proxy, session } => {
                debug!(
                    session.number = session.beacon().key().session_number,
                    "Session registered for sending"
                );
                session.mark_active();
                self.proxies.push(proxy);
                self.sessions.push(session);
            }
            AgentAction::Lifecycle(LifecycleAction::SendData) => {
                self.send_data().await;
                let _ = self.deadlines.schedule_event(LifecycleAction::SendData);
            }
            AgentAction::Lifecycle(LifecycleAction::CheckSplits) => {
                self.check_splits();
                let _ = self.deadlines.schedule_event(LifecycleAction::CheckSplits);
            }
            AgentAction::Lifecycle(LifecycleAction::EvictCache) => {
                self.evict_cache();
                let _ = self.deadlines.schedule_event(LifecycleAction::EvictCache);
            }
            AgentAction::Lifecycle(LifecycleAction::Stop) => {
                self.flush_and_stop().await;
                return BREAK;
            }
        }
        CONTINUE
    }

    /// Performs the new-session status request once; until it succeeds
    /// the worker keeps buffering and retries on the next send tick.
    async fn ensure_configured(&mut self) -> bool {
        if self.configured {
            return true;
        }
        let server_id = self.context.server_config.load().server_id;
        match http::send_status_request(self.client.as_ref(), &self.context.config, server_id).await
        {
            Ok(response) => {
                self.apply_response_attributes(&response.attributes);
                self.configured = true;
                debug!("Initial server configuration received");
                true
            }
            Err(err) => {
                warn!(error = %err, "Status request failed, will retry");
                false
            }
        }
    }

    fn apply_response_attributes(&mut self, attributes: &libdd_rum_protocol::ResponseAttributes) {
        let current = self.context.server_config.load_full();
        let merged = current.merge(attributes);
        if *current != merged {
            debug!(
                server.capture = merged.capture,
                server.send_interval_ms = merged.send_interval.as_millis() as u64,
                server.multiplicity = merged.multiplicity,
                "Server configuration updated"
            );
        }
        self.deadlines
            .set_delay(&LifecycleAction::SendData, merged.send_interval);
        self.context.server_config.store(Arc::new(merged));
    }

    async fn send_data(&mut self) {
        if !self.ensure_configured().await {
            return;
        }
        let sessions = self.sessions.clone();
        for session in &sessions {
            let beacon = session.beacon();
            if !beacon.data_capture_enabled() {
                // Capture revoked (or the session is sampled out):
                // buffered data must never reach the wire.
                beacon.clear_data();
                continue;
            }
            if !beacon.has_data_to_send() {
                continue;
            }
            match beacon.send(self.client.as_ref(), None).await {
                Ok(Some(response)) => self.apply_response_attributes(&response.attributes),
                Ok(None) => {}
                Err(err) => {
                    // The chunk was restored; next tick retries.
                    warn!(error = %err, "Beacon send failed, keeping data for retry");
                }
            }
        }
        self.prune_finished_sessions();
    }

    fn prune_finished_sessions(&mut self) {
        self.sessions.retain(|session| {
            if session.is_finishing() && !session.beacon().has_data_to_send() {
                session.beacon().clear_data();
                session.finish_drained();
                return false;
            }
            true
        });
        self.proxies.retain(|proxy| !proxy.is_ended());
    }

    fn check_splits(&mut self) {
        // Sessions split only once the server delivered its timeouts;
        // before that the defaults are placeholders, not policy.
        if !self.configured {
            return;
        }
        let now = self.context.time.now_millis();
        let server = self.context.server_config.load_full();
        let mut successors = Vec::new();
        for proxy in &self.proxies {
            if let Some(successor) = proxy.split_if_needed(now, &server) {
                successor.mark_active();
                successors.push(successor);
            }
        }
        self.sessions.append(&mut successors);
    }

    fn evict_cache(&mut self) {
        let cache = &self.context.cache;
        let config = &self.context.cache_config;
        let min_timestamp =
            self.context.time.now_millis() - config.max_record_age.as_millis() as i64;
        cache.evict_records_by_age(min_timestamp);
        cache.evict_records_by_size(config.upper_memory_boundary, config.lower_memory_boundary);
    }

    /// Terminal drain: end whatever is still open, push the remains
    /// out once, then delete every entry. Sessions end up FINISHED
    /// whether or not the collector was reachable.
    async fn flush_and_stop(&mut self) {
        for proxy in &self.proxies {
            proxy.end();
        }
        let configured = self.ensure_configured().await;
        for session in &self.sessions {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            let beacon = session.beacon();
            if configured && beacon.data_capture_enabled() && beacon.has_data_to_send() {
                if let Err(err) = beacon.send(self.client.as_ref(), None).await {
                    warn!(error = %err, "Final beacon send failed, discarding data");
                }
            }
            beacon.clear_data();
            session.finish_drained();
        }
        self.deadlines.clear_pending();
        debug!("Agent worker stopped");
    }
}

#[derive(Default)]
struct ShutdownBarrier {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownBarrier {
    #[allow(clippy::unwrap_used)]
    fn wait_for_shutdown(&self) {
        drop(
            self.condvar
                .wait_while(self.done.lock().unwrap(), |done| !*done)
                .unwrap(),
        )
    }

    #[allow(clippy::unwrap_used)]
    fn shutdown_finished(&self) {
        *self.done.lock().unwrap() = true;
        self.condvar.notify_all();
    }
}

/// Cloneable handle to the worker; safe to use across threads.
#[derive(Clone)]
pub(crate) struct AgentHandle {
    sender: mpsc::Sender<AgentAction>,
    shutdown: Arc<ShutdownBarrier>,
    cancellation_token: CancellationToken,
}

impl AgentHandle {
    pub fn register_session(&self, proxy: Arc<SessionProxyInner>, session: Arc<SessionInner>) {
        if self
            .sender
            .try_send(AgentAction::RegisterSession { proxy, session })
            .is_err()
        {
            warn!("Agent mailbox unavailable, session will not be transmitted");
        }
    }

    pub fn send_stop(&self) {
        if self
            .sender
            .try_send(AgentAction::Lifecycle(LifecycleAction::Stop))
            .is_err()
        {
            // Mailbox full or closed; cancellation still stops the
            // worker at the next action boundary.
            self.cancellation_token.cancel();
        }
    }

    /// Blocks until the worker finished its terminal drain, cancelling
    /// whatever is still running once the deadline passes.
    pub fn wait_for_shutdown_deadline(&self, deadline: Instant) {
        let token = self.cancellation_token.clone();
        std::thread::spawn(move || {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            token.cancel();
        });
        self.shutdown.wait_for_shutdown();
    }
}

/// Starts the worker on its own thread, driving a current-thread tokio
/// runtime.
pub(crate) fn spawn(
    context: AgentContext,
    client: Box<dyn HttpClient>,
) -> anyhow::Result<AgentHandle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
    let cancellation_token = CancellationToken::new();
    let shutdown = Arc::new(ShutdownBarrier::default());

    let send_interval = context.server_config.load().send_interval;
    let eviction_interval = context.cache_config.record_check_interval;
    let worker = AgentWorker {
        context,
        client,
        mailbox,
        cancellation_token: cancellation_token.clone(),
        deadlines: Scheduler::new(vec![
            (send_interval, LifecycleAction::SendData),
            (SPLIT_CHECK_INTERVAL, LifecycleAction::CheckSplits),
            (eviction_interval, LifecycleAction::EvictCache),
        ]),
        configured: false,
        proxies: Vec::new(),
        sessions: Vec::new(),
    };

    let notify_shutdown = shutdown.clone();
    std::thread::Builder::new()
        .name("rum-agent-worker".to_string())
        .spawn(move || {
            runtime.block_on(worker.run());
            runtime.shutdown_background();
            notify_shutdown.shutdown_finished();
        })?;

    Ok(AgentHandle {
        sender,
        shutdown,
        cancellation_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionProxyInner;
    use crate::http::MockClient;
    use crate::testing;

    struct WorkerFixture {
        worker: AgentWorker,
        client: MockClient,
        context_fixture: testing::TestContext,
        _sender: mpsc::Sender<AgentAction>,
    }

    fn worker_fixture() -> WorkerFixture {
        let f = testing::beacon_fixture();
        let client = MockClient::new();
        let (sender, mailbox) = mpsc::channel(16);
        let worker = AgentWorker {
            context: AgentContext {
                config: f.config.clone(),
                cache: f.cache.clone(),
                cache_config: CacheConfig::default(),
                server_config: f.server_config.clone(),
                time: f.clock.clone(),
            },
            client: Box::new(client.clone()),
            mailbox,
            cancellation_token: CancellationToken::new(),
            deadlines: Scheduler::new(vec![
                (Duration::from_millis(2_000), LifecycleAction::SendData),
                (SPLIT_CHECK_INTERVAL, LifecycleAction::CheckSplits),
                (Duration::from_millis(2_000), LifecycleAction::EvictCache),
            ]),
            configured: false,
            proxies: Vec::new(),
            sessions: Vec::new(),
        };
        WorkerFixture {
            worker,
            client,
            context_fixture: f,
            _sender: sender,
        }
    }

    fn register(fixture: &mut WorkerFixture) -> Arc<SessionProxyInner> {
        let (proxy, initial) = SessionProxyInner::new(fixture.context_fixture.creator(17));
        initial.mark_active();
        fixture.worker.proxies.push(proxy.clone());
        fixture.worker.sessions.push(initial);
        proxy
    }

    #[tokio::test]
    async fn status_request_configures_once() {
        let mut f = worker_fixture();
        f.client.enqueue_response(200, "type=m&cp=1&id=4&sr=10&bl=4096");
        assert!(f.worker.ensure_configured().await);
        assert!(f.worker.ensure_configured().await);

        let server = f.worker.context.server_config.load();
        assert_eq!(server.server_id, 4);
        assert_eq!(server.send_interval, Duration::from_secs(10));
        assert_eq!(server.beacon_size_bytes, 4096);
        // Only one GET went out.
        assert_eq!(f.client.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn failed_status_request_is_retried() {
        let mut f = worker_fixture();
        f.client.enqueue_response(503, "");
        f.client.enqueue_response(200, "cp=1");
        assert!(!f.worker.ensure_configured().await);
        assert!(f.worker.ensure_configured().await);
    }

    #[tokio::test]
    async fn send_data_posts_and_merges_response() {
        let mut f = worker_fixture();
        register(&mut f);
        f.client.enqueue_response(200, "type=m");
        f.client.enqueue_response(200, "mp=3");
        f.worker.send_data().await;

        let beacons = f.client.posted_beacons();
        assert_eq!(beacons.len(), 1);
        assert!(beacons[0].contains("&et=18&"));
        assert_eq!(f.worker.context.server_config.load().multiplicity, 3);
    }

    #[tokio::test]
    async fn send_failure_keeps_data_buffered() {
        let mut f = worker_fixture();
        register(&mut f);
        f.client.enqueue_response(200, "type=m");
        f.client.enqueue_response(500, "");
        f.worker.send_data().await;
        assert!(f.worker.sessions[0].beacon().has_data_to_send());

        f.client.clear_responses();
        f.client.enqueue_response(200, "");
        f.worker.send_data().await;
        assert!(!f.worker.sessions[0].beacon().has_data_to_send());
    }

    #[tokio::test]
    async fn capture_off_discards_buffered_data() {
        let mut f = worker_fixture();
        register(&mut f);
        f.client.enqueue_response(200, "type=m&cp=0");
        f.worker.send_data().await;
        assert!(!f.worker.sessions[0].beacon().has_data_to_send());
        // Only the status request went out, no beacon POST.
        assert!(f.client.posted_beacons().is_empty());
    }

    #[tokio::test]
    async fn finished_sessions_are_pruned_after_drain() {
        let mut f = worker_fixture();
        let proxy = register(&mut f);
        proxy.end();
        f.client.enqueue_response(200, "type=m");
        f.worker.send_data().await;
        assert!(f.worker.sessions.is_empty());
        assert!(f.worker.proxies.is_empty());
    }

    #[tokio::test]
    async fn split_check_registers_successor() {
        let mut f = worker_fixture();
        register(&mut f);
        f.worker.configured = true;
        f.worker.context.server_config.store(Arc::new(ServerConfig {
            session_timeout: Duration::from_secs(60),
            ..Default::default()
        }));
        f.context_fixture.clock.advance_millis(61_000);
        f.worker.check_splits();
        assert_eq!(f.worker.sessions.len(), 2);
        assert!(f.worker.sessions[0].is_finishing());
    }

    #[tokio::test]
    async fn splits_wait_for_server_configuration() {
        let mut f = worker_fixture();
        register(&mut f);
        f.worker.context.server_config.store(Arc::new(ServerConfig {
            session_timeout: Duration::from_secs(60),
            ..Default::default()
        }));
        // Idle well past the timeout, but the status request has not
        // succeeded yet: no split happens.
        f.context_fixture.clock.advance_millis(3_600_000);
        f.worker.check_splits();
        assert_eq!(f.worker.sessions.len(), 1);
        assert!(!f.worker.sessions[0].is_finishing());
    }

    #[tokio::test]
    async fn eviction_runs_on_both_axes() {
        let mut f = worker_fixture();
        let key = crate::cache::BeaconKey::new(99, 0);
        f.worker.context.cache.add_event_data(key, 0, "old".into());
        f.context_fixture
            .clock
            .set_millis(CacheConfig::default().max_record_age.as_millis() as i64 + 10_000);
        f.worker.evict_cache();
        assert!(f.worker.context.cache.is_empty(key));
    }

    #[tokio::test]
    async fn flush_and_stop_finishes_everything() {
        let mut f = worker_fixture();
        let proxy = register(&mut f);
        proxy.identify_user("alice");
        f.client.enqueue_response(200, "type=m");
        f.worker.flush_and_stop().await;

        let beacons = f.client.posted_beacons();
        assert_eq!(beacons.len(), 1);
        assert!(beacons[0].contains("&et=60&"));
        assert!(beacons[0].contains("&et=19&"));
        assert_eq!(f.worker.context.cache.size_bytes(), 0);
        assert!(f.worker.sessions.iter().all(|s| !s.beacon().has_data_to_send()));
    }

    #[test]
    fn spawned_worker_drains_on_stop() {
        let f = testing::beacon_fixture();
        let client = MockClient::new();
        client.enqueue_response(200, "type=m");
        let handle = spawn(
            AgentContext {
                config: f.config.clone(),
                cache: f.cache.clone(),
                cache_config: CacheConfig::default(),
                server_config: f.server_config.clone(),
                time: f.clock.clone(),
            },
            Box::new(client.clone()),
        )
        .unwrap();

        let (proxy, initial) = SessionProxyInner::new(f.creator(21));
        proxy.identify_user("bob");
        handle.register_session(proxy.clone(), initial);
        proxy.end();
        handle.send_stop();
        handle.wait_for_shutdown_deadline(Instant::now() + Duration::from_secs(5));

        let posted = client.posted_beacons().join("&");
        assert!(posted.contains("et=18"));
        assert!(posted.contains("et=60"));
        assert!(posted.contains("et=19"));
    }

    #[test]
    fn handle_is_send_and_sync() {
        fn is_send<T: Send>() {}
        fn is_sync<T: Sync>() {}
        is_send::<AgentHandle>();
        is_sync::<AgentHandle>();
    }
}
