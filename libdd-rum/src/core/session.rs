// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sessions.
//!
//! [`SessionInner`] is one beacon-backed session instance.
//! [`SessionProxyInner`] is what the application actually holds: it
//! delegates to the current instance and transparently replaces it when
//! the watchdog splits the session (idle timeout, maximum duration).
//! [`SessionCreator`] stamps out instances sharing the session number,
//! advancing the sequence per split.

use crate::beacon::event_payload::EventPayloadError;
use crate::beacon::Beacon;
use crate::cache::BeaconCache;
use crate::config::{OpenKitConfig, PrivacyConfig, ServerConfig};
use crate::core::action::{ActionInner, ActionParent};
use crate::core::composite::NodeState;
use crate::core::web_request::{WebRequestParent, WebRequestTracerInner};
use crate::core::Child;
use crate::providers::Providers;
use crate::MutexExt;
use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Lifecycle phases of one session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SessionState {
    /// Created, beacon configured, start record not yet written.
    Configured,
    /// Start record written; not yet registered for sending.
    Initialized,
    /// Registered with the sender.
    Active,
    /// Ended or split away; awaiting the final drain.
    Finishing,
    /// Fully drained; the cache entry is gone.
    Finished,
}

struct SessionNode {
    node: NodeState<Child>,
    phase: SessionState,
}

pub(crate) struct SessionInner {
    beacon: Arc<Beacon>,
    state: Mutex<SessionNode>,
}

impl SessionInner {
    pub fn start(beacon: Beacon) -> Arc<Self> {
        let session = Arc::new(Self {
            beacon: Arc::new(beacon),
            state: Mutex::new(SessionNode {
                node: NodeState::new(),
                phase: SessionState::Configured,
            }),
        });
        session.beacon.start_session();
        session.state.lock_or_panic().phase = SessionState::Initialized;
        session
    }

    pub fn beacon(&self) -> &Arc<Beacon> {
        &self.beacon
    }

    pub fn state(&self) -> SessionState {
        self.state.lock_or_panic().phase
    }

    /// The sender registered this instance.
    pub fn mark_active(&self) {
        let mut state = self.state.lock_or_panic();
        if state.phase == SessionState::Initialized {
            state.phase = SessionState::Active;
        }
    }

    fn accepts_data(phase: SessionState) -> bool {
        phase < SessionState::Finishing
    }

    pub fn enter_action(self: &Arc<Self>, name: &str) -> Option<Arc<ActionInner>> {
        let mut state = self.state.lock_or_panic();
        if !Self::accepts_data(state.phase) {
            return None;
        }
        let action = ActionInner::enter(
            &self.beacon,
            ActionParent::Session(Arc::downgrade(self)),
            0,
            name,
        );
        state.node.store_child(Child::Action(action.clone()));
        Some(action)
    }

    pub fn trace_web_request(self: &Arc<Self>, url: &str) -> Option<Arc<WebRequestTracerInner>> {
        let mut state = self.state.lock_or_panic();
        if !Self::accepts_data(state.phase) {
            return None;
        }
        let tracer = WebRequestTracerInner::start(
            &self.beacon,
            WebRequestParent::Session(Arc::downgrade(self)),
            0,
            url,
        );
        state.node.store_child(Child::WebRequest(tracer.clone()));
        Some(tracer)
    }

    pub fn identify_user(&self, tag: &str) {
        if Self::accepts_data(self.state()) {
            self.beacon.identify_user(tag);
        }
    }

    pub fn report_crash(&self, name: &str, reason: Option<&str>, stack_trace: Option<&str>) {
        if Self::accepts_data(self.state()) {
            self.beacon.report_crash(name, reason, stack_trace);
        }
    }

    pub fn send_event(
        &self,
        name: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        if !Self::accepts_data(self.state()) {
            return Ok(());
        }
        self.beacon.send_event(name, attributes)
    }

    pub fn send_biz_event(
        &self,
        event_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        if !Self::accepts_data(self.state()) {
            return Ok(());
        }
        self.beacon.send_biz_event(event_type, attributes)
    }

    /// Ends this instance: closes every open child, then writes the
    /// session end record. Idempotent.
    pub fn end(self: &Arc<Self>, send_end_event: bool) {
        let children = {
            let mut state = self.state.lock_or_panic();
            if state.phase >= SessionState::Finishing {
                return;
            }
            state.phase = SessionState::Finishing;
            state.node.try_close();
            state.node.copy_of_children()
        };
        for child in &children {
            child.close();
        }
        if send_end_event {
            self.beacon.end_session();
        }
    }

    pub fn is_finishing(&self) -> bool {
        self.state() == SessionState::Finishing
    }

    /// The final drain completed and the cache entry was deleted.
    pub fn finish_drained(&self) {
        let mut state = self.state.lock_or_panic();
        if state.phase == SessionState::Finishing {
            state.phase = SessionState::Finished;
        }
    }

    pub fn on_child_closed(&self, child: &Child) {
        self.state
            .lock_or_panic()
            .node
            .remove_child(|c| c.same_as(child));
    }

    #[cfg(test)]
    pub fn child_count(&self) -> usize {
        self.state.lock_or_panic().node.child_count()
    }
}

/// Stamps out the session instances of one `create_session` call: the
/// session number is fixed, the sequence advances per split.
pub(crate) struct SessionCreator {
    config: Arc<OpenKitConfig>,
    privacy: PrivacyConfig,
    server_config: Arc<ArcSwap<ServerConfig>>,
    cache: Arc<BeaconCache>,
    providers: Providers,
    session_number: i32,
    client_ip: Option<String>,
    next_sequence: AtomicI32,
}

impl SessionCreator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<OpenKitConfig>,
        privacy: PrivacyConfig,
        server_config: Arc<ArcSwap<ServerConfig>>,
        cache: Arc<BeaconCache>,
        providers: Providers,
        session_number: i32,
        client_ip: Option<String>,
    ) -> Self {
        Self {
            config,
            privacy,
            server_config,
            cache,
            providers,
            session_number,
            client_ip,
            next_sequence: AtomicI32::new(0),
        }
    }

    pub fn create_session(&self) -> Arc<SessionInner> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let beacon = Beacon::new(
            self.config.clone(),
            self.privacy,
            self.server_config.clone(),
            self.cache.clone(),
            &self.providers,
            self.session_number,
            sequence,
            self.client_ip.as_deref(),
        );
        debug!(
            session.number = self.session_number,
            session.sequence = sequence,
            "Starting session instance"
        );
        SessionInner::start(beacon)
    }

    fn now_millis(&self) -> i64 {
        self.providers.time.now_millis()
    }
}

struct ProxyState {
    current: Arc<SessionInner>,
    last_user_tag: Option<String>,
    last_interaction: i64,
    ended: bool,
}

/// The application-facing session: delegates to the current instance
/// and swaps it out on splits.
pub(crate) struct SessionProxyInner {
    creator: SessionCreator,
    state: Mutex<ProxyState>,
}

impl SessionProxyInner {
    /// Returns the proxy and its initial instance (for sender
    /// registration).
    pub fn new(creator: SessionCreator) -> (Arc<Self>, Arc<SessionInner>) {
        let initial = creator.create_session();
        let last_interaction = creator.now_millis();
        let proxy = Arc::new(Self {
            state: Mutex::new(ProxyState {
                current: initial.clone(),
                last_user_tag: None,
                last_interaction,
                ended: false,
            }),
            creator,
        });
        (proxy, initial)
    }

    /// The current instance after recording user activity, or `None`
    /// when the proxy was ended.
    fn touch(&self) -> Option<Arc<SessionInner>> {
        let mut state = self.state.lock_or_panic();
        if state.ended {
            return None;
        }
        state.last_interaction = self.creator.now_millis();
        Some(state.current.clone())
    }

    pub fn enter_action(&self, name: &str) -> Option<Arc<ActionInner>> {
        self.touch()?.enter_action(name)
    }

    pub fn trace_web_request(&self, url: &str) -> Option<Arc<WebRequestTracerInner>> {
        self.touch()?.trace_web_request(url)
    }

    pub fn identify_user(&self, tag: &str) {
        let current = {
            let mut state = self.state.lock_or_panic();
            if state.ended {
                return;
            }
            state.last_interaction = self.creator.now_millis();
            if !tag.trim().is_empty() {
                state.last_user_tag = Some(tag.to_string());
            }
            state.current.clone()
        };
        current.identify_user(tag);
    }

    pub fn report_crash(&self, name: &str, reason: Option<&str>, stack_trace: Option<&str>) {
        if let Some(current) = self.touch() {
            current.report_crash(name, reason, stack_trace);
        }
    }

    pub fn send_event(
        &self,
        name: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        match self.touch() {
            Some(current) => current.send_event(name, attributes),
            None => Ok(()),
        }
    }

    pub fn send_biz_event(
        &self,
        event_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        match self.touch() {
            Some(current) => current.send_biz_event(event_type, attributes),
            None => Ok(()),
        }
    }

    pub fn end(&self) {
        let current = {
            let mut state = self.state.lock_or_panic();
            if state.ended {
                return;
            }
            state.ended = true;
            state.current.clone()
        };
        current.end(true);
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock_or_panic().ended
    }

    /// Watchdog hook. Ends the current instance and starts a successor
    /// when the session sat idle past the timeout or outlived the
    /// maximum duration. The predecessor's user tag is replayed on the
    /// successor. Returns the successor for sender registration.
    pub fn split_if_needed(&self, now: i64, server: &ServerConfig) -> Option<Arc<SessionInner>> {
        let (predecessor, successor) = {
            let mut state = self.state.lock_or_panic();
            if state.ended {
                return None;
            }
            let idle_ms = now - state.last_interaction;
            let age_ms = now - state.current.beacon().session_start_time();
            let idle_expired = idle_ms >= server.session_timeout.as_millis() as i64;
            let duration_expired = age_ms >= server.max_session_duration.as_millis() as i64;
            if !idle_expired && !duration_expired {
                return None;
            }
            debug!(
                session.idle_ms = idle_ms,
                session.age_ms = age_ms,
                "Splitting session"
            );
            let successor = self.creator.create_session();
            if let Some(tag) = &state.last_user_tag {
                successor.identify_user(tag);
            }
            let predecessor = std::mem::replace(&mut state.current, successor.clone());
            state.last_interaction = now;
            (predecessor, successor)
        };
        predecessor.end(true);
        Some(successor)
    }
}
