// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public handles of the object hierarchy.
//!
//! Every handle is a cloneable wrapper around an optional inner object.
//! Factories return the no-op variant on invalid input or when the
//! owner is already closed; every operation on a no-op handle silently
//! does nothing and hands back another no-op handle. The embedding
//! application never sees an error it has to defend against.

use crate::beacon::event_payload::EventPayloadError;
use crate::core::action::{ActionInner, ActionParent};
use crate::core::session::SessionProxyInner;
use crate::core::web_request::WebRequestTracerInner;
use crate::core::is_traceable_url;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// A user session. Obtained from [`crate::OpenKit::create_session`].
#[derive(Clone)]
pub struct Session {
    inner: Option<Arc<SessionProxyInner>>,
}

impl Session {
    pub(crate) fn real(inner: Arc<SessionProxyInner>) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn null() -> Self {
        Self { inner: None }
    }

    /// Whether this is the no-op sentinel.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Opens a top-level action. An empty name yields the no-op action.
    pub fn enter_action(&self, name: &str) -> RootAction {
        if name.trim().is_empty() {
            warn!("enter_action called with an empty name");
            return RootAction::null();
        }
        let inner = self
            .inner
            .as_ref()
            .and_then(|proxy| proxy.enter_action(name));
        RootAction { inner }
    }

    /// Tags this session (and its successors after splits) with a user
    /// identifier.
    pub fn identify_user(&self, tag: &str) {
        if let Some(proxy) = &self.inner {
            proxy.identify_user(tag);
        }
    }

    /// Reports a crash of the embedding application.
    pub fn report_crash(&self, name: &str, reason: Option<&str>, stack_trace: Option<&str>) {
        if let Some(proxy) = &self.inner {
            proxy.report_crash(name, reason, stack_trace);
        }
    }

    /// Sends a custom event with a JSON attribute payload.
    ///
    /// Fails with [`EventPayloadError::TooLarge`] when the serialized
    /// payload exceeds 16 KiB; every other failure mode is absorbed.
    pub fn send_event(
        &self,
        name: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        match &self.inner {
            Some(proxy) => proxy.send_event(name, attributes),
            None => Ok(()),
        }
    }

    /// Sends a business event with a JSON attribute payload.
    pub fn send_biz_event(
        &self,
        event_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        match &self.inner {
            Some(proxy) => proxy.send_biz_event(event_type, attributes),
            None => Ok(()),
        }
    }

    /// Traces a web request issued directly on the session. Only
    /// http/https URLs are accepted.
    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        if !is_traceable_url(url) {
            warn!(url, "Refusing to trace URL with unsupported scheme");
            return WebRequestTracer { inner: None };
        }
        let inner = self
            .inner
            .as_ref()
            .and_then(|proxy| proxy.trace_web_request(url));
        WebRequestTracer { inner }
    }

    /// Ends the session. Further operations on this handle are no-ops.
    pub fn end(&self) {
        if let Some(proxy) = &self.inner {
            proxy.end();
        }
    }
}

/// A top-level action, owned by a session.
#[derive(Clone)]
pub struct RootAction {
    inner: Option<Arc<ActionInner>>,
}

impl RootAction {
    pub(crate) fn null() -> Self {
        Self { inner: None }
    }

    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Opens a child action.
    pub fn enter_action(&self, name: &str) -> Action {
        if name.trim().is_empty() {
            warn!("enter_action called with an empty name");
            return Action { inner: None };
        }
        let inner = self
            .inner
            .as_ref()
            .and_then(|action| action.enter_child_action(name));
        Action { inner }
    }

    pub fn report_int_value(&self, name: &str, value: i32) {
        if let Some(action) = &self.inner {
            action.report_int_value(name, i64::from(value));
        }
    }

    pub fn report_long_value(&self, name: &str, value: i64) {
        if let Some(action) = &self.inner {
            action.report_int_value(name, value);
        }
    }

    pub fn report_double_value(&self, name: &str, value: f64) {
        if let Some(action) = &self.inner {
            action.report_double_value(name, value);
        }
    }

    pub fn report_string_value(&self, name: &str, value: &str) {
        if let Some(action) = &self.inner {
            action.report_string_value(name, value);
        }
    }

    pub fn report_event(&self, name: &str) {
        if let Some(action) = &self.inner {
            action.report_event(name);
        }
    }

    pub fn report_error_code(&self, name: &str, code: i32) {
        if let Some(action) = &self.inner {
            action.report_error_code(name, code);
        }
    }

    pub fn report_error_cause(
        &self,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stack_trace: Option<&str>,
    ) {
        if let Some(action) = &self.inner {
            action.report_error_cause(name, cause_name, cause_description, cause_stack_trace);
        }
    }

    /// Traces a web request under this action.
    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        trace_on_action(&self.inner, url)
    }

    /// Leaves (commits) the action. Idempotent.
    pub fn leave_action(&self) {
        if let Some(action) = &self.inner {
            action.leave(false);
        }
    }

    /// Cancels (discards) the action and everything below it.
    pub fn cancel_action(&self) {
        if let Some(action) = &self.inner {
            action.leave(true);
        }
    }
}

/// A nested action, owned by a root action.
#[derive(Clone)]
pub struct Action {
    inner: Option<Arc<ActionInner>>,
}

impl Action {
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    pub fn report_int_value(&self, name: &str, value: i32) {
        if let Some(action) = &self.inner {
            action.report_int_value(name, i64::from(value));
        }
    }

    pub fn report_long_value(&self, name: &str, value: i64) {
        if let Some(action) = &self.inner {
            action.report_int_value(name, value);
        }
    }

    pub fn report_double_value(&self, name: &str, value: f64) {
        if let Some(action) = &self.inner {
            action.report_double_value(name, value);
        }
    }

    pub fn report_string_value(&self, name: &str, value: &str) {
        if let Some(action) = &self.inner {
            action.report_string_value(name, value);
        }
    }

    pub fn report_event(&self, name: &str) {
        if let Some(action) = &self.inner {
            action.report_event(name);
        }
    }

    pub fn report_error_code(&self, name: &str, code: i32) {
        if let Some(action) = &self.inner {
            action.report_error_code(name, code);
        }
    }

    pub fn report_error_cause(
        &self,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stack_trace: Option<&str>,
    ) {
        if let Some(action) = &self.inner {
            action.report_error_cause(name, cause_name, cause_description, cause_stack_trace);
        }
    }

    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        trace_on_action(&self.inner, url)
    }

    /// Leaves (commits) the action and returns the parent. Repeated
    /// calls return the same parent and do nothing else.
    pub fn leave_action(&self) -> RootAction {
        self.close(false)
    }

    /// Cancels (discards) the action and returns the parent.
    pub fn cancel_action(&self) -> RootAction {
        self.close(true)
    }

    fn close(&self, discard: bool) -> RootAction {
        let Some(action) = &self.inner else {
            return RootAction { inner: None };
        };
        action.leave(discard);
        match action.parent() {
            ActionParent::Action(parent) => RootAction {
                inner: parent.upgrade(),
            },
            ActionParent::Session(_) => RootAction { inner: None },
        }
    }
}

fn trace_on_action(inner: &Option<Arc<ActionInner>>, url: &str) -> WebRequestTracer {
    if !is_traceable_url(url) {
        warn!(url, "Refusing to trace URL with unsupported scheme");
        return WebRequestTracer { inner: None };
    }
    WebRequestTracer {
        inner: inner.as_ref().and_then(|action| action.trace_web_request(url)),
    }
}

/// A traced outbound web request.
#[derive(Clone)]
pub struct WebRequestTracer {
    inner: Option<Arc<WebRequestTracerInner>>,
}

impl WebRequestTracer {
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// The correlation header value to attach to the outbound request.
    /// Empty on a no-op tracer or when tracing is not allowed.
    pub fn tag(&self) -> String {
        self.inner
            .as_ref()
            .map(|tracer| tracer.tag().to_string())
            .unwrap_or_default()
    }

    pub fn set_bytes_sent(&self, bytes: i64) {
        if let Some(tracer) = &self.inner {
            tracer.set_bytes_sent(bytes);
        }
    }

    pub fn set_bytes_received(&self, bytes: i64) {
        if let Some(tracer) = &self.inner {
            tracer.set_bytes_received(bytes);
        }
    }

    /// Stops the tracer, recording the response code of the traced
    /// request. Pass a negative code when it is unknown.
    pub fn stop(&self, response_code: i32) {
        if let Some(tracer) = &self.inner {
            tracer.stop(response_code);
        }
    }
}
