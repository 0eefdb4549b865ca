// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Web request tracers: children of actions (or sessions) representing
//! one traced outbound HTTP call, correlated via a tag header.

use crate::beacon::{Beacon, WebRequestData};
use crate::core::action::ActionInner;
use crate::core::session::SessionInner;
use crate::core::Child;
use crate::MutexExt;
use std::sync::{Arc, Mutex, Weak};

pub(crate) enum WebRequestParent {
    Session(Weak<SessionInner>),
    Action(Weak<ActionInner>),
}

struct TracerState {
    stopped: bool,
    bytes_sent: i64,
    bytes_received: i64,
}

pub(crate) struct WebRequestTracerInner {
    beacon: Arc<Beacon>,
    parent: WebRequestParent,
    parent_action_id: i32,
    url: String,
    tag: String,
    start_time: i64,
    start_sequence_no: i32,
    state: Mutex<TracerState>,
}

impl WebRequestTracerInner {
    /// Starts the tracer: start markers and the correlation tag are
    /// fixed immediately so the tag can be attached to the outbound
    /// request before any other call.
    pub fn start(
        beacon: &Arc<Beacon>,
        parent: WebRequestParent,
        parent_action_id: i32,
        url: &str,
    ) -> Arc<Self> {
        let start_sequence_no = beacon.next_sequence_number();
        Arc::new(Self {
            beacon: beacon.clone(),
            parent,
            parent_action_id,
            url: url.to_string(),
            tag: beacon.create_tag(parent_action_id, start_sequence_no),
            start_time: beacon.current_timestamp_millis(),
            start_sequence_no,
            state: Mutex::new(TracerState {
                stopped: false,
                bytes_sent: -1,
                bytes_received: -1,
            }),
        })
    }

    /// The value to put in the outbound request's tracing header.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_bytes_sent(&self, bytes: i64) {
        let mut state = self.state.lock_or_panic();
        if !state.stopped {
            state.bytes_sent = bytes;
        }
    }

    pub fn set_bytes_received(&self, bytes: i64) {
        let mut state = self.state.lock_or_panic();
        if !state.stopped {
            state.bytes_received = bytes;
        }
    }

    /// Stops the tracer and appends its record. A response code below
    /// zero means "unknown" and is left off the wire. Idempotent.
    pub fn stop(self: &Arc<Self>, response_code: i32) {
        let (bytes_sent, bytes_received) = {
            let mut state = self.state.lock_or_panic();
            if state.stopped {
                return;
            }
            state.stopped = true;
            (state.bytes_sent, state.bytes_received)
        };
        let end_sequence_no = self.beacon.next_sequence_number();
        let end_time = self.beacon.current_timestamp_millis();
        self.beacon.add_web_request(
            self.parent_action_id,
            &WebRequestData {
                url: &self.url,
                start_time: self.start_time,
                end_time,
                start_sequence_no: self.start_sequence_no,
                end_sequence_no,
                bytes_sent,
                bytes_received,
                response_code,
            },
        );
        self.detach();
    }

    /// Close on parent commit: stop without a response code.
    pub fn dispose(self: &Arc<Self>) {
        self.stop(-1);
    }

    /// Close on parent cancel: no record is written.
    pub fn cancel(self: &Arc<Self>) {
        {
            let mut state = self.state.lock_or_panic();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.detach();
    }

    fn detach(self: &Arc<Self>) {
        let as_child = Child::WebRequest(self.clone());
        match &self.parent {
            WebRequestParent::Session(session) => {
                if let Some(session) = session.upgrade() {
                    session.on_child_closed(&as_child);
                }
            }
            WebRequestParent::Action(action) => {
                if let Some(action) = action.upgrade() {
                    action.on_child_closed(&as_child);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use libdd_rum_protocol::WebRequestTag;

    #[test]
    fn tag_is_available_immediately_and_parses() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let action = session.enter_action("a").unwrap();
        let tracer = action.trace_web_request("http://backend/api").unwrap();
        let parsed = WebRequestTag::parse(tracer.tag()).unwrap();
        assert_eq!(parsed.parent_action_id, action.id());
        assert_eq!(parsed.sequence_number, tracer.start_sequence_no);
    }

    #[test]
    fn stop_commits_record_with_metrics() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let action = session.enter_action("a").unwrap();
        let tracer = action.trace_web_request("http://backend/api").unwrap();
        tracer.set_bytes_sent(10);
        tracer.set_bytes_received(20);
        f.clock.advance_millis(50);
        tracer.stop(201);

        let records = f.drain();
        let record = records.iter().find(|r| r.starts_with("et=30&")).unwrap();
        assert!(record.contains("&bs=10&br=20&rc=201"));
        assert!(record.contains("&t1=50"));
        assert_eq!(action.child_count(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let action = session.enter_action("a").unwrap();
        let tracer = action.trace_web_request("http://backend/api").unwrap();
        tracer.stop(200);
        tracer.stop(500);
        let count = f
            .drain()
            .iter()
            .filter(|r| r.starts_with("et=30&"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn dispose_leaves_response_code_off_the_wire() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let action = session.enter_action("a").unwrap();
        let _tracer = action.trace_web_request("http://backend/api").unwrap();
        action.leave(false);
        let records = f.drain();
        let record = records.iter().find(|r| r.starts_with("et=30&")).unwrap();
        assert!(!record.contains("&rc="));
    }

    #[test]
    fn cancel_writes_no_record() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let action = session.enter_action("a").unwrap();
        let tracer = action.trace_web_request("http://backend/api").unwrap();
        tracer.cancel();
        assert!(f.drain().iter().all(|r| !r.starts_with("et=30&")));
        assert_eq!(action.child_count(), 0);
    }

    #[test]
    fn updates_after_stop_are_ignored() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let action = session.enter_action("a").unwrap();
        let tracer = action.trace_web_request("http://backend/api").unwrap();
        tracer.stop(200);
        tracer.set_bytes_sent(999);
        let records = f.drain();
        let record = records.iter().find(|r| r.starts_with("et=30&")).unwrap();
        assert!(!record.contains("bs="));
    }
}
