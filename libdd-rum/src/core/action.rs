// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actions: user-visible units of work forming the tree under a
//! session.

use crate::beacon::{ActionData, Beacon};
use crate::core::composite::NodeState;
use crate::core::session::SessionInner;
use crate::core::web_request::{WebRequestParent, WebRequestTracerInner};
use crate::core::Child;
use crate::MutexExt;
use std::sync::{Arc, Mutex, Weak};

/// Non-owning upward link of an action.
pub(crate) enum ActionParent {
    Session(Weak<SessionInner>),
    Action(Weak<ActionInner>),
}

pub(crate) struct ActionInner {
    beacon: Arc<Beacon>,
    parent: ActionParent,
    id: i32,
    parent_id: i32,
    name: String,
    start_time: i64,
    start_sequence_no: i32,
    state: Mutex<NodeState<Child>>,
}

impl ActionInner {
    /// Draws id, start sequence and start time. The caller holds the
    /// parent's lock, which pins the sequence draw inside the emitting
    /// call's critical section.
    pub fn enter(
        beacon: &Arc<Beacon>,
        parent: ActionParent,
        parent_id: i32,
        name: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            beacon: beacon.clone(),
            parent,
            id: beacon.next_id(),
            parent_id,
            name: name.to_string(),
            start_time: beacon.current_timestamp_millis(),
            start_sequence_no: beacon.next_sequence_number(),
            state: Mutex::new(NodeState::new()),
        })
    }

    #[cfg(test)]
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock_or_panic().is_closed()
    }

    /// The cached parent link; stable across repeated leave/cancel.
    pub fn parent(&self) -> &ActionParent {
        &self.parent
    }

    /// Opens a child action, unless this action is already left.
    pub fn enter_child_action(self: &Arc<Self>, name: &str) -> Option<Arc<ActionInner>> {
        let mut state = self.state.lock_or_panic();
        if state.is_closed() {
            return None;
        }
        let child = ActionInner::enter(
            &self.beacon,
            ActionParent::Action(Arc::downgrade(self)),
            self.id,
            name,
        );
        state.store_child(Child::Action(child.clone()));
        Some(child)
    }

    /// Opens a web request tracer under this action.
    pub fn trace_web_request(self: &Arc<Self>, url: &str) -> Option<Arc<WebRequestTracerInner>> {
        let mut state = self.state.lock_or_panic();
        if state.is_closed() {
            return None;
        }
        let tracer = WebRequestTracerInner::start(
            &self.beacon,
            WebRequestParent::Action(Arc::downgrade(self)),
            self.id,
            url,
        );
        state.store_child(Child::WebRequest(tracer.clone()));
        Some(tracer)
    }

    // Reports on a left action are silent no-ops, like every other
    // operation on a closed object.

    pub fn report_int_value(&self, name: &str, value: i64) {
        if !self.is_closed() {
            self.beacon.report_int_value(self.id, name, value);
        }
    }

    pub fn report_double_value(&self, name: &str, value: f64) {
        if !self.is_closed() {
            self.beacon.report_double_value(self.id, name, value);
        }
    }

    pub fn report_string_value(&self, name: &str, value: &str) {
        if !self.is_closed() {
            self.beacon.report_string_value(self.id, name, value);
        }
    }

    pub fn report_event(&self, name: &str) {
        if !self.is_closed() {
            self.beacon.report_event(self.id, name);
        }
    }

    pub fn report_error_code(&self, name: &str, code: i32) {
        if !self.is_closed() {
            self.beacon.report_error_code(self.id, name, code);
        }
    }

    pub fn report_error_cause(
        &self,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stack_trace: Option<&str>,
    ) {
        if !self.is_closed() {
            self.beacon.report_error_cause(
                self.id,
                name,
                cause_name,
                cause_description,
                cause_stack_trace,
            );
        }
    }

    /// Closes this action. `discard` distinguishes cancel (purge, no
    /// record) from leave (commit the action record). Idempotent: a
    /// second call finds the closed flag set and does nothing.
    pub fn leave(self: &Arc<Self>, discard: bool) {
        // Phase 1: flip the flag and snapshot children under the lock.
        let children = {
            let mut state = self.state.lock_or_panic();
            if !state.try_close() {
                return;
            }
            state.copy_of_children()
        };

        // Phase 2: close or cancel the children outside the lock.
        for child in &children {
            if discard {
                child.cancel();
            } else {
                child.close();
            }
        }

        // Phase 3: end markers, stored under the lock; the commit
        // below reads them back as the single source of truth.
        let (end_time, end_sequence_no) = {
            let mut state = self.state.lock_or_panic();
            state.end_time = self.beacon.current_timestamp_millis();
            state.end_sequence_no = self.beacon.next_sequence_number();
            (state.end_time, state.end_sequence_no)
        };

        // Phase 4: commit or purge. Canceled children purged their own
        // subtree in phase 2, so the discard path only owns `self.id`.
        if discard {
            self.beacon.purge_action_data(&[self.id]);
        } else {
            self.beacon.add_action(&ActionData {
                id: self.id,
                parent_id: self.parent_id,
                name: &self.name,
                start_time: self.start_time,
                end_time,
                start_sequence_no: self.start_sequence_no,
                end_sequence_no,
            });
        }

        // Phase 5: detach; only the parent's lock is taken.
        let as_child = Child::Action(self.clone());
        match &self.parent {
            ActionParent::Session(session) => {
                if let Some(session) = session.upgrade() {
                    session.on_child_closed(&as_child);
                }
            }
            ActionParent::Action(parent) => {
                if let Some(parent) = parent.upgrade() {
                    parent.on_child_closed(&as_child);
                }
            }
        }
    }

    pub fn on_child_closed(&self, child: &Child) {
        self.state.lock_or_panic().remove_child(|c| c.same_as(child));
    }

    #[cfg(test)]
    pub fn child_count(&self) -> usize {
        self.state.lock_or_panic().child_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn enter_draws_monotonic_ids_and_sequences() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("one").unwrap();
        let child = root.enter_child_action("two").unwrap();
        assert_eq!(root.id(), 1);
        assert_eq!(child.id(), 2);
        assert!(child.start_sequence_no > root.start_sequence_no);
    }

    #[test]
    fn leave_commits_record_and_detaches() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("Home").unwrap();
        root.report_int_value("views", 3);
        root.leave(false);

        assert!(root.is_closed());
        assert_eq!(session.child_count(), 0);
        let records = f.drain();
        // session start, action, value
        assert!(records.iter().any(|r| r.starts_with("et=1&na=Home&")));
        assert!(records.iter().any(|r| r.starts_with("et=10&na=views&")));
    }

    #[test]
    fn leave_is_idempotent() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("once").unwrap();
        root.leave(false);
        root.leave(false);
        let actions = f
            .drain()
            .into_iter()
            .filter(|r| r.starts_with("et=1&"))
            .count();
        assert_eq!(actions, 1);
    }

    #[test]
    fn leave_closes_children_first() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("parent").unwrap();
        let child = root.enter_child_action("child").unwrap();
        root.leave(false);
        assert!(child.is_closed());
        let actions: Vec<_> = f
            .drain()
            .into_iter()
            .filter(|r| r.starts_with("et=1&"))
            .collect();
        assert_eq!(actions.len(), 2);
        // The child closed (and was appended) before the parent.
        assert!(actions[0].contains("na=child"));
        assert!(actions[1].contains("na=parent"));
    }

    #[test]
    fn cancel_purges_own_and_descendant_data() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("A").unwrap();
        root.report_event("e");
        let child = root.enter_child_action("B").unwrap();
        child.report_int_value("v", 1);
        root.leave(true);

        let records = f.drain();
        assert!(records.iter().all(|r| !r.starts_with("et=1&")));
        assert!(records.iter().all(|r| !r.contains("na=e")));
        assert!(records.iter().all(|r| !r.contains("na=v")));
        // The session start record is untouched.
        assert!(records.iter().any(|r| r.starts_with("et=18&")));
    }

    #[test]
    fn cancel_after_leave_is_a_noop() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("kept").unwrap();
        root.leave(false);
        root.leave(true);
        assert!(f.drain().iter().any(|r| r.contains("na=kept")));
    }

    #[test]
    fn reports_after_leave_are_dropped() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("done").unwrap();
        root.leave(false);
        root.report_int_value("late", 1);
        root.report_event("late-event");
        let records = f.drain();
        assert!(records.iter().all(|r| !r.contains("na=late")));
    }

    #[test]
    fn no_children_enter_after_close() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("done").unwrap();
        root.leave(false);
        assert!(root.enter_child_action("late").is_none());
        assert!(root.trace_web_request("http://x/").is_none());
    }

    #[test]
    fn parallel_leaves_produce_one_record() {
        let f = testing::beacon_fixture();
        let session = testing::started_session(&f);
        let root = session.enter_action("racy").unwrap();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || root.leave(false))
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let actions = f
            .drain()
            .into_iter()
            .filter(|r| r.starts_with("et=1&"))
            .count();
        assert_eq!(actions, 1);
    }
}
