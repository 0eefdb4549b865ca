// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared node state of the composite tree.
//!
//! Every node (session, action) guards its child list, closed flag and
//! end markers with one mutex. Closing is two-phase: flip the flag
//! under the lock, then work on a snapshot of the children outside it,
//! so no lock is ever taken upward while a downward lock is held.

/// Child list + closed flag + end markers, to be wrapped in the owning
/// node's mutex.
#[derive(Debug)]
pub(crate) struct NodeState<C> {
    children: Vec<C>,
    closed: bool,
    /// -1 until the node is closed.
    pub end_time: i64,
    /// -1 until the node is closed.
    pub end_sequence_no: i32,
}

impl<C: Clone> NodeState<C> {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
            closed: false,
            end_time: -1,
            end_sequence_no: -1,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flips the closed flag. Returns `false` when the node was already
    /// closed; the caller must then do nothing (idempotent close).
    pub fn try_close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    pub fn store_child(&mut self, child: C) {
        self.children.push(child);
    }

    /// Snapshot for closing children outside the lock.
    pub fn copy_of_children(&self) -> Vec<C> {
        self.children.clone()
    }

    #[cfg(test)]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Removes the first child matching `matches`; `onChildClosed` path.
    pub fn remove_child(&mut self, matches: impl Fn(&C) -> bool) -> bool {
        match self.children.iter().position(matches) {
            Some(idx) => {
                self.children.remove(idx);
                true
            }
            None => false,
        }
    }
}
