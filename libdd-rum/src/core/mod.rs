// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The composite object hierarchy:
//! OpenKit → Session → RootAction → Action → WebRequestTracer.
//!
//! Internal `*Inner` types own the state and are linked downward by
//! `Arc` and upward by non-owning `Weak` back-references; the public
//! handle types in [`handles`] are cloneable null-object wrappers.

pub(crate) mod action;
pub(crate) mod composite;
pub(crate) mod handles;
pub(crate) mod openkit;
pub(crate) mod session;
pub(crate) mod web_request;

use action::ActionInner;
use std::sync::Arc;
use web_request::WebRequestTracerInner;

/// A node's child: the one place where "can this be canceled?"
/// dispatch happens, as a tagged variant.
#[derive(Clone)]
pub(crate) enum Child {
    Action(Arc<ActionInner>),
    WebRequest(Arc<WebRequestTracerInner>),
}

impl Child {
    /// Regular close on parent commit: actions are left, tracers are
    /// stopped as-is.
    pub fn close(&self) {
        match self {
            Child::Action(action) => action.leave(false),
            Child::WebRequest(tracer) => tracer.dispose(),
        }
    }

    /// Discarding close on parent cancel.
    pub fn cancel(&self) {
        match self {
            Child::Action(action) => action.leave(true),
            Child::WebRequest(tracer) => tracer.cancel(),
        }
    }

    pub fn same_as(&self, other: &Child) -> bool {
        match (self, other) {
            (Child::Action(a), Child::Action(b)) => Arc::ptr_eq(a, b),
            (Child::WebRequest(a), Child::WebRequest(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Only http/https URLs are traceable; anything else yields the null
/// tracer.
pub(crate) fn is_traceable_url(url: &str) -> bool {
    url.parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.scheme_str().map(str::to_owned))
        .is_some_and(|scheme| scheme == "http" || scheme == "https")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_and_https_are_traceable() {
        assert!(is_traceable_url("http://backend/api"));
        assert!(is_traceable_url("https://backend:8443/api?q=1"));
    }

    #[test]
    fn other_schemes_are_not() {
        assert!(!is_traceable_url("ftp://backend/file"));
        assert!(!is_traceable_url("file:///etc/passwd"));
        assert!(!is_traceable_url("backend/api"));
        assert!(!is_traceable_url(""));
    }
}
