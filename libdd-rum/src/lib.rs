// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! `libdd-rum` is a real-user-monitoring beacon engine. An application
//! embeds it to record a hierarchical trace of user sessions (actions,
//! reported values, events, errors, crashes and traced web requests)
//! and to ship those traces to a collector over HTTP.
//!
//! Records are serialized into a key=value wire format and buffered in
//! a bounded in-memory cache; a background worker drains the cache in
//! size-limited chunks, splits long-running or idle sessions, and
//! applies the capture configuration the collector hands back. The
//! public API never raises into the embedding application: invalid
//! input degrades to no-op handles, transport failures are retried, and
//! everything else is logged.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use libdd_rum::OpenKit;
//!
//! let openkit = OpenKit::builder("https://collector.example.com/mbeacon", "my-app", 42)
//!     .with_application_version("1.4.2")
//!     .build()
//!     .unwrap();
//!
//! let session = openkit.create_session();
//! let action = session.enter_action("load dashboard");
//! action.report_int_value("widgets", 12);
//! action.leave_action();
//! session.end();
//! openkit.shutdown();
//! ```

mod beacon;
mod cache;
pub mod config;
mod core;
pub mod http;
pub mod providers;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

pub use beacon::event_payload::{EventPayloadError, MAX_EVENT_PAYLOAD_BYTES};
pub use config::{
    CacheConfig, ConfigError, ConnectionInfo, CrashReportingLevel, DataCollectionLevel,
};
pub use crate::core::handles::{Action, RootAction, Session, WebRequestTracer};
pub use crate::core::openkit::{OpenKit, OpenKitBuilder};

// Wire-format layer, re-exported for embedders that parse tags or
// status responses themselves.
pub use libdd_rum_protocol as protocol;

use std::sync::{Mutex, MutexGuard};

/// Extension trait for `Mutex` acquiring the lock and panicking if it
/// is poisoned, so poisoned-lock unwraps stay in one place instead of
/// scattering `#[allow(clippy::unwrap_used)]` annotations.
pub trait MutexExt<T> {
    fn lock_or_panic(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[inline(always)]
    #[track_caller]
    fn lock_or_panic(&self) -> MutexGuard<'_, T> {
        #[allow(clippy::unwrap_used)]
        self.lock().unwrap()
    }
}
