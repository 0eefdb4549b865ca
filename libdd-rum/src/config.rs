// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Three layers with different mutability: [`OpenKitConfig`] is fixed at
//! build time, [`PrivacyConfig`] is captured at build time and consulted
//! on every record, and [`ServerConfig`] is replaced wholesale whenever
//! a status response delivers new attributes (readers hold an immutable
//! snapshot, see `arc_swap` usage in the beacon).

use libdd_rum_protocol::ResponseAttributes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// How much user data the embedding application consented to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum DataCollectionLevel {
    /// No data is collected at all.
    Off = 0,
    /// Performance data only; identities are randomized per session.
    Performance = 1,
    /// Full collection including device id and user identification.
    #[default]
    UserBehavior = 2,
}

impl DataCollectionLevel {
    /// Integer spelled into the `dl` beacon key.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Whether crashes may be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum CrashReportingLevel {
    /// Crash reporting disabled.
    Off = 0,
    /// The user opted out of crash reporting.
    OptOut = 1,
    /// The user opted into crash reporting.
    #[default]
    OptIn = 2,
}

impl CrashReportingLevel {
    /// Integer spelled into the `cl` beacon key.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Privacy gates, derived from the two consent levels. Consulted on
/// every write; a denied gate drops the record silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivacyConfig {
    pub data_collection_level: DataCollectionLevel,
    pub crash_reporting_level: CrashReportingLevel,
}

impl PrivacyConfig {
    pub fn new(data: DataCollectionLevel, crash: CrashReportingLevel) -> Self {
        Self {
            data_collection_level: data,
            crash_reporting_level: crash,
        }
    }

    pub fn device_id_sending_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn session_number_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn session_reporting_allowed(&self) -> bool {
        self.data_collection_level >= DataCollectionLevel::Performance
    }

    pub fn action_reporting_allowed(&self) -> bool {
        self.data_collection_level >= DataCollectionLevel::Performance
    }

    pub fn web_request_tracing_allowed(&self) -> bool {
        self.data_collection_level >= DataCollectionLevel::Performance
    }

    pub fn error_reporting_allowed(&self) -> bool {
        self.data_collection_level >= DataCollectionLevel::Performance
    }

    pub fn value_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn event_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn user_identification_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn crash_reporting_allowed(&self) -> bool {
        self.crash_reporting_level == CrashReportingLevel::OptIn
    }
}

/// Optional connection metadata emitted in the mutable beacon prefix
/// (`np`, `cr`, `ct` keys).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub network_technology: Option<String>,
    pub carrier: Option<String>,
    pub connection_type: Option<String>,
}

/// Immutable per-instance configuration.
#[derive(Debug, Clone)]
pub struct OpenKitConfig {
    pub endpoint: http::Uri,
    pub application_id: String,
    pub device_id: i64,
    pub application_version: String,
    pub operating_system: Option<String>,
    pub manufacturer: Option<String>,
    pub model_id: Option<String>,
    pub connection: Option<ConnectionInfo>,
    /// Timeout of a single HTTP exchange.
    pub request_timeout: Duration,
    /// How long `shutdown` waits for the worker to drain.
    pub shutdown_timeout: Duration,
}

/// Errors raised while validating builder input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("application id must not be empty")]
    EmptyApplicationId,
    #[error("failed to start the background worker: {0}")]
    WorkerSpawn(String),
}

pub(crate) fn parse_endpoint(url: &str) -> Result<http::Uri, ConfigError> {
    let uri: http::Uri = url.parse().map_err(|e| ConfigError::InvalidEndpoint {
        url: url.to_string(),
        reason: format!("{e}"),
    })?;
    match uri.scheme_str() {
        Some("http") | Some("https") => Ok(uri),
        scheme => Err(ConfigError::InvalidEndpoint {
            url: url.to_string(),
            reason: format!("unsupported scheme {scheme:?}, expected http or https"),
        }),
    }
}

/// Server-driven capture configuration. Immutable snapshot; a status
/// response produces a new snapshot via [`ServerConfig::merge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub capture: bool,
    pub capture_errors: bool,
    pub capture_crashes: bool,
    pub send_interval: Duration,
    pub beacon_size_bytes: usize,
    pub server_id: i32,
    pub multiplicity: i32,
    pub traffic_control_percentage: i32,
    pub split_by_events: Option<i32>,
    pub max_session_duration: Duration,
    pub session_timeout: Duration,
    pub visit_store_version: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capture: true,
            capture_errors: true,
            capture_crashes: true,
            send_interval: Duration::from_millis(2_000),
            beacon_size_bytes: 30 * 1024,
            server_id: 1,
            multiplicity: 1,
            traffic_control_percentage: 100,
            split_by_events: None,
            max_session_duration: Duration::from_secs(6 * 60 * 60),
            session_timeout: Duration::from_secs(30 * 60),
            visit_store_version: 1,
        }
    }
}

impl ServerConfig {
    /// Overlays the attributes a response actually delivered onto this
    /// snapshot, yielding the next snapshot.
    pub fn merge(&self, attributes: &ResponseAttributes) -> ServerConfig {
        let mut next = self.clone();
        if let Some(v) = attributes.capture {
            next.capture = v;
        }
        if let Some(v) = attributes.capture_errors {
            next.capture_errors = v;
        }
        if let Some(v) = attributes.capture_crashes {
            next.capture_crashes = v;
        }
        if let Some(v) = attributes.send_interval {
            next.send_interval = v;
        }
        if let Some(v) = attributes.beacon_size_bytes {
            next.beacon_size_bytes = v;
        }
        if let Some(v) = attributes.server_id {
            next.server_id = v;
        }
        if let Some(v) = attributes.multiplicity {
            next.multiplicity = v;
        }
        if let Some(v) = attributes.traffic_control_percentage {
            next.traffic_control_percentage = v.clamp(0, 100);
        }
        if let Some(v) = attributes.split_by_events {
            next.split_by_events = (v > 0).then_some(v);
        }
        if let Some(v) = attributes.max_session_duration {
            next.max_session_duration = v;
        }
        if let Some(v) = attributes.session_timeout {
            next.session_timeout = v;
        }
        if let Some(v) = attributes.visit_store_version {
            next.visit_store_version = v;
        }
        next
    }

    /// Ordinary records may be sent.
    pub fn sending_data_allowed(&self) -> bool {
        self.capture && self.multiplicity > 0
    }

    /// Error records may be sent.
    pub fn sending_errors_allowed(&self) -> bool {
        self.sending_data_allowed() && self.capture_errors
    }

    /// Crash records may be sent.
    pub fn sending_crashes_allowed(&self) -> bool {
        self.sending_data_allowed() && self.capture_crashes
    }
}

/// Bounds of the in-memory beacon cache and its eviction cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Records older than this are evicted on every check.
    pub max_record_age: Duration,
    /// Crossing this total size triggers size-based eviction.
    pub upper_memory_boundary: u64,
    /// Size-based eviction stops below this total size.
    pub lower_memory_boundary: u64,
    /// Cadence of the eviction checks.
    pub record_check_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_record_age: Duration::from_secs(105 * 60),
            upper_memory_boundary: 100 * 1024 * 1024,
            lower_memory_boundary: 80 * 1024 * 1024,
            record_check_interval: Duration::from_millis(2_000),
        }
    }
}
