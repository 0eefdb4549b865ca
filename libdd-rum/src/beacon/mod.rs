// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The beacon: per-session serializer and policy gate.
//!
//! Every semantic call ("report value X on action Y") funnels through
//! here. The beacon validates arguments, consults the privacy gates and
//! the current server capture configuration, advances the id/sequence
//! counters, serializes a key=value record and appends it to the cache
//! under this session's [`BeaconKey`].

pub(crate) mod event_payload;

use crate::cache::{BeaconCache, BeaconKey};
use crate::config::{OpenKitConfig, PrivacyConfig, ServerConfig};
use crate::http::{self, HttpClient, SendError, StatusResponse};
use crate::providers::{Providers, ThreadIdProvider, TimeProvider};
use arc_swap::ArcSwap;
use event_payload::{EventKind, EventPayloadContext, EventPayloadError};
use libdd_rum_protocol::{
    encode, keys, EventType, WebRequestTag, AGENT_TECHNOLOGY_TYPE, BEACON_DELIMITER,
    PLATFORM_TYPE_OPENKIT, PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use std::fmt::{Display, Write as _};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Reserve for the prefix when chunking: the configured beacon size
/// bounds the whole request body, prefix included.
const CHUNK_PREFIX_RESERVE: usize = 1024;

/// Snapshot of a finished action, handed over by the lifecycle layer.
pub(crate) struct ActionData<'a> {
    pub id: i32,
    pub parent_id: i32,
    pub name: &'a str,
    pub start_time: i64,
    pub end_time: i64,
    pub start_sequence_no: i32,
    pub end_sequence_no: i32,
}

/// Snapshot of a stopped web request tracer.
pub(crate) struct WebRequestData<'a> {
    pub url: &'a str,
    pub start_time: i64,
    pub end_time: i64,
    pub start_sequence_no: i32,
    pub end_sequence_no: i32,
    pub bytes_sent: i64,
    pub bytes_received: i64,
    pub response_code: i32,
}

pub(crate) struct Beacon {
    key: BeaconKey,
    session_start_time: i64,
    /// Stable for the life of this session: the configured device id,
    /// or a per-session random when privacy forbids sending it.
    device_id: i64,
    session_number_on_wire: i32,
    traffic_control_value: i32,
    next_id: AtomicI32,
    next_sequence_number: AtomicI32,
    immutable_prefix: String,
    config: Arc<OpenKitConfig>,
    privacy: PrivacyConfig,
    server_config: Arc<ArcSwap<ServerConfig>>,
    cache: Arc<BeaconCache>,
    time: Arc<dyn TimeProvider>,
    thread: Arc<dyn ThreadIdProvider>,
}

impl Beacon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<OpenKitConfig>,
        privacy: PrivacyConfig,
        server_config: Arc<ArcSwap<ServerConfig>>,
        cache: Arc<BeaconCache>,
        providers: &Providers,
        session_number: i32,
        session_sequence: i32,
        client_ip: Option<&str>,
    ) -> Self {
        let device_id = if privacy.device_id_sending_allowed() {
            config.device_id
        } else {
            providers.random.next_positive_i64()
        };
        let session_number_on_wire = if privacy.session_number_reporting_allowed() {
            session_number
        } else {
            1
        };
        let mut beacon = Self {
            key: BeaconKey::new(session_number, session_sequence),
            session_start_time: providers.time.now_millis(),
            device_id,
            session_number_on_wire,
            traffic_control_value: providers.random.next_percentage(),
            next_id: AtomicI32::new(0),
            next_sequence_number: AtomicI32::new(0),
            immutable_prefix: String::new(),
            config,
            privacy,
            server_config,
            cache,
            time: providers.time.clone(),
            thread: providers.thread.clone(),
        };
        beacon.immutable_prefix = beacon.build_immutable_prefix(client_ip);
        beacon
    }

    pub fn key(&self) -> BeaconKey {
        self.key
    }

    pub fn session_start_time(&self) -> i64 {
        self.session_start_time
    }

    /// Next action id, unique and monotonic within this session.
    pub fn next_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next sequence number, shared by every record of this session.
    pub fn next_sequence_number(&self) -> i32 {
        self.next_sequence_number.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_timestamp_millis(&self) -> i64 {
        self.time.now_millis()
    }

    fn time_since_session_start(&self, timestamp: i64) -> i64 {
        (timestamp - self.session_start_time).max(0)
    }

    // Capture gates: the server flag and the per-session traffic
    // control draw decide together.
    fn traffic_allowed(&self, server: &ServerConfig) -> bool {
        self.traffic_control_value < server.traffic_control_percentage
    }

    pub fn data_capture_enabled(&self) -> bool {
        let server = self.server_config.load();
        server.sending_data_allowed() && self.traffic_allowed(&server)
    }

    fn error_capture_enabled(&self) -> bool {
        let server = self.server_config.load();
        server.sending_errors_allowed() && self.traffic_allowed(&server)
    }

    fn crash_capture_enabled(&self) -> bool {
        let server = self.server_config.load();
        server.sending_crashes_allowed() && self.traffic_allowed(&server)
    }

    fn build_immutable_prefix(&self, client_ip: Option<&str>) -> String {
        let mut prefix = String::new();
        add_pair(&mut prefix, keys::PROTOCOL_VERSION, PROTOCOL_VERSION);
        add_pair(&mut prefix, keys::AGENT_VERSION, env!("CARGO_PKG_VERSION"));
        add_encoded_pair(&mut prefix, keys::APPLICATION_ID, &self.config.application_id);
        add_encoded_pair(
            &mut prefix,
            keys::APPLICATION_VERSION,
            &self.config.application_version,
        );
        add_pair(&mut prefix, keys::PLATFORM_TYPE, PLATFORM_TYPE_OPENKIT);
        add_pair(
            &mut prefix,
            keys::AGENT_TECHNOLOGY_TYPE,
            AGENT_TECHNOLOGY_TYPE,
        );
        add_pair(&mut prefix, keys::VISITOR_ID, self.device_id);
        add_pair(&mut prefix, keys::SESSION_NUMBER, self.session_number_on_wire);
        if let Some(ip) = client_ip {
            add_encoded_pair(&mut prefix, keys::CLIENT_IP_ADDRESS, ip);
        }
        if let Some(os) = &self.config.operating_system {
            add_encoded_pair(&mut prefix, keys::DEVICE_OS, os);
        }
        if let Some(manufacturer) = &self.config.manufacturer {
            add_encoded_pair(&mut prefix, keys::DEVICE_MANUFACTURER, manufacturer);
        }
        if let Some(model) = &self.config.model_id {
            add_encoded_pair(&mut prefix, keys::DEVICE_MODEL, model);
        }
        add_pair(
            &mut prefix,
            keys::DATA_COLLECTION_LEVEL,
            self.privacy.data_collection_level.as_i32(),
        );
        add_pair(
            &mut prefix,
            keys::CRASH_REPORTING_LEVEL,
            self.privacy.crash_reporting_level.as_i32(),
        );
        prefix
    }

    fn build_mutable_prefix(&self, server: &ServerConfig) -> String {
        let mut prefix = String::new();
        add_pair(&mut prefix, keys::VISIT_STORE_VERSION, server.visit_store_version);
        if server.visit_store_version > 1 {
            add_pair(&mut prefix, keys::SESSION_SEQUENCE, self.key.session_sequence);
        }
        add_pair(&mut prefix, keys::TRANSMISSION_TIME, self.time.now_millis());
        add_pair(&mut prefix, keys::SESSION_START_TIME, self.session_start_time);
        add_pair(&mut prefix, keys::MULTIPLICITY, server.multiplicity);
        if let Some(connection) = &self.config.connection {
            if let Some(np) = &connection.network_technology {
                add_encoded_pair(&mut prefix, keys::NETWORK_TECHNOLOGY, np);
            }
            if let Some(cr) = &connection.carrier {
                add_encoded_pair(&mut prefix, keys::CARRIER, cr);
            }
            if let Some(ct) = &connection.connection_type {
                add_encoded_pair(&mut prefix, keys::CONNECTION_TYPE, ct);
            }
        }
        prefix
    }

    fn build_basic_event(&self, event_type: EventType, name: Option<&str>) -> String {
        let mut data = String::new();
        add_pair(&mut data, keys::EVENT_TYPE, event_type);
        if let Some(name) = name {
            add_encoded_pair(&mut data, keys::NAME, encode::truncate_name(name));
        }
        add_pair(&mut data, keys::THREAD_ID, self.thread.thread_id());
        data
    }

    /// Basic event data plus parent id, start sequence and start time
    /// offset. The sequence number is drawn here, inside the emitting
    /// call, which makes cross-thread record order well defined.
    fn build_event(
        &self,
        event_type: EventType,
        name: Option<&str>,
        parent_action_id: i32,
    ) -> (String, i64) {
        let sequence_no = self.next_sequence_number();
        let timestamp = self.time.now_millis();
        let mut data = self.build_basic_event(event_type, name);
        add_pair(&mut data, keys::PARENT_ACTION_ID, parent_action_id);
        add_pair(&mut data, keys::START_SEQUENCE_NUMBER, sequence_no);
        add_pair(&mut data, keys::TIME_0, self.time_since_session_start(timestamp));
        (data, timestamp)
    }

    pub fn start_session(&self) {
        let sequence_no = self.next_sequence_number();
        let mut data = self.build_basic_event(EventType::SessionStart, None);
        add_pair(&mut data, keys::PARENT_ACTION_ID, 0);
        add_pair(&mut data, keys::START_SEQUENCE_NUMBER, sequence_no);
        add_pair(&mut data, keys::TIME_0, 0);
        if !self.privacy.session_reporting_allowed() || !self.data_capture_enabled() {
            return;
        }
        self.cache
            .add_event_data(self.key, self.session_start_time, data);
    }

    pub fn end_session(&self) {
        let (data, timestamp) = self.build_event(EventType::SessionEnd, None, 0);
        if !self.privacy.session_reporting_allowed() || !self.data_capture_enabled() {
            return;
        }
        self.cache.add_event_data(self.key, timestamp, data);
    }

    /// Appends the record of a left action. Canceled actions never get
    /// here.
    pub fn add_action(&self, action: &ActionData<'_>) {
        if action.name.trim().is_empty() {
            warn!(action.id = action.id, "Discarding action with empty name");
            return;
        }
        if !self.privacy.action_reporting_allowed() || !self.data_capture_enabled() {
            return;
        }
        let mut data = self.build_basic_event(EventType::Action, Some(action.name));
        add_pair(&mut data, keys::ACTION_ID, action.id);
        add_pair(&mut data, keys::PARENT_ACTION_ID, action.parent_id);
        add_pair(&mut data, keys::START_SEQUENCE_NUMBER, action.start_sequence_no);
        add_pair(
            &mut data,
            keys::TIME_0,
            self.time_since_session_start(action.start_time),
        );
        add_pair(&mut data, keys::END_SEQUENCE_NUMBER, action.end_sequence_no);
        add_pair(&mut data, keys::TIME_1, action.end_time - action.start_time);
        self.cache.add_action_data(self.key, action.start_time, data);
    }

    pub fn report_int_value(&self, action_id: i32, name: &str, value: i64) {
        self.report_value(action_id, name, EventType::ValueInt, value);
    }

    pub fn report_double_value(&self, action_id: i32, name: &str, value: f64) {
        self.report_value(action_id, name, EventType::ValueDouble, value);
    }

    pub fn report_string_value(&self, action_id: i32, name: &str, value: &str) {
        let truncated = encode::truncate_name(value);
        self.report_value(
            action_id,
            name,
            EventType::ValueString,
            encode::percent_encode(truncated),
        );
    }

    fn report_value<V: Display>(&self, action_id: i32, name: &str, event_type: EventType, value: V) {
        if name.trim().is_empty() {
            warn!("Discarding reported value with empty name");
            return;
        }
        let (mut data, timestamp) = self.build_event(event_type, Some(name), action_id);
        if !self.privacy.value_reporting_allowed() || !self.data_capture_enabled() {
            return;
        }
        add_pair(&mut data, keys::VALUE, value);
        self.cache.add_event_data(self.key, timestamp, data);
    }

    pub fn report_event(&self, action_id: i32, name: &str) {
        if name.trim().is_empty() {
            warn!("Discarding reported event with empty name");
            return;
        }
        let (data, timestamp) = self.build_event(EventType::NamedEvent, Some(name), action_id);
        if !self.privacy.event_reporting_allowed() || !self.data_capture_enabled() {
            return;
        }
        self.cache.add_event_data(self.key, timestamp, data);
    }

    pub fn report_error_code(&self, action_id: i32, name: &str, code: i32) {
        if name.trim().is_empty() {
            warn!("Discarding error report with empty name");
            return;
        }
        let (mut data, timestamp) = self.build_event(EventType::Error, Some(name), action_id);
        if !self.privacy.error_reporting_allowed() || !self.error_capture_enabled() {
            return;
        }
        add_pair(&mut data, keys::ERROR_VALUE, code);
        add_pair(
            &mut data,
            keys::ERROR_TECHNOLOGY_TYPE,
            keys::ERROR_TECHNOLOGY_TYPE_VALUE,
        );
        self.cache.add_event_data(self.key, timestamp, data);
    }

    pub fn report_error_cause(
        &self,
        action_id: i32,
        name: &str,
        cause_name: Option<&str>,
        cause_description: Option<&str>,
        cause_stack_trace: Option<&str>,
    ) {
        if name.trim().is_empty() {
            warn!("Discarding error report with empty name");
            return;
        }
        let (mut data, timestamp) = self.build_event(EventType::Exception, Some(name), action_id);
        if !self.privacy.error_reporting_allowed() || !self.error_capture_enabled() {
            return;
        }
        if let Some(cause) = cause_name.filter(|s| !s.is_empty()) {
            add_encoded_pair(&mut data, keys::ERROR_VALUE, cause);
        }
        if let Some(description) = cause_description.filter(|s| !s.is_empty()) {
            add_encoded_pair(&mut data, keys::REASON, encode::truncate_reason(description));
        }
        if let Some(stack) = cause_stack_trace.filter(|s| !s.is_empty()) {
            add_encoded_pair(&mut data, keys::STACK_TRACE, encode::truncate_stack_trace(stack));
        }
        add_pair(
            &mut data,
            keys::ERROR_TECHNOLOGY_TYPE,
            keys::ERROR_TECHNOLOGY_TYPE_VALUE,
        );
        self.cache.add_event_data(self.key, timestamp, data);
    }

    pub fn report_crash(&self, name: &str, reason: Option<&str>, stack_trace: Option<&str>) {
        if name.trim().is_empty() {
            warn!("Discarding crash report with empty name");
            return;
        }
        let (mut data, timestamp) = self.build_event(EventType::Crash, Some(name), 0);
        if !self.privacy.crash_reporting_allowed() || !self.crash_capture_enabled() {
            return;
        }
        if let Some(reason) = reason.filter(|s| !s.is_empty()) {
            add_encoded_pair(&mut data, keys::REASON, encode::truncate_reason(reason));
        }
        if let Some(stack) = stack_trace.filter(|s| !s.is_empty()) {
            add_encoded_pair(&mut data, keys::STACK_TRACE, encode::truncate_stack_trace(stack));
        }
        add_pair(
            &mut data,
            keys::ERROR_TECHNOLOGY_TYPE,
            keys::ERROR_TECHNOLOGY_TYPE_VALUE,
        );
        self.cache.add_event_data(self.key, timestamp, data);
    }

    pub fn identify_user(&self, tag: &str) {
        if tag.trim().is_empty() {
            warn!("Discarding user identification with empty tag");
            return;
        }
        let (data, timestamp) = self.build_event(EventType::IdentifyUser, Some(tag), 0);
        if !self.privacy.user_identification_allowed() || !self.data_capture_enabled() {
            return;
        }
        self.cache.add_event_data(self.key, timestamp, data);
    }

    pub fn send_event(
        &self,
        name: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        self.send_json_event(EventKind::Rum, name, attributes)
    }

    pub fn send_biz_event(
        &self,
        event_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        self.send_json_event(EventKind::Biz, event_type, attributes)
    }

    fn send_json_event(
        &self,
        kind: EventKind,
        name: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), EventPayloadError> {
        if name.trim().is_empty() {
            warn!("Discarding JSON event with empty name");
            return Ok(());
        }
        let context = EventPayloadContext {
            application_id: &self.config.application_id,
            instance_id: self.device_id,
            session_number: self.session_number_on_wire,
            timestamp_nanos: self.time.now_nanos(),
            application_version: &self.config.application_version,
            operating_system: self.config.operating_system.as_deref(),
            manufacturer: self.config.manufacturer.as_deref(),
            model_id: self.config.model_id.as_deref(),
        };
        // The size limit is a user-visible contract; enforce it before
        // the silent gates so the caller sees the same outcome no
        // matter what the server currently allows.
        let payload = event_payload::build(kind, name, attributes, &context)?;
        if !self.privacy.event_reporting_allowed() || !self.data_capture_enabled() {
            return Ok(());
        }
        let timestamp = self.time.now_millis();
        let mut data = String::new();
        add_pair(&mut data, keys::EVENT_TYPE, EventType::Event);
        add_encoded_pair(&mut data, keys::EVENT_PAYLOAD, &payload);
        self.cache.add_event_data(self.key, timestamp, data);
        Ok(())
    }

    pub fn add_web_request(&self, parent_action_id: i32, request: &WebRequestData<'_>) {
        if request.url.trim().is_empty() {
            warn!("Discarding web request record with empty URL");
            return;
        }
        if !self.privacy.web_request_tracing_allowed() || !self.data_capture_enabled() {
            return;
        }
        let mut data = self.build_basic_event(EventType::WebRequest, Some(request.url));
        add_pair(&mut data, keys::PARENT_ACTION_ID, parent_action_id);
        add_pair(&mut data, keys::START_SEQUENCE_NUMBER, request.start_sequence_no);
        add_pair(
            &mut data,
            keys::TIME_0,
            self.time_since_session_start(request.start_time),
        );
        add_pair(&mut data, keys::END_SEQUENCE_NUMBER, request.end_sequence_no);
        add_pair(&mut data, keys::TIME_1, request.end_time - request.start_time);
        if request.bytes_sent >= 0 {
            add_pair(&mut data, keys::BYTES_SENT, request.bytes_sent);
        }
        if request.bytes_received >= 0 {
            add_pair(&mut data, keys::BYTES_RECEIVED, request.bytes_received);
        }
        if request.response_code >= 0 {
            add_pair(&mut data, keys::RESPONSE_CODE, request.response_code);
        }
        self.cache.add_event_data(self.key, request.start_time, data);
    }

    /// The correlation tag a web request tracer attaches to its
    /// outbound request. Empty when tracing is not allowed.
    pub fn create_tag(&self, parent_action_id: i32, sequence_no: i32) -> String {
        if !self.privacy.web_request_tracing_allowed() {
            return String::new();
        }
        let server = self.server_config.load();
        WebRequestTag {
            server_id: server.server_id,
            device_id: self.device_id,
            session_number: self.session_number_on_wire,
            session_sequence: (server.visit_store_version > 1)
                .then_some(self.key.session_sequence),
            application_id: self.config.application_id.clone(),
            parent_action_id,
            thread_id: self.thread.thread_id(),
            sequence_number: sequence_no,
        }
        .format()
    }

    /// Drops the buffered records of canceled actions. Records carry
    /// their action id in the canonical `&ca=<id>&` / `&pa=<id>&`
    /// spelling, which makes them addressable without re-parsing.
    pub fn purge_action_data(&self, action_ids: &[i32]) {
        if action_ids.is_empty() {
            return;
        }
        let needles: Vec<(String, String)> = action_ids
            .iter()
            .map(|id| {
                (
                    format!("&{}={id}&", keys::ACTION_ID),
                    format!("&{}={id}&", keys::PARENT_ACTION_ID),
                )
            })
            .collect();
        self.cache.remove_records_matching(self.key, move |record| {
            needles
                .iter()
                .any(|(ca, pa)| record.contains(ca) || record.contains(pa))
        });
    }

    /// Drains this session's cache entry: prefix assembly, chunking,
    /// POST, commit-or-restore. Returns the last non-erroneous response,
    /// if any chunk went out.
    pub async fn send(
        &self,
        client: &dyn HttpClient,
        additional_params: Option<&str>,
    ) -> Result<Option<StatusResponse>, SendError> {
        self.cache.prepare_data_for_sending(self.key);
        let mut last_response = None;
        while self.cache.has_data_for_sending(self.key) {
            let server = self.server_config.load_full();
            let prefix = format!(
                "{}{}{}",
                self.immutable_prefix,
                BEACON_DELIMITER,
                self.build_mutable_prefix(&server)
            );
            let max_bytes = server
                .beacon_size_bytes
                .saturating_sub(CHUNK_PREFIX_RESERVE)
                .max(CHUNK_PREFIX_RESERVE);
            let Some(chunk) = self
                .cache
                .next_chunk(self.key, &prefix, max_bytes, BEACON_DELIMITER)
            else {
                break;
            };
            match http::send_beacon_request(client, &self.config, server.server_id, additional_params, &chunk).await {
                Ok(response) => {
                    self.cache.remove_chunked_data(self.key);
                    last_response = Some(response);
                }
                Err(err) => {
                    self.cache.reset_chunked_data(self.key);
                    return Err(err);
                }
            }
        }
        Ok(last_response)
    }

    /// Discards everything buffered for this session.
    pub fn clear_data(&self) {
        self.cache.delete_entry(self.key);
    }

    pub fn has_data_to_send(&self) -> bool {
        !self.cache.is_empty(self.key)
    }
}

fn add_pair<V: Display>(data: &mut String, key: &str, value: V) {
    if !data.is_empty() {
        data.push(BEACON_DELIMITER);
    }
    let _ = write!(data, "{key}={value}");
}

fn add_encoded_pair(data: &mut String, key: &str, value: &str) {
    add_pair(data, key, encode::percent_encode(value));
}
