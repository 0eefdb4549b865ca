// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Two-letter keys of the beacon wire format.
//!
//! Keys are grouped the way they appear on the wire: the immutable
//! per-session prefix, the per-send mutable prefix, and the per-record
//! keys. A beacon payload is `key=value` pairs joined by `&`.

// Immutable prefix.
pub const PROTOCOL_VERSION: &str = "vv";
pub const AGENT_VERSION: &str = "va";
pub const APPLICATION_ID: &str = "ap";
pub const APPLICATION_VERSION: &str = "vn";
pub const PLATFORM_TYPE: &str = "pt";
pub const AGENT_TECHNOLOGY_TYPE: &str = "tt";
pub const VISITOR_ID: &str = "vi";
pub const SESSION_NUMBER: &str = "sn";
pub const CLIENT_IP_ADDRESS: &str = "ip";
pub const DEVICE_OS: &str = "os";
pub const DEVICE_MANUFACTURER: &str = "mf";
pub const DEVICE_MODEL: &str = "md";
pub const DATA_COLLECTION_LEVEL: &str = "dl";
pub const CRASH_REPORTING_LEVEL: &str = "cl";

// Mutable prefix.
pub const VISIT_STORE_VERSION: &str = "vs";
pub const SESSION_SEQUENCE: &str = "ss";
pub const TRANSMISSION_TIME: &str = "tx";
pub const SESSION_START_TIME: &str = "tv";
pub const MULTIPLICITY: &str = "mp";
pub const NETWORK_TECHNOLOGY: &str = "np";
pub const CARRIER: &str = "cr";
pub const CONNECTION_TYPE: &str = "ct";

// Per-record keys.
pub const EVENT_TYPE: &str = "et";
pub const NAME: &str = "na";
pub const THREAD_ID: &str = "it";
pub const ACTION_ID: &str = "ca";
pub const PARENT_ACTION_ID: &str = "pa";
pub const START_SEQUENCE_NUMBER: &str = "s0";
pub const END_SEQUENCE_NUMBER: &str = "s1";
pub const TIME_0: &str = "t0";
pub const TIME_1: &str = "t1";
pub const VALUE: &str = "vl";
pub const ERROR_VALUE: &str = "ev";
pub const REASON: &str = "rs";
pub const STACK_TRACE: &str = "st";
// Within a record `tt` is the error technology type; in the prefix it is
// the agent technology type. Same spelling, distinct scope.
pub const ERROR_TECHNOLOGY_TYPE: &str = "tt";
pub const RESPONSE_CODE: &str = "rc";
pub const BYTES_SENT: &str = "bs";
pub const BYTES_RECEIVED: &str = "br";
pub const EVENT_PAYLOAD: &str = "pl";

/// Technology type value attached to error, exception and crash records.
pub const ERROR_TECHNOLOGY_TYPE_VALUE: &str = "c";
