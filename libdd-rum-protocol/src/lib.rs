// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! `libdd-rum-protocol` is the pure wire-format layer of the RUM beacon
//! protocol. It knows how to spell keys, encode values, truncate
//! over-long user input, format and parse web-request correlation tags,
//! and parse key=value status responses.
//!
//! It deliberately carries no I/O, no configuration and no lifecycle:
//! the beacon engine in `libdd-rum` composes these pieces.

pub mod encode;
pub mod event_type;
pub mod keys;
pub mod response;
pub mod tag;

pub use event_type::EventType;
pub use response::{ResponseAttributes, ResponseParseError};
pub use tag::{TagParseError, WebRequestTag};

/// Version of the beacon wire protocol spoken by this crate (`vv` key).
pub const PROTOCOL_VERSION: i32 = 3;

/// Platform type reported in the `pt` key. OpenKit-protocol agents are 1.
pub const PLATFORM_TYPE_OPENKIT: i32 = 1;

/// Agent technology type reported in the `tt` key of the beacon prefix
/// and of status requests.
pub const AGENT_TECHNOLOGY_TYPE: &str = "okrust";

/// Character joining records and prefix parts of a beacon payload.
pub const BEACON_DELIMITER: char = '&';
