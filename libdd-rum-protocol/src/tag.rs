// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Web-request correlation tags.
//!
//! A tag travels as an HTTP header on an instrumented outbound request
//! and lets the collector stitch the server-side trace to the beacon
//! record. Fields are joined by `_`, which is why value encoding always
//! escapes the underscore (see [`crate::encode`]).

use crate::encode;
use crate::PROTOCOL_VERSION;
use percent_encoding::percent_decode_str;
use thiserror::Error;

/// Leading marker of every web-request tag.
pub const TAG_PREFIX: &str = "MT";

/// Decoded form of a web-request correlation tag.
///
/// `format` and `parse` round-trip:
/// `WebRequestTag::parse(&tag.format())` yields the same field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRequestTag {
    pub server_id: i32,
    pub device_id: i64,
    pub session_number: i32,
    /// Present only when the server enabled session splitting
    /// (visit-store version > 1).
    pub session_sequence: Option<i32>,
    pub application_id: String,
    pub parent_action_id: i32,
    pub thread_id: i32,
    pub sequence_number: i32,
}

/// Errors raised when parsing a web-request tag string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagParseError {
    /// The tag does not start with `MT` or has the wrong field count.
    #[error("malformed tag: {0}")]
    Malformed(String),
    /// A numeric field failed to parse.
    #[error("invalid value for tag field {field}: {value}")]
    InvalidField {
        field: &'static str,
        value: String,
    },
    /// The tag was produced by an incompatible protocol version.
    #[error("unsupported tag protocol version: {0}")]
    UnsupportedVersion(String),
}

impl WebRequestTag {
    pub fn format(&self) -> String {
        let session = match self.session_sequence {
            Some(seq) => format!("{}-{}", self.session_number, seq),
            None => self.session_number.to_string(),
        };
        format!(
            "{}_{}_{}_{}_{}_{}_{}_{}_{}",
            TAG_PREFIX,
            PROTOCOL_VERSION,
            self.server_id,
            self.device_id,
            session,
            encode::percent_encode(&self.application_id),
            self.parent_action_id,
            self.thread_id,
            self.sequence_number,
        )
    }

    pub fn parse(tag: &str) -> Result<Self, TagParseError> {
        let parts: Vec<&str> = tag.split('_').collect();
        if parts.len() != 9 || parts[0] != TAG_PREFIX {
            return Err(TagParseError::Malformed(tag.to_string()));
        }
        let version: i32 = parse_field("protocol version", parts[1])?;
        if version != PROTOCOL_VERSION {
            return Err(TagParseError::UnsupportedVersion(parts[1].to_string()));
        }
        let (session_number, session_sequence) = match parts[4].split_once('-') {
            Some((number, seq)) => (
                parse_field("session number", number)?,
                Some(parse_field("session sequence", seq)?),
            ),
            None => (parse_field("session number", parts[4])?, None),
        };
        let application_id = percent_decode_str(parts[5])
            .decode_utf8()
            .map_err(|_| TagParseError::InvalidField {
                field: "application id",
                value: parts[5].to_string(),
            })?
            .into_owned();
        Ok(WebRequestTag {
            server_id: parse_field("server id", parts[2])?,
            device_id: parse_field("device id", parts[3])?,
            session_number,
            session_sequence,
            application_id,
            parent_action_id: parse_field("parent action id", parts[6])?,
            thread_id: parse_field("thread id", parts[7])?,
            sequence_number: parse_field("sequence number", parts[8])?,
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, TagParseError> {
    value.parse().map_err(|_| TagParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WebRequestTag {
        WebRequestTag {
            server_id: 5,
            device_id: 424242,
            session_number: 17,
            session_sequence: None,
            application_id: "app_id-1".to_string(),
            parent_action_id: 3,
            thread_id: 2147001,
            sequence_number: 42,
        }
    }

    #[test]
    fn format_without_sequence() {
        assert_eq!(
            sample().format(),
            "MT_3_5_424242_17_app%5Fid-1_3_2147001_42"
        );
    }

    #[test]
    fn format_with_sequence() {
        let tag = WebRequestTag {
            session_sequence: Some(2),
            ..sample()
        };
        assert_eq!(tag.format(), "MT_3_5_424242_17-2_app%5Fid-1_3_2147001_42");
    }

    #[test]
    fn round_trip_without_sequence() {
        let tag = sample();
        assert_eq!(WebRequestTag::parse(&tag.format()), Ok(tag));
    }

    #[test]
    fn round_trip_with_sequence() {
        let tag = WebRequestTag {
            session_sequence: Some(7),
            ..sample()
        };
        assert_eq!(WebRequestTag::parse(&tag.format()), Ok(tag));
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(matches!(
            WebRequestTag::parse("XX_3_5_4_1_a_1_1_1"),
            Err(TagParseError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(
            WebRequestTag::parse("MT_3_5_4"),
            Err(TagParseError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        assert!(matches!(
            WebRequestTag::parse("MT_9_5_4_1_a_1_1_1"),
            Err(TagParseError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_field() {
        assert!(matches!(
            WebRequestTag::parse("MT_3_5_x_1_a_1_1_1"),
            Err(TagParseError::InvalidField { field: "device id", .. })
        ));
    }
}
