// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Key=value status-response parsing.
//!
//! Both the new-session request and beacon POSTs may answer with a
//! key=value body carrying server-side configuration. Only keys that
//! were actually delivered are set, so a merge overlays exactly what the
//! server sent.

use std::time::Duration;
use thiserror::Error;

/// Server-configuration attributes delivered in a status response.
///
/// Every field is optional; absence means "keep the current value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseAttributes {
    /// `cp`: capture on/off.
    pub capture: Option<bool>,
    /// `er`: capture errors.
    pub capture_errors: Option<bool>,
    /// `cr`: capture crashes.
    pub capture_crashes: Option<bool>,
    /// `bl`: maximum beacon (chunk) size in bytes.
    pub beacon_size_bytes: Option<usize>,
    /// `id`: server id to address in subsequent requests.
    pub server_id: Option<i32>,
    /// `tc`: traffic-control percentage in `[0,100]`.
    pub traffic_control_percentage: Option<i32>,
    /// `sr`: send interval, delivered in seconds.
    pub send_interval: Option<Duration>,
    /// `mp`: multiplicity.
    pub multiplicity: Option<i32>,
    /// `ss`: session split by events, number of top-level events.
    pub split_by_events: Option<i32>,
    /// `md`: maximum session duration, delivered in minutes.
    pub max_session_duration: Option<Duration>,
    /// `st`: session idle timeout, delivered in seconds.
    pub session_timeout: Option<Duration>,
    /// `vs`: visit store version.
    pub visit_store_version: Option<i32>,
}

/// Errors raised when a status-response body fails to parse. A failed
/// parse makes the whole response erroneous.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseParseError {
    /// A token was not of the form `key=value`.
    #[error("malformed response pair: {0:?}")]
    MalformedPair(String),
    /// A known key carried a non-numeric value.
    #[error("invalid value for response key {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

impl ResponseAttributes {
    /// Parses a status-response body. Pairs are separated by `&` or by
    /// line breaks; unknown keys are ignored.
    pub fn parse(body: &str) -> Result<Self, ResponseParseError> {
        let mut attributes = ResponseAttributes::default();
        for pair in body
            .split(['&', '\n', '\r'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ResponseParseError::MalformedPair(pair.to_string()))?;
            attributes.apply(key, value)?;
        }
        Ok(attributes)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ResponseParseError> {
        match key {
            "cp" => self.capture = Some(parse_number::<i64>(key, value)? != 0),
            "er" => self.capture_errors = Some(parse_number::<i64>(key, value)? != 0),
            "cr" => self.capture_crashes = Some(parse_number::<i64>(key, value)? != 0),
            "bl" => self.beacon_size_bytes = Some(parse_number(key, value)?),
            "id" => self.server_id = Some(parse_number(key, value)?),
            "tc" => self.traffic_control_percentage = Some(parse_number(key, value)?),
            "sr" => {
                self.send_interval = Some(Duration::from_secs(parse_number(key, value)?));
            }
            "mp" => self.multiplicity = Some(parse_number(key, value)?),
            "ss" => self.split_by_events = Some(parse_number(key, value)?),
            "md" => {
                self.max_session_duration =
                    Some(Duration::from_secs(parse_number::<u64>(key, value)? * 60));
            }
            "st" => {
                self.session_timeout = Some(Duration::from_secs(parse_number(key, value)?));
            }
            "vs" => self.visit_store_version = Some(parse_number(key, value)?),
            _ => {}
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ResponseParseError> {
    value.parse().map_err(|_| ResponseParseError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_response() {
        let attrs = ResponseAttributes::parse(
            "type=m&cp=1&er=1&cr=0&bl=30720&id=7&tc=85&sr=120&mp=2&ss=10&md=360&st=1800&vs=2",
        )
        .unwrap();
        assert_eq!(attrs.capture, Some(true));
        assert_eq!(attrs.capture_errors, Some(true));
        assert_eq!(attrs.capture_crashes, Some(false));
        assert_eq!(attrs.beacon_size_bytes, Some(30720));
        assert_eq!(attrs.server_id, Some(7));
        assert_eq!(attrs.traffic_control_percentage, Some(85));
        assert_eq!(attrs.send_interval, Some(Duration::from_secs(120)));
        assert_eq!(attrs.multiplicity, Some(2));
        assert_eq!(attrs.split_by_events, Some(10));
        assert_eq!(
            attrs.max_session_duration,
            Some(Duration::from_secs(360 * 60))
        );
        assert_eq!(attrs.session_timeout, Some(Duration::from_secs(1800)));
        assert_eq!(attrs.visit_store_version, Some(2));
    }

    #[test]
    fn absent_keys_stay_none() {
        let attrs = ResponseAttributes::parse("cp=1").unwrap();
        assert_eq!(attrs.capture, Some(true));
        assert_eq!(attrs.server_id, None);
        assert_eq!(attrs.send_interval, None);
    }

    #[test]
    fn parses_line_separated_pairs() {
        let attrs = ResponseAttributes::parse("cp=0\r\nbl=1024\nid=3").unwrap();
        assert_eq!(attrs.capture, Some(false));
        assert_eq!(attrs.beacon_size_bytes, Some(1024));
        assert_eq!(attrs.server_id, Some(3));
    }

    #[test]
    fn empty_body_is_empty_attributes() {
        assert_eq!(
            ResponseAttributes::parse("").unwrap(),
            ResponseAttributes::default()
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let attrs = ResponseAttributes::parse("zz=99&cp=1").unwrap();
        assert_eq!(attrs.capture, Some(true));
    }

    #[test]
    fn malformed_pair_is_an_error() {
        assert!(matches!(
            ResponseAttributes::parse("cp"),
            Err(ResponseParseError::MalformedPair(_))
        ));
    }

    #[test]
    fn non_numeric_value_is_an_error() {
        assert!(matches!(
            ResponseAttributes::parse("bl=big"),
            Err(ResponseParseError::InvalidValue { .. })
        ));
    }
}
