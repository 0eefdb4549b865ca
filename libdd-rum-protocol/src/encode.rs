// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Value encoding and truncation rules of the beacon wire format.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::borrow::Cow;

/// Maximum length of action, value, event and user-tag names, in
/// characters, after trimming surrounding whitespace.
pub const MAX_NAME_LEN: usize = 250;

/// Maximum length of an error/crash reason, in characters.
pub const MAX_REASON_LEN: usize = 1_000;

/// Maximum length of a stack trace, in characters.
pub const MAX_STACK_TRACE_LEN: usize = 128_000;

// Unreserved set of RFC 3986 minus `_`: the underscore is the field
// separator of web-request tags, so it must always be escaped.
const VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes a value for the wire. UTF-8 input, ASCII output;
/// `_` is escaped in addition to the RFC 3986 reserved characters.
pub fn percent_encode(value: &str) -> Cow<'_, str> {
    utf8_percent_encode(value, VALUE_ENCODE_SET).into()
}

/// Trims surrounding whitespace and truncates to [`MAX_NAME_LEN`]
/// characters.
pub fn truncate_name(name: &str) -> &str {
    truncate_chars(name.trim(), MAX_NAME_LEN)
}

/// Truncates an error/crash reason to [`MAX_REASON_LEN`] characters.
pub fn truncate_reason(reason: &str) -> &str {
    truncate_chars(reason, MAX_REASON_LEN)
}

/// Truncates a stack trace to [`MAX_STACK_TRACE_LEN`] characters.
///
/// When the trace is cut, the cut prefers the last line break at or
/// before the limit so that no half line is transmitted; the line break
/// itself is the first excluded character.
pub fn truncate_stack_trace(stack_trace: &str) -> &str {
    let truncated = truncate_chars(stack_trace, MAX_STACK_TRACE_LEN);
    if truncated.len() == stack_trace.len() {
        return stack_trace;
    }
    match truncated.rfind('\n') {
        Some(idx) => &truncated[..idx],
        None => truncated,
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
