// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared unit-test fixtures: one deterministic instance context and a
//! cache drain that yields wire records as strings.

use crate::cache::{BeaconCache, BeaconKey};
use crate::config::{parse_endpoint, OpenKitConfig, PrivacyConfig, ServerConfig};
use crate::core::session::{SessionCreator, SessionInner};
use crate::providers::test_support::{
    FixedRandomProvider, FixedThreadIdProvider, MockTimeProvider,
};
use crate::providers::Providers;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct TestContext {
    pub cache: Arc<BeaconCache>,
    pub clock: Arc<MockTimeProvider>,
    pub providers: Providers,
    pub config: Arc<OpenKitConfig>,
    pub server_config: Arc<ArcSwap<ServerConfig>>,
}

pub(crate) fn beacon_fixture() -> TestContext {
    let clock = Arc::new(MockTimeProvider::new(1_000));
    let providers = Providers {
        time: clock.clone(),
        thread: Arc::new(FixedThreadIdProvider(7)),
        random: Arc::new(FixedRandomProvider {
            positive: 987_654_321,
            percentage: 0,
        }),
    };
    TestContext {
        cache: Arc::new(BeaconCache::new()),
        clock,
        providers,
        config: Arc::new(OpenKitConfig {
            endpoint: parse_endpoint("http://localhost:9999/mbeacon").unwrap(),
            application_id: "APP".to_string(),
            device_id: 42,
            application_version: "2.1.0".to_string(),
            operating_system: None,
            manufacturer: None,
            model_id: None,
            connection: None,
            request_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }),
        server_config: Arc::new(ArcSwap::from_pointee(ServerConfig::default())),
    }
}

pub(crate) fn started_session(context: &TestContext) -> Arc<SessionInner> {
    context.creator(17).create_session()
}

impl TestContext {
    pub fn creator(&self, session_number: i32) -> SessionCreator {
        SessionCreator::new(
            self.config.clone(),
            PrivacyConfig::default(),
            self.server_config.clone(),
            self.cache.clone(),
            self.providers.clone(),
            session_number,
            None,
        )
    }

    /// Drains every cache entry and returns the individual records.
    pub fn drain(&self) -> Vec<String> {
        let mut keys = self.cache.beacon_keys();
        keys.sort_by_key(|k| (k.session_number, k.session_sequence));
        keys.into_iter().flat_map(|k| self.drain_key(k)).collect()
    }

    /// Drains one cache entry and returns the individual records.
    pub fn drain_key(&self, key: BeaconKey) -> Vec<String> {
        self.cache.prepare_data_for_sending(key);
        let mut records = Vec::new();
        while let Some(chunk) = self.cache.next_chunk(key, "", usize::MAX, '&') {
            self.cache.remove_chunked_data(key);
            records.extend(split_records(&chunk));
        }
        records
    }
}

/// Splits a chunk into records. Records always begin with `et=` and
/// values are percent-encoded, so `&et=` cannot occur inside one.
pub(crate) fn split_records(chunk: &str) -> Vec<String> {
    chunk
        .trim_start_matches('&')
        .split("&et=")
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.starts_with("et=") {
                part.to_string()
            } else {
                format!("et={part}")
            }
        })
        .collect()
}
