// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The OpenKit instance: configuration root, session factory, worker
//! owner.

use crate::cache::BeaconCache;
use crate::config::{
    parse_endpoint, CacheConfig, ConfigError, ConnectionInfo, CrashReportingLevel,
    DataCollectionLevel, OpenKitConfig, PrivacyConfig, ServerConfig,
};
use crate::core::handles::Session;
use crate::core::session::{SessionCreator, SessionProxyInner};
use crate::http::{HttpClient, HyperClient};
use crate::providers::{Providers, SessionIdProvider};
use crate::worker::{self, AgentContext, AgentHandle};
use crate::MutexExt;
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder of an [`OpenKit`] instance. Endpoint URL, application id
/// and device id are mandatory; everything else has defaults.
pub struct OpenKitBuilder {
    endpoint_url: String,
    application_id: String,
    device_id: i64,
    application_version: String,
    operating_system: Option<String>,
    manufacturer: Option<String>,
    model_id: Option<String>,
    connection: Option<ConnectionInfo>,
    data_collection_level: DataCollectionLevel,
    crash_reporting_level: CrashReportingLevel,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    cache_config: CacheConfig,
    http_client: Option<Box<dyn HttpClient>>,
    providers: Providers,
}

impl OpenKitBuilder {
    pub fn new(endpoint_url: &str, application_id: &str, device_id: i64) -> Self {
        Self {
            endpoint_url: endpoint_url.to_string(),
            application_id: application_id.to_string(),
            device_id,
            application_version: env!("CARGO_PKG_VERSION").to_string(),
            operating_system: None,
            manufacturer: None,
            model_id: None,
            connection: None,
            data_collection_level: DataCollectionLevel::default(),
            crash_reporting_level: CrashReportingLevel::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            cache_config: CacheConfig::default(),
            http_client: None,
            providers: Providers::default(),
        }
    }

    pub fn with_application_version(mut self, version: &str) -> Self {
        self.application_version = version.to_string();
        self
    }

    pub fn with_operating_system(mut self, operating_system: &str) -> Self {
        self.operating_system = Some(operating_system.to_string());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self
    }

    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.model_id = Some(model_id.to_string());
        self
    }

    /// Connection metadata spelled into the mutable beacon prefix.
    pub fn with_connection_info(mut self, connection: ConnectionInfo) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_data_collection_level(mut self, level: DataCollectionLevel) -> Self {
        self.data_collection_level = level;
        self
    }

    pub fn with_crash_reporting_level(mut self, level: CrashReportingLevel) -> Self {
        self.crash_reporting_level = level;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// How long [`OpenKit::shutdown`] waits for the final drain.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Replaces the default hyper transport, e.g. with
    /// [`crate::http::MockClient`] for a dry run.
    pub fn with_http_client(mut self, client: Box<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Pins time, thread-id and randomness sources.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn with_providers(
        mut self,
        time: Arc<dyn crate::providers::TimeProvider>,
        thread: Arc<dyn crate::providers::ThreadIdProvider>,
        random: Arc<dyn crate::providers::RandomProvider>,
    ) -> Self {
        self.providers = Providers {
            time,
            thread,
            random,
        };
        self
    }

    /// Validates the configuration and starts the background worker.
    pub fn build(self) -> Result<OpenKit, ConfigError> {
        let endpoint = parse_endpoint(&self.endpoint_url)?;
        if self.application_id.trim().is_empty() {
            return Err(ConfigError::EmptyApplicationId);
        }
        let config = Arc::new(OpenKitConfig {
            endpoint,
            application_id: self.application_id,
            device_id: self.device_id,
            application_version: self.application_version,
            operating_system: self.operating_system,
            manufacturer: self.manufacturer,
            model_id: self.model_id,
            connection: self.connection,
            request_timeout: self.request_timeout,
            shutdown_timeout: self.shutdown_timeout,
        });
        let privacy = PrivacyConfig::new(self.data_collection_level, self.crash_reporting_level);
        let cache = Arc::new(BeaconCache::new());
        let server_config = Arc::new(ArcSwap::from_pointee(ServerConfig::default()));
        let client = self
            .http_client
            .unwrap_or_else(|| Box::new(HyperClient::new()));
        let session_ids = SessionIdProvider::new(self.providers.random.as_ref());

        let handle = worker::spawn(
            AgentContext {
                config: config.clone(),
                cache: cache.clone(),
                cache_config: self.cache_config,
                server_config: server_config.clone(),
                time: self.providers.time.clone(),
            },
            client,
        )
        .map_err(|e| ConfigError::WorkerSpawn(e.to_string()))?;

        info!(
            endpoint = %config.endpoint,
            application.id = %config.application_id,
            "OpenKit instance created"
        );
        Ok(OpenKit {
            inner: Arc::new(OpenKitInner {
                config,
                privacy,
                cache,
                server_config,
                providers: self.providers,
                session_ids,
                handle,
                state: Mutex::new(OpenKitState {
                    shut_down: false,
                    sessions: Vec::new(),
                }),
            }),
        })
    }
}

struct OpenKitState {
    shut_down: bool,
    sessions: Vec<Arc<SessionProxyInner>>,
}

pub(crate) struct OpenKitInner {
    config: Arc<OpenKitConfig>,
    privacy: PrivacyConfig,
    cache: Arc<BeaconCache>,
    server_config: Arc<ArcSwap<ServerConfig>>,
    providers: Providers,
    session_ids: SessionIdProvider,
    handle: AgentHandle,
    state: Mutex<OpenKitState>,
}

/// The RUM agent instance. Create sessions from it; shut it down when
/// the application exits.
pub struct OpenKit {
    inner: Arc<OpenKitInner>,
}

impl OpenKit {
    pub fn builder(endpoint_url: &str, application_id: &str, device_id: i64) -> OpenKitBuilder {
        OpenKitBuilder::new(endpoint_url, application_id, device_id)
    }

    /// Opens a session. Returns the no-op session after shutdown.
    pub fn create_session(&self) -> Session {
        self.create_session_internal(None)
    }

    /// Opens a session carrying the given client IP on its beacon.
    pub fn create_session_with_ip(&self, client_ip: &str) -> Session {
        self.create_session_internal(Some(client_ip))
    }

    fn create_session_internal(&self, client_ip: Option<&str>) -> Session {
        let inner = &self.inner;
        let mut state = inner.state.lock_or_panic();
        if state.shut_down {
            return Session::null();
        }
        let creator = SessionCreator::new(
            inner.config.clone(),
            inner.privacy,
            inner.server_config.clone(),
            inner.cache.clone(),
            inner.providers.clone(),
            inner.session_ids.next_session_id(),
            client_ip.map(str::to_string),
        );
        let (proxy, initial) = SessionProxyInner::new(creator);
        state.sessions.push(proxy.clone());
        drop(state);
        inner.handle.register_session(proxy.clone(), initial);
        debug!("Session created");
        Session::real(proxy)
    }

    /// Ends every open session, asks the worker to drain, and waits up
    /// to the configured shutdown timeout before giving up.
    pub fn shutdown(&self) {
        let sessions = {
            let mut state = self.inner.state.lock_or_panic();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            std::mem::take(&mut state.sessions)
        };
        info!(sessions = sessions.len(), "Shutting down OpenKit");
        for proxy in &sessions {
            proxy.end();
        }
        self.inner.handle.send_stop();
        self.inner
            .handle
            .wait_for_shutdown_deadline(Instant::now() + self.inner.config.shutdown_timeout);
    }
}
