//! # Core Configuration Module
//!
//! Provides configuration management for the warehouse client core.
//!
//! ## Overview
//!
//! Two layers are configured here:
//!
//! - [`ApiConfig`]: the backend location. One validated base URL plus a table of
//!   path templates. Every request URL in the workspace is produced from it, so a
//!   malformed endpoint is rejected when the application starts instead of when
//!   the first request goes out.
//! - [`CoreConfig`]: the API configuration together with the host bridges
//!   (`HttpClient`, `SecureStore`, `Clock`) the core needs.
//!
//! When the `desktop-shims` feature is enabled, reqwest and keyring based bridges
//! are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::{ApiConfig, Endpoint};
//!
//! let api = ApiConfig::builder()
//!     .base_url("https://wms.example.com")
//!     .build()
//!     .expect("valid configuration");
//!
//! assert_eq!(
//!     api.url(Endpoint::Login).unwrap().as_str(),
//!     "https://wms.example.com/api/v1/auth/login"
//! );
//! assert_eq!(
//!     api.url_with_id(Endpoint::Warehouse, "WH 01").unwrap().as_str(),
//!     "https://wms.example.com/api/v1/warehouses/WH%2001"
//! );
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::ApiConfig;
//!
//! // Relative base URLs are rejected at startup
//! let config = ApiConfig::builder()
//!     .base_url("/api")
//!     .build()
//!     .expect("Should fail - base URL must be absolute");
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use bridge_traits::{Clock, HttpClient, SecureStore, SystemClock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Placeholder accepted inside path templates.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Environment variable holding the API base URL.
pub const ENV_BASE_URL: &str = "WMS_API_BASE_URL";

/// Environment variable holding the request timeout in seconds.
pub const ENV_TIMEOUT_SECS: &str = "WMS_API_TIMEOUT_SECS";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_REFRESH_LEEWAY: Duration = Duration::from_secs(30);

/// Backend endpoints known to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `POST` credentials, receive a token pair
    Login,
    /// `POST` a refresh token, receive a token pair
    Refresh,
    /// Account registration
    Register,
    /// Optional server-side token revocation
    Logout,
    /// Warehouse collection
    Warehouses,
    /// Single warehouse, templated with `{id}`
    Warehouse,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Login,
        Endpoint::Refresh,
        Endpoint::Register,
        Endpoint::Logout,
        Endpoint::Warehouses,
        Endpoint::Warehouse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Login => "login",
            Endpoint::Refresh => "refresh",
            Endpoint::Register => "register",
            Endpoint::Logout => "logout",
            Endpoint::Warehouses => "warehouses",
            Endpoint::Warehouse => "warehouse",
        }
    }

    /// Endpoints that are called without a bearer credential.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Endpoint::Login | Endpoint::Refresh | Endpoint::Register
        )
    }

    fn requires_id(&self) -> bool {
        matches!(self, Endpoint::Warehouse)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Path templates relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub register: String,
    pub logout: Option<String>,
    pub warehouses: String,
    pub warehouse: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/api/v1/auth/login".to_string(),
            refresh: "/api/v1/auth/refresh".to_string(),
            register: "/api/v1/auth/register".to_string(),
            logout: None,
            warehouses: "/api/v1/warehouses".to_string(),
            warehouse: "/api/v1/warehouses/{id}".to_string(),
        }
    }
}

impl Endpoints {
    pub fn template(&self, endpoint: Endpoint) -> Option<&str> {
        match endpoint {
            Endpoint::Login => Some(&self.login),
            Endpoint::Refresh => Some(&self.refresh),
            Endpoint::Register => Some(&self.register),
            Endpoint::Logout => self.logout.as_deref(),
            Endpoint::Warehouses => Some(&self.warehouses),
            Endpoint::Warehouse => Some(&self.warehouse),
        }
    }
}

/// Validated backend location.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    base_url: Url,
    endpoints: Endpoints,
    request_timeout: Duration,
    refresh_leeway: Duration,
    auth_urls: Vec<Url>,
}

impl ApiConfig {
    pub fn builder() -> ApiConfigBuilder {
        ApiConfigBuilder::default()
    }

    /// Build from `WMS_API_BASE_URL` / `WMS_API_TIMEOUT_SECS` with default paths.
    pub fn from_env() -> Result<Self> {
        Self::builder().with_env()?.build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Upper bound for a single network call.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// How long before expiry an access token is treated as already expired
    /// when deciding whether to refresh proactively.
    pub fn refresh_leeway(&self) -> Duration {
        self.refresh_leeway
    }

    pub fn has_endpoint(&self, endpoint: Endpoint) -> bool {
        self.endpoints.template(endpoint).is_some()
    }

    /// Full URL of a non-templated endpoint.
    pub fn url(&self, endpoint: Endpoint) -> Result<Url> {
        if endpoint.requires_id() {
            return Err(Error::Config(format!(
                "Endpoint '{}' requires an id; use url_with_id()",
                endpoint
            )));
        }
        let template = self.template(endpoint)?;
        resolve(&self.base_url, template, None)
    }

    /// Full URL of a templated endpoint; `id` is percent-encoded as one path segment.
    pub fn url_with_id(&self, endpoint: Endpoint, id: &str) -> Result<Url> {
        if !endpoint.requires_id() {
            return Err(Error::Config(format!(
                "Endpoint '{}' does not take an id",
                endpoint
            )));
        }
        if id.is_empty() {
            return Err(Error::Config("Resource id cannot be empty".to_string()));
        }
        let template = self.template(endpoint)?;
        resolve(&self.base_url, template, Some(id))
    }

    /// Whether `url` targets login, refresh or register. Query strings and
    /// fragments are ignored; unparseable URLs are never exempt.
    pub fn is_auth_endpoint(&self, url: &str) -> bool {
        let Ok(mut parsed) = Url::parse(url) else {
            return false;
        };
        parsed.set_query(None);
        parsed.set_fragment(None);
        self.auth_urls.contains(&parsed)
    }

    fn template(&self, endpoint: Endpoint) -> Result<&str> {
        self.endpoints.template(endpoint).ok_or_else(|| {
            Error::Config(format!("Endpoint '{}' is not configured", endpoint))
        })
    }
}

fn resolve(base_url: &Url, template: &str, id: Option<&str>) -> Result<Url> {
    let mut url = base_url.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Config(format!("Base URL '{}' cannot carry paths", base_url)))?;
        segments.pop_if_empty();

        for segment in template.split('/').filter(|s| !s.is_empty()) {
            if segment == ID_PLACEHOLDER {
                let id = id.ok_or_else(|| {
                    Error::Config(format!("Template '{}' requires an id", template))
                })?;
                segments.push(id);
            } else {
                segments.push(segment);
            }
        }
    }
    Ok(url)
}

fn validate_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid API base URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "API base URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(Error::Config(format!(
            "API base URL '{}' must include a host",
            raw
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::Config(
            "API base URL must not contain a query string or fragment".to_string(),
        ));
    }

    Ok(url)
}

fn validate_template(endpoint: Endpoint, template: &str) -> Result<()> {
    if !template.starts_with('/') {
        return Err(Error::Config(format!(
            "Path for endpoint '{}' must start with '/': '{}'",
            endpoint, template
        )));
    }

    let mut placeholders = 0;
    for segment in template.split('/').filter(|s| !s.is_empty()) {
        if segment == ID_PLACEHOLDER {
            placeholders += 1;
            continue;
        }
        let valid = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
        if !valid {
            return Err(Error::Config(format!(
                "Path for endpoint '{}' contains an invalid segment '{}'",
                endpoint, segment
            )));
        }
    }

    let expected = usize::from(endpoint.requires_id());
    if placeholders != expected {
        return Err(Error::Config(format!(
            "Path for endpoint '{}' must contain {} '{}' placeholder(s), found {}",
            endpoint, expected, ID_PLACEHOLDER, placeholders
        )));
    }

    Ok(())
}

#[derive(Debug, Default)]
pub struct ApiConfigBuilder {
    base_url: Option<String>,
    endpoints: Endpoints,
    request_timeout: Option<Duration>,
    refresh_leeway: Option<Duration>,
}

impl ApiConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.login = path.into();
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.refresh = path.into();
        self
    }

    pub fn register_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.register = path.into();
        self
    }

    /// Enable server-side revocation on logout.
    pub fn logout_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.logout = Some(path.into());
        self
    }

    pub fn warehouses_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.warehouses = path.into();
        self
    }

    pub fn warehouse_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.warehouse = path.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = Some(leeway);
        self
    }

    /// Overlay values from the process environment.
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            self.base_url = Some(base_url);
        }
        if let Ok(raw) = std::env::var(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a whole number of seconds", ENV_TIMEOUT_SECS))
            })?;
            self.request_timeout = Some(Duration::from_secs(secs));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<ApiConfig> {
        let raw_base = self.base_url.ok_or_else(|| {
            Error::Config(format!(
                "API base URL is required. Use .base_url() or set {}.",
                ENV_BASE_URL
            ))
        })?;
        let base_url = validate_base_url(&raw_base)?;

        for endpoint in Endpoint::ALL {
            if let Some(template) = self.endpoints.template(endpoint) {
                validate_template(endpoint, template)?;
            }
        }

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() || request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(Error::Config(format!(
                "Request timeout must be between 1ms and {}s",
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }

        let auth_urls = Endpoint::ALL
            .iter()
            .filter(|endpoint| endpoint.is_auth())
            .filter_map(|endpoint| self.endpoints.template(*endpoint))
            .map(|template| resolve(&base_url, template, None))
            .collect::<Result<Vec<_>>>()?;

        Ok(ApiConfig {
            base_url,
            endpoints: self.endpoints,
            request_timeout,
            refresh_leeway: self.refresh_leeway.unwrap_or(DEFAULT_REFRESH_LEEWAY),
            auth_urls,
        })
    }
}

/// Everything the core needs to start: backend location plus host bridges.
#[derive(Clone)]
pub struct CoreConfig {
    pub api: ApiConfig,
    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub clock: Arc<dyn Clock>,
    pub event_buffer: usize,
    /// Installed as the global subscriber at startup when set.
    pub logging: Option<LoggingConfig>,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api", &self.api)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("clock", &"Clock { ... }")
            .field("event_buffer", &self.event_buffer)
            .field("logging", &self.logging)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_api: &ApiConfig) -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                  Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                  Other hosts: inject a platform-native adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(api: &ApiConfig) -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::with_timeout(api.request_timeout())?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for credential persistence. \
                  Desktop: enable the 'desktop-shims' feature to use KeyringSecureStore. \
                  Other hosts: inject durable client-local storage."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Ok(Arc::new(bridge_desktop::KeyringSecureStore::new()))
}

#[derive(Default)]
pub struct CoreConfigBuilder {
    api: Option<ApiConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer: Option<usize>,
    logging: Option<LoggingConfig>,
}

impl CoreConfigBuilder {
    pub fn api(mut self, api: ApiConfig) -> Self {
        self.api = Some(api);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let api = self.api.ok_or_else(|| {
            Error::Config("API configuration is required. Use .api() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(&api)?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let event_buffer = self.event_buffer.unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE);
        if event_buffer == 0 {
            return Err(Error::Config(
                "Event buffer must hold at least one event".to_string(),
            ));
        }

        Ok(CoreConfig {
            api,
            http_client,
            secure_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer,
            logging: self.logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{HttpRequest, HttpResponse};

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(204, ""))
        }
    }

    struct MockSecureStore;

    #[async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(&self, _key: &str, _value: &[u8]) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_secret(&self, _key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn delete_secret(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn api() -> ApiConfig {
        ApiConfig::builder()
            .base_url("https://wms.example.com")
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_endpoints_resolve() {
        let api = api();
        assert_eq!(
            api.url(Endpoint::Login).unwrap().as_str(),
            "https://wms.example.com/api/v1/auth/login"
        );
        assert_eq!(
            api.url(Endpoint::Refresh).unwrap().as_str(),
            "https://wms.example.com/api/v1/auth/refresh"
        );
        assert_eq!(
            api.url(Endpoint::Warehouses).unwrap().as_str(),
            "https://wms.example.com/api/v1/warehouses"
        );
        assert_eq!(api.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(api.refresh_leeway(), DEFAULT_REFRESH_LEEWAY);
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let api = ApiConfig::builder()
            .base_url("https://example.com/wms/")
            .build()
            .unwrap();
        assert_eq!(
            api.url(Endpoint::Login).unwrap().as_str(),
            "https://example.com/wms/api/v1/auth/login"
        );
    }

    #[test]
    fn test_id_is_interpolated_and_encoded() {
        let api = api();
        assert_eq!(
            api.url_with_id(Endpoint::Warehouse, "42").unwrap().as_str(),
            "https://wms.example.com/api/v1/warehouses/42"
        );
        let encoded = api.url_with_id(Endpoint::Warehouse, "a/b").unwrap();
        assert_eq!(encoded.path(), "/api/v1/warehouses/a%2Fb");
        assert!(!encoded.as_str().contains("{id}"));
    }

    #[test]
    fn test_id_misuse_is_rejected() {
        let api = api();
        assert!(api.url(Endpoint::Warehouse).is_err());
        assert!(api.url_with_id(Endpoint::Login, "1").is_err());
        assert!(api.url_with_id(Endpoint::Warehouse, "").is_err());
    }

    #[test]
    fn test_logout_is_optional() {
        let api = api();
        assert!(!api.has_endpoint(Endpoint::Logout));
        assert!(matches!(api.url(Endpoint::Logout), Err(Error::Config(_))));

        let api = ApiConfig::builder()
            .base_url("https://wms.example.com")
            .logout_path("/api/v1/auth/logout")
            .build()
            .unwrap();
        assert!(api.has_endpoint(Endpoint::Logout));
    }

    #[test]
    fn test_invalid_base_urls() {
        for raw in [
            "/api",
            "ftp://wms.example.com",
            "https://wms.example.com?x=1",
            "mailto:ops@example.com",
        ] {
            let result = ApiConfig::builder().base_url(raw).build();
            assert!(result.is_err(), "{} should be rejected", raw);
        }
        assert!(ApiConfig::builder().build().is_err());
    }

    #[test]
    fn test_invalid_templates() {
        let base = || ApiConfig::builder().base_url("https://wms.example.com");

        assert!(base().login_path("api/login").build().is_err());
        assert!(base().warehouses_path("/api/${warehouseId}").build().is_err());
        assert!(base().warehouse_path("/api/v1/warehouses").build().is_err());
        assert!(base().login_path("/api/{id}/login").build().is_err());
    }

    #[test]
    fn test_timeout_bounds() {
        let base = || ApiConfig::builder().base_url("https://wms.example.com");
        assert!(base().request_timeout(Duration::ZERO).build().is_err());
        assert!(base()
            .request_timeout(Duration::from_secs(301))
            .build()
            .is_err());
        assert!(base().request_timeout(Duration::from_secs(5)).build().is_ok());
    }

    #[test]
    fn test_auth_endpoint_detection() {
        let api = api();
        assert!(api.is_auth_endpoint("https://wms.example.com/api/v1/auth/login"));
        assert!(api.is_auth_endpoint("https://wms.example.com/api/v1/auth/refresh?x=1"));
        assert!(api.is_auth_endpoint("https://wms.example.com/api/v1/auth/register"));
        assert!(!api.is_auth_endpoint("https://wms.example.com/api/v1/warehouses"));
        assert!(!api.is_auth_endpoint("https://evil.example.com/api/v1/auth/login"));
        assert!(!api.is_auth_endpoint("not a url"));
    }

    #[test]
    fn test_core_config_requires_api() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_core_config_with_bridges() {
        let config = CoreConfig::builder()
            .api(api())
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .build()
            .unwrap();
        assert_eq!(config.event_buffer, crate::events::DEFAULT_EVENT_BUFFER_SIZE);
        assert!(format!("{:?}", config).contains("SecureStore { ... }"));
    }

    #[test]
    fn test_core_config_rejects_empty_event_buffer() {
        let result = CoreConfig::builder()
            .api(api())
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .event_buffer(0)
            .build();
        assert!(result.is_err());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridges_fail_fast() {
        let result = CoreConfig::builder().api(api()).build();
        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "HttpClient"
        ));
    }
}
