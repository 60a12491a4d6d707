//! Core service façade and bootstrap.
//!
//! [`CoreService`] is the application root. It takes a [`CoreConfig`] with the
//! host-provided bridges (HTTP transport, secure storage, clock), restores the
//! persisted session and wires the components on top of it:
//!
//! ```text
//! transport ──► AuthGateway ──► SessionPublisher ◄── RouteGuards
//!     │                              ▲
//!     └──► RequestAuthorizer ────────┘
//!               │
//!               └──► WarehouseClient
//! ```
//!
//! Desktop hosts typically enable the `desktop-shims` feature so missing
//! bridges fall back to `reqwest` and the OS keychain.
//!
//! ```no_run
//! # async fn example() -> core_service::Result<()> {
//! use core_service::{ApiConfig, CoreConfig, CoreService, Credentials};
//!
//! let api = ApiConfig::builder().base_url("https://wms.example.com").build()?;
//! let core = CoreService::new(CoreConfig::builder().api(api).build()?).await?;
//!
//! core.login(Credentials::new("alice", "secret1")).await?;
//! let page = core.warehouses().list(&Default::default()).await?;
//! # let _ = page;
//! core.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_auth::{AuthGateway, Credentials, SessionPublisher, SessionState, UserInfo};
pub use core_router::{GuardDecision, Route, RouteGuards};
pub use core_runtime::config::{ApiConfig, CoreConfig};
pub use core_runtime::events::{CoreEvent, EventBus, EventStream, Notification};
pub use core_warehouse::{Page, Warehouse, WarehouseClient, WarehouseQuery};

use bridge_traits::http::HttpClient;
use core_auth::{RequestAuthorizer, TokenStore};
use core_runtime::logging::init_logging;
use std::sync::Arc;
use tracing::{info, instrument};

/// Login route used by the guards.
pub const LOGIN_ROUTE: &str = "/login";

/// Landing route for signed-in users.
pub const LANDING_ROUTE: &str = "/dashboard";

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    event_bus: EventBus,
    publisher: SessionPublisher,
    gateway: Arc<AuthGateway>,
    authorizer: Arc<RequestAuthorizer>,
    guards: RouteGuards,
    warehouses: WarehouseClient,
}

impl CoreService {
    /// Build every component from `config`.
    ///
    /// Installs the global tracing subscriber when `config.logging` is set.
    /// Stored tokens are read once here; a session that can only be resumed
    /// through a refresh stays signed out until [`restore_session`] runs.
    ///
    /// [`restore_session`]: CoreService::restore_session
    pub async fn new(config: CoreConfig) -> Result<Self> {
        if let Some(logging) = config.logging.clone() {
            init_logging(logging)?;
        }

        let event_bus = EventBus::new(config.event_buffer);
        let store = TokenStore::new(Arc::clone(&config.secure_store));
        let publisher = SessionPublisher::restore(store, Arc::clone(&config.clock)).await;

        let gateway = Arc::new(AuthGateway::new(
            Arc::clone(&config.http_client),
            config.api.clone(),
            publisher.clone(),
            event_bus.clone(),
        ));
        let authorizer = Arc::new(RequestAuthorizer::new(
            Arc::clone(&config.http_client),
            Arc::clone(&gateway),
            config.api.clone(),
        ));
        let guards = RouteGuards::new(
            publisher.clone(),
            Route::new(LOGIN_ROUTE),
            Route::new(LANDING_ROUTE),
        );
        let warehouses = WarehouseClient::new(
            Arc::clone(&authorizer) as Arc<dyn HttpClient>,
            config.api,
            event_bus.clone(),
        );

        info!(
            authenticated = publisher.is_authenticated(),
            "Core service initialized"
        );

        Ok(Self {
            event_bus,
            publisher,
            gateway,
            authorizer,
            guards,
            warehouses,
        })
    }

    pub fn session(&self) -> &SessionPublisher {
        &self.publisher
    }

    pub fn gateway(&self) -> &Arc<AuthGateway> {
        &self.gateway
    }

    /// Transport that attaches the session credential and handles `401`s.
    /// Use it for any backend call outside the typed clients.
    pub fn http_client(&self) -> Arc<dyn HttpClient> {
        Arc::clone(&self.authorizer) as Arc<dyn HttpClient>
    }

    pub fn guards(&self) -> &RouteGuards {
        &self.guards
    }

    pub fn warehouses(&self) -> &WarehouseClient {
        &self.warehouses
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> EventStream {
        self.event_bus.stream()
    }

    #[instrument(skip(self, credentials))]
    pub async fn login(&self, credentials: Credentials) -> Result<SessionState> {
        Ok(self.gateway.login(credentials).await?)
    }

    pub async fn logout(&self) -> Result<()> {
        Ok(self.gateway.logout().await?)
    }

    /// Resume a session whose access token expired while the refresh token
    /// is still valid.
    pub async fn restore_session(&self) -> Result<SessionState> {
        Ok(self.gateway.restore_session().await?)
    }

    /// Release session listeners and close watchers. Handles held by the
    /// host keep working for direct calls but no longer receive updates.
    pub fn shutdown(&self) {
        self.publisher.shutdown();
        info!("Core service shut down");
    }
}
