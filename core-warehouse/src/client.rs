use crate::error::{ApiError, Result};
use crate::types::{ApiEnvelope, Page, PageData, Warehouse, WarehouseQuery};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_runtime::config::{ApiConfig, Endpoint};
use core_runtime::events::{CoreEvent, EventBus, Notification};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

/// Read access to warehouses.
///
/// Construct it over the request authorizer so calls carry the session's
/// credential; the client itself never looks at tokens.
#[derive(Clone)]
pub struct WarehouseClient {
    http: Arc<dyn HttpClient>,
    api: ApiConfig,
    event_bus: EventBus,
}

impl WarehouseClient {
    pub fn new(http: Arc<dyn HttpClient>, api: ApiConfig, event_bus: EventBus) -> Self {
        Self {
            http,
            api,
            event_bus,
        }
    }

    /// One page of warehouses matching `query`.
    #[instrument(skip(self), fields(page = query.page, size = query.size))]
    pub async fn list(&self, query: &WarehouseQuery) -> Result<Page<Warehouse>> {
        let result = self.fetch_page(query).await;
        self.report(result)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Warehouse> {
        let result = match self.api.url_with_id(Endpoint::Warehouse, id) {
            Ok(url) => self.fetch(url).await,
            Err(e) => Err(e.into()),
        };
        self.report(result)
    }

    async fn fetch_page(&self, query: &WarehouseQuery) -> Result<Page<Warehouse>> {
        let mut url = self.api.url(Endpoint::Warehouses)?;
        url.query_pairs_mut().extend_pairs(query.to_pairs());

        let data: PageData<Warehouse> = self.fetch(url).await?;
        Ok(data.into_page(query))
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let request = HttpRequest::new(HttpMethod::Get, url.as_str())
            .header("Accept", "application/json")
            .timeout(self.api.request_timeout());

        let response = self.http.execute(request).await?;
        debug!(status = response.status, "Warehouse API responded");
        decode(&response)
    }

    /// Surface failures to the user. Expired authorization is reported by
    /// the session layer, so it is passed through silently.
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            warn!(error = %error, "Warehouse request failed");
            if let Some(severity) = error.notification_severity() {
                let _ = self.event_bus.emit(CoreEvent::Notification(Notification::new(
                    severity,
                    error.user_message(),
                )));
            }
        }
        result
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    if !response.is_success() {
        return Err(ApiError::from_response(response));
    }

    let envelope: ApiEnvelope<T> = response
        .json()
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    envelope.into_data(response.status)
}
