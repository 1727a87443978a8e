use super::{RegistryError, StockItem, StockRegistry};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout applied to each request to the stock API
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stock registry backed by a Magento-style REST API
#[derive(Clone, Debug)]
pub(crate) struct RestRegistry {
    client: Client,
    base_url: String,
    token: String,
}

impl RestRegistry {
    pub(crate) fn new(base_url: &str, token: &str) -> Result<RestRegistry, RegistryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| RegistryError::Http {
                url: base_url.to_owned(),
                source,
            })?;
        Ok(RestRegistry {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    fn stock_item_url(&self, sku: i64) -> String {
        format!("{}/rest/V1/stockItems/{sku}", self.base_url)
    }

    fn update_url(&self, sku: i64, item_id: i64) -> String {
        format!(
            "{}/rest/V1/products/{sku}/stockItems/{item_id}",
            self.base_url
        )
    }
}

impl StockRegistry for RestRegistry {
    async fn get_by_sku(&self, sku: i64) -> Result<StockItem, RegistryError> {
        let url = self.stock_item_url(sku);
        tracing::trace!(%url, "Fetching stock item");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| RegistryError::Http {
                url: url.clone(),
                source,
            })?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound { sku });
        }
        let wire = check_status(&url, resp)
            .await?
            .json::<WireStockItem>()
            .await
            .map_err(|source| RegistryError::Http { url, source })?;
        Ok(wire.into())
    }

    async fn update_by_sku(&self, sku: i64, item: &StockItem) -> Result<(), RegistryError> {
        let Some(item_id) = item.item_id else {
            return Err(RegistryError::NoItemId { sku });
        };
        let url = self.update_url(sku, item_id);
        tracing::trace!(%url, qty = item.qty, is_in_stock = item.is_in_stock, "Updating stock item");
        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(&UpdateRequest::from(item))
            .send()
            .await
            .map_err(|source| RegistryError::Http {
                url: url.clone(),
                source,
            })?;
        check_status(&url, resp).await?;
        Ok(())
    }
}

async fn check_status(url: &str, resp: Response) -> Result<Response, RegistryError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            url: url.to_owned(),
            status,
            body,
        })
    }
}

/// Stock item as returned by the API.  Quantities are decimal on the wire.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
struct WireStockItem {
    item_id: Option<i64>,
    qty: Option<f64>,
    is_in_stock: bool,
}

impl From<WireStockItem> for StockItem {
    #[allow(clippy::cast_possible_truncation)]
    fn from(value: WireStockItem) -> StockItem {
        StockItem {
            item_id: value.item_id,
            // `as` saturates and maps NaN to zero.
            qty: value.qty.map_or(0, |q| q.trunc() as i64),
            is_in_stock: value.is_in_stock,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
struct UpdateRequest {
    #[serde(rename = "stockItem")]
    stock_item: UpdateFields,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
struct UpdateFields {
    qty: i64,
    is_in_stock: bool,
}

impl From<&StockItem> for UpdateRequest {
    fn from(item: &StockItem) -> UpdateRequest {
        UpdateRequest {
            stock_item: UpdateFields {
                qty: item.qty,
                is_in_stock: item.is_in_stock,
            },
        }
    }
}
