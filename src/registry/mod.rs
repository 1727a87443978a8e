//! The product stock API consumed by the update pipeline
mod rest;
pub(crate) use self::rest::RestRegistry;
use std::future::Future;
use thiserror::Error;

/// Stock lookups and updates keyed by integer SKU
pub(crate) trait StockRegistry: Sync {
    fn get_by_sku(
        &self,
        sku: i64,
    ) -> impl Future<Output = Result<StockItem, RegistryError>> + Send;

    fn update_by_sku(
        &self,
        sku: i64,
        item: &StockItem,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;
}

/// The stock record for a single product
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct StockItem {
    /// The registry's identifier for the record, if it has one
    pub(crate) item_id: Option<i64>,
    pub(crate) qty: i64,
    pub(crate) is_in_stock: bool,
}

impl StockItem {
    /// Set the quantity and derive the in-stock flag from it
    pub(crate) fn apply_qty(&mut self, qty: i64) {
        self.qty = qty;
        self.is_in_stock = qty > 0;
    }
}

#[derive(Debug, Error)]
pub(crate) enum RegistryError {
    #[error("no stock item found for SKU {sku}")]
    NotFound { sku: i64 },
    #[error("stock item for SKU {sku} has no item ID")]
    NoItemId { sku: i64 },
    #[error("request to {url} failed")]
    Http { url: String, source: reqwest::Error },
    #[error("request to {url} returned {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
}
