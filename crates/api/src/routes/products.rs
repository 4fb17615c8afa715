//! Product read and restock endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::{Product, ProductId};
use ledger::Ledger;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub category: String,
    pub stock: i64,
    pub price_cents: i64,
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name.clone(),
            category: product.category.clone(),
            stock: product.stock,
            price_cents: product.price.cents(),
        }
    }
}

/// GET /products/{id}: Cache-aside product read.
#[tracing::instrument(skip(state))]
pub async fn get<L: Ledger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id = parse_product_id(&id)?;
    let product = state.inventory.get_product(product_id).await?;
    Ok(Json(ProductResponse::from(&product)))
}

/// POST /products/{id}/stock: Apply a signed stock change.
#[tracing::instrument(skip(state, payload))]
pub async fn adjust_stock<L: Ledger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    payload: Result<Json<AdjustStockRequest>, JsonRejection>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id = parse_product_id(&id)?;
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let product = state
        .inventory
        .adjust_stock(product_id, request.delta)
        .await?;
    Ok(Json(ProductResponse::from(&product)))
}

fn parse_product_id(id: &str) -> Result<ProductId, ApiError> {
    id.trim()
        .parse::<ProductId>()
        .ok()
        .filter(|id| !id.is_nil())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid product ID: {id}")))
}
