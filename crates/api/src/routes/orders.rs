//! Order endpoints: create, read, status update and per-user listing.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Order, OrderPage};
use domain::{
    CreateOrderRequest, InventoryService, OrderService, parse_order_id, parse_user_id,
    validate_page,
};
use events::{OrderEventPublisher, SharedBus};
use ledger::Ledger;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<L: Ledger> {
    pub orders: OrderService<L>,
    pub inventory: InventoryService<L>,
    pub publisher: OrderEventPublisher<SharedBus>,
    pub backends: Backends,
}

/// Which implementation serves each backend, reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct Backends {
    pub ledger: &'static str,
    pub cache: &'static str,
    pub bus: &'static str,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            ledger: "memory",
            cache: "memory",
            bus: "memory",
        }
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

const DEFAULT_PAGE_SIZE: i64 = 10;

// -- Response types --

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderPageResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            status: order.status.to_string(),
            items: order
                .items
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                })
                .collect(),
            total_cents: order.total.cents(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

impl From<&OrderPage> for OrderPageResponse {
    fn from(page: &OrderPage) -> Self {
        Self {
            orders: page.orders.iter().map(OrderResponse::from).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
        }
    }
}

// -- Handlers --

/// POST /orders: Reserve stock and commit a new order, then announce it.
///
/// The event is published after the commit; a publish failure is logged and
/// does not change the response.
#[tracing::instrument(skip(state, payload))]
pub async fn create<L: Ledger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let placed = state.orders.place_order(request).await?;

    if let Err(err) = state.publisher.publish_placed(&placed).await {
        tracing::warn!(
            order_id = %placed.order.id,
            error = %err,
            "Order committed but event was not published"
        );
    }

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&placed.order))))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<L: Ledger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PATCH /orders/{id}/status: Move an order forward or cancel it.
#[tracing::instrument(skip(state, payload))]
pub async fn update_status<L: Ledger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let order = state
        .orders
        .update_order_status_str(order_id, &request.status)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /users/{user_id}/orders?page=&page_size=: Newest first.
#[tracing::instrument(skip(state, params))]
pub async fn list_for_user<L: Ledger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(user_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<OrderPageResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let page = validate_page(
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    )?;

    let orders = state.orders.list_orders(user_id, page).await?;
    Ok(Json(OrderPageResponse::from(&orders)))
}
