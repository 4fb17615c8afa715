use common::{OrderId, PageRequest, ProductId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderError;

/// Raw order-creation input as received from a caller.
///
/// Fields are strings so that malformed identifiers surface as validation
/// errors rather than decode failures. Both `snake_case` and `camelCase`
/// field names are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Optional caller-chosen id. Reusing the id of a pending order owned by
    /// the same user merges the new items into it.
    #[serde(default, alias = "orderId", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
}

/// A raw line item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineRequest {
    #[serde(default, alias = "productId")]
    pub product_id: String,
    #[serde(default)]
    pub quantity: i64,
}

impl CreateOrderRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            order_id: None,
            user_id: user_id.into(),
            items: Vec::new(),
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_item(mut self, product_id: impl Into<String>, quantity: i64) -> Self {
        self.items.push(OrderLineRequest {
            product_id: product_id.into(),
            quantity,
        });
        self
    }

    /// Checks every field and returns the typed order.
    ///
    /// Lines naming the same product are merged into one, keeping the
    /// position of the first occurrence.
    pub fn validate(&self) -> Result<ValidatedOrder, OrderError> {
        let user_id = parse_user_id(&self.user_id)?;

        let order_id = match self.order_id.as_deref().map(str::trim) {
            None | Some("") => OrderId::new(),
            Some(raw) => parse_order_id(raw)?,
        };

        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut lines: Vec<OrderLine> = Vec::with_capacity(self.items.len());
        for (index, item) in self.items.iter().enumerate() {
            let raw = item.product_id.trim();
            if raw.is_empty() {
                return Err(OrderError::ProductIdRequired { index });
            }
            let product_id = parse_uuid(raw)
                .map(ProductId::from_uuid)
                .ok_or_else(|| OrderError::InvalidProductId {
                    index,
                    value: raw.to_string(),
                })?;

            let invalid_quantity = || OrderError::InvalidQuantity {
                index,
                quantity: item.quantity,
            };
            if item.quantity <= 0 {
                return Err(invalid_quantity());
            }
            let quantity = u32::try_from(item.quantity).map_err(|_| invalid_quantity())?;

            match lines.iter_mut().find(|l| l.product_id == product_id) {
                Some(line) => {
                    line.quantity = line
                        .quantity
                        .checked_add(quantity)
                        .ok_or_else(invalid_quantity)?;
                }
                None => lines.push(OrderLine {
                    product_id,
                    quantity,
                }),
            }
        }

        Ok(ValidatedOrder {
            order_id,
            user_id,
            lines,
        })
    }
}

/// An order request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
}

/// A validated line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

fn parse_uuid(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok().filter(|uuid| !uuid.is_nil())
}

/// Parses a user id, rejecting empty, malformed and nil values.
pub fn parse_user_id(raw: &str) -> Result<UserId, OrderError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(OrderError::UserIdRequired);
    }
    parse_uuid(raw)
        .map(UserId::from_uuid)
        .ok_or_else(|| OrderError::InvalidUserId(raw.to_string()))
}

/// Parses an order id, rejecting malformed and nil values.
pub fn parse_order_id(raw: &str) -> Result<OrderId, OrderError> {
    let raw = raw.trim();
    parse_uuid(raw)
        .map(OrderId::from_uuid)
        .ok_or_else(|| OrderError::InvalidOrderId(raw.to_string()))
}

/// Checks one-based pagination input.
pub fn validate_page(page: i64, page_size: i64) -> Result<PageRequest, OrderError> {
    let invalid = || OrderError::InvalidPage { page, page_size };
    if page < 1 || page_size < 1 {
        return Err(invalid());
    }
    let page_u32 = u32::try_from(page).map_err(|_| invalid())?;
    let size_u32 = u32::try_from(page_size).map_err(|_| invalid())?;
    Ok(PageRequest::new(page_u32, size_u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> (CreateOrderRequest, UserId, ProductId) {
        let user_id = UserId::new();
        let product_id = ProductId::new();
        let request = CreateOrderRequest::new(user_id.to_string()).with_item(product_id.to_string(), 2);
        (request, user_id, product_id)
    }

    #[test]
    fn test_valid_request() {
        let (request, user_id, product_id) = valid_request();
        let order = request.validate().unwrap();
        assert_eq!(order.user_id, user_id);
        assert_eq!(
            order.lines,
            vec![OrderLine {
                product_id,
                quantity: 2
            }]
        );
        assert!(!order.order_id.is_nil());
    }

    #[test]
    fn test_user_id_rules() {
        let (mut request, _, _) = valid_request();
        request.user_id = "  ".to_string();
        assert_eq!(request.validate(), Err(OrderError::UserIdRequired));

        request.user_id = "user-1".to_string();
        assert!(matches!(request.validate(), Err(OrderError::InvalidUserId(_))));

        request.user_id = Uuid::nil().to_string();
        assert!(matches!(request.validate(), Err(OrderError::InvalidUserId(_))));
    }

    #[test]
    fn test_items_required() {
        let request = CreateOrderRequest::new(UserId::new().to_string());
        assert_eq!(request.validate(), Err(OrderError::NoItems));
    }

    #[test]
    fn test_item_rules() {
        let user = UserId::new().to_string();
        let product = ProductId::new().to_string();

        let request = CreateOrderRequest::new(&*user).with_item("", 1);
        assert_eq!(
            request.validate(),
            Err(OrderError::ProductIdRequired { index: 0 })
        );

        let request = CreateOrderRequest::new(&*user)
            .with_item(&*product, 1)
            .with_item("sku-42", 1);
        assert!(matches!(
            request.validate(),
            Err(OrderError::InvalidProductId { index: 1, .. })
        ));

        for quantity in [0, -3, i64::from(u32::MAX) + 1] {
            let request = CreateOrderRequest::new(&*user).with_item(&*product, quantity);
            assert_eq!(
                request.validate(),
                Err(OrderError::InvalidQuantity { index: 0, quantity })
            );
        }
    }

    #[test]
    fn test_duplicate_products_merge() {
        let product_a = ProductId::new();
        let product_b = ProductId::new();
        let request = CreateOrderRequest::new(UserId::new().to_string())
            .with_item(product_a.to_string(), 1)
            .with_item(product_b.to_string(), 4)
            .with_item(product_a.to_string(), 2);

        let order = request.validate().unwrap();
        assert_eq!(order.lines.len(), 2);
        assert_eq!(order.lines[0].product_id, product_a);
        assert_eq!(order.lines[0].quantity, 3);
        assert_eq!(order.lines[1].quantity, 4);
    }

    #[test]
    fn test_explicit_order_id() {
        let order_id = OrderId::new();
        let (request, _, _) = valid_request();
        let order = request
            .with_order_id(order_id.to_string())
            .validate()
            .unwrap();
        assert_eq!(order.order_id, order_id);

        let (request, _, _) = valid_request();
        assert!(matches!(
            request.with_order_id("not-an-id").validate(),
            Err(OrderError::InvalidOrderId(_))
        ));
    }

    #[test]
    fn test_camel_case_payload() {
        let user_id = UserId::new();
        let product_id = ProductId::new();
        let json = serde_json::json!({
            "userId": user_id.to_string(),
            "items": [{"productId": product_id.to_string(), "quantity": 1}],
        });

        let request: CreateOrderRequest = serde_json::from_value(json).unwrap();
        let order = request.validate().unwrap();
        assert_eq!(order.user_id, user_id);
        assert_eq!(order.lines[0].product_id, product_id);
    }

    #[test]
    fn test_validate_page() {
        assert_eq!(validate_page(2, 10).unwrap(), PageRequest::new(2, 10));
        assert!(validate_page(0, 10).is_err());
        assert!(validate_page(1, 0).is_err());
        assert!(validate_page(1, -1).is_err());
    }
}
