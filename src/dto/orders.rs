use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::{order_items, orders};
use crate::models::Order;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PlaceOrderRequest {
    pub shipping_ref: Option<i64>,
}

/// Stable outbound shape for a created or fetched order.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: i64,
    pub user_id: i64,
    #[schema(value_type = f64)]
    pub total_amount: Decimal,
    pub status: String,
    pub order_items: Vec<OrderItemView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: i64,
    pub quantity: i32,
    #[schema(value_type = f64)]
    pub price: Decimal,
}

impl OrderView {
    pub fn from_entities(order: orders::Model, items: Vec<order_items::Model>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            status: order.status,
            order_items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
