//! The cart-to-order transition.
//!
//! `run` executes inside a caller-supplied transaction: it snapshots the
//! user's cart under row locks, validates every line against current stock,
//! then persists the order, its lines, the stock decrements, and the cart
//! clear as one unit. Any failure leaves every table untouched, because the
//! facade rolls the transaction back instead of committing it.

pub mod cart_store;
pub mod inventory_store;

use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, Set};
use thiserror::Error;

use crate::entity::{
    order_items::{ActiveModel as OrderItemActive, Model as OrderItemModel},
    orders::{ActiveModel as OrderActive, Model as OrderModel},
    products::Model as ProductModel,
};

use cart_store::CartLine;

pub const ORDER_STATUS_PENDING: &str = "Pending";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product {0} not found")]
    ProductNotFound(i64),

    #[error(
        "Insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: i64,
        available: i32,
        requested: i32,
    },

    #[error("Storage error during checkout")]
    Storage(#[from] sea_orm::DbErr),
}

/// One validated cart line, with the unit price snapshotted at validation
/// time. Later price changes on the product never touch this value.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedLine {
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl StagedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

fn validate_line(
    line: &CartLine,
    product: Option<&ProductModel>,
) -> Result<StagedLine, CheckoutError> {
    let product = product.ok_or(CheckoutError::ProductNotFound(line.product_id))?;
    if product.stock < line.quantity {
        return Err(CheckoutError::InsufficientStock {
            product_id: line.product_id,
            available: product.stock,
            requested: line.quantity,
        });
    }
    Ok(StagedLine {
        product_id: line.product_id,
        quantity: line.quantity,
        unit_price: product.price,
    })
}

pub fn order_total(lines: &[StagedLine]) -> Decimal {
    lines.iter().map(StagedLine::line_total).sum()
}

/// Convert the user's cart into an order. Caller owns the transaction:
/// commit on `Ok`, roll back on `Err`.
pub async fn run(
    txn: &DatabaseTransaction,
    user_id: i64,
    shipping_ref: Option<i64>,
) -> Result<(OrderModel, Vec<OrderItemModel>), CheckoutError> {
    // Locked snapshot, product_id ascending. The locks also serialize
    // concurrent checkouts for the same user: the second caller blocks here
    // and re-reads an already-cleared cart after the first one commits.
    let lines = cart_store::lines_for_update(txn, user_id).await?;
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut staged = Vec::with_capacity(lines.len());
    for line in &lines {
        let product = inventory_store::get(txn, line.product_id).await?;
        staged.push(validate_line(line, product.as_ref())?);
    }

    let order = OrderActive {
        id: NotSet,
        user_id: Set(user_id),
        total_amount: Set(order_total(&staged)),
        status: Set(ORDER_STATUS_PENDING.to_string()),
        shipping_ref: Set(shipping_ref),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(txn)
    .await?;

    let mut items = Vec::with_capacity(staged.len());
    for line in &staged {
        let item = OrderItemActive {
            id: NotSet,
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
            created_at: NotSet,
        }
        .insert(txn)
        .await?;
        items.push(item);

        inventory_store::decrement_stock(txn, line.product_id, line.quantity).await?;
    }

    cart_store::delete_all(txn, user_id).await?;

    Ok((order, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(id: i64, price: Decimal, stock: i32) -> ProductModel {
        ProductModel {
            id,
            name: format!("product-{id}"),
            description: None,
            price,
            image_url: None,
            stock,
            category_id: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn cart_line(product_id: i64, quantity: i32) -> CartLine {
        CartLine {
            id: 1,
            user_id: 1,
            product_id,
            quantity,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn missing_product_fails_the_line() {
        let err = validate_line(&cart_line(999, 1), None).unwrap_err();
        assert!(matches!(err, CheckoutError::ProductNotFound(999)));
    }

    #[test]
    fn short_stock_reports_available_and_requested() {
        let p = product(1, Decimal::new(1000, 2), 5);
        let err = validate_line(&cart_line(1, 100), Some(&p)).unwrap_err();
        match err {
            CheckoutError::InsufficientStock {
                product_id,
                available,
                requested,
            } => {
                assert_eq!((product_id, available, requested), (1, 5, 100));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn exact_stock_match_is_accepted() {
        let p = product(1, Decimal::new(1000, 2), 5);
        let staged = validate_line(&cart_line(1, 5), Some(&p)).unwrap();
        assert_eq!(staged.quantity, 5);
        assert_eq!(staged.unit_price, Decimal::new(1000, 2));
    }

    #[test]
    fn staged_line_snapshots_current_price() {
        let p = product(1, Decimal::new(1999, 2), 10);
        let staged = validate_line(&cart_line(1, 2), Some(&p)).unwrap();
        assert_eq!(staged.unit_price, Decimal::new(1999, 2));
        assert_eq!(staged.line_total(), Decimal::new(3998, 2));
    }

    #[test]
    fn total_is_exact_decimal_sum() {
        // 0.10 * 3 + 0.20 * 1 must be exactly 0.50, no float drift.
        let staged = vec![
            StagedLine {
                product_id: 1,
                quantity: 3,
                unit_price: Decimal::new(10, 2),
            },
            StagedLine {
                product_id: 2,
                quantity: 1,
                unit_price: Decimal::new(20, 2),
            },
        ];
        assert_eq!(order_total(&staged), Decimal::new(50, 2));
    }

    #[test]
    fn empty_staging_totals_zero() {
        assert_eq!(order_total(&[]), Decimal::ZERO);
    }
}
