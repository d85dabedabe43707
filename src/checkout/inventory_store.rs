//! Inventory access used inside the checkout transaction.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseTransaction, DbErr, EntityTrait, QueryFilter};

use super::CheckoutError;
use crate::entity::products::{Column, Entity as Products, Model};

pub async fn get(txn: &DatabaseTransaction, product_id: i64) -> Result<Option<Model>, DbErr> {
    Products::find_by_id(product_id).one(txn).await
}

/// Conditional decrement: `stock = stock - n WHERE stock >= n`. Zero rows
/// affected means the validation read went stale under concurrency (or the
/// product vanished), and the whole checkout must abort.
pub async fn decrement_stock(
    txn: &DatabaseTransaction,
    product_id: i64,
    amount: i32,
) -> Result<(), CheckoutError> {
    let res = Products::update_many()
        .col_expr(Column::Stock, Expr::col(Column::Stock).sub(amount))
        .filter(Column::Id.eq(product_id))
        .filter(Column::Stock.gte(amount))
        .exec(txn)
        .await?;

    if res.rows_affected == 0 {
        return match get(txn, product_id).await? {
            Some(product) => Err(CheckoutError::InsufficientStock {
                product_id,
                available: product.stock,
                requested: amount,
            }),
            None => Err(CheckoutError::ProductNotFound(product_id)),
        };
    }

    Ok(())
}
