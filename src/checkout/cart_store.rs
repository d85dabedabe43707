//! Cart access used inside the checkout transaction.

use sea_orm::sea_query::LockType;
use sea_orm::{
    ColumnTrait, DatabaseTransaction, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::entity::cart_items::{Column, Entity as CartItems, Model};

pub type CartLine = Model;

/// Locked cart snapshot for one user, ordered by product_id so validation
/// (and the first failure, if any) is deterministic.
pub async fn lines_for_update(
    txn: &DatabaseTransaction,
    user_id: i64,
) -> Result<Vec<CartLine>, DbErr> {
    CartItems::find()
        .filter(Column::UserId.eq(user_id))
        .order_by_asc(Column::ProductId)
        .lock(LockType::Update)
        .all(txn)
        .await
}

/// Clear the cart as part of the checkout unit of work.
pub async fn delete_all(txn: &DatabaseTransaction, user_id: i64) -> Result<u64, DbErr> {
    let res = CartItems::delete_many()
        .filter(Column::UserId.eq(user_id))
        .exec(txn)
        .await?;
    Ok(res.rows_affected)
}
