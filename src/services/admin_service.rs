use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderView},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::{ActiveModel as ProductActive, Column as ProdCol, Entity as Products},
        users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Product, User},
    response::{ApiResponse, Meta},
    routes::admin::{
        InventoryAdjustRequest, LowStockQuery, ProductList, UpdateUserRoleRequest, UserList,
    },
    routes::params::{OrderListQuery, Pagination, SortOrder},
    services::order_service::order_from_entity,
    services::product_service::product_from_entity,
    state::AppState,
};

pub async fn list_users(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<UserList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Users::find().order_by_asc(UserCol::Id);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(user_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Users", UserList { items }, Some(meta)))
}

pub async fn update_user_role(
    state: &AppState,
    user: &AuthUser,
    id: i64,
    payload: UpdateUserRoleRequest,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;
    validate_role(&payload.role)?;

    let existing = Users::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let mut active: UserActive = existing.into();
    active.role = Set(payload.role);
    let updated = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "user_role_update",
        Some("users"),
        Some(serde_json::json!({ "target_user_id": updated.id, "role": updated.role })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Role updated",
        user_from_entity(updated),
        Some(Meta::empty()),
    ))
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: i64,
) -> AppResult<ApiResponse<OrderView>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;

    Ok(ApiResponse::success(
        "Order found",
        OrderView::from_entities(order, items),
        Some(Meta::empty()),
    ))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
    query: LowStockQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let threshold = query.threshold.unwrap_or(5);
    let (page, limit, offset) = query.pagination.normalize();

    let mut finder = Products::find().filter(ProdCol::Stock.lte(threshold));
    finder = finder
        .order_by_asc(ProdCol::Stock)
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let data = ProductList { items };
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Low stock", data, Some(meta)))
}

pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: i64,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.delta == 0 {
        return Err(AppError::BadRequest("delta must not be 0".into()));
    }

    let txn = state.orm.begin().await?;
    let product = Products::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let new_stock = match apply_stock_delta(product.stock, payload.delta) {
        Some(v) => v,
        None => return Err(AppError::BadRequest("stock cannot be negative".into())),
    };

    let mut active: ProductActive = product.into();
    active.stock = Set(new_stock);
    active.updated_at = Set(chrono::Utc::now().into());
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": updated.id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Inventory updated",
        product_from_entity(updated),
        Some(Meta::empty()),
    ))
}

// checked_add: an i32 delta near i32::MAX would otherwise wrap in release
// builds and land a negative stock past the guard.
fn apply_stock_delta(stock: i32, delta: i32) -> Option<i32> {
    stock.checked_add(delta).filter(|v| *v >= 0)
}

fn validate_role(role: &str) -> Result<(), AppError> {
    const VALID: [&str; 2] = ["user", "admin"];
    if VALID.contains(&role) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid role: {role}")))
    }
}

fn user_from_entity(model: UserModel) -> User {
    User {
        id: model.id,
        email: model.email,
        password_hash: model.password_hash,
        role: model.role,
        created_at: model.created_at.with_timezone(&chrono::Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_stock_delta, validate_role};

    #[test]
    fn only_known_roles_pass() {
        assert!(validate_role("user").is_ok());
        assert!(validate_role("admin").is_ok());
        assert!(validate_role("superuser").is_err());
    }

    #[test]
    fn stock_delta_applies_within_range() {
        assert_eq!(apply_stock_delta(5, 3), Some(8));
        assert_eq!(apply_stock_delta(5, -5), Some(0));
    }

    #[test]
    fn stock_delta_rejects_negative_result() {
        assert_eq!(apply_stock_delta(5, -6), None);
    }

    #[test]
    fn stock_delta_rejects_overflow() {
        assert_eq!(apply_stock_delta(1, i32::MAX), None);
        assert_eq!(apply_stock_delta(i32::MAX, 1), None);
    }
}
