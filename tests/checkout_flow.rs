use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum_storefront_api::{
    checkout::CheckoutError,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::cart::AddToCartRequest,
    dto::orders::PlaceOrderRequest,
    entity::cart_items::ActiveModel as CartItemActive,
    entity::products::{ActiveModel as ProductActive, Entity as Products},
    entity::users::ActiveModel as UserActive,
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::Pagination,
    services::{cart_service, order_service, product_service},
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

// Every test seeds its own users and products with unique names, so the
// suite can run against a shared database without cross-test interference.

async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(None);
            }
        };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    Ok(Some(AppState { pool, orm }))
}

fn unique_suffix() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos() as u64;
    nanos
        .wrapping_mul(1_000)
        .wrapping_add(COUNTER.fetch_add(1, Ordering::Relaxed))
}

async fn create_user(state: &AppState, label: &str) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: NotSet,
        email: Set(format!("{label}-{}@example.com", unique_suffix())),
        password_hash: Set("dummy".into()),
        role: Set("user".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        role: "user".into(),
    })
}

async fn create_product(
    state: &AppState,
    label: &str,
    price: Decimal,
    stock: i32,
) -> anyhow::Result<i64> {
    let product = ProductActive {
        id: NotSet,
        name: Set(format!("{label}-{}", unique_suffix())),
        description: Set(Some("test product".into())),
        price: Set(price),
        image_url: Set(None),
        stock: Set(stock),
        category_id: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product.id)
}

async fn stock_of(state: &AppState, product_id: i64) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    Ok(product.stock)
}

async fn cart_len(state: &AppState, user: &AuthUser) -> anyhow::Result<usize> {
    let resp = cart_service::list_cart(
        &state.pool,
        user,
        Pagination {
            page: None,
            per_page: None,
        },
    )
    .await?;
    Ok(resp.data.unwrap().items.len())
}

// Scenario: two units of a 10.00 product, five in stock. The order is
// created with an exact total, stock drops by the purchased quantity, and
// the cart is left empty.
#[tokio::test]
async fn checkout_succeeds_and_clears_cart() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "buyer").await?;
    let product_id = create_product(&state, "widget", Decimal::new(1000, 2), 5).await?;

    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?;

    let resp =
        order_service::place_order(&state, &user, PlaceOrderRequest { shipping_ref: None }).await?;
    let order = resp.data.unwrap();

    assert_eq!(order.total_amount, Decimal::new(2000, 2));
    assert_eq!(order.status, "Pending");
    assert_eq!(order.order_items.len(), 1);
    assert_eq!(order.order_items[0].product_id, product_id);
    assert_eq!(order.order_items[0].quantity, 2);
    assert_eq!(order.order_items[0].price, Decimal::new(1000, 2));

    assert_eq!(stock_of(&state, product_id).await?, 3);
    assert_eq!(cart_len(&state, &user).await?, 0);

    Ok(())
}

// Raising the product price after checkout must not rewrite history: the
// order line keeps the price captured at checkout time.
#[tokio::test]
async fn order_line_price_is_a_snapshot() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "snapshot").await?;
    let product_id = create_product(&state, "gadget", Decimal::new(1000, 2), 5).await?;

    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;
    let placed = order_service::place_order(&state, &user, PlaceOrderRequest::default())
        .await?
        .data
        .unwrap();

    let admin = AuthUser {
        user_id: user.user_id,
        role: "admin".into(),
    };
    product_service::update_product(
        &state,
        &admin,
        product_id,
        axum_storefront_api::dto::products::UpdateProductRequest {
            name: None,
            description: None,
            price: Some(Decimal::new(9900, 2)),
            image_url: None,
            stock: None,
            category_id: None,
        },
    )
    .await?;

    let fetched = order_service::get_order(&state, &user, placed.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order_items[0].price, Decimal::new(1000, 2));
    assert_eq!(fetched.total_amount, Decimal::new(1000, 2));

    Ok(())
}

// Scenario: requesting more than the available stock fails with a structured
// error and leaves stock, cart, and orders untouched.
#[tokio::test]
async fn insufficient_stock_aborts_without_side_effects() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "greedy").await?;
    let product_id = create_product(&state, "scarce", Decimal::new(1000, 2), 5).await?;

    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 100,
        },
    )
    .await?;

    let err = order_service::place_order(&state, &user, PlaceOrderRequest::default())
        .await
        .unwrap_err();
    match err {
        AppError::Checkout(CheckoutError::InsufficientStock {
            product_id: pid,
            available,
            requested,
        }) => {
            assert_eq!(pid, product_id);
            assert_eq!(available, 5);
            assert_eq!(requested, 100);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(stock_of(&state, product_id).await?, 5);
    assert_eq!(cart_len(&state, &user).await?, 1);

    let orders = order_service::list_orders(
        &state,
        &user,
        axum_storefront_api::routes::params::OrderListQuery {
            pagination: Pagination {
                page: None,
                per_page: None,
            },
            status: None,
            sort_order: None,
        },
    )
    .await?;
    assert!(orders.data.unwrap().items.is_empty());

    Ok(())
}

// Scenario: a cart line pointing at a product that no longer exists fails
// the whole checkout, even when other lines were valid.
#[tokio::test]
async fn stale_cart_line_aborts_whole_checkout() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "stale").await?;
    let good_product = create_product(&state, "kept", Decimal::new(500, 2), 10).await?;

    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id: good_product,
            quantity: 1,
        },
    )
    .await?;

    // cart_items.product_id carries no foreign key, so a line can outlive
    // its product; insert the dangling line directly.
    let missing_id = 900_000_000 + unique_suffix() as i64 % 100_000_000;
    CartItemActive {
        id: NotSet,
        user_id: Set(user.user_id),
        product_id: Set(missing_id),
        quantity: Set(1),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let err = order_service::place_order(&state, &user, PlaceOrderRequest::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::Checkout(CheckoutError::ProductNotFound(id)) if id == missing_id),
        "unexpected error: {err:?}"
    );

    // No partial effects: the valid line is untouched and no order exists.
    assert_eq!(stock_of(&state, good_product).await?, 10);
    assert_eq!(cart_len(&state, &user).await?, 2);

    // The dangling line is listed without product details, so the owner can
    // find it and delete it.
    let cart = cart_service::list_cart(
        &state.pool,
        &user,
        Pagination {
            page: None,
            per_page: None,
        },
    )
    .await?
    .data
    .unwrap();
    let dangling = cart
        .items
        .iter()
        .find(|item| item.product_id == missing_id)
        .expect("dangling line must appear in the listing");
    assert!(dangling.product.is_none());
    let kept = cart
        .items
        .iter()
        .find(|item| item.product_id == good_product)
        .expect("valid line must appear in the listing");
    assert!(kept.product.is_some());

    cart_service::remove_cart_item(&state.pool, &user, dangling.id).await?;
    assert_eq!(cart_len(&state, &user).await?, 1);

    Ok(())
}

#[tokio::test]
async fn empty_cart_is_always_rejected() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "empty").await?;

    for _ in 0..2 {
        let err = order_service::place_order(&state, &user, PlaceOrderRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Checkout(CheckoutError::EmptyCart)
        ));
    }

    Ok(())
}

// Scenario: the same user checks out twice concurrently. Exactly one order
// is created; the loser sees the already-cleared cart.
#[tokio::test]
async fn concurrent_same_user_checkout_creates_one_order() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let user = create_user(&state, "racer").await?;
    let product_id = create_product(&state, "raced", Decimal::new(1000, 2), 5).await?;

    cart_service::add_to_cart(
        &state.pool,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;

    let (a, b) = {
        let (state_a, user_a) = (state.clone(), user.clone());
        let (state_b, user_b) = (state.clone(), user.clone());
        let task_a = tokio::spawn(async move {
            order_service::place_order(&state_a, &user_a, PlaceOrderRequest::default()).await
        });
        let task_b = tokio::spawn(async move {
            order_service::place_order(&state_b, &user_b, PlaceOrderRequest::default()).await
        });
        (task_a.await?, task_b.await?)
    };

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one checkout must win");

    for result in [a, b] {
        if let Err(err) = result {
            assert!(
                matches!(err, AppError::Checkout(CheckoutError::EmptyCart)),
                "loser must observe the cleared cart, got: {err:?}"
            );
        }
    }

    assert_eq!(stock_of(&state, product_id).await?, 4);
    assert_eq!(cart_len(&state, &user).await?, 0);

    Ok(())
}

// Scenario: two users compete for overlapping stock. Their combined
// quantities exceed what is available, so at most one can succeed and stock
// never goes negative.
#[tokio::test]
async fn concurrent_users_cannot_oversell() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let alice = create_user(&state, "alice").await?;
    let bob = create_user(&state, "bob").await?;
    let product_id = create_product(&state, "contested", Decimal::new(1000, 2), 5).await?;

    for user in [&alice, &bob] {
        cart_service::add_to_cart(
            &state.pool,
            user,
            AddToCartRequest {
                product_id,
                quantity: 3,
            },
        )
        .await?;
    }

    let (a, b) = {
        let (state_a, user_a) = (state.clone(), alice.clone());
        let (state_b, user_b) = (state.clone(), bob.clone());
        let task_a = tokio::spawn(async move {
            order_service::place_order(&state_a, &user_a, PlaceOrderRequest::default()).await
        });
        let task_b = tokio::spawn(async move {
            order_service::place_order(&state_b, &user_b, PlaceOrderRequest::default()).await
        });
        (task_a.await?, task_b.await?)
    };

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert!(successes <= 1, "combined demand exceeds stock");

    let remaining = stock_of(&state, product_id).await?;
    assert_eq!(remaining, 5 - 3 * successes as i32);
    assert!(remaining >= 0);

    for result in [a, b] {
        if let Err(err) = result {
            assert!(
                matches!(
                    err,
                    AppError::Checkout(CheckoutError::InsufficientStock { .. })
                ),
                "loser must see a stock failure, got: {err:?}"
            );
        }
    }

    Ok(())
}
