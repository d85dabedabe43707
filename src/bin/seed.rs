use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum_storefront_api::{config::AppConfig, db::create_pool};
use rust_decimal::Decimal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user_with_role(&pool, "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user_with_role(&pool, "user@example.com", "user123", "user").await?;
    seed_catalog(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user_with_role(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<i64> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let (user_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO users (email, password_hash, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_catalog(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let categories = ["Apparel", "Accessories", "Books"];
    for name in categories {
        sqlx::query("INSERT INTO categories (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(pool)
            .await?;
    }

    let products = vec![
        ("Axum Hoodie", "Warm hoodie for Rustaceans", Decimal::new(5500, 2), 50, "Apparel"),
        ("Ferris Mug", "Coffee tastes better with Ferris", Decimal::new(1200, 2), 100, "Accessories"),
        ("Rust Sticker Pack", "Decorate your laptop", Decimal::new(500, 2), 200, "Accessories"),
        ("E-book: Async Rust", "Learn async Rust patterns", Decimal::new(2500, 2), 75, "Books"),
    ];

    for (name, desc, price, stock, category) in products {
        sqlx::query(
            r#"
            INSERT INTO products (name, description, price, stock, category_id)
            VALUES ($1, $2, $3, $4, (SELECT id FROM categories WHERE name = $5))
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .bind(category)
        .execute(pool)
        .await?;
    }

    println!("Seeded categories and products");
    Ok(())
}
