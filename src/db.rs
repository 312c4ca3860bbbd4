use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    postgres::PgPoolOptions,
    types::{time::OffsetDateTime, uuid::Uuid, Json},
    PgConnection, Pool, Postgres,
};
use tracing::info;

use crate::models::{AppUser, Category, PendingNotification, Post, SubscriptionPlan};
use crate::ordering::CategoryChanges;

pub const PENDING_NOTIFICATION_CHANNEL: &str = "pending_notifications";

pub async fn init_db_pool(database_url: &str) -> Result<Pool<Postgres>> {
    info!("Initializing database connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// Categories

const CATEGORY_COLUMNS: &str =
    "id, name_en, name_kn, position, is_fixed, is_dynamic, is_business, kind, created_at";

/// Serialises category writers for the rest of the transaction. Readers are not blocked.
pub async fn lock_categories(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("LOCK TABLE categories IN SHARE ROW EXCLUSIVE MODE")
        .execute(conn)
        .await
        .context("Failed to lock categories")?;
    Ok(())
}

pub async fn fetch_categories(conn: &mut PgConnection) -> Result<Vec<Category>> {
    let categories = sqlx::query_as::<_, Category>(&format!(
        "SELECT {} FROM categories ORDER BY position ASC NULLS LAST, created_at ASC",
        CATEGORY_COLUMNS
    ))
    .fetch_all(conn)
    .await
    .context("Failed to fetch categories")?;

    Ok(categories)
}

pub async fn apply_category_changes(conn: &mut PgConnection, changes: &CategoryChanges) -> Result<()> {
    if !changes.deletes.is_empty() {
        sqlx::query("DELETE FROM categories WHERE id = ANY($1)")
            .bind(&changes.deletes)
            .execute(&mut *conn)
            .await
            .context("Failed to delete categories")?;
    }

    for category in &changes.writes {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name_en, name_kn, position, is_fixed, is_dynamic, is_business, kind, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name_en = EXCLUDED.name_en,
                name_kn = EXCLUDED.name_kn,
                position = EXCLUDED.position,
                is_fixed = EXCLUDED.is_fixed,
                is_dynamic = EXCLUDED.is_dynamic,
                is_business = EXCLUDED.is_business,
                kind = EXCLUDED.kind
            "#,
        )
        .bind(category.id)
        .bind(&category.name_en)
        .bind(&category.name_kn)
        .bind(category.position)
        .bind(category.is_fixed)
        .bind(category.is_dynamic)
        .bind(category.is_business)
        .bind(category.category_type.as_str())
        .bind(category.created_at)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to write category {}", category.id))?;
    }

    Ok(())
}

// Posts and their notifications

const POST_COLUMNS: &str = "id, main_image, categories, business_category, regions, frame_size, \
    media_type, language, text_settings, address_settings, phone_settings, business_name_settings, \
    designation_settings, profile_settings, admin_name, likes, shares, is_published, is_scheduled, \
    scheduled_date_time, send_notification, created_at, updated_at";

pub async fn insert_post(conn: &mut PgConnection, post: &Post) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO admin_posts ({}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)",
        POST_COLUMNS
    ))
    .bind(post.id)
    .bind(&post.main_image)
    .bind(&post.categories)
    .bind(&post.business_category)
    .bind(&post.regions)
    .bind(&post.frame_size)
    .bind(post.media_type.as_str())
    .bind(post.language.as_str())
    .bind(&post.text_settings)
    .bind(&post.address_settings)
    .bind(&post.phone_settings)
    .bind(&post.business_name_settings)
    .bind(&post.designation_settings)
    .bind(&post.profile_settings)
    .bind(&post.admin_name)
    .bind(post.likes)
    .bind(post.shares)
    .bind(post.is_published)
    .bind(post.is_scheduled)
    .bind(post.scheduled_date_time)
    .bind(post.send_notification)
    .bind(post.created_at)
    .bind(post.updated_at)
    .execute(conn)
    .await
    .context("Failed to insert post")?;

    Ok(())
}

pub async fn insert_notification(conn: &mut PgConnection, notification: &PendingNotification) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pending_notifications
            (id, title, body, image_url, post_id, admin_name, categories, regions, language, topic, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(notification.id)
    .bind(&notification.title)
    .bind(&notification.body)
    .bind(&notification.image_url)
    .bind(notification.post_id)
    .bind(&notification.admin_name)
    .bind(&notification.categories)
    .bind(&notification.regions)
    .bind(notification.language.as_str())
    .bind(&notification.topic)
    .bind(notification.status.as_str())
    .bind(notification.created_at)
    .execute(&mut *conn)
    .await
    .context("Failed to insert pending notification")?;

    // Delivered to listeners once the surrounding transaction commits.
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(PENDING_NOTIFICATION_CHANNEL)
        .bind(notification.id.to_string())
        .execute(conn)
        .await
        .context("Failed to signal pending notification")?;

    Ok(())
}

pub async fn list_posts(pool: &Pool<Postgres>, limit: i64) -> Result<Vec<Post>> {
    let posts = sqlx::query_as::<_, Post>(&format!(
        "SELECT {} FROM admin_posts ORDER BY created_at DESC LIMIT $1",
        POST_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch posts")?;

    Ok(posts)
}

pub async fn delete_post(pool: &Pool<Postgres>, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM admin_posts WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete post")?;

    Ok(result.rows_affected() > 0)
}

const NOTIFICATION_COLUMNS: &str = "id, title, body, image_url, post_id, admin_name, categories, \
    regions, language, topic, status, created_at, claimed_at, sent_at, message_id, error";

pub async fn unclaimed_notification_ids(pool: &Pool<Postgres>) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM pending_notifications
        WHERE status = 'pending' AND claimed_at IS NULL
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch unclaimed notifications")?;

    Ok(ids)
}

/// Marks a pending notification as taken. `None` if another worker already
/// claimed it or it is no longer pending.
pub async fn claim_notification(pool: &Pool<Postgres>, id: Uuid) -> Result<Option<PendingNotification>> {
    let notification = sqlx::query_as::<_, PendingNotification>(&format!(
        r#"
        UPDATE pending_notifications
        SET claimed_at = NOW()
        WHERE id = $1 AND status = 'pending' AND claimed_at IS NULL
        RETURNING {}
        "#,
        NOTIFICATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to claim notification")?;

    Ok(notification)
}

/// Writes the terminal state. Returns false when the row had already left `pending`.
pub async fn complete_notification(
    pool: &Pool<Postgres>,
    id: Uuid,
    status: &str,
    sent_at: Option<OffsetDateTime>,
    message_id: Option<&str>,
    error: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pending_notifications
        SET status = $2, sent_at = $3, message_id = $4, error = $5
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(sent_at)
    .bind(message_id)
    .bind(error)
    .execute(pool)
    .await
    .context("Failed to record notification outcome")?;

    Ok(result.rows_affected() == 1)
}

// App users

pub async fn list_users(pool: &Pool<Postgres>) -> Result<Vec<AppUser>> {
    let users = sqlx::query_as::<_, AppUser>(
        r#"
        SELECT id, name, phone, email, profile_photo, business_name, subscription, subscription_date, created_at
        FROM users
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch users")?;

    Ok(users)
}

pub async fn delete_user(pool: &Pool<Postgres>, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete user")?;

    Ok(result.rows_affected() > 0)
}

// Subscription plans

pub async fn list_plans(pool: &Pool<Postgres>) -> Result<Vec<SubscriptionPlan>> {
    let plans = sqlx::query_as::<_, SubscriptionPlan>(
        r#"
        SELECT id, title, subtitle, price, duration, usage_type, is_active, created_at
        FROM subscription_plans
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch subscription plans")?;

    Ok(plans)
}

pub async fn insert_plan(pool: &Pool<Postgres>, plan: &SubscriptionPlan) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO subscription_plans (id, title, subtitle, price, duration, usage_type, is_active, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(plan.id)
    .bind(&plan.title)
    .bind(&plan.subtitle)
    .bind(plan.price)
    .bind(plan.duration)
    .bind(plan.usage_type.as_str())
    .bind(plan.is_active)
    .bind(plan.created_at)
    .execute(pool)
    .await
    .context("Failed to insert subscription plan")?;

    Ok(())
}

pub async fn set_plan_active(pool: &Pool<Postgres>, id: Uuid, is_active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE subscription_plans SET is_active = $2 WHERE id = $1")
        .bind(id)
        .bind(is_active)
        .execute(pool)
        .await
        .context("Failed to update subscription plan")?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_plan(pool: &Pool<Postgres>, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM subscription_plans WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete subscription plan")?;

    Ok(result.rows_affected() > 0)
}

// Key/value app configuration

pub async fn get_config<T: DeserializeOwned>(pool: &Pool<Postgres>, key: &str) -> Result<Option<T>> {
    let value = sqlx::query_scalar::<_, Json<serde_json::Value>>("SELECT value FROM app_config WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to read config {}", key))?;

    match value {
        Some(Json(value)) => Ok(Some(
            serde_json::from_value(value).with_context(|| format!("Malformed config {}", key))?,
        )),
        None => Ok(None),
    }
}

pub async fn put_config<T: Serialize>(pool: &Pool<Postgres>, key: &str, value: &T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO app_config (key, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        "#,
    )
    .bind(key)
    .bind(Json(value))
    .execute(pool)
    .await
    .with_context(|| format!("Failed to write config {}", key))?;

    Ok(())
}
