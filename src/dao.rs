use crate::model::{
    Business, Coupon, CouponSpecification, EventCount, EventType, Redemption, Share, ShareKind,
    UsageCounts,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Error, Executor, Pool, Postgres};
use uuid::Uuid;

const COUPON_COLUMNS: &str = "id, business_id, status, discount_type, percentage, amount_cents, \
                              customization, validity_type, start_date, end_date, duration_days, \
                              usage_limit, total_limit, per_customer_limit, created_at";

const SHARE_COLUMNS: &str = "id, coupon_id, kind, share_url, password_hash, expires_at, clicks, \
                             redemptions, created_at";

pub async fn get_business(
    db_connection_pool: Pool<Postgres>,
    id: Uuid,
) -> Result<Option<Business>, Error> {
    sqlx::query_as("select id, name from businesses where id = $1")
        .bind(id)
        .fetch_optional(&db_connection_pool)
        .await
}

pub async fn find_business_by_api_key(
    db_connection_pool: Pool<Postgres>,
    api_key_hash: &str,
) -> Result<Option<Business>, Error> {
    sqlx::query_as("select id, name from businesses where api_key_hash = $1")
        .bind(api_key_hash)
        .fetch_optional(&db_connection_pool)
        .await
}

pub async fn create_coupon(
    db_connection_pool: Pool<Postgres>,
    id: Uuid,
    business_id: Uuid,
    specification: &CouponSpecification,
) -> Result<Coupon, Error> {
    let customization = specification
        .customization
        .clone()
        .unwrap_or_else(|| Value::Object(Default::default()));
    sqlx::query_as(&format!(
        r#"
              with inserted_coupon as (
                  insert into coupons(id, business_id, discount_type, percentage, amount_cents,
                                      customization, validity_type, start_date, end_date,
                                      duration_days, usage_limit, total_limit, per_customer_limit)
                  values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                  returning {COUPON_COLUMNS}
              )
              select {COUPON_COLUMNS} from inserted_coupon
            "#
    ))
    .bind(id)
    .bind(business_id)
    .bind(specification.discount.kind)
    .bind(specification.discount.percentage)
    .bind(specification.discount.amount_cents)
    .bind(Json(customization))
    .bind(specification.validity.kind)
    .bind(specification.validity.start_date)
    .bind(specification.validity.end_date)
    .bind(specification.validity.duration_days)
    .bind(specification.validity.usage_limit)
    .bind(specification.validity.total_limit)
    .bind(specification.validity.per_customer_limit)
    .fetch_one(&db_connection_pool)
    .await
}

pub async fn publish_coupon(
    db_connection_pool: Pool<Postgres>,
    id: Uuid,
    business_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Coupon>, Error> {
    sqlx::query_as(&format!(
        r#"
              with published_coupon as (
                  update coupons
                  set status = 'active',
                      start_date = coalesce(start_date, $3),
                      end_date = case
                                     when validity_type = 'duration' and duration_days is not null
                                         then $3 + make_interval(days => duration_days)
                                     else end_date
                                 end
                  where id = $1 and business_id = $2 and status = 'draft'
                  returning {COUPON_COLUMNS}
              )
              select {COUPON_COLUMNS} from published_coupon
            "#
    ))
    .bind(id)
    .bind(business_id)
    .bind(now)
    .fetch_optional(&db_connection_pool)
    .await
}

pub async fn get_coupon(
    db_connection_pool: Pool<Postgres>,
    id: Uuid,
) -> Result<Option<Coupon>, Error> {
    sqlx::query_as(&format!("select {COUPON_COLUMNS} from coupons where id = $1"))
        .bind(id)
        .fetch_optional(&db_connection_pool)
        .await
}

pub async fn create_share(
    db_connection_pool: Pool<Postgres>,
    id: Uuid,
    coupon_id: Uuid,
    kind: ShareKind,
    share_url: &str,
    password_hash: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Share, Error> {
    sqlx::query_as(&format!(
        r#"
              with inserted_share as (
                  insert into shares(id, coupon_id, kind, share_url, password_hash, expires_at)
                  values ($1, $2, $3, $4, $5, $6)
                  returning {SHARE_COLUMNS}
              )
              select {SHARE_COLUMNS} from inserted_share
            "#
    ))
    .bind(id)
    .bind(coupon_id)
    .bind(kind)
    .bind(share_url)
    .bind(password_hash)
    .bind(expires_at)
    .fetch_one(&db_connection_pool)
    .await
}

pub async fn get_share(
    db_connection_pool: Pool<Postgres>,
    id: Uuid,
) -> Result<Option<Share>, Error> {
    sqlx::query_as(&format!("select {SHARE_COLUMNS} from shares where id = $1"))
        .bind(id)
        .fetch_optional(&db_connection_pool)
        .await
}

/// One aggregate query so the advisory call and the in-transaction re-check
/// read a single consistent snapshot of the redemption ledger.
pub async fn usage_counts<'e, E>(
    executor: E,
    coupon_id: Uuid,
    customer_ref: Option<&str>,
) -> Result<UsageCounts, Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
              select count(*) as total,
                     count(*) filter (where customer_ref = $2) as by_customer
              from redemptions
              where coupon_id = $1 and status = 'redeemed'
            "#,
    )
    .bind(coupon_id)
    .bind(customer_ref)
    .fetch_one(executor)
    .await
}

pub async fn insert_token<'e, E>(
    executor: E,
    token_hash: &str,
    share_id: Uuid,
    coupon_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<(), Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "insert into redeem_tokens(token_hash, share_id, coupon_id, expires_at) values ($1, $2, $3, $4)",
    )
    .bind(token_hash)
    .bind(share_id)
    .bind(coupon_id)
    .bind(expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// The at-most-once serialization point: affects exactly 0 or 1 rows, and a
/// 0-row result means the token was already used, mismatched, or expired.
pub async fn consume_token<'e, E>(
    executor: E,
    token_hash: &str,
    share_id: Uuid,
    coupon_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
              update redeem_tokens
              set used_at = $4
              where token_hash = $1 and share_id = $2 and coupon_id = $3
                and used_at is null and expires_at > $4
            "#,
    )
    .bind(token_hash)
    .bind(share_id)
    .bind(coupon_id)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn insert_redemption<'e, E>(
    executor: E,
    id: Uuid,
    coupon_id: Uuid,
    customer_ref: Option<&str>,
    context: &Value,
    now: DateTime<Utc>,
) -> Result<(), Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
              insert into redemptions(id, coupon_id, status, customer_ref, context, redeemed_at)
              values ($1, $2, 'redeemed', $3, $4, $5)
            "#,
    )
    .bind(id)
    .bind(coupon_id)
    .bind(customer_ref)
    .bind(Json(context))
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn insert_event<'e, E>(
    executor: E,
    coupon_id: Uuid,
    event_type: EventType,
    meta: &Value,
) -> Result<(), Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("insert into analytics_events(id, coupon_id, event_type, meta) values ($1, $2, $3, $4)")
        .bind(Uuid::new_v4())
        .bind(coupon_id)
        .bind(event_type)
        .bind(Json(meta))
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn increment_share_clicks<'e, E>(executor: E, share_id: Uuid) -> Result<(), Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("update shares set clicks = clicks + 1 where id = $1")
        .bind(share_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn increment_share_redemptions<'e, E>(executor: E, share_id: Uuid) -> Result<(), Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("update shares set redemptions = redemptions + 1 where id = $1")
        .bind(share_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn list_redemptions(
    db_connection_pool: Pool<Postgres>,
    coupon_id: Uuid,
) -> Result<Vec<Redemption>, Error> {
    sqlx::query_as(
        r#"
              select id, coupon_id, status, customer_ref, context, redeemed_at
              from redemptions
              where coupon_id = $1
              order by redeemed_at desc
            "#,
    )
    .bind(coupon_id)
    .fetch_all(&db_connection_pool)
    .await
}

pub async fn get_statistics(
    db_connection_pool: Pool<Postgres>,
    coupon_id: Uuid,
) -> Result<Vec<EventCount>, Error> {
    sqlx::query_as(
        r#"
              select event_type, count(*) as count
              from analytics_events
              where coupon_id = $1
              group by event_type
            "#,
    )
    .bind(coupon_id)
    .fetch_all(&db_connection_pool)
    .await
}

pub async fn delete_expired_tokens(db_connection_pool: Pool<Postgres>) -> Result<u64, Error> {
    let result = sqlx::query("delete from redeem_tokens where expires_at <= $1")
        .bind(Utc::now())
        .execute(&db_connection_pool)
        .await?;
    Ok(result.rows_affected())
}
