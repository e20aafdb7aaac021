//! Token issuance and redemption recording. All writes for one confirm
//! call happen in a single transaction; the conditional update on
//! `redeem_tokens.used_at` is the only concurrency control point.

use crate::auth::AuthedBusiness;
use crate::dao;
use crate::eligibility::{self, Enforcement};
use crate::error::AppError;
use crate::model::{
    ConfirmationRequest, Coupon, EventType, RedeemPage, TrackedEvent, UsageCounts,
    ValidationResponse,
};
use crate::utils::{generate_token, token_hash, verify_password};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use sqlx::{Executor, Pool, Postgres};
use uuid::Uuid;

const REDEEM_TOKEN_TTL_MINUTES: i64 = 10;
const SOURCE_SHARE: &str = "share";
const SOURCE_STAFF: &str = "staff";
const SOURCE_TRACK: &str = "track";

/// Opens a share: validates gating, mints a single-use token, and records
/// the click. The raw token is returned to the caller exactly once; only
/// its hash is stored. Usage limits are deliberately not checked here --
/// tokens are cheap, expire quickly, and confirm re-checks everything.
pub async fn open_share(
    db_connection_pool: Pool<Postgres>,
    share_id: Uuid,
    password: Option<String>,
    now: DateTime<Utc>,
) -> Result<RedeemPage, AppError> {
    let share = dao::get_share(db_connection_pool.clone(), share_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if let Some(expires_at) = share.expires_at {
        if expires_at < now {
            return Err(AppError::ShareExpired);
        }
    }

    if let Some(password_hash) = &share.password_hash {
        let password = password.ok_or(AppError::PasswordRequired)?;
        if !verify_password(&password, password_hash) {
            return Err(AppError::InvalidPassword);
        }
    }

    let coupon = dao::get_coupon(db_connection_pool.clone(), share.coupon_id)
        .await?
        .ok_or(AppError::NotFound)?;
    // Inactive coupons answer like missing shares; the response must not
    // reveal whether the coupon exists behind a dead link.
    if !eligibility::is_active(&coupon, now) {
        return Err(AppError::NotFound);
    }
    let business = dao::get_business(db_connection_pool.clone(), coupon.business_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let redeem_token = generate_token();
    let redeem_token_expires_at = now + Duration::minutes(REDEEM_TOKEN_TTL_MINUTES);

    let mut tx = db_connection_pool.begin().await?;
    dao::insert_token(
        &mut *tx,
        &token_hash(&redeem_token),
        share.id,
        coupon.id,
        redeem_token_expires_at,
    )
    .await?;
    dao::increment_share_clicks(&mut *tx, share.id).await?;
    dao::insert_event(
        &mut *tx,
        coupon.id,
        EventType::Click,
        &json!({ "shareId": share.id }),
    )
    .await?;
    tx.commit().await?;

    Ok(RedeemPage {
        share,
        coupon,
        business,
        redeem_token,
        redeem_token_expires_at,
    })
}

/// Advisory eligibility check. Uses the same evaluation as the confirm
/// transaction but is never binding.
pub async fn validate(
    db_connection_pool: Pool<Postgres>,
    coupon_id: Uuid,
    customer_ref: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ValidationResponse, AppError> {
    let coupon = dao::get_coupon(db_connection_pool.clone(), coupon_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let verdict = evaluate_with_counts(&db_connection_pool, &coupon, customer_ref, now).await?;
    Ok(ValidationResponse {
        valid: verdict.is_eligible(),
        reason: verdict.reason().map(String::from),
    })
}

pub async fn confirm(
    db_connection_pool: Pool<Postgres>,
    staff: Option<AuthedBusiness>,
    request: ConfirmationRequest,
    now: DateTime<Utc>,
) -> Result<Uuid, AppError> {
    let coupon = dao::get_coupon(db_connection_pool.clone(), request.coupon_id)
        .await?
        .ok_or(AppError::NotFound)?;

    match request.share_id {
        Some(share_id) => {
            let redeem_token = request.redeem_token.ok_or(AppError::InvalidToken)?;
            confirm_customer(
                db_connection_pool,
                coupon,
                share_id,
                &redeem_token,
                request.customer_ref.as_deref(),
                request.context,
                now,
            )
            .await
        }
        None if request.redeem_token.is_some() => Err(AppError::InvalidToken),
        None => {
            confirm_staff(
                db_connection_pool,
                coupon,
                staff,
                request.customer_ref.as_deref(),
                request.context,
                now,
            )
            .await
        }
    }
}

async fn confirm_customer(
    db_connection_pool: Pool<Postgres>,
    coupon: Coupon,
    share_id: Uuid,
    redeem_token: &str,
    customer_ref: Option<&str>,
    context: Option<Value>,
    now: DateTime<Utc>,
) -> Result<Uuid, AppError> {
    let share = dao::get_share(db_connection_pool.clone(), share_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if share.coupon_id != coupon.id {
        return Err(AppError::NotFound);
    }

    let mut tx = db_connection_pool.begin().await?;

    let consumed =
        dao::consume_token(&mut *tx, &token_hash(redeem_token), share.id, coupon.id, now).await?;
    if !consumed {
        // Dropping the transaction rolls everything back.
        return Err(AppError::InvalidToken);
    }

    // Token validity and eligibility are orthogonal: a freshly minted token
    // can still lose to a concurrent confirm that exhausted the limit.
    let verdict = evaluate_with_counts(&mut *tx, &coupon, customer_ref, now).await?;
    if let Some(reason) = verdict.reason() {
        return Err(AppError::NotEligible(reason.to_string()));
    }

    let redemption_id = Uuid::new_v4();
    let context = merged_context(context, SOURCE_SHARE, Some(share.id));
    dao::insert_redemption(&mut *tx, redemption_id, coupon.id, customer_ref, &context, now).await?;
    dao::insert_event(
        &mut *tx,
        coupon.id,
        EventType::Redemption,
        &json!({ "shareId": share.id }),
    )
    .await?;
    dao::increment_share_redemptions(&mut *tx, share.id).await?;
    tx.commit().await?;

    Ok(redemption_id)
}

async fn confirm_staff(
    db_connection_pool: Pool<Postgres>,
    coupon: Coupon,
    staff: Option<AuthedBusiness>,
    customer_ref: Option<&str>,
    context: Option<Value>,
    now: DateTime<Utc>,
) -> Result<Uuid, AppError> {
    let staff = staff.ok_or(AppError::Unauthenticated)?;
    if staff.business_id != coupon.business_id {
        return Err(AppError::AccessDenied);
    }

    let mut tx = db_connection_pool.begin().await?;

    let verdict = evaluate_with_counts(&mut *tx, &coupon, customer_ref, now).await?;
    if let Some(reason) = verdict.reason() {
        return Err(AppError::NotEligible(reason.to_string()));
    }

    let redemption_id = Uuid::new_v4();
    let context = merged_context(context, SOURCE_STAFF, None);
    dao::insert_redemption(&mut *tx, redemption_id, coupon.id, customer_ref, &context, now).await?;
    dao::insert_event(
        &mut *tx,
        coupon.id,
        EventType::Redemption,
        &json!({ "source": SOURCE_STAFF }),
    )
    .await?;
    tx.commit().await?;

    Ok(redemption_id)
}

/// Legacy display-tracking path: bumps the share counter and appends an
/// analytics event. Never touches the redemption ledger.
pub async fn track(
    db_connection_pool: Pool<Postgres>,
    share_id: Uuid,
    event: TrackedEvent,
) -> Result<(), AppError> {
    let share = dao::get_share(db_connection_pool.clone(), share_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let meta = json!({ "shareId": share.id, "source": SOURCE_TRACK });
    let mut tx = db_connection_pool.begin().await?;
    match event {
        TrackedEvent::Click => {
            dao::increment_share_clicks(&mut *tx, share.id).await?;
            dao::insert_event(&mut *tx, share.coupon_id, EventType::Click, &meta).await?;
        }
        TrackedEvent::Redemption => {
            dao::increment_share_redemptions(&mut *tx, share.id).await?;
            dao::insert_event(&mut *tx, share.coupon_id, EventType::Redemption, &meta).await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

async fn evaluate_with_counts<'e, E>(
    executor: E,
    coupon: &Coupon,
    customer_ref: Option<&str>,
    now: DateTime<Utc>,
) -> Result<eligibility::Verdict, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let enforcement = Enforcement::for_coupon(coupon, customer_ref);
    let counts = if enforcement.any() {
        dao::usage_counts(executor, coupon.id, customer_ref).await?
    } else {
        UsageCounts::default()
    };
    Ok(eligibility::evaluate(coupon, customer_ref, &counts, now))
}

fn merged_context(context: Option<Value>, source: &str, share_id: Option<Uuid>) -> Value {
    // Mirrors an object spread: non-object caller context contributes nothing.
    let mut fields = match context {
        Some(Value::Object(fields)) => fields,
        _ => Map::new(),
    };
    fields.insert("source".into(), Value::String(source.into()));
    if let Some(share_id) = share_id {
        fields.insert("shareId".into(), Value::String(share_id.to_string()));
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_merges_caller_fields_with_share_tagging() {
        let share_id = Uuid::new_v4();
        let merged = merged_context(
            Some(json!({ "table": 4, "source": "spoofed" })),
            SOURCE_SHARE,
            Some(share_id),
        );
        assert_eq!(merged["table"], json!(4));
        assert_eq!(merged["source"], json!("share"));
        assert_eq!(merged["shareId"], json!(share_id.to_string()));
    }

    #[test]
    fn staff_context_is_tagged_without_share() {
        let merged = merged_context(None, SOURCE_STAFF, None);
        assert_eq!(merged, json!({ "source": "staff" }));
    }

    #[test]
    fn non_object_context_contributes_nothing() {
        let merged = merged_context(Some(json!("free text")), SOURCE_STAFF, None);
        assert_eq!(merged, json!({ "source": "staff" }));
    }
}
