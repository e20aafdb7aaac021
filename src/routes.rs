use crate::auth::{self, AuthedBusiness};
use crate::dao;
use crate::error::AppError;
use crate::model::{
    ConfirmationRequest, ConfirmationResponse, Coupon, CouponSpecification, CouponStatus,
    DiscountKind, EventCount, RedeemPage, Redemption, ShareSpecification, TrackRequest,
    ValidationRequest, ValidationResponse, ValidityKind,
};
use crate::redemption;
use crate::utils::{build_share_url, get_header, hash_password, with_timeout};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_TIMEOUT: u64 = 3000;

#[derive(Deserialize)]
pub struct RedeemQuery {
    password: Option<String>,
}

pub async fn open_share(
    State(state): State<AppState>,
    Path(share_id): Path<Uuid>,
    Query(query): Query<RedeemQuery>,
    headers: HeaderMap,
) -> Result<Json<RedeemPage>, AppError> {
    let password = get_header("X-Share-Password", &headers).or(query.password);
    let page = with_timeout(
        DEFAULT_TIMEOUT,
        redemption::open_share(
            state.db_connection_pool.clone(),
            share_id,
            password,
            Utc::now(),
        ),
    )
    .await??;
    Ok(Json(page))
}

pub async fn validate_redemption(
    State(state): State<AppState>,
    Json(request): Json<ValidationRequest>,
) -> Result<Json<ValidationResponse>, AppError> {
    let response = with_timeout(
        DEFAULT_TIMEOUT,
        redemption::validate(
            state.db_connection_pool.clone(),
            request.coupon_id,
            request.customer_ref.as_deref(),
            Utc::now(),
        ),
    )
    .await??;
    Ok(Json(response))
}

pub async fn confirm_redemption(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConfirmationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let staff = match get_header("x-api-key", &headers) {
        Some(api_key) => Some(auth::authenticate(&state, &api_key).await?),
        None => None,
    };
    let redemption_id = with_timeout(
        DEFAULT_TIMEOUT,
        redemption::confirm(state.db_connection_pool.clone(), staff, request, Utc::now()),
    )
    .await??;
    Ok((
        StatusCode::CREATED,
        Json(ConfirmationResponse { redemption_id }),
    ))
}

pub async fn track_share(
    State(state): State<AppState>,
    Path(share_id): Path<Uuid>,
    Json(request): Json<TrackRequest>,
) -> Result<StatusCode, AppError> {
    with_timeout(
        DEFAULT_TIMEOUT,
        redemption::track(state.db_connection_pool.clone(), share_id, request.event),
    )
    .await??;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_coupon(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedBusiness>,
    Json(specification): Json<CouponSpecification>,
) -> Result<impl IntoResponse, AppError> {
    validate_coupon_specification(&specification)?;
    let coupon = with_timeout(
        DEFAULT_TIMEOUT,
        dao::create_coupon(
            state.db_connection_pool.clone(),
            Uuid::new_v4(),
            authed.business_id,
            &specification,
        ),
    )
    .await??;
    Ok((StatusCode::CREATED, Json(coupon)))
}

pub async fn publish_coupon(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedBusiness>,
    Path(coupon_id): Path<Uuid>,
) -> Result<Json<Coupon>, AppError> {
    let published = with_timeout(
        DEFAULT_TIMEOUT,
        dao::publish_coupon(
            state.db_connection_pool.clone(),
            coupon_id,
            authed.business_id,
            Utc::now(),
        ),
    )
    .await??;
    if let Some(coupon) = published {
        return Ok(Json(coupon));
    }
    // Publishing is idempotent: an already-active coupon is returned as-is.
    let coupon = with_timeout(
        DEFAULT_TIMEOUT,
        dao::get_coupon(state.db_connection_pool.clone(), coupon_id),
    )
    .await??
    .ok_or(AppError::NotFound)?;
    if coupon.business_id != authed.business_id {
        return Err(AppError::AccessDenied);
    }
    match coupon.status {
        CouponStatus::Active => Ok(Json(coupon)),
        CouponStatus::Draft => Err(AppError::NotFound),
    }
}

pub async fn create_share(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedBusiness>,
    Path(coupon_id): Path<Uuid>,
    Json(specification): Json<ShareSpecification>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = with_timeout(
        DEFAULT_TIMEOUT,
        dao::get_coupon(state.db_connection_pool.clone(), coupon_id),
    )
    .await??
    .ok_or(AppError::NotFound)?;
    if coupon.business_id != authed.business_id {
        return Err(AppError::AccessDenied);
    }
    if let Some(password) = &specification.password {
        if password.is_empty() {
            return Err(AppError::Validation("password must not be empty".into()));
        }
    }
    let password_hash = specification
        .password
        .as_deref()
        .map(hash_password)
        .transpose()?;
    let share_id = Uuid::new_v4();
    let share_url = build_share_url(&state.share_base_url, share_id)?;
    let share = with_timeout(
        DEFAULT_TIMEOUT,
        dao::create_share(
            state.db_connection_pool.clone(),
            share_id,
            coupon.id,
            specification.kind,
            &share_url,
            password_hash,
            specification.expires_at,
        ),
    )
    .await??;
    Ok((StatusCode::CREATED, Json(share)))
}

pub async fn list_coupon_redemptions(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedBusiness>,
    Path(coupon_id): Path<Uuid>,
) -> Result<Json<Vec<Redemption>>, AppError> {
    let coupon = with_timeout(
        DEFAULT_TIMEOUT,
        dao::get_coupon(state.db_connection_pool.clone(), coupon_id),
    )
    .await??
    .ok_or(AppError::NotFound)?;
    if coupon.business_id != authed.business_id {
        return Err(AppError::AccessDenied);
    }
    let redemptions = with_timeout(
        DEFAULT_TIMEOUT,
        dao::list_redemptions(state.db_connection_pool.clone(), coupon.id),
    )
    .await??;
    Ok(Json(redemptions))
}

pub async fn get_coupon_statistics(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedBusiness>,
    Path(coupon_id): Path<Uuid>,
) -> Result<Json<Vec<EventCount>>, AppError> {
    let coupon = with_timeout(
        DEFAULT_TIMEOUT,
        dao::get_coupon(state.db_connection_pool.clone(), coupon_id),
    )
    .await??
    .ok_or(AppError::NotFound)?;
    if coupon.business_id != authed.business_id {
        return Err(AppError::AccessDenied);
    }
    let statistics = with_timeout(
        DEFAULT_TIMEOUT,
        dao::get_statistics(state.db_connection_pool.clone(), coupon.id),
    )
    .await??;
    Ok(Json(statistics))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn validate_coupon_specification(specification: &CouponSpecification) -> Result<(), AppError> {
    let discount = &specification.discount;
    match discount.kind {
        DiscountKind::Percentage => {
            let percentage = discount.percentage.ok_or_else(|| {
                AppError::Validation("percentage discount requires a percentage".into())
            })?;
            if !(1..=100).contains(&percentage) {
                return Err(AppError::Validation(
                    "percentage must be between 1 and 100".into(),
                ));
            }
        }
        DiscountKind::Amount => {
            let amount_cents = discount.amount_cents.ok_or_else(|| {
                AppError::Validation("amount discount requires amountCents".into())
            })?;
            if amount_cents <= 0 {
                return Err(AppError::Validation("amountCents must be positive".into()));
            }
        }
        DiscountKind::Bogo => {}
    }

    let validity = &specification.validity;
    match validity.kind {
        ValidityKind::DateRange => {
            if validity.end_date.is_none() {
                return Err(AppError::Validation(
                    "date_range validity requires endDate".into(),
                ));
            }
            if let (Some(start_date), Some(end_date)) = (validity.start_date, validity.end_date) {
                if end_date < start_date {
                    return Err(AppError::Validation(
                        "endDate must not precede startDate".into(),
                    ));
                }
            }
        }
        ValidityKind::Duration => match validity.duration_days {
            Some(duration_days) if duration_days > 0 => {}
            _ => {
                return Err(AppError::Validation(
                    "duration validity requires a positive durationDays".into(),
                ))
            }
        },
        ValidityKind::NoExpiry => {}
    }

    if validity.total_limit.is_some_and(|limit| limit <= 0) {
        return Err(AppError::Validation("totalLimit must be positive".into()));
    }
    if validity.per_customer_limit.is_some_and(|limit| limit <= 0) {
        return Err(AppError::Validation(
            "perCustomerLimit must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::from_str;

    fn specification(raw: &str) -> CouponSpecification {
        from_str(raw).unwrap()
    }

    #[test]
    fn percentage_discount_requires_a_value_in_range() {
        let missing = specification(r#"{"discount": {"type": "percentage"}}"#);
        assert!(validate_coupon_specification(&missing).is_err());
        let out_of_range =
            specification(r#"{"discount": {"type": "percentage", "percentage": 150}}"#);
        assert!(validate_coupon_specification(&out_of_range).is_err());
        let valid = specification(r#"{"discount": {"type": "percentage", "percentage": 25}}"#);
        assert!(validate_coupon_specification(&valid).is_ok());
    }

    #[test]
    fn date_range_requires_a_consistent_window() {
        let missing_end = specification(
            r#"{"discount": {"type": "bogo"}, "validity": {"type": "date_range"}}"#,
        );
        assert!(validate_coupon_specification(&missing_end).is_err());
        let inverted = specification(
            r#"{"discount": {"type": "bogo"},
                "validity": {"type": "date_range",
                             "startDate": "2026-06-01T00:00:00Z",
                             "endDate": "2026-05-01T00:00:00Z"}}"#,
        );
        assert!(validate_coupon_specification(&inverted).is_err());
    }

    #[test]
    fn duration_requires_positive_days() {
        let missing = specification(
            r#"{"discount": {"type": "bogo"}, "validity": {"type": "duration"}}"#,
        );
        assert!(validate_coupon_specification(&missing).is_err());
        let valid = specification(
            r#"{"discount": {"type": "bogo"},
                "validity": {"type": "duration", "durationDays": 30}}"#,
        );
        assert!(validate_coupon_specification(&valid).is_ok());
    }

    #[test]
    fn limits_must_be_positive_when_present() {
        let zero_limit = specification(
            r#"{"discount": {"type": "bogo"},
                "validity": {"usageLimit": "total_limit", "totalLimit": 0}}"#,
        );
        assert!(validate_coupon_specification(&zero_limit).is_err());
    }
}
