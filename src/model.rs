use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CouponStatus {
    Draft,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Amount,
    Bogo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ValidityKind {
    DateRange,
    Duration,
    #[default]
    NoExpiry,
}

/// Client-authored limit mode. Unrecognized values fall back to `Unlimited`,
/// which enforces nothing unless explicit limit values are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UsageLimitKind {
    #[default]
    Unlimited,
    TotalLimit,
    PerCustomer,
    Both,
}

impl UsageLimitKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "total_limit" => UsageLimitKind::TotalLimit,
            "per_customer" => UsageLimitKind::PerCustomer,
            "both" => UsageLimitKind::Both,
            _ => UsageLimitKind::Unlimited,
        }
    }
}

impl<'de> Deserialize<'de> for UsageLimitKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(UsageLimitKind::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ShareKind {
    #[default]
    Link,
    Qr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EventType {
    View,
    Click,
    Redemption,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    pub business_id: Uuid,
    pub status: CouponStatus,
    pub discount_type: DiscountKind,
    pub percentage: Option<i32>,
    pub amount_cents: Option<i64>,
    pub customization: Json<Value>,
    pub validity_type: ValidityKind,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i32>,
    pub usage_limit: UsageLimitKind,
    pub total_limit: Option<i32>,
    pub per_customer_limit: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub kind: ShareKind,
    pub share_url: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub clicks: i64,
    pub redemptions: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub status: String,
    pub customer_ref: Option<String>,
    pub context: Json<Value>,
    pub redeemed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct UsageCounts {
    pub total: i64,
    pub by_customer: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponSpecification {
    pub discount: DiscountSpecification,
    #[serde(default)]
    pub validity: ValiditySpecification,
    pub customization: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountSpecification {
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    pub percentage: Option<i32>,
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValiditySpecification {
    #[serde(rename = "type", default)]
    pub kind: ValidityKind,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i32>,
    #[serde(default)]
    pub usage_limit: UsageLimitKind,
    pub total_limit: Option<i32>,
    pub per_customer_limit: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareSpecification {
    #[serde(rename = "type", default)]
    pub kind: ShareKind,
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub coupon_id: Uuid,
    pub customer_ref: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub coupon_id: Uuid,
    pub customer_ref: Option<String>,
    pub context: Option<Value>,
    pub share_id: Option<Uuid>,
    pub redeem_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub redemption_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemPage {
    pub share: Share,
    pub coupon: Coupon,
    pub business: Business,
    pub redeem_token: String,
    pub redeem_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedEvent {
    Click,
    Redemption,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub event: TrackedEvent,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventCount {
    pub event_type: EventType,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_limit_parses_known_values() {
        assert_eq!(UsageLimitKind::parse("total_limit"), UsageLimitKind::TotalLimit);
        assert_eq!(UsageLimitKind::parse("per_customer"), UsageLimitKind::PerCustomer);
        assert_eq!(UsageLimitKind::parse("both"), UsageLimitKind::Both);
        assert_eq!(UsageLimitKind::parse("unlimited"), UsageLimitKind::Unlimited);
    }

    #[test]
    fn usage_limit_falls_back_to_unlimited() {
        assert_eq!(UsageLimitKind::parse("per_user"), UsageLimitKind::Unlimited);
        assert_eq!(UsageLimitKind::parse(""), UsageLimitKind::Unlimited);
    }

    #[test]
    fn usage_limit_fallback_applies_when_deserializing() {
        let spec: ValiditySpecification =
            serde_json::from_str(r#"{"type": "no_expiry", "usageLimit": "whatever"}"#).unwrap();
        assert_eq!(spec.usage_limit, UsageLimitKind::Unlimited);
    }

    #[test]
    fn validity_defaults_to_no_expiry_unlimited() {
        let spec: CouponSpecification =
            serde_json::from_str(r#"{"discount": {"type": "percentage", "percentage": 10}}"#).unwrap();
        assert_eq!(spec.validity.kind, ValidityKind::NoExpiry);
        assert_eq!(spec.validity.usage_limit, UsageLimitKind::Unlimited);
        assert!(spec.validity.total_limit.is_none());
    }
}
