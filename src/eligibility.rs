//! Pure eligibility evaluation. Called twice per happy-path redemption:
//! once as an advisory check and once, with fresh counts, inside the
//! confirm transaction. Only the transactional call is binding.

use crate::model::{Coupon, CouponStatus, UsageCounts, UsageLimitKind};
use chrono::{DateTime, Utc};

pub const REASON_NOT_ACTIVE: &str = "Coupon is not active";
pub const REASON_TOTAL_LIMIT: &str = "Coupon redemption limit reached";
pub const REASON_CUSTOMER_LIMIT: &str = "Customer redemption limit reached";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Eligible,
    NotActive,
    TotalLimitReached,
    CustomerLimitReached,
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Verdict::Eligible)
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Verdict::Eligible => None,
            Verdict::NotActive => Some(REASON_NOT_ACTIVE),
            Verdict::TotalLimitReached => Some(REASON_TOTAL_LIMIT),
            Verdict::CustomerLimitReached => Some(REASON_CUSTOMER_LIMIT),
        }
    }
}

/// Which limits apply for one evaluation. A flag is set only when the
/// corresponding limit value is present (and, for the per-customer check,
/// a customer reference was supplied).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Enforcement {
    pub total: bool,
    pub per_customer: bool,
}

impl Enforcement {
    pub fn for_coupon(coupon: &Coupon, customer_ref: Option<&str>) -> Self {
        let total = coupon.total_limit.is_some();
        let per_customer = coupon.per_customer_limit.is_some() && customer_ref.is_some();
        match coupon.usage_limit {
            UsageLimitKind::Unlimited => Enforcement { total, per_customer },
            UsageLimitKind::TotalLimit => Enforcement {
                total,
                per_customer: false,
            },
            UsageLimitKind::PerCustomer => Enforcement {
                total: false,
                per_customer,
            },
            UsageLimitKind::Both => Enforcement { total, per_customer },
        }
    }

    pub fn any(&self) -> bool {
        self.total || self.per_customer
    }
}

pub fn is_active(coupon: &Coupon, now: DateTime<Utc>) -> bool {
    if coupon.status != CouponStatus::Active {
        return false;
    }
    match coupon.end_date {
        Some(end_date) => end_date >= now,
        None => true,
    }
}

pub fn evaluate(
    coupon: &Coupon,
    customer_ref: Option<&str>,
    counts: &UsageCounts,
    now: DateTime<Utc>,
) -> Verdict {
    if !is_active(coupon, now) {
        return Verdict::NotActive;
    }

    let enforcement = Enforcement::for_coupon(coupon, customer_ref);

    if enforcement.total {
        if let Some(limit) = coupon.total_limit {
            if counts.total >= i64::from(limit) {
                return Verdict::TotalLimitReached;
            }
        }
    }

    if enforcement.per_customer {
        if let Some(limit) = coupon.per_customer_limit {
            if counts.by_customer >= i64::from(limit) {
                return Verdict::CustomerLimitReached;
            }
        }
    }

    Verdict::Eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscountKind, ValidityKind};
    use chrono::Duration;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn test_coupon() -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            status: CouponStatus::Active,
            discount_type: DiscountKind::Percentage,
            percentage: Some(10),
            amount_cents: None,
            customization: Json(serde_json::json!({})),
            validity_type: ValidityKind::NoExpiry,
            start_date: None,
            end_date: None,
            duration_days: None,
            usage_limit: UsageLimitKind::Unlimited,
            total_limit: None,
            per_customer_limit: None,
            created_at: Utc::now(),
        }
    }

    fn counts(total: i64, by_customer: i64) -> UsageCounts {
        UsageCounts { total, by_customer }
    }

    #[test]
    fn draft_coupon_is_never_eligible() {
        let mut coupon = test_coupon();
        coupon.status = CouponStatus::Draft;
        coupon.end_date = Some(Utc::now() + Duration::days(30));
        let verdict = evaluate(&coupon, None, &counts(0, 0), Utc::now());
        assert_eq!(verdict, Verdict::NotActive);
        assert_eq!(verdict.reason(), Some(REASON_NOT_ACTIVE));
    }

    #[test]
    fn expired_window_is_not_active_even_when_status_is_active() {
        let mut coupon = test_coupon();
        coupon.validity_type = ValidityKind::DateRange;
        coupon.end_date = Some(Utc::now() - Duration::days(1));
        assert_eq!(evaluate(&coupon, None, &counts(0, 0), Utc::now()), Verdict::NotActive);
    }

    #[test]
    fn end_date_boundary_is_still_active() {
        let now = Utc::now();
        let mut coupon = test_coupon();
        coupon.end_date = Some(now);
        assert!(is_active(&coupon, now));
        assert!(!is_active(&coupon, now + Duration::seconds(1)));
    }

    #[test]
    fn unlimited_ignores_counts_without_explicit_limits() {
        let coupon = test_coupon();
        let verdict = evaluate(&coupon, Some("cust-a"), &counts(1_000_000, 1_000), Utc::now());
        assert!(verdict.is_eligible());
        assert!(!Enforcement::for_coupon(&coupon, Some("cust-a")).any());
    }

    #[test]
    fn unlimited_with_explicit_total_limit_still_enforces() {
        // legacy configs: limit values present without a matching mode
        let mut coupon = test_coupon();
        coupon.total_limit = Some(5);
        assert_eq!(
            evaluate(&coupon, None, &counts(5, 0), Utc::now()),
            Verdict::TotalLimitReached
        );
        assert!(evaluate(&coupon, None, &counts(4, 0), Utc::now()).is_eligible());
    }

    #[test]
    fn total_limit_reached_reports_the_coupon_reason() {
        let mut coupon = test_coupon();
        coupon.usage_limit = UsageLimitKind::TotalLimit;
        coupon.total_limit = Some(1);
        let verdict = evaluate(&coupon, None, &counts(1, 0), Utc::now());
        assert_eq!(verdict, Verdict::TotalLimitReached);
        assert_eq!(verdict.reason(), Some(REASON_TOTAL_LIMIT));
    }

    #[test]
    fn total_limit_kind_without_value_is_unenforceable() {
        let mut coupon = test_coupon();
        coupon.usage_limit = UsageLimitKind::TotalLimit;
        assert!(evaluate(&coupon, None, &counts(10_000, 0), Utc::now()).is_eligible());
        assert!(!Enforcement::for_coupon(&coupon, None).any());
    }

    #[test]
    fn per_customer_limit_blocks_a_repeat_customer() {
        let mut coupon = test_coupon();
        coupon.usage_limit = UsageLimitKind::PerCustomer;
        coupon.per_customer_limit = Some(1);
        let verdict = evaluate(&coupon, Some("cust-a"), &counts(3, 1), Utc::now());
        assert_eq!(verdict, Verdict::CustomerLimitReached);
        assert_eq!(verdict.reason(), Some(REASON_CUSTOMER_LIMIT));
    }

    #[test]
    fn per_customer_limit_allows_a_new_customer() {
        let mut coupon = test_coupon();
        coupon.usage_limit = UsageLimitKind::PerCustomer;
        coupon.per_customer_limit = Some(1);
        assert!(evaluate(&coupon, Some("cust-b"), &counts(3, 0), Utc::now()).is_eligible());
    }

    #[test]
    fn per_customer_limit_is_not_enforceable_without_customer_ref() {
        let mut coupon = test_coupon();
        coupon.usage_limit = UsageLimitKind::PerCustomer;
        coupon.per_customer_limit = Some(1);
        assert!(evaluate(&coupon, None, &counts(3, 3), Utc::now()).is_eligible());
        assert!(!Enforcement::for_coupon(&coupon, None).any());
    }

    #[test]
    fn both_mode_enforces_total_and_per_customer() {
        let mut coupon = test_coupon();
        coupon.usage_limit = UsageLimitKind::Both;
        coupon.total_limit = Some(10);
        coupon.per_customer_limit = Some(2);
        assert_eq!(
            evaluate(&coupon, Some("cust-a"), &counts(10, 0), Utc::now()),
            Verdict::TotalLimitReached
        );
        assert_eq!(
            evaluate(&coupon, Some("cust-a"), &counts(5, 2), Utc::now()),
            Verdict::CustomerLimitReached
        );
        assert!(evaluate(&coupon, Some("cust-a"), &counts(5, 1), Utc::now()).is_eligible());
    }

    #[test]
    fn total_limit_mode_ignores_per_customer_counts() {
        let mut coupon = test_coupon();
        coupon.usage_limit = UsageLimitKind::TotalLimit;
        coupon.total_limit = Some(10);
        coupon.per_customer_limit = Some(1);
        assert!(evaluate(&coupon, Some("cust-a"), &counts(5, 5), Utc::now()).is_eligible());
    }
}
