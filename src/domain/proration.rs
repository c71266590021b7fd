//! Pure proration math. No clock, no I/O; callers supply every timestamp.
//!
//! All monetary outputs are rounded to 2 decimal places with
//! [`RoundingStrategy::MidpointAwayFromZero`] — the one rounding rule used
//! everywhere in this crate. Ratios are computed on whole seconds so a plan
//! change at the exact midpoint of a period prorates to exactly half.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// Outcome of prorating a plan change. Ephemeral; never persisted as-is
/// (the net amount is copied onto the history row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProrationCalculation {
    /// Value of the unused remainder of the old plan.
    pub credit_amount: Decimal,
    /// Cost of the remainder of the period on the new plan.
    pub charge_amount: Decimal,
    /// `charge - credit`. Positive: customer owes; negative: customer is credited.
    pub net_amount: Decimal,
    pub days_remaining: i64,
    pub days_in_period: i64,
}

impl ProrationCalculation {
    fn zero() -> Self {
        ProrationCalculation {
            credit_amount: Decimal::ZERO,
            charge_amount: Decimal::ZERO,
            net_amount: Decimal::ZERO,
            days_remaining: 0,
            days_in_period: 0,
        }
    }
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Fraction of `[period_start, period_end]` that lies after `at`.
///
/// Inputs are not range-checked: an `at` outside the period yields a ratio
/// outside [0, 1], and the caller owns passing an in-range timestamp.
/// A zero-length period yields `None`.
fn unused_ratio(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Option<Decimal> {
    let period_secs = (period_end - period_start).num_seconds();
    if period_secs <= 0 {
        return None;
    }
    let remaining_secs = (period_end - at).num_seconds();
    Some(Decimal::from(remaining_secs) / Decimal::from(period_secs))
}

/// Prorate a mid-cycle plan change: credit the unused slice of the old plan,
/// charge the same slice of the new plan.
pub fn calculate_proration(
    old_plan_price: Decimal,
    new_plan_price: Decimal,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    change_date: DateTime<Utc>,
) -> ProrationCalculation {
    let Some(ratio) = unused_ratio(period_start, period_end, change_date) else {
        return ProrationCalculation::zero();
    };

    let credit_amount = round_money(old_plan_price * ratio);
    let charge_amount = round_money(new_plan_price * ratio);

    ProrationCalculation {
        credit_amount,
        charge_amount,
        // Difference of the rounded legs, so credit + net == charge holds
        // to the cent on every result.
        net_amount: charge_amount - credit_amount,
        days_remaining: (period_end - change_date).num_days(),
        days_in_period: (period_end - period_start).num_days(),
    }
}

/// Credit owed when a subscription is canceled mid-period.
pub fn calculate_cancellation_credit(
    plan_price: Decimal,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    cancel_date: DateTime<Utc>,
) -> Decimal {
    match unused_ratio(period_start, period_end, cancel_date) {
        Some(ratio) => round_money(plan_price * ratio),
        None => Decimal::ZERO,
    }
}

/// Charge for a subscription that starts partway into a billing period:
/// the subscriber pays for the slice of the period they actually get.
pub fn calculate_partial_period_charge(
    plan_price: Decimal,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    start_date: DateTime<Utc>,
) -> Decimal {
    match unused_ratio(period_start, period_end, start_date) {
        Some(ratio) => round_money(plan_price * ratio),
        None => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn thirty_day_period() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (start, start + Duration::days(30))
    }

    #[test]
    fn upgrade_at_exact_midpoint() {
        let (start, end) = thirty_day_period();
        let result =
            calculate_proration(dec!(30.00), dec!(60.00), start, end, start + Duration::days(15));

        assert_eq!(result.credit_amount, dec!(15.00));
        assert_eq!(result.charge_amount, dec!(30.00));
        assert_eq!(result.net_amount, dec!(15.00));
        assert_eq!(result.days_remaining, 15);
        assert_eq!(result.days_in_period, 30);
    }

    #[test]
    fn upgrade_day_fifteen_of_thirty() {
        let (start, end) = thirty_day_period();
        let result =
            calculate_proration(dec!(20.00), dec!(50.00), start, end, start + Duration::days(15));
        assert_eq!(result.net_amount, dec!(15.00));
    }

    #[test]
    fn downgrade_credits_the_customer() {
        let (start, end) = thirty_day_period();
        let result =
            calculate_proration(dec!(60.00), dec!(30.00), start, end, start + Duration::days(15));
        assert_eq!(result.net_amount, dec!(-15.00));
    }

    #[test]
    fn change_at_period_start_swaps_full_price() {
        let (start, end) = thirty_day_period();
        let result = calculate_proration(dec!(20.00), dec!(50.00), start, end, start);
        assert_eq!(result.credit_amount, dec!(20.00));
        assert_eq!(result.charge_amount, dec!(50.00));
        assert_eq!(result.net_amount, dec!(30.00));
    }

    #[test]
    fn change_at_period_end_is_free() {
        let (start, end) = thirty_day_period();
        let result = calculate_proration(dec!(20.00), dec!(50.00), start, end, end);
        assert_eq!(result.net_amount, dec!(0.00));
        assert_eq!(result.days_remaining, 0);
    }

    #[test]
    fn amounts_round_to_cents_half_up() {
        let (start, end) = thirty_day_period();
        // 10 days remaining of 30 => ratio 1/3; 10.00 * 1/3 = 3.333... => 3.33
        let result = calculate_proration(
            dec!(10.00),
            dec!(25.00),
            start,
            end,
            start + Duration::days(20),
        );
        assert_eq!(result.credit_amount, dec!(3.33));
        // 25.00 * 1/3 = 8.333... => 8.33
        assert_eq!(result.charge_amount, dec!(8.33));
        assert_eq!(result.net_amount, dec!(5.00));
        // net is always the difference of the rounded legs
        assert_eq!(
            result.net_amount,
            result.charge_amount - result.credit_amount
        );
    }

    #[test]
    fn zero_length_period_yields_zero() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let result = calculate_proration(dec!(30.00), dec!(60.00), start, start, start);
        assert_eq!(result, ProrationCalculation::zero());
    }

    #[test]
    fn out_of_range_change_date_is_not_clamped() {
        let (start, end) = thirty_day_period();
        let before = start - Duration::days(30);
        let result = calculate_proration(dec!(30.00), dec!(60.00), start, end, before);
        // Ratio 2.0: documented behavior, the calculator does not validate range.
        assert_eq!(result.credit_amount, dec!(60.00));
        assert_eq!(result.charge_amount, dec!(120.00));
    }

    #[test]
    fn cancellation_credit_midpoint() {
        let (start, end) = thirty_day_period();
        let credit =
            calculate_cancellation_credit(dec!(30.00), start, end, start + Duration::days(15));
        assert_eq!(credit, dec!(15.00));
    }

    #[test]
    fn partial_period_charge_for_late_start() {
        let (start, end) = thirty_day_period();
        // Joining 20 days in leaves a third of the period.
        let charge =
            calculate_partial_period_charge(dec!(30.00), start, end, start + Duration::days(20));
        assert_eq!(charge, dec!(10.00));
    }
}
