//! Derived quote analytics
//!
//! Every ratio is `None` unless both operands are available and the
//! denominator is non-zero.

use chrono::NaiveDate;

/// Nearest multiple of `step`; exact halves go to the even multiple.
/// `None` when the strike is not representable as an `i64`.
pub fn atm_strike(spot: f64, step: i64) -> Option<i64> {
    let steps = (spot / step as f64).round_ties_even();
    if !steps.is_finite() || steps.abs() >= i64::MAX as f64 {
        return None;
    }
    (steps as i64).checked_mul(step)
}

/// Put/call open-interest ratio
pub fn pcr(oi_call: Option<i64>, oi_put: Option<i64>) -> Option<f64> {
    let call = oi_call.filter(|oi| *oi != 0)?;
    Some(oi_put? as f64 / call as f64)
}

pub fn change(last: Option<f64>, reference: Option<f64>) -> Option<f64> {
    Some(last? - reference?)
}

/// `(last − reference) / reference × 100`
pub fn percent_change(last: Option<f64>, reference: Option<f64>) -> Option<f64> {
    let reference = reference.filter(|r| *r != 0.0)?;
    Some((last? - reference) / reference * 100.0)
}

/// Sum of whichever leg prices are available
pub fn total_premium(call_last: Option<f64>, put_last: Option<f64>) -> f64 {
    call_last.into_iter().chain(put_last).sum()
}

/// Straddle IV: mean of both legs, only when both are available
pub fn average_iv(call_iv: Option<f64>, put_iv: Option<f64>) -> Option<f64> {
    Some((call_iv? + put_iv?) / 2.0)
}

pub fn days_to_expiry(expiry: NaiveDate, today: NaiveDate) -> i64 {
    (expiry - today).num_days()
}
