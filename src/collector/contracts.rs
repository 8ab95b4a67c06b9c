//! (index, strike, expiry) → call/put instrument tokens

use chrono::NaiveDate;

use crate::models::{ContractPair, Instrument, OptionSide};

/// Find the ATM call and put for one expiry. `None` unless both sides exist.
///
/// Symbols are matched by substring, so `BANKNIFTY` and `FINNIFTY` rows also
/// match `NIFTY`; the first matching row in pool order wins.
pub fn resolve(
    pool: &[Instrument],
    index: &str,
    atm: i64,
    expiry: NaiveDate,
) -> Option<ContractPair> {
    let strike = atm as f64;
    let find = |side: OptionSide| {
        pool.iter()
            .find(|inst| {
                inst.is_option()
                    && inst.strike == strike
                    && inst.trading_symbol.contains(index)
                    && inst.expiry == Some(expiry)
                    && inst.side() == Some(side)
            })
            .map(|inst| inst.token.clone())
    };

    Some(ContractPair {
        call: find(OptionSide::Call)?,
        put: find(OptionSide::Put)?,
    })
}
