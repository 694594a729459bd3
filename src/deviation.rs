//! Pure deviation predicate (spec §4.2, C2). All arithmetic is done in
//! `rust_decimal::Decimal` so the threshold boundary is exact — matching the
//! scaling step the pack's `ChainlinkOracle` example performs on a feed's
//! `int256` answer before comparing prices (see SPEC_FULL.md §4.2).

use rust_decimal::Decimal;

/// `true` iff `next` deviates from `cur` by at least `threshold_pct` percent.
///
/// `cur == 0` is the bootstrap rule: any movement away from zero counts as
/// exceeding any threshold. Otherwise `pct = |cur - next| / cur * 100`, and
/// the predicate is `pct >= threshold_pct` — equality counts as outside.
pub fn outside(cur: Decimal, next: Decimal, threshold_pct: Decimal) -> bool {
    if cur.is_zero() {
        return true;
    }
    let pct = ((cur - next).abs() / cur) * Decimal::ONE_HUNDRED;
    pct >= threshold_pct
}
