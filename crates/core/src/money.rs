//! Integer money arithmetic.
//!
//! Monetary amounts are carried in the smallest currency unit (centavos) and
//! tax rates in basis points, so reconciliation checks are exact integer
//! comparisons with an explicit ±1 centavo rounding tolerance.

/// Rounding tolerance for totals reconciliation, in centavos.
pub const RECONCILE_TOLERANCE_CENTS: i64 = 1;

/// Tax amount for a subtotal at a rate given in basis points, rounded
/// half-up to the nearest centavo.
pub fn tax_for(subtotal_cents: i64, tax_rate_bps: u32) -> i64 {
    let raw = i128::from(subtotal_cents) * i128::from(tax_rate_bps);
    // Half-up on the 1/10_000 scale.
    ((raw + 5_000) / 10_000) as i64
}

/// Whether `total = subtotal + tax` holds within the rounding tolerance.
pub fn totals_reconcile(subtotal_cents: i64, tax_cents: i64, total_cents: i64) -> bool {
    (subtotal_cents + tax_cents - total_cents).abs() <= RECONCILE_TOLERANCE_CENTS
}

/// Render centavos as a decimal amount string (e.g. `9810` → `"98.10"`).
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
