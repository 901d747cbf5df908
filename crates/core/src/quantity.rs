//! Canonical-unit quantity comparison.

/// Floating-point noise floor for quantities expressed in canonical units.
///
/// Two quantities whose absolute difference is at most this value are the same
/// stock position.
pub const QUANTITY_TOLERANCE: f64 = 1e-6;

/// `|a - b| <= QUANTITY_TOLERANCE`.
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= QUANTITY_TOLERANCE
}
