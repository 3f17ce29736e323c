//! Splitting a sell into chunks

use bigdecimal::{BigDecimal, RoundingMode, Zero};

/// Split `total` by `ratios` into amounts representable at `decimals`
///
/// Every part but the last is `total * ratio` truncated to the token's
/// precision; the last part is whatever remains, so the parts always sum to
/// `total` exactly. Zero parts are dropped.
pub fn chunk_plan(total: &BigDecimal, ratios: &[BigDecimal], decimals: u8) -> Vec<BigDecimal> {
    if *total <= BigDecimal::zero() || ratios.is_empty() {
        return Vec::new();
    }

    let scale = i64::from(decimals);
    let mut remaining = total.clone();
    let mut parts = Vec::with_capacity(ratios.len());
    for ratio in &ratios[..ratios.len() - 1] {
        let part = (total * ratio).with_scale_round(scale, RoundingMode::Down);
        let part = part.min(remaining.clone());
        remaining -= &part;
        parts.push(part);
    }
    parts.push(remaining);

    parts.into_iter().filter(|p| *p > BigDecimal::zero()).collect()
}
