//! Graduated per-image pricing.
//!
//! Each image is charged at the rate of the tier it falls in, so the first 50
//! images of any order cost the same regardless of order size.

use serde::Serialize;

pub const MAX_IMAGES_PER_ORDER: i32 = 500;

#[derive(Debug, Clone, Copy)]
pub struct Tier {
    pub start: i32,
    /// Inclusive; `None` for the open-ended last tier.
    pub end: Option<i32>,
    pub unit_cents: i64,
}

pub const TIERS: &[Tier] = &[
    Tier { start: 1, end: Some(50), unit_cents: 50 },
    Tier { start: 51, end: Some(200), unit_cents: 40 },
    Tier { start: 201, end: Some(500), unit_cents: 30 },
    Tier { start: 501, end: None, unit_cents: 25 },
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TierLine {
    pub tier_start: i32,
    pub tier_end: Option<i32>,
    pub images: i32,
    pub unit_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Quote {
    pub image_count: i32,
    pub total_cents: i64,
    pub effective_per_image_cents: i64,
    pub breakdown: Vec<TierLine>,
}

pub fn quote(image_count: i32) -> anyhow::Result<Quote> {
    anyhow::ensure!(image_count > 0, "image_count must be positive");

    let mut breakdown = Vec::new();
    for tier in TIERS {
        if image_count < tier.start {
            break;
        }
        let upper = tier.end.map_or(image_count, |end| end.min(image_count));
        let images = upper - tier.start + 1;
        breakdown.push(TierLine {
            tier_start: tier.start,
            tier_end: tier.end,
            images,
            unit_cents: tier.unit_cents,
            subtotal_cents: images as i64 * tier.unit_cents,
        });
    }

    let total_cents = breakdown.iter().map(|l| l.subtotal_cents).sum::<i64>();
    Ok(Quote {
        image_count,
        total_cents,
        // rounded half up
        effective_per_image_cents: (total_cents * 2 + image_count as i64) / (image_count as i64 * 2),
        breakdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tier() {
        let q = quote(10).unwrap();
        assert_eq!(q.total_cents, 500);
        assert_eq!(q.breakdown.len(), 1);
        assert_eq!(q.effective_per_image_cents, 50);
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(quote(50).unwrap().total_cents, 2_500);
        assert_eq!(quote(51).unwrap().total_cents, 2_540);
        assert_eq!(quote(200).unwrap().total_cents, 2_500 + 150 * 40);
        assert_eq!(quote(201).unwrap().total_cents, 8_500 + 30);
    }

    #[test]
    fn spans_every_tier() {
        let q = quote(600).unwrap();
        // 50*50 + 150*40 + 300*30 + 100*25
        assert_eq!(q.total_cents, 2_500 + 6_000 + 9_000 + 2_500);
        assert_eq!(q.breakdown.len(), 4);
        assert_eq!(q.breakdown.iter().map(|l| l.images).sum::<i32>(), 600);
        assert_eq!(q.breakdown[3].tier_end, None);
        assert_eq!(q.effective_per_image_cents, 33);
    }

    #[test]
    fn zero_or_negative_is_rejected() {
        assert!(quote(0).is_err());
        assert!(quote(-3).is_err());
    }
}
