//! Render cost table and top-up packages.

use crate::types::{Duration, ModelTier, Quality};

/// Token cost of one render job.
///
/// Standard: 10 s -> 30, 15 s -> 35.
/// Pro Standard: 10 s -> 90, 15 s -> 135.
/// Pro HD: 10 s -> 200, 15 s -> 400.
pub fn render_cost(tier: ModelTier, quality: Option<Quality>, duration: Duration) -> u64 {
    match (tier, quality) {
        (ModelTier::Standard, _) => match duration {
            Duration::Sec10 => 30,
            Duration::Sec15 => 35,
        },
        (ModelTier::Pro, Some(Quality::High)) => match duration {
            Duration::Sec10 => 200,
            Duration::Sec15 => 400,
        },
        (ModelTier::Pro, _) => match duration {
            Duration::Sec10 => 90,
            Duration::Sec15 => 135,
        },
    }
}

/// A purchasable token bundle on one of the payment rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPackage {
    /// Price in the rail's own unit (stars or whole currency units)
    pub price: u64,
    pub tokens: u64,
}

/// Instant-confirm rail bundles (stars -> tokens).
pub const INSTANT_PACKAGES: [TokenPackage; 4] = [
    TokenPackage {
        price: 20,
        tokens: 30,
    },
    TokenPackage {
        price: 60,
        tokens: 100,
    },
    TokenPackage {
        price: 120,
        tokens: 200,
    },
    TokenPackage {
        price: 300,
        tokens: 500,
    },
];

/// Poll-confirm rail bundles (currency units -> tokens, 1:1).
pub const POLL_PACKAGES: [TokenPackage; 4] = [
    TokenPackage {
        price: 30,
        tokens: 30,
    },
    TokenPackage {
        price: 100,
        tokens: 100,
    },
    TokenPackage {
        price: 200,
        tokens: 200,
    },
    TokenPackage {
        price: 500,
        tokens: 500,
    },
];

/// Look up a package by its declared price, e.g. from a callback payload.
pub fn find_package(packages: &[TokenPackage], price: u64) -> Option<TokenPackage> {
    packages.iter().copied().find(|p| p.price == price)
}
