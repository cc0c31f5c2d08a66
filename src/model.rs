//! Data model for crawled products and their color variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability value for products with no in-stock variant at all.
pub const UNAVAILABLE: &str = "Unavailable";

/// Navigable address for one color of one product.
///
/// Identity is the two-digit color code, not the URL string: the listing
/// scrape and the product-page DOM can hand back different URLs for the same
/// color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRef {
    /// Two-digit color code embedded in image/link URLs.
    pub color_code: String,
    /// Address that selects this color.
    pub url: String,
}

impl VariantRef {
    pub fn new(color_code: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            color_code: color_code.into(),
            url: url.into(),
        }
    }

    /// Normalized dedup key. Two refs with equal keys are the same variant.
    pub fn key(&self) -> &str {
        &self.color_code
    }
}

/// One product row of the working set.
///
/// Price, rating, and review fields stay exactly as scraped; parsing currency
/// strings and casting counts is the downstream filter's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Stable product id from the listing tile.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Promotional price, raw.
    pub promo_price: String,
    /// Original price, raw.
    pub original_price: String,
    /// Star rating, raw.
    pub rating: String,
    /// Review count, raw.
    pub reviews: String,
    /// Canonical product URL.
    pub url: String,
    /// Known color variants, in first-seen order.
    pub variants: Vec<VariantRef>,
    /// Resolved size availability; `None` until the variant walk finishes
    /// this product.
    pub sizes: Option<String>,
    /// When the listing scrape produced this record.
    pub fetched_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Whether the variant walk still has to visit this product.
    pub fn needs_sizes(&self) -> bool {
        self.sizes.is_none()
    }
}

/// What one variant page resolved to.
///
/// Both fields are independently nullable/empty: a missing color indicator
/// means "color unknown", a missing size widget means the product has no
/// size dimension in this color.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariantResult {
    /// Composite color key, e.g. `09-BLACK`.
    pub color: Option<String>,
    /// In-stock size labels in DOM order.
    pub sizes: Vec<String>,
}

/// Join resolved per-color size sets into the persisted availability string.
///
/// `Unavailable` when nothing resolved; otherwise
/// `"<color>: <s1>, <s2> | <color>: ..."` in first-seen order.
pub fn format_size_availability(resolved: &[(String, Vec<String>)]) -> String {
    if resolved.is_empty() {
        return UNAVAILABLE.to_string();
    }
    resolved
        .iter()
        .map(|(color, sizes)| format!("{}: {}", color, sizes.join(", ")))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_of_nothing_is_unavailable() {
        assert_eq!(format_size_availability(&[]), "Unavailable");
    }

    #[test]
    fn availability_joins_colors_in_order() {
        let resolved = vec![
            ("09-BLACK".to_string(), vec!["S".to_string(), "M".to_string()]),
            ("69-NAVY".to_string(), vec!["M".to_string(), "L".to_string()]),
        ];
        assert_eq!(
            format_size_availability(&resolved),
            "09-BLACK: S, M | 69-NAVY: M, L"
        );
    }

    #[test]
    fn variant_identity_is_the_color_code() {
        let a = VariantRef::new("09", "https://shop.example/p/1?colorDisplayCode=09");
        let b = VariantRef::new("09", "https://shop.example/p/1/09");
        assert_eq!(a.key(), b.key());
    }
}
