//! Per-product variant walk.
//!
//! One worker owns one product record and one browser session for the
//! duration of the walk: visit the first known variant, discover the full
//! variant set from the loaded page, then visit the remaining addresses in
//! order. Per-address failures degrade to "no result for that address";
//! only a dead session escapes to the pool.

use std::time::Duration;

use anyhow::Result;

use crate::config::{EngineConfig, Selectors};
use crate::model::{format_size_availability, ProductRecord, VariantRef, UNAVAILABLE};
use crate::retry;
use crate::session::PageSession;
use crate::variants::{VariantDiscoverer, VariantExtractor};

/// Walks all color variants of a single product.
pub struct ProductWorker {
    discoverer: VariantDiscoverer,
    extractor: VariantExtractor,
    retry_attempts: u32,
    retry_base_delay: Duration,
    duplicate_streak_limit: u32,
}

impl ProductWorker {
    pub fn new(engine: &EngineConfig, selectors: &Selectors) -> Result<Self> {
        Ok(Self {
            discoverer: VariantDiscoverer::new(engine),
            extractor: VariantExtractor::new(engine, selectors)?,
            retry_attempts: engine.retry_attempts,
            retry_base_delay: engine.retry_base_delay(),
            duplicate_streak_limit: engine.duplicate_streak_limit,
        })
    }

    /// Resolve the product's size availability in place.
    ///
    /// Always leaves `record.sizes` set on success. An `Err` means the
    /// session itself became unusable; the pool handles that.
    pub async fn run(&self, record: &mut ProductRecord, page: &dyn PageSession) -> Result<()> {
        if record.variants.is_empty() {
            tracing::debug!(product = %record.id, "no variant refs, marking unavailable");
            record.sizes = Some(UNAVAILABLE.to_string());
            return Ok(());
        }

        let mut seen_colors: Vec<String> = Vec::new();
        let mut resolved: Vec<(String, Vec<String>)> = Vec::new();

        // VisitFirst: the first known address doubles as the discovery page.
        let first = record.variants[0].clone();
        match self.visit(page, &first).await {
            Some(result) => {
                if let Some(color) = result.color {
                    if !result.sizes.is_empty() {
                        resolved.push((color.clone(), result.sizes));
                    }
                    seen_colors.push(color);
                }
            }
            None => {
                // Without a loaded product page there is nothing to discover.
                tracing::warn!(
                    product = %record.id,
                    url = %first.url,
                    "first variant unreachable, product has no resolved variants"
                );
                record.sizes = Some(UNAVAILABLE.to_string());
                return Ok(());
            }
        }

        // Discover: union DOM-found codes with the listing's refs. Session
        // errors here mean the page handle is gone, so they propagate.
        let merged = self
            .discoverer
            .discover(page, &record.id, &record.variants)
            .await?;
        record.variants = merged.clone();

        let remaining: Vec<VariantRef> = merged
            .into_iter()
            .filter(|v| v.key() != first.key())
            .collect();

        // VisitRemaining with duplicate-streak early stop.
        let mut duplicate_streak = 0u32;
        for vref in &remaining {
            let Some(result) = self.visit(page, vref).await else {
                continue;
            };
            // A null color is simply skipped; it is not a duplicate.
            let Some(color) = result.color else {
                continue;
            };

            if seen_colors.contains(&color) {
                duplicate_streak += 1;
                tracing::debug!(
                    product = %record.id,
                    color,
                    duplicate_streak,
                    "already-seen color"
                );
                if duplicate_streak >= self.duplicate_streak_limit {
                    tracing::debug!(
                        product = %record.id,
                        "duplicate streak limit reached, abandoning remaining variants"
                    );
                    break;
                }
            } else {
                duplicate_streak = 0;
                if !result.sizes.is_empty() {
                    resolved.push((color.clone(), result.sizes));
                }
                seen_colors.push(color);
            }
        }

        record.sizes = Some(format_size_availability(&resolved));
        Ok(())
    }

    /// Navigate to one variant address and extract it.
    ///
    /// `None` means the address was unreachable even with retries.
    async fn visit(
        &self,
        page: &dyn PageSession,
        vref: &VariantRef,
    ) -> Option<crate::model::VariantResult> {
        let nav = retry::retry(
            self.retry_attempts,
            self.retry_base_delay,
            "variant navigation",
            || page.navigate(&vref.url),
        )
        .await;

        if let Err(err) = nav {
            tracing::warn!(url = %vref.url, error = %err, "variant navigation failed");
            return None;
        }

        Some(self.extractor.extract(page, &vref.color_code).await)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::session::fake::{FakePage, FakeSession};

    fn engine() -> EngineConfig {
        EngineConfig {
            retry_attempts: 1,
            retry_base_delay_ms: 0,
            ..EngineConfig::default()
        }
    }

    fn worker() -> ProductWorker {
        ProductWorker::new(&engine(), &Selectors::default()).unwrap()
    }

    fn record(id: &str, variants: Vec<VariantRef>) -> ProductRecord {
        ProductRecord {
            id: id.to_string(),
            name: "Crew Neck T-Shirt".to_string(),
            promo_price: "9,90 €".to_string(),
            original_price: "19,90 €".to_string(),
            rating: "4.3".to_string(),
            reviews: "87".to_string(),
            url: format!("https://shop.example/p/{id}"),
            variants,
            sizes: None,
            fetched_at: Utc::now(),
        }
    }

    fn variant_url(id: &str, code: &str) -> String {
        format!("https://shop.example/p/{id}?colorDisplayCode={code}")
    }

    fn variant_page(indicator: &str, sizes: &[&str], img_srcs: Vec<String>) -> FakePage {
        FakePage {
            indicator: Some(indicator.to_string()),
            size_widget: !sizes.is_empty(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
            img_srcs,
            ..FakePage::default()
        }
    }

    #[tokio::test]
    async fn product_without_variant_refs_is_unavailable_with_zero_navigations() {
        let session = FakeSession::default();
        let mut rec = record("E1", vec![]);

        worker().run(&mut rec, &session).await.unwrap();

        assert_eq!(rec.sizes.as_deref(), Some("Unavailable"));
        assert!(session.visited().is_empty());
    }

    #[tokio::test]
    async fn walks_discovered_variants_and_skips_unreachable_codes() {
        // Product 455563 known as 09 and 69 from the listing; the page also
        // advertises a stale code 00 whose address renders nothing useful.
        let id = "455563";
        let imgs = vec![
            "https://im.example/goods_09_455563.jpg".to_string(),
            "https://im.example/goods_69_455563.jpg".to_string(),
            "https://im.example/goods_00_455563.jpg".to_string(),
        ];
        let session = FakeSession::new(vec![
            (
                variant_url(id, "09").as_str(),
                variant_page("FARBE: 09 Black", &["S", "M"], imgs.clone()),
            ),
            (
                variant_url(id, "69").as_str(),
                variant_page("FARBE: 69 Navy", &["M", "L"], imgs),
            ),
            // The synthesized 00 address resolves to an empty page: the
            // extractor times out and yields a null result.
        ]);
        let mut rec = record(
            id,
            vec![
                VariantRef::new("09", variant_url(id, "09")),
                VariantRef::new("69", variant_url(id, "69")),
            ],
        );

        worker().run(&mut rec, &session).await.unwrap();

        assert_eq!(rec.sizes.as_deref(), Some("09-BLACK: S, M | 69-NAVY: M, L"));
        // Merged knowledge is written back onto the record.
        let codes: Vec<&str> = rec.variants.iter().map(|v| v.color_code.as_str()).collect();
        assert_eq!(codes, vec!["09", "69", "00"]);
        // All three addresses were visited; the null result did not feed the
        // duplicate streak.
        assert_eq!(session.visited().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_streak_abandons_remaining_addresses() {
        // Every address re-derives the same color A: a redirect loop. After
        // the second repeat the fourth address must never be visited.
        let id = "777";
        let imgs = vec![
            "https://im.example/goods_01_777.jpg".to_string(),
            "https://im.example/goods_02_777.jpg".to_string(),
            "https://im.example/goods_03_777.jpg".to_string(),
            "https://im.example/goods_04_777.jpg".to_string(),
        ];
        let page = |_code: &str| variant_page("FARBE: 01 Weiss", &["S"], imgs.clone());
        let session = FakeSession::new(vec![
            (variant_url(id, "01").as_str(), page("01")),
            (variant_url(id, "02").as_str(), page("02")),
            (variant_url(id, "03").as_str(), page("03")),
            (variant_url(id, "04").as_str(), page("04")),
        ]);
        let mut rec = record(id, vec![VariantRef::new("01", variant_url(id, "01"))]);

        worker().run(&mut rec, &session).await.unwrap();

        // 01 visited, then 02 (streak 1) and 03 (streak 2); 04 abandoned.
        assert_eq!(session.visited().len(), 3);
        assert_eq!(rec.sizes.as_deref(), Some("01-WEISS: S"));
    }

    #[tokio::test]
    async fn unreachable_first_variant_degrades_to_unavailable() {
        let id = "321";
        let session = FakeSession::new(vec![(
            variant_url(id, "09").as_str(),
            FakePage {
                fail_navigation: true,
                ..FakePage::default()
            },
        )]);
        let mut rec = record(id, vec![VariantRef::new("09", variant_url(id, "09"))]);

        worker().run(&mut rec, &session).await.unwrap();

        assert_eq!(rec.sizes.as_deref(), Some("Unavailable"));
    }

    #[tokio::test]
    async fn zero_size_variants_are_excluded_from_the_availability_string() {
        let id = "888";
        let imgs = vec![
            "https://im.example/goods_09_888.jpg".to_string(),
            "https://im.example/goods_32_888.jpg".to_string(),
        ];
        let session = FakeSession::new(vec![
            (
                variant_url(id, "09").as_str(),
                // Sold out in this color: valid result, zero sizes.
                variant_page("FARBE: 09 Black", &[], imgs.clone()),
            ),
            (
                variant_url(id, "32").as_str(),
                variant_page("FARBE: 32 Beige", &["XL"], imgs),
            ),
        ]);
        let mut rec = record(id, vec![VariantRef::new("09", variant_url(id, "09"))]);

        worker().run(&mut rec, &session).await.unwrap();

        assert_eq!(rec.sizes.as_deref(), Some("32-BEIGE: XL"));
    }

    #[tokio::test]
    async fn all_variants_sold_out_is_unavailable() {
        let id = "555";
        let session = FakeSession::new(vec![(
            variant_url(id, "09").as_str(),
            variant_page(
                "FARBE: 09 Black",
                &[],
                vec!["https://im.example/goods_09_555.jpg".to_string()],
            ),
        )]);
        let mut rec = record(id, vec![VariantRef::new("09", variant_url(id, "09"))]);

        worker().run(&mut rec, &session).await.unwrap();

        assert_eq!(rec.sizes.as_deref(), Some("Unavailable"));
    }
}
