//! Listing-page crawl: scroll to convergence, then harvest product tiles.
//!
//! The harvest runs as one script inside the page rather than as per-field
//! DOM round trips. With hundreds of tiles that is the difference between
//! one CDP call and thousands, and it guarantees every field of a tile is
//! read from the same render.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use url::Url;

use crate::config::{EngineConfig, Selectors};
use crate::model::{ProductRecord, VariantRef};
use crate::retry;
use crate::scroll::ScrollConvergence;
use crate::session::PageSession;
use crate::variants;

/// Crawls one listing page into a set of product records.
pub struct ListingCrawler {
    scroll: ScrollConvergence,
    selectors: Selectors,
    color_param: String,
    code_pattern: String,
    retry_attempts: u32,
    retry_base_delay: std::time::Duration,
}

/// One tile as harvested by the in-page script.
#[derive(Debug, Deserialize)]
struct ListingTile {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    promo_price: String,
    #[serde(default)]
    original_price: String,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    reviews: String,
    #[serde(default)]
    href: String,
    #[serde(default)]
    thumbnails: Vec<String>,
}

impl ListingCrawler {
    pub fn new(engine: &EngineConfig, selectors: &Selectors) -> Self {
        Self {
            scroll: ScrollConvergence {
                stable_rounds: engine.scroll_stable_rounds,
                max_rounds: engine.scroll_max_rounds,
                settle: engine.scroll_settle(),
            },
            selectors: selectors.clone(),
            color_param: engine.color_param.clone(),
            code_pattern: engine.variant_code_pattern.clone(),
            retry_attempts: engine.retry_attempts,
            retry_base_delay: engine.retry_base_delay(),
        }
    }

    /// Load the listing, scroll it out, and return one record per distinct
    /// product id, in tile order.
    pub async fn crawl(&self, page: &dyn PageSession, listing_url: &str) -> Result<Vec<ProductRecord>> {
        retry::retry(
            self.retry_attempts,
            self.retry_base_delay,
            "listing navigation",
            || page.navigate(listing_url),
        )
        .await?;

        let settled = self
            .scroll
            .settle_listing(page, &self.selectors.product_tile)
            .await?;

        let raw = page
            .eval_json(&self.harvest_script())
            .await
            .context("harvesting listing tiles")?;
        let tiles: Vec<ListingTile> =
            serde_json::from_value(raw).context("decoding harvested listing tiles")?;

        if (tiles.len() as u64) != settled {
            tracing::warn!(
                settled,
                harvested = tiles.len(),
                "tile count moved between convergence and harvest"
            );
        }

        // One stamp for the whole batch: the listing is one observation.
        let fetched_at = Utc::now();
        let base = Url::parse(listing_url)
            .with_context(|| format!("parsing listing URL {listing_url}"))?;

        let mut records: Vec<ProductRecord> = Vec::with_capacity(tiles.len());
        for tile in tiles {
            if tile.id.is_empty() || tile.href.is_empty() {
                tracing::warn!(id = tile.id, href = tile.href, "tile without id or link, skipping");
                continue;
            }
            // Promoted products appear in multiple listing sections; the
            // first tile wins.
            if records.iter().any(|r| r.id == tile.id) {
                continue;
            }

            let url = base
                .join(&tile.href)
                .with_context(|| format!("resolving product link {}", tile.href))?
                .to_string();

            let variants = self.variant_refs(&tile, &url)?;

            records.push(ProductRecord {
                id: tile.id,
                name: tile.name,
                promo_price: tile.promo_price,
                original_price: tile.original_price,
                rating: tile.rating,
                reviews: tile.reviews,
                url,
                variants,
                sizes: None,
                fetched_at,
            });
        }

        tracing::info!(products = records.len(), "listing crawl finished");
        Ok(records)
    }

    /// Color-variant addresses visible from the tile's thumbnail strip.
    fn variant_refs(&self, tile: &ListingTile, product_url: &str) -> Result<Vec<VariantRef>> {
        let pattern = variants::compile_code_pattern(&self.code_pattern, &tile.id)?;
        let codes = variants::extract_codes(&pattern, tile.thumbnails.iter().map(String::as_str));
        let mut refs = Vec::with_capacity(codes.len());
        for code in codes {
            let url = variants::with_query_param(product_url, &self.color_param, &code)?;
            refs.push(VariantRef::new(code, url));
        }
        Ok(refs)
    }

    /// The tile-harvest script, with every selector embedded as a JSON
    /// string literal.
    fn harvest_script(&self) -> String {
        let s = &self.selectors;
        format!(
            r#"(() => {{
  const tiles = Array.from(document.querySelectorAll({tile}));
  return tiles.map((tile) => {{
    const text = (sel) => {{
      const el = tile.querySelector(sel);
      return el ? el.textContent.trim() : "";
    }};
    const link = tile.querySelector({link});
    return {{
      id: tile.getAttribute({id_attr}) || "",
      name: text({name}),
      promo_price: text({promo}),
      original_price: text({original}),
      rating: text({rating}),
      reviews: text({reviews}),
      href: link ? link.getAttribute("href") || "" : "",
      thumbnails: Array.from(tile.querySelectorAll("img")).map((img) => img.src),
    }};
  }});
}})()"#,
            tile = js_string(&s.product_tile),
            link = js_string(&s.tile_link),
            id_attr = js_string(&s.tile_id_attr),
            name = js_string(&s.tile_name),
            promo = js_string(&s.tile_promo_price),
            original = js_string(&s.tile_original_price),
            rating = js_string(&s.tile_rating),
            reviews = js_string(&s.tile_reviews),
        )
    }
}

/// A string as a JS literal, quotes and escapes included.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::fake::{FakePage, FakeSession};

    const LISTING: &str = "https://shop.example/de/de/feature/sale/women";

    fn crawler() -> ListingCrawler {
        let engine = EngineConfig {
            scroll_stable_rounds: 2,
            scroll_max_rounds: 10,
            scroll_settle_ms: 0,
            retry_attempts: 1,
            retry_base_delay_ms: 0,
            ..EngineConfig::default()
        };
        ListingCrawler::new(&engine, &Selectors::default())
    }

    fn tile(id: &str, href: &str, thumbnails: Vec<&str>) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("Product {id}"),
            "promo_price": "9,90 €",
            "original_price": "19,90 €",
            "rating": "4.2",
            "reviews": "31",
            "href": href,
            "thumbnails": thumbnails,
        })
    }

    fn listing_session(tiles: serde_json::Value, counts: Vec<u64>) -> FakeSession {
        FakeSession::new(vec![(
            LISTING,
            FakePage {
                tiles,
                counts,
                ..FakePage::default()
            },
        )])
    }

    #[tokio::test]
    async fn harvests_tiles_into_records_with_variant_refs() {
        let tiles = json!([tile(
            "E455563-000",
            "/de/de/products/E455563-000",
            vec![
                "https://im.example/goods_09_455563.jpg",
                "https://im.example/goods_69_455563.jpg",
            ],
        )]);
        let session = listing_session(tiles, vec![1, 1]);

        let records = crawler().crawl(&session, LISTING).await.unwrap();

        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.id, "E455563-000");
        assert_eq!(rec.url, "https://shop.example/de/de/products/E455563-000");
        let codes: Vec<&str> = rec.variants.iter().map(|v| v.color_code.as_str()).collect();
        assert_eq!(codes, vec!["09", "69"]);
        assert_eq!(
            rec.variants[0].url,
            "https://shop.example/de/de/products/E455563-000?colorDisplayCode=09"
        );
        assert!(rec.sizes.is_none());
    }

    #[tokio::test]
    async fn duplicate_tiles_keep_the_first_occurrence() {
        let tiles = json!([
            tile("E1-000", "/p/E1", vec!["https://im.example/goods_09_1.jpg"]),
            tile("E2-000", "/p/E2", vec![]),
            tile("E1-000", "/p/E1-promoted", vec![]),
        ]);
        let session = listing_session(tiles, vec![3, 3]);

        let records = crawler().crawl(&session, LISTING).await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["E1-000", "E2-000"]);
        assert_eq!(records[0].url, "https://shop.example/p/E1");
    }

    #[tokio::test]
    async fn tiles_without_id_or_link_are_dropped() {
        let tiles = json!([
            tile("", "/p/mystery", vec![]),
            tile("E3-000", "", vec![]),
            tile("E4-000", "/p/E4", vec![]),
        ]);
        let session = listing_session(tiles, vec![3, 3]);

        let records = crawler().crawl(&session, LISTING).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "E4-000");
    }

    #[tokio::test]
    async fn foreign_thumbnails_do_not_become_variants() {
        // The tile shows a cross-sell image of another product.
        let tiles = json!([tile(
            "E77001-000",
            "/p/E77001",
            vec![
                "https://im.example/goods_09_77001.jpg",
                "https://im.example/goods_31_999111.jpg",
            ],
        )]);
        let session = listing_session(tiles, vec![1, 1]);

        let records = crawler().crawl(&session, LISTING).await.unwrap();

        let codes: Vec<&str> = records[0]
            .variants
            .iter()
            .map(|v| v.color_code.as_str())
            .collect();
        assert_eq!(codes, vec!["09"]);
    }

    #[tokio::test]
    async fn all_records_share_one_fetch_stamp() {
        let tiles = json!([
            tile("E1-000", "/p/E1", vec![]),
            tile("E2-000", "/p/E2", vec![]),
        ]);
        let session = listing_session(tiles, vec![2, 2]);

        let records = crawler().crawl(&session, LISTING).await.unwrap();

        assert_eq!(records[0].fetched_at, records[1].fetched_at);
    }

    #[tokio::test]
    async fn scrolls_until_the_tile_count_stabilizes() {
        let tiles = json!([tile("E1-000", "/p/E1", vec![])]);
        let session = listing_session(tiles, vec![10, 20, 30, 30]);

        crawler().crawl(&session, LISTING).await.unwrap();

        // Rounds 1..4 each scroll except the converging round 4.
        let scrolls = session.scrolls.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(scrolls, 3);
    }
}
