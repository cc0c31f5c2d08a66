//! Configuration for the crawler.
//!
//! Every tunable the engine depends on is an explicit field here, with no
//! ambient globals. Components receive the values they need through their
//! constructors, which keeps the engine portable across locales and sites
//! with the same page shape.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default config file looked up next to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sizewatch.toml";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Listing page to crawl (a sale/category page with infinite scroll).
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Run the browser headless.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Explicit Chrome/Chromium executable; auto-discovered when unset.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    /// Checkpoint file for the listing stage (variant URLs column).
    #[serde(default = "default_listing_csv")]
    pub listing_csv: PathBuf,

    /// Checkpoint file for the size stage (availability column).
    #[serde(default = "default_sizes_csv")]
    pub sizes_csv: PathBuf,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub selectors: Selectors,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str("").expect("empty settings deserialize from defaults")
    }
}

impl Settings {
    /// Load settings from an explicit path, or from `sizewatch.toml` if it
    /// exists, or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Tunables of the crawl engine proper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrently open browser sessions per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Flush the checkpoint after every this many completed products.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Per-navigation and per-DOM-wait timeout, seconds.
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,

    /// Identical non-zero item counts required for scroll convergence.
    #[serde(default = "default_scroll_stable_rounds")]
    pub scroll_stable_rounds: u32,

    /// Absolute cap on scroll probe iterations.
    #[serde(default = "default_scroll_max_rounds")]
    pub scroll_max_rounds: u32,

    /// Settle delay between scroll probes, milliseconds.
    #[serde(default = "default_scroll_settle_ms")]
    pub scroll_settle_ms: u64,

    /// Consecutive already-seen colors that abandon a product's remaining
    /// variant addresses.
    #[serde(default = "default_duplicate_streak_limit")]
    pub duplicate_streak_limit: u32,

    /// Attempt budget for retried navigations.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base back-off delay between retries, milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Localized label prefixing the color indicator text, e.g. `FARBE:`.
    #[serde(default = "default_color_label")]
    pub color_label: String,

    /// Query parameter that selects a color on the product page.
    #[serde(default = "default_color_param")]
    pub color_param: String,

    /// Filename pattern locating color codes in image/link URLs; `{id}` is
    /// replaced with the product's numeric id before compiling.
    #[serde(default = "default_variant_code_pattern")]
    pub variant_code_pattern: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty engine config deserialize from defaults")
    }
}

impl EngineConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.nav_timeout_secs)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// CSS selectors for the target site's listing and product pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selectors {
    /// One product tile on the listing page.
    #[serde(default = "default_product_tile")]
    pub product_tile: String,

    /// Attribute on the tile carrying the product id.
    #[serde(default = "default_tile_id_attr")]
    pub tile_id_attr: String,

    /// Within a tile: display name.
    #[serde(default = "default_tile_name")]
    pub tile_name: String,

    /// Within a tile: promotional price.
    #[serde(default = "default_tile_promo_price")]
    pub tile_promo_price: String,

    /// Within a tile: original price.
    #[serde(default = "default_tile_original_price")]
    pub tile_original_price: String,

    /// Within a tile: star rating.
    #[serde(default = "default_tile_rating")]
    pub tile_rating: String,

    /// Within a tile: review count.
    #[serde(default = "default_tile_reviews")]
    pub tile_reviews: String,

    /// Within a tile: link to the product page.
    #[serde(default = "default_tile_link")]
    pub tile_link: String,

    /// Product page: element whose text names the selected color.
    #[serde(default = "default_color_indicator")]
    pub color_indicator: String,

    /// Product page: the size-selector widget.
    #[serde(default = "default_size_widget")]
    pub size_widget: String,

    /// Product page: in-stock size buttons (struck-through ones excluded by
    /// the selector itself).
    #[serde(default = "default_size_buttons")]
    pub size_buttons: String,
}

impl Default for Selectors {
    fn default() -> Self {
        toml::from_str("").expect("empty selectors deserialize from defaults")
    }
}

fn default_listing_url() -> String {
    "https://www.uniqlo.com/de/de/feature/sale/women".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_listing_csv() -> PathBuf {
    PathBuf::from("product-ids/products.csv")
}

fn default_sizes_csv() -> PathBuf {
    PathBuf::from("product-ids/products-with-sizes.csv")
}

fn default_concurrency() -> usize {
    4
}

fn default_checkpoint_every() -> usize {
    10
}

fn default_nav_timeout_secs() -> u64 {
    30
}

fn default_scroll_stable_rounds() -> u32 {
    3
}

fn default_scroll_max_rounds() -> u32 {
    30
}

fn default_scroll_settle_ms() -> u64 {
    1500
}

fn default_duplicate_streak_limit() -> u32 {
    2
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_color_label() -> String {
    "FARBE:".to_string()
}

fn default_color_param() -> String {
    "colorDisplayCode".to_string()
}

fn default_variant_code_pattern() -> String {
    r"goods_(\d{2})_{id}".to_string()
}

fn default_product_tile() -> String {
    ".fr-ec-product-tile".to_string()
}

fn default_tile_id_attr() -> String {
    "data-test-product-id".to_string()
}

fn default_tile_name() -> String {
    ".fr-ec-title".to_string()
}

fn default_tile_promo_price() -> String {
    ".fr-ec-price-text--color-promotional".to_string()
}

fn default_tile_original_price() -> String {
    ".fr-ec-price-text--color-original".to_string()
}

fn default_tile_rating() -> String {
    ".fr-ec-rating-average".to_string()
}

fn default_tile_reviews() -> String {
    ".fr-ec-rating-count".to_string()
}

fn default_tile_link() -> String {
    "a.fr-ec-tile".to_string()
}

fn default_color_indicator() -> String {
    ".fr-ec-chip-label".to_string()
}

fn default_size_widget() -> String {
    ".fr-ec-size-picker".to_string()
}

fn default_size_buttons() -> String {
    ".fr-ec-size-picker .fr-ec-chip:not(.fr-ec-chip--stroke) .fr-ec-chip-label".to_string()
}
