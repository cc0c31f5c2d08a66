//! Color-variant discovery on a rendered product page.
//!
//! The listing scrape and the product-page DOM each miss variants the other
//! finds: listing thumbnails go stale, and cross-sold products pollute the
//! product page with foreign color codes. Neither source is authoritative,
//! so both are unioned, anchored by the product's own id.

use anyhow::{Context, Result};
use regex::Regex;
use url::Url;

use crate::config::EngineConfig;
use crate::model::VariantRef;
use crate::session::PageSession;

/// Discovers the full set of color-variant addresses for one product.
#[derive(Debug, Clone)]
pub struct VariantDiscoverer {
    pattern_template: String,
    color_param: String,
}

impl VariantDiscoverer {
    pub fn new(engine: &EngineConfig) -> Self {
        Self {
            pattern_template: engine.variant_code_pattern.clone(),
            color_param: engine.color_param.clone(),
        }
    }

    /// Scan the loaded product page for color codes belonging to
    /// `product_id`, synthesize an address for each, and union the result
    /// with the variants already known from the listing.
    ///
    /// The merged set is deduplicated by color code, listing-known refs
    /// first, discovery order after that.
    pub async fn discover(
        &self,
        page: &dyn PageSession,
        product_id: &str,
        known: &[VariantRef],
    ) -> Result<Vec<VariantRef>> {
        let pattern = self.code_pattern(product_id)?;

        let mut candidates = page.attr_values("img", "src").await?;
        candidates.extend(page.attr_values("a[href]", "href").await?);

        let codes = extract_codes(&pattern, candidates.iter().map(String::as_str));
        let base = page.current_url().await?;

        let mut discovered = Vec::with_capacity(codes.len());
        for code in codes {
            let url = with_query_param(&base, &self.color_param, &code)?;
            discovered.push(VariantRef::new(code, url));
        }

        tracing::debug!(
            product = product_id,
            known = known.len(),
            discovered = discovered.len(),
            "merging variant sources"
        );
        Ok(merge_refs(known, discovered))
    }

    fn code_pattern(&self, product_id: &str) -> Result<Regex> {
        compile_code_pattern(&self.pattern_template, product_id)
    }
}

/// Compile the code pattern for one product, substituting the numeric anchor
/// for `{id}`.
pub(crate) fn compile_code_pattern(template: &str, product_id: &str) -> Result<Regex> {
    let anchor = numeric_anchor(product_id);
    let pattern = template.replace("{id}", &regex::escape(&anchor));
    Regex::new(&pattern).with_context(|| format!("compiling variant code pattern {pattern:?}"))
}

/// Longest digit run in a product id.
///
/// Tile ids come in shapes like `E455563-000`; image filenames embed only
/// the bare numeric part.
pub fn numeric_anchor(id: &str) -> String {
    id.split(|c: char| !c.is_ascii_digit())
        .max_by_key(|run| run.len())
        .unwrap_or("")
        .to_string()
}

/// First capture group of every pattern match, first-seen order, deduped.
pub(crate) fn extract_codes<'a>(pattern: &Regex, urls: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for url in urls {
        for caps in pattern.captures_iter(url) {
            if let Some(code) = caps.get(1) {
                if !codes.iter().any(|c| c == code.as_str()) {
                    codes.push(code.as_str().to_string());
                }
            }
        }
    }
    codes
}

/// Union of known and discovered refs, deduplicated by normalized key.
pub fn merge_refs(known: &[VariantRef], discovered: Vec<VariantRef>) -> Vec<VariantRef> {
    let mut merged: Vec<VariantRef> = known.to_vec();
    for vref in discovered {
        if !merged.iter().any(|m| m.key() == vref.key()) {
            merged.push(vref);
        }
    }
    merged
}

/// Rewrite `base` so the given query parameter carries `value`.
pub(crate) fn with_query_param(base: &str, name: &str, value: &str) -> Result<String> {
    let mut url = Url::parse(base).with_context(|| format!("parsing page URL {base}"))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(name, value);
    }
    Ok(url.into())
}
