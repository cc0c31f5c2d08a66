//! Extraction of the selected color and its in-stock sizes from a variant
//! page.
//!
//! Product pages are server-rendered and then re-hydrated; right after a
//! navigation the DOM can still show the previous variant's content. The
//! extractor therefore waits for the color indicator to carry the code of
//! the address just navigated to before trusting anything it reads.

use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::{EngineConfig, Selectors};
use crate::model::VariantResult;
use crate::session::{PageSession, Probe};

/// Reads `{color, sizes}` off a loaded variant page.
#[derive(Debug, Clone)]
pub struct VariantExtractor {
    indicator_selector: String,
    size_widget_selector: String,
    size_button_selector: String,
    indicator_pattern: Regex,
    wait_timeout: Duration,
}

impl VariantExtractor {
    pub fn new(engine: &EngineConfig, selectors: &Selectors) -> Result<Self> {
        Ok(Self {
            indicator_selector: selectors.color_indicator.clone(),
            size_widget_selector: selectors.size_widget.clone(),
            size_button_selector: selectors.size_buttons.clone(),
            indicator_pattern: indicator_pattern(&engine.color_label)?,
            wait_timeout: engine.nav_timeout(),
        })
    }

    /// Extract the resolved color key and in-stock sizes.
    ///
    /// Both fields degrade independently: an unparsable or absent indicator
    /// yields an unknown color, a missing size widget yields an empty size
    /// set. Neither is an error.
    ///
    /// When the indicator settles on a different code than the navigated-to
    /// address (stale discovery codes get redirected to a canonical color),
    /// that parsed color is returned as-is; the caller's seen-color dedup
    /// turns such reads into duplicates instead of misattributions.
    pub async fn extract(&self, page: &dyn PageSession, expected_code: &str) -> VariantResult {
        let color = match page
            .wait_for_text(&self.indicator_selector, expected_code, self.wait_timeout)
            .await
        {
            Probe::Found(text) => match self.parse_indicator(&text) {
                Some(color) => Some(color),
                None => {
                    tracing::debug!(
                        text,
                        expected_code,
                        "color indicator text did not match the label pattern"
                    );
                    None
                }
            },
            Probe::Missing => {
                tracing::debug!(expected_code, "color indicator absent");
                None
            }
            Probe::TimedOut => {
                // The page had its chance to hydrate to the expected code;
                // whatever the indicator shows now is its settled state.
                match page.read_text(&self.indicator_selector).await {
                    Ok(Some(text)) => match self.parse_indicator(&text) {
                        Some(color) => {
                            tracing::debug!(
                                expected_code,
                                color,
                                "indicator settled on a different code"
                            );
                            Some(color)
                        }
                        None => None,
                    },
                    Ok(None) => {
                        tracing::debug!(expected_code, "color indicator never appeared");
                        None
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "reading color indicator failed");
                        None
                    }
                }
            }
        };

        let sizes = match page
            .wait_for(&self.size_widget_selector, self.wait_timeout)
            .await
        {
            Probe::Found(()) => match page.texts(&self.size_button_selector).await {
                Ok(texts) => texts.into_iter().filter(|t| !t.is_empty()).collect(),
                Err(err) => {
                    tracing::warn!(error = %err, "reading size buttons failed");
                    Vec::new()
                }
            },
            Probe::Missing | Probe::TimedOut => {
                tracing::debug!("size widget absent, product has no size dimension here");
                Vec::new()
            }
        };

        VariantResult { color, sizes }
    }

    /// Parse `<label> <code> <name>` into the composite `<code>-<NAME>` key.
    fn parse_indicator(&self, text: &str) -> Option<String> {
        let caps = self.indicator_pattern.captures(text.trim())?;
        let code = caps.get(1)?.as_str();
        let name = caps.get(2)?.as_str().to_uppercase();
        Some(format!("{code}-{name}"))
    }
}

/// Pattern for the localized indicator text, e.g. `FARBE: 09 Schwarz`.
fn indicator_pattern(color_label: &str) -> Result<Regex> {
    let pattern = format!(r"^{}\s*(\d+)\s+(\S.*?)\s*$", regex::escape(color_label));
    Regex::new(&pattern).with_context(|| format!("compiling color indicator pattern {pattern:?}"))
}
