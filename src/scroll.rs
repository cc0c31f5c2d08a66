//! Convergence detection for infinite-scroll listing pages.
//!
//! A dynamically loading listing has no "done" event; the only signal is that
//! repeated probing stops revealing new items. Item counts can legitimately
//! sit at zero during a slow initial load and can plateau briefly before more
//! items stream in, so a single repeated reading is not evidence of
//! completion.

use std::time::Duration;

use anyhow::Result;

use crate::session::PageSession;

/// Scroll-probe loop that decides when a listing has finished rendering.
#[derive(Debug, Clone)]
pub struct ScrollConvergence {
    /// Consecutive identical non-zero readings required to declare the page
    /// stable.
    pub stable_rounds: u32,
    /// Absolute cap on probe iterations. Hitting it is not an error; the
    /// last observed count is returned as-is.
    pub max_rounds: u32,
    /// Settle delay after each scroll command.
    pub settle: Duration,
}

impl ScrollConvergence {
    /// Scroll the page until the number of elements matching
    /// `item_selector` stabilizes, and return the final count.
    ///
    /// Each round reads the count, compares it to the previous reading,
    /// scrolls to the current bottom, and sleeps for the settle interval.
    /// The streak counts consecutive identical non-zero readings and resets
    /// whenever the count changes.
    pub async fn settle_listing(
        &self,
        page: &dyn PageSession,
        item_selector: &str,
    ) -> Result<u64> {
        let mut last = 0u64;
        let mut streak = 0u32;

        for round in 0..self.max_rounds {
            let count = page.count_matches(item_selector).await?;
            if count > 0 && count == last {
                streak += 1;
            } else if count > 0 {
                streak = 1;
            } else {
                streak = 0;
            }
            last = count;

            tracing::debug!(round, count, streak, "listing scroll probe");

            if streak >= self.stable_rounds {
                tracing::info!(count, rounds = round + 1, "listing converged");
                return Ok(count);
            }

            page.scroll_to_bottom().await?;
            tokio::time::sleep(self.settle).await;
        }

        tracing::info!(
            count = last,
            rounds = self.max_rounds,
            "listing scroll cap reached, continuing with last observed count"
        );
        Ok(last)
    }
}
