//! Narrow capability interface over a live browser page.
//!
//! The crawl engine never talks to the browser directly; it sees a page only
//! through [`PageSession`], so the whole engine runs unchanged against a
//! scripted fake in tests. How DOM code executes inside the browser is an
//! implementation detail of the [`crate::browser`] module.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Outcome of a bounded DOM probe.
///
/// A missing element or an expired wait is an expected page state, not an
/// error, so it travels through return types instead of `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The probe matched within the deadline.
    Found(T),
    /// The page answered but the target was not there.
    Missing,
    /// The deadline expired before the target appeared.
    TimedOut,
}

impl<T> Probe<T> {
    /// Convert to `Option`, collapsing both negative outcomes.
    pub fn found(self) -> Option<T> {
        match self {
            Probe::Found(value) => Some(value),
            Probe::Missing | Probe::TimedOut => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }
}

/// One exclusive browser page/tab.
///
/// A session has a single owner at a time; variant visits within one product
/// are strictly sequential because they share this one tab's DOM state.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigate the page and wait for the load to settle.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// URL the page currently shows.
    async fn current_url(&self) -> Result<String>;

    /// Number of elements matching the selector.
    async fn count_matches(&self, selector: &str) -> Result<u64>;

    /// Text content of the first matching element, if any.
    async fn read_text(&self, selector: &str) -> Result<Option<String>>;

    /// Trimmed text content of every matching element, in DOM order.
    async fn texts(&self, selector: &str) -> Result<Vec<String>>;

    /// The given attribute of every matching element, skipping elements
    /// without it, in DOM order.
    async fn attr_values(&self, selector: &str, attr: &str) -> Result<Vec<String>>;

    /// Evaluate a script in the page and return its JSON result.
    async fn eval_json(&self, script: &str) -> Result<serde_json::Value>;

    /// Scroll to the current bottom of the document.
    async fn scroll_to_bottom(&self) -> Result<()>;

    /// Wait until at least one element matches the selector.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Probe<()>;

    /// Wait until the first matching element's text contains `needle`,
    /// returning the full text.
    async fn wait_for_text(&self, selector: &str, needle: &str, timeout: Duration)
        -> Probe<String>;

    /// Close the underlying page.
    async fn close(&self) -> Result<()>;
}

/// Shared handle that can open new page sessions.
///
/// The driver itself is read-only from the workers' point of view; every
/// worker opens its own exclusive session.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn PageSession>>;
}
