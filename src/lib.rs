//! sizewatch - catalog crawler for product prices and per-color size availability.
//!
//! Crawls dynamically rendered e-commerce listing pages, walks every color
//! variant of every product, and maintains a checkpointed CSV of what is in
//! stock in which size.

pub mod browser;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod listing;
pub mod model;
pub mod pool;
pub mod retry;
pub mod scroll;
pub mod session;
pub mod variants;
pub mod worker;
