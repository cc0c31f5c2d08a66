//! Durable CSV checkpoints for the crawl working set.
//!
//! A checkpoint is a complete, independently loadable snapshot: every flush
//! writes the whole record set to a sibling temp file and renames it into
//! place, so an interrupted write can never corrupt the previous good
//! snapshot. Re-running against an existing file treats it as the
//! authoritative working set, not something to merge-append into.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use url::Url;

use crate::model::{ProductRecord, VariantRef};

/// Timestamp format of the `Fetched At` column.
const FETCHED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const COMMON_HEAD: [&str; 7] = [
    "Product ID",
    "Product Name",
    "Price (Promo)",
    "Price (Original)",
    "Rating",
    "Reviews",
    "Product URL",
];

/// Which pipeline stage a checkpoint file belongs to.
///
/// Both stages share the same row shape except for the eighth column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Listing output: the eighth column holds pipe-joined variant URLs.
    Listing,
    /// Variant-walk output: the eighth column holds the availability string.
    Sizes,
}

impl Stage {
    fn column(self) -> &'static str {
        match self {
            Stage::Listing => "Color Variant URLs",
            Stage::Sizes => "Available Sizes",
        }
    }
}

/// Where the pool sends its flushes. Split out as a trait so tests can count
/// flush operations without touching the filesystem.
pub trait CheckpointSink: Send + Sync {
    fn flush(&self, records: &[ProductRecord]) -> Result<()>;
}

/// CSV-file-backed checkpoint store for one stage.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    stage: Stage,
    color_param: String,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>, stage: Stage, color_param: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stage,
            color_param: color_param.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the full record set as a new snapshot, atomically replacing any
    /// previous one.
    pub fn write(&self, records: &[ProductRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating checkpoint dir {}", parent.display()))?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint.csv".to_string());
        let tmp = self.path.with_file_name(format!("{file_name}.tmp"));

        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("opening checkpoint temp file {}", tmp.display()))?;

        let mut header: Vec<&str> = COMMON_HEAD.to_vec();
        header.push(self.stage.column());
        header.push("Fetched At");
        writer.write_record(&header)?;

        for record in records {
            let stage_cell = match self.stage {
                Stage::Listing => record
                    .variants
                    .iter()
                    .map(|v| v.url.as_str())
                    .collect::<Vec<_>>()
                    .join("|"),
                Stage::Sizes => record.sizes.clone().unwrap_or_default(),
            };
            writer.write_record([
                record.id.as_str(),
                record.name.as_str(),
                record.promo_price.as_str(),
                record.original_price.as_str(),
                record.rating.as_str(),
                record.reviews.as_str(),
                record.url.as_str(),
                stage_cell.as_str(),
                &record.fetched_at.format(FETCHED_AT_FORMAT).to_string(),
            ])?;
        }

        writer
            .flush()
            .with_context(|| format!("flushing checkpoint {}", tmp.display()))?;
        drop(writer);

        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "replacing checkpoint {} with {}",
                self.path.display(),
                tmp.display()
            )
        })?;
        tracing::info!(
            path = %self.path.display(),
            products = records.len(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Load the snapshot back as the authoritative working set.
    pub fn load(&self) -> Result<Vec<ProductRecord>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("opening checkpoint {}", self.path.display()))?;

        let headers = reader.headers()?.clone();
        let stage_col = self.stage.column();
        if !headers.iter().any(|h| h == stage_col) {
            bail!(
                "checkpoint {} has no {:?} column, wrong stage or shape",
                self.path.display(),
                stage_col
            );
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.with_context(|| format!("reading checkpoint {}", self.path.display()))?;
            let cell = |i: usize| row.get(i).unwrap_or("").to_string();

            let stage_cell = cell(7);
            let (variants, sizes) = match self.stage {
                Stage::Listing => (self.parse_variant_urls(&stage_cell), None),
                Stage::Sizes => {
                    let sizes = if stage_cell.is_empty() {
                        None
                    } else {
                        Some(stage_cell)
                    };
                    (Vec::new(), sizes)
                }
            };

            let fetched_raw = cell(8);
            let fetched_at = NaiveDateTime::parse_from_str(&fetched_raw, FETCHED_AT_FORMAT)
                .with_context(|| {
                    format!(
                        "bad Fetched At value {:?} in {}",
                        fetched_raw,
                        self.path.display()
                    )
                })?
                .and_utc();

            records.push(ProductRecord {
                id: cell(0),
                name: cell(1),
                promo_price: cell(2),
                original_price: cell(3),
                rating: cell(4),
                reviews: cell(5),
                url: cell(6),
                variants,
                sizes,
                fetched_at,
            });
        }
        Ok(records)
    }

    fn parse_variant_urls(&self, cell: &str) -> Vec<VariantRef> {
        cell.split('|')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .filter_map(|u| match code_from_url(u, &self.color_param) {
                Some(code) => Some(VariantRef::new(code, u)),
                None => {
                    tracing::warn!(url = u, "variant URL without a color code, skipping");
                    None
                }
            })
            .collect()
    }
}

impl CheckpointSink for CheckpointStore {
    fn flush(&self, records: &[ProductRecord]) -> Result<()> {
        self.write(records)
    }
}

/// Color code carried in a variant URL's query parameter.
fn code_from_url(url: &str, color_param: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == color_param)
        .map(|(_, v)| v.into_owned())
}

/// Carry already-resolved availability over from a previous snapshot so a
/// resumed run only revisits unfinished products.
pub fn overlay_availability(records: &mut [ProductRecord], previous: &[ProductRecord]) {
    for record in records.iter_mut() {
        if record.sizes.is_some() {
            continue;
        }
        if let Some(prev) = previous.iter().find(|p| p.id == record.id) {
            if let Some(sizes) = &prev.sizes {
                record.sizes = Some(sizes.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(id: &str, variants: Vec<VariantRef>, sizes: Option<&str>) -> ProductRecord {
        ProductRecord {
            id: id.to_string(),
            name: format!("Product {id}"),
            promo_price: "19,90 €".to_string(),
            original_price: "39,90 €".to_string(),
            rating: "4.5".to_string(),
            reviews: "123".to_string(),
            url: format!("https://shop.example/p/{id}"),
            variants,
            sizes: sizes.map(str::to_string),
            fetched_at: Utc.with_ymd_and_hms(2026, 8, 20, 7, 30, 0).unwrap(),
        }
    }

    #[test]
    fn listing_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(
            dir.path().join("products.csv"),
            Stage::Listing,
            "colorDisplayCode",
        );

        let records = vec![record(
            "E1",
            vec![
                VariantRef::new("09", "https://shop.example/p/E1?colorDisplayCode=09"),
                VariantRef::new("69", "https://shop.example/p/E1?colorDisplayCode=69"),
            ],
            None,
        )];
        store.write(&records).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn sizes_snapshot_round_trips_including_unfinished_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(
            dir.path().join("sizes.csv"),
            Stage::Sizes,
            "colorDisplayCode",
        );

        let records = vec![
            record("E1", vec![], Some("09-BLACK: S, M")),
            record("E2", vec![], Some("Unavailable")),
            record("E3", vec![], None),
        ];
        store.write(&records).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded[0].sizes.as_deref(), Some("09-BLACK: S, M"));
        assert_eq!(loaded[1].sizes.as_deref(), Some("Unavailable"));
        assert_eq!(loaded[2].sizes, None, "empty cell means still pending");
    }

    #[test]
    fn rewrite_replaces_the_snapshot_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.csv");
        let store = CheckpointStore::new(&path, Stage::Listing, "colorDisplayCode");

        store.write(&[record("E1", vec![], None)]).unwrap();
        store
            .write(&[record("E1", vec![], None), record("E2", vec![], None)])
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("products.csv")]);
    }

    #[test]
    fn loading_the_wrong_stage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.csv");
        let listing = CheckpointStore::new(&path, Stage::Listing, "colorDisplayCode");
        listing.write(&[record("E1", vec![], None)]).unwrap();

        let sizes = CheckpointStore::new(&path, Stage::Sizes, "colorDisplayCode");
        assert!(sizes.load().is_err());
    }

    #[test]
    fn overlay_resumes_only_unfinished_products() {
        let mut working = vec![record("E1", vec![], None), record("E2", vec![], None)];
        let previous = vec![
            record("E1", vec![], Some("09-BLACK: S")),
            record("E3", vec![], Some("Unavailable")),
        ];
        overlay_availability(&mut working, &previous);
        assert_eq!(working[0].sizes.as_deref(), Some("09-BLACK: S"));
        assert_eq!(working[1].sizes, None);
    }
}
