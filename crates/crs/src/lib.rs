//! CRS Cache (component C): resolves every CRS a dataset has ever been stored under and builds
//! a WGS84 transform for each one.
//!
//! A dataset's CRS can change across its history. Indexing a feature only under its *current*
//! CRS would misplace it if it was actually captured under a CRS used earlier in history, so
//! this cache builds one transform per historically-distinct CRS and the envelope builder unions
//! the results (see `spatialidx_envelope::build_envelope`).

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{Context, Result};
use proj::Proj;
use thiserror::Error;
use tracing::warn;

use spatialidx_envelope::CoordTransform;
use spatialidx_objectdb::ObjectDatabase;
use spatialidx_oid::Oid;

#[derive(Debug, Error)]
pub enum CrsError {
    #[error("failed to enumerate CRS blobs for dataset {dataset_path:?}: {source}")]
    Enumerate {
        dataset_path: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A WGS84 transform built from one historically-observed CRS definition, paired with the blob
/// it was built from for diagnostics.
///
/// The underlying `Proj` handle is not safe for concurrent calls from multiple threads, so it's
/// kept behind a mutex; this lets the per-feature worker pool (§10.5) hold a `CachedTransform`
/// by shared reference without needing one `Proj` instance per worker.
pub struct CachedTransform {
    pub source_crs_blob: Oid,
    proj: Mutex<Proj>,
}

impl CoordTransform for CachedTransform {
    fn transform_point(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let proj = self.proj.lock().expect("proj transform mutex poisoned");
        proj.convert((x, y)).context("coordinate transform failed")
    }

    fn transform_points(&self, coords: &mut [(f64, f64)]) -> Result<()> {
        let proj = self.proj.lock().expect("proj transform mutex poisoned");
        for point in coords.iter_mut() {
            *point = proj.convert(*point).context("coordinate transform failed")?;
        }
        Ok(())
    }
}

/// Every distinct WGS84 transform a dataset has ever needed, memoized for the lifetime of one
/// indexing run. Holds no state beyond that run; nothing here is persisted.
pub struct CrsCache {
    transforms: Vec<CachedTransform>,
}

impl CrsCache {
    /// Builds the cache for one dataset by reading every CRS WKT blob ever committed under it
    /// and deduplicating by exact text and by a best-effort authority-code equivalence.
    pub fn build(objdb: &impl ObjectDatabase, dataset_path: &str) -> Result<Self, CrsError> {
        let blob_oids = objdb
            .crs_blob_oids_for_dataset(dataset_path)
            .map_err(|source| CrsError::Enumerate {
                dataset_path: dataset_path.to_string(),
                source,
            })?;

        let mut seen_wkt: HashSet<String> = HashSet::new();
        let mut seen_authority: HashSet<String> = HashSet::new();
        let mut transforms = Vec::new();

        for oid in blob_oids {
            let wkt = match objdb.read_blob(oid).and_then(|bytes| {
                String::from_utf8(bytes).context("CRS blob is not valid UTF-8")
            }) {
                Ok(wkt) => wkt,
                Err(e) => {
                    warn!("Skipping unreadable CRS blob {oid}: {e:#}");
                    continue;
                }
            };
            let normalized = normalize_wkt(&wkt);

            if !seen_wkt.insert(normalized.clone()) {
                continue;
            }
            if let Some(authority) = authority_code(&normalized) {
                if !seen_authority.insert(authority) {
                    continue;
                }
            }

            match build_transform(&normalized) {
                Ok(proj) => transforms.push(CachedTransform {
                    source_crs_blob: oid,
                    proj: Mutex::new(proj),
                }),
                Err(e) => warn!("Skipping unusable CRS blob {oid}: {e:#}"),
            }
        }

        if transforms.is_empty() {
            // No CRS ever recorded for this dataset: fall back to an identity transform so
            // features are still indexed under the assumption the coordinates are already WGS84.
            match build_transform("EPSG:4326") {
                Ok(proj) => transforms.push(CachedTransform {
                    source_crs_blob: Oid::from_bytes([0u8; 20]),
                    proj: Mutex::new(proj),
                }),
                Err(e) => warn!("Failed to build fallback identity transform: {e:#}"),
            }
        }

        Ok(CrsCache { transforms })
    }

    pub fn transforms(&self) -> Vec<&dyn CoordTransform> {
        self.transforms
            .iter()
            .map(|t| t as &dyn CoordTransform)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

fn build_transform(source_wkt_or_crs: &str) -> Result<Proj> {
    Proj::new_known_crs(source_wkt_or_crs, "EPSG:4326", None)
        .with_context(|| format!("failed to build transform from {source_wkt_or_crs:?} to EPSG:4326"))
}

fn normalize_wkt(wkt: &str) -> String {
    wkt.trim().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Best-effort extraction of an EPSG-style authority code from a WKT string (e.g.
/// `AUTHORITY["EPSG","4326"]` or the WKT2 `ID["EPSG",4326]` form), used as a cheap equivalence
/// check for CRSes that are textually different but refer to the same authority entry.
fn authority_code(wkt: &str) -> Option<String> {
    let upper = wkt.to_ascii_uppercase();
    let anchor = upper.rfind("AUTHORITY").or_else(|| upper.rfind("ID["))?;
    let rest = &wkt[anchor..];
    let open = rest.find('[')?;
    let close = rest[open..].find(']')? + open;
    let inner = &rest[open + 1..close];
    let parts: Vec<&str> = inner.split(',').map(|s| s.trim().trim_matches('"')).collect();
    if parts.len() >= 2 {
        Some(format!("{}:{}", parts[0].to_ascii_uppercase(), parts[1]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn authority_code_extracts_epsg_from_authority_clause() {
        let wkt = r#"GEOGCS["WGS 84", ..., AUTHORITY["EPSG","4326"]]"#;
        assert_eq!(authority_code(wkt), Some("EPSG:4326".to_string()));
    }

    #[test]
    fn authority_code_extracts_epsg_from_wkt2_id_clause() {
        let wkt = r#"GEOGCRS["WGS 84", ..., ID["EPSG",4326]]"#;
        assert_eq!(authority_code(wkt), Some("EPSG:4326".to_string()));
    }

    #[test]
    fn authority_code_absent_returns_none() {
        assert_eq!(authority_code("totally made up string"), None);
    }

    #[test]
    fn normalize_wkt_collapses_whitespace() {
        assert_eq!(normalize_wkt("  GEOGCS[ \"WGS 84\" ]\n"), "GEOGCS[ \"WGS 84\" ]");
    }
}
