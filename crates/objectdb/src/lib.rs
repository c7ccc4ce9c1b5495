//! A narrow capability surface over the content-addressed object database that backs the
//! repository: commits, trees, and blobs reachable through a Git-compatible object graph.
//!
//! The spatial index engine itself never needs the full richness of the underlying
//! repository implementation; it only needs the handful of operations enumerated in
//! [`ObjectDatabase`]. Keeping the surface narrow (rather than exposing the whole
//! repository type) means the engine can be tested against an in-memory double without
//! standing up a real repository, and it keeps the core free of dynamic-dispatch driver
//! hierarchies for "the object store."

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use spatialidx_oid::Oid;
use tracing::debug;

mod gix_impl;
pub use gix_impl::GixObjectDatabase;

/// The path grammar used to discover datasets: `<dataset_path>/.{sno,table}-dataset/<rel>`.
fn dataset_relative_pattern(rel: &str) -> Regex {
    Regex::new(&format!(r"^(.+)/\.(?:sno|table)-dataset/{rel}$")).expect("pattern should compile")
}

/// Matches feature blob paths, capturing the owning dataset path.
pub fn feature_path_pattern() -> Regex {
    dataset_relative_pattern(r"feature/.+")
}

/// Matches CRS definition blob paths, capturing the owning dataset path.
pub fn crs_path_pattern() -> Regex {
    dataset_relative_pattern(r"meta/crs/[^/]+")
}

/// One entry streamed by [`ObjectDatabase::walk_feature_blobs`].
#[derive(Debug)]
pub struct FeatureBlob {
    pub dataset_path: String,
    pub blob_oid: Oid,
}

/// The capability surface the spatial index engine needs from the object database.
///
/// This corresponds to §6 of the engine's specification: `rev-list --objects`,
/// `merge-base --independent`, `show-ref --hash --head`, and blob fetch by id.
pub trait ObjectDatabase {
    /// Resolve a commit-ish string (branch, tag, short/full hash, `HEAD`, ...) to a commit id.
    fn resolve_commitish(&self, commitish: &str) -> Result<Oid>;

    /// All commit ids currently pointed to by some ref, including `HEAD`.
    /// Equivalent to `git show-ref --hash --head`, filtered to objects of type commit.
    fn all_ref_commits(&self) -> Result<Vec<Oid>>;

    /// Returns the minimal antichain of `commits`: the subset of `commits` that are not
    /// an ancestor of any other member of `commits`. Equivalent to `git merge-base --independent`.
    fn merge_base_independent(&self, commits: &[Oid]) -> Result<Vec<Oid>>;

    /// Fetches the raw bytes of a blob by its object id.
    fn read_blob(&self, oid: Oid) -> Result<Vec<u8>>;

    /// Streams `(dataset_path, blob_oid)` pairs for every feature blob reachable from `start`
    /// but not reachable from `stop`. The receiver end may be drained lazily; the producer
    /// runs on a dedicated thread so callers can overlap I/O with per-feature processing.
    fn walk_feature_blobs(
        &self,
        start: &[Oid],
        stop: &[Oid],
    ) -> Result<crossbeam_channel::Receiver<Result<FeatureBlob>>>;

    /// Every CRS definition blob id ever present under `{dataset_path}/.{sno,table}-dataset/meta/crs/`,
    /// across all refs (not just the current frontier) — a dataset's CRS history matters even for
    /// revisions outside the commits currently being indexed, because features committed against an
    /// older CRS must still be projected under that CRS (§4.C).
    fn crs_blob_oids_for_dataset(&self, dataset_path: &str) -> Result<Vec<Oid>>;
}

/// Open the object database backing the repository at `path`.
pub fn open(path: &Path) -> Result<GixObjectDatabase> {
    GixObjectDatabase::open(path).with_context(|| format!("Failed to open repository at {}", path.display()))
}

pub(crate) fn log_path_mismatch(path: &str) {
    debug!("Path does not match dataset grammar, skipping: {path}");
}
