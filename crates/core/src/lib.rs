//! The orchestrator (component G): ties the frontier resolver, object walker, CRS cache,
//! envelope builder/codec, and index store together into one resumable indexing run.

pub mod feature;

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, info_span, warn};

use feature::{FeatureDecoder, LegendAwareDecoder};
use progress::Progress;
use spatialidx_crs::CrsCache;
use spatialidx_envelope::{build_envelope, Envelope};
use spatialidx_graph::{self as graph, Frontier};
use spatialidx_objectdb::ObjectDatabase;
use spatialidx_oid::Oid;
use spatialidx_store::Store;

/// How many features are buffered from the walk before being handed to the worker pool as one
/// batch. Bounds memory use while still giving rayon enough work to keep every thread busy.
const BATCH_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("object graph walk failed: {0}")]
    Failed(#[source] anyhow::Error),
}

/// The outcome of one call to [`run`].
pub enum RunOutcome {
    /// Every requested commit was already covered by the persisted frontier.
    UpToDate,
    /// `--dry-run` was requested; nothing was written.
    DryRun {
        effective_start: Vec<Oid>,
        stop: Vec<Oid>,
    },
    /// The run completed and the frontier was advanced.
    Completed {
        features_indexed: u64,
        elapsed: std::time::Duration,
    },
}

/// Runs one indexing pass: resolves the frontier, walks new feature blobs, builds and encodes
/// their WGS84 envelopes, and atomically persists both the envelopes and the new frontier.
///
/// `requested_commitishes` empty means "every ref" (§6). Feature-scoped failures (unreadable
/// geometry, a transform that fails for one feature) are logged and the feature is skipped;
/// graph, dataset-scoped CRS exhaustion, and store failures abort the whole run, leaving the
/// previous frontier intact so the run can simply be retried (§7).
pub fn run(
    objdb: &impl ObjectDatabase,
    store: &mut Store,
    requested_commitishes: &[String],
    clear_existing: bool,
    dry_run: bool,
    progress: &mut Progress,
) -> Result<RunOutcome> {
    let _span = info_span!("index_run").entered();

    let requested = graph::resolve_requested_commits(objdb, requested_commitishes)
        .context("failed to resolve requested commits")?;
    let previously_indexed = if clear_existing {
        None
    } else {
        store.read_frontier().context("failed to read persisted frontier")?
    };

    let (effective_start, stop, new_frontier) =
        match graph::resolve(objdb, &requested, previously_indexed)? {
            Frontier::UpToDate => {
                info!("index is already up to date");
                return Ok(RunOutcome::UpToDate);
            }
            Frontier::Update { effective_start, stop, new_frontier } => {
                (effective_start, stop, new_frontier)
            }
        };

    info!(
        start = ?effective_start.iter().map(Oid::hex).collect::<Vec<_>>(),
        stop = ?stop.iter().map(Oid::hex).collect::<Vec<_>>(),
        "indexing from stop up to start"
    );

    if dry_run {
        return Ok(RunOutcome::DryRun { effective_start, stop });
    }

    if clear_existing {
        store.drop_tables().context("failed to clear existing index")?;
    }

    let started_at = Instant::now();
    let rx = graph::walk_feature_blobs(objdb, &effective_start, &stop)
        .map_err(WalkError::Failed)
        .context("failed to start object walk")?;

    let mut crs_caches: HashMap<String, CrsCache> = HashMap::new();
    let mut features_indexed: u64 = 0;

    store.with_transaction(|store| {
        let mut batch: Vec<(Oid, String, Vec<u8>)> = Vec::with_capacity(BATCH_SIZE);

        loop {
            batch.clear();
            let mut channel_closed = false;

            while batch.len() < BATCH_SIZE {
                match rx.recv() {
                    Ok(Ok(feature)) => {
                        if !crs_caches.contains_key(&feature.dataset_path) {
                            let cache = CrsCache::build(objdb, &feature.dataset_path)
                                .with_context(|| format!("failed to build CRS cache for dataset {}", feature.dataset_path))?;
                            crs_caches.insert(feature.dataset_path.clone(), cache);
                        }

                        match objdb.read_blob(feature.blob_oid) {
                            Ok(bytes) => batch.push((feature.blob_oid, feature.dataset_path, bytes)),
                            Err(e) => warn!("Skipping feature {}: failed to read blob: {e:#}", feature.blob_oid),
                        }
                    }
                    Ok(Err(e)) => return Err(WalkError::Failed(e).into()),
                    Err(_) => {
                        channel_closed = true;
                        break;
                    }
                }
            }

            if batch.is_empty() && channel_closed {
                break;
            }

            let results: Vec<Option<(Oid, Envelope)>> = batch
                .par_iter()
                .map(|(blob_oid, dataset_path, bytes)| {
                    process_feature(*blob_oid, dataset_path, bytes, &crs_caches)
                })
                .collect();

            for result in results {
                if let Some((blob_oid, envelope)) = result {
                    store.upsert_envelope(blob_oid, &envelope)?;
                    features_indexed += 1;
                    progress.inc(1);
                }
            }

            if channel_closed {
                break;
            }
        }

        store.replace_frontier(&new_frontier)?;
        Ok(())
    })?;

    store.analyze().context("failed to refresh query planner statistics")?;

    Ok(RunOutcome::Completed {
        features_indexed,
        elapsed: started_at.elapsed(),
    })
}

/// Builds and encodes the envelope for one feature. Returns `None` (logged) for any
/// feature-scoped failure: unreadable/empty geometry, a dataset with no usable CRS transforms,
/// or a geometry whose envelope couldn't be computed (§7).
///
/// Runs on a worker-pool thread; `decoder` is constructed fresh per call rather than shared,
/// since [`LegendAwareDecoder`]'s memoization only saves a linear scan over a handful of fields
/// and isn't worth synchronizing across threads.
fn process_feature(
    blob_oid: Oid,
    dataset_path: &str,
    blob: &[u8],
    crs_caches: &HashMap<String, CrsCache>,
) -> Option<(Oid, Envelope)> {
    let Some(cache) = crs_caches.get(dataset_path) else {
        return None;
    };
    if cache.is_empty() {
        warn!("Dataset {dataset_path} has no usable CRS transforms, skipping feature {blob_oid}");
        return None;
    }

    let mut decoder = LegendAwareDecoder::new();
    let minmax = match decoder.geometry_envelope(blob) {
        Ok(Some(minmax)) => minmax,
        Ok(None) => return None, // I4: no geometry, no row.
        Err(e) => {
            warn!("Skipping feature {blob_oid}: {e}");
            return None;
        }
    };

    let transforms = cache.transforms();
    match build_envelope(minmax, &transforms) {
        Some(envelope) => Some((blob_oid, envelope)),
        None => {
            warn!("Couldn't compute an envelope for feature {blob_oid}, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use spatialidx_objectdb::FeatureBlob;
    use std::collections::HashMap as StdHashMap;

    struct FakeObjectDatabase {
        parents: StdHashMap<Oid, Vec<Oid>>,
        refs: Vec<Oid>,
        blobs: StdHashMap<Oid, Vec<u8>>,
        features: Vec<(Oid, FeatureBlob)>,
    }

    impl ObjectDatabase for FakeObjectDatabase {
        fn resolve_commitish(&self, commitish: &str) -> Result<Oid> {
            Oid::from_hex(commitish)
        }

        fn all_ref_commits(&self) -> Result<Vec<Oid>> {
            Ok(self.refs.clone())
        }

        fn merge_base_independent(&self, commits: &[Oid]) -> Result<Vec<Oid>> {
            let mut result = Vec::new();
            for &candidate in commits {
                let dominated = commits.iter().any(|&other| {
                    other != candidate && self.is_ancestor(candidate, other)
                });
                if !dominated {
                    result.push(candidate);
                }
            }
            Ok(result)
        }

        fn read_blob(&self, oid: Oid) -> Result<Vec<u8>> {
            self.blobs.get(&oid).cloned().context("blob not found")
        }

        fn walk_feature_blobs(
            &self,
            start: &[Oid],
            stop: &[Oid],
        ) -> Result<crossbeam_channel::Receiver<Result<FeatureBlob>>> {
            let (tx, rx) = crossbeam_channel::unbounded();
            let stop_closure: std::collections::HashSet<Oid> =
                stop.iter().flat_map(|&s| self.ancestors_inclusive(s)).collect();
            for &start_commit in start {
                for commit in self.ancestors_inclusive(start_commit) {
                    if stop_closure.contains(&commit) {
                        continue;
                    }
                    for (owning_commit, feature) in &self.features {
                        if *owning_commit == commit {
                            let _ = tx.send(Ok(FeatureBlob {
                                dataset_path: feature.dataset_path.clone(),
                                blob_oid: feature.blob_oid,
                            }));
                        }
                    }
                }
            }
            Ok(rx)
        }

        fn crs_blob_oids_for_dataset(&self, _dataset_path: &str) -> Result<Vec<Oid>> {
            Ok(Vec::new())
        }
    }

    impl FakeObjectDatabase {
        fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> bool {
            self.ancestors_inclusive(descendant).contains(&ancestor)
        }

        fn ancestors_inclusive(&self, tip: Oid) -> std::collections::HashSet<Oid> {
            let mut seen = std::collections::HashSet::new();
            let mut stack = vec![tip];
            while let Some(c) = stack.pop() {
                if seen.insert(c) {
                    if let Some(parents) = self.parents.get(&c) {
                        stack.extend(parents.iter().copied());
                    }
                }
            }
            seen
        }
    }

    fn oid(n: u8) -> Oid {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        Oid::from_bytes(bytes)
    }

    /// S4 from the specification: a feature with no geometry produces no row and no error.
    #[test]
    fn up_to_date_is_a_no_op() {
        let c1 = oid(1);
        let objdb = FakeObjectDatabase {
            parents: StdHashMap::new(),
            refs: vec![c1],
            blobs: StdHashMap::new(),
            features: Vec::new(),
        };
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();
        store.replace_frontier(&[c1]).unwrap();

        let mut progress = Progress::new_spinner("indexing", false);
        let outcome = run(&objdb, &mut store, &[c1.hex()], false, false, &mut progress).unwrap();
        assert!(matches!(outcome, RunOutcome::UpToDate));
    }

    #[test]
    fn dry_run_does_not_touch_the_store() {
        let c1 = oid(1);
        let objdb = FakeObjectDatabase {
            parents: StdHashMap::new(),
            refs: vec![c1],
            blobs: StdHashMap::new(),
            features: Vec::new(),
        };
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), -262_144).unwrap();

        let mut progress = Progress::new_spinner("indexing", false);
        let outcome = run(&objdb, &mut store, &[c1.hex()], false, true, &mut progress).unwrap();
        assert!(matches!(outcome, RunOutcome::DryRun { .. }));
        assert_eq!(store.read_frontier().unwrap(), None);
    }
}
