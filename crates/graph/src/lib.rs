//! Frontier resolution (component A) and the feature blob walk (component B).
//!
//! Both components operate purely in terms of the narrow [`ObjectDatabase`] capability;
//! neither one knows anything about SQL, CRS transforms, or geometry.

use anyhow::Result;
use spatialidx_objectdb::{FeatureBlob, ObjectDatabase};
use spatialidx_oid::Oid;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("failed to resolve commit-ish {commitish:?}: {source}")]
    UnresolvedCommitish {
        commitish: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to compute minimal antichain: {0}")]
    Antichain(#[source] anyhow::Error),
}

/// The outcome of resolving a frontier for a requested set of commits.
pub enum Frontier {
    /// Every ancestor of the requested commits is already indexed; nothing to do.
    UpToDate,
    /// There is new history to index.
    Update {
        /// Commits to walk from (ancestors already covered by `stop` are excluded).
        effective_start: Vec<Oid>,
        /// Commits already indexed; the walk stops at their ancestors.
        stop: Vec<Oid>,
        /// The frontier to persist once the run completes successfully.
        new_frontier: Vec<Oid>,
    },
}

/// Resolves which commits need indexing, given the commits the caller asked to index and
/// the frontier already recorded by a previous run (if any and if not discarded).
///
/// See §4.A: this computes `independent = MinimalAntichain(start ∪ stop)`,
/// `effective_start = independent \ stop`, and treats an empty `effective_start` as a no-op.
pub fn resolve(
    objdb: &impl ObjectDatabase,
    requested: &[Oid],
    previously_indexed: Option<Vec<Oid>>,
) -> Result<Frontier, FrontierError> {
    let stop: Vec<Oid> = previously_indexed.unwrap_or_default();

    let mut union: Vec<Oid> = requested.to_vec();
    union.extend(stop.iter().copied());
    union.sort();
    union.dedup();

    let independent = objdb
        .merge_base_independent(&union)
        .map_err(FrontierError::Antichain)?;

    let stop_set: std::collections::HashSet<Oid> = stop.iter().copied().collect();
    let effective_start: Vec<Oid> = independent
        .iter()
        .copied()
        .filter(|c| !stop_set.contains(c))
        .collect();

    if effective_start.is_empty() {
        debug!("Frontier already covers all requested commits");
        return Ok(Frontier::UpToDate);
    }

    Ok(Frontier::Update {
        effective_start,
        stop,
        new_frontier: independent,
    })
}

/// Resolves a list of user-supplied commit-ish strings (or, if empty, every ref) to commit ids.
pub fn resolve_requested_commits(
    objdb: &impl ObjectDatabase,
    commitishes: &[String],
) -> Result<Vec<Oid>, FrontierError> {
    if commitishes.is_empty() {
        return objdb
            .all_ref_commits()
            .map_err(|e| FrontierError::Antichain(e.context("failed to enumerate refs")));
    }

    commitishes
        .iter()
        .map(|c| {
            objdb
                .resolve_commitish(c)
                .map_err(|source| FrontierError::UnresolvedCommitish {
                    commitish: c.clone(),
                    source,
                })
        })
        .collect()
}

/// Walks every feature blob in `start`'s history, excluding anything reachable from `stop`
/// (component B). Thin pass-through to the object database's own streaming walk; kept as a
/// distinct function so the orchestrator doesn't depend on `ObjectDatabase` directly for this
/// one operation, matching the "Object Walker" seam named in the specification.
pub fn walk_feature_blobs(
    objdb: &impl ObjectDatabase,
    start: &[Oid],
    stop: &[Oid],
) -> Result<crossbeam_channel::Receiver<Result<FeatureBlob>>> {
    objdb.walk_feature_blobs(start, stop)
}

pub use crossbeam_channel;

#[cfg(test)]
mod tests {
    use super::*;
    use spatialidx_objectdb::ObjectDatabase;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// A trivial in-memory object graph used to test frontier resolution without a real repo.
    struct FakeGraph {
        parents: HashMap<Oid, Vec<Oid>>,
        refs: Vec<Oid>,
    }

    impl ObjectDatabase for FakeGraph {
        fn resolve_commitish(&self, commitish: &str) -> Result<Oid> {
            Oid::from_hex(commitish)
        }

        fn all_ref_commits(&self) -> Result<Vec<Oid>> {
            Ok(self.refs.clone())
        }

        fn merge_base_independent(&self, commits: &[Oid]) -> Result<Vec<Oid>> {
            let closures: Vec<(Oid, std::collections::HashSet<Oid>)> = commits
                .iter()
                .map(|&c| (c, self.ancestors_inclusive(c)))
                .collect();

            let mut independent = Vec::new();
            for (i, (candidate, _)) in closures.iter().enumerate() {
                let dominated = closures
                    .iter()
                    .enumerate()
                    .any(|(j, (_, anc))| i != j && anc.contains(candidate));
                if !dominated {
                    independent.push(*candidate);
                }
            }
            Ok(independent)
        }

        fn read_blob(&self, _oid: Oid) -> Result<Vec<u8>> {
            unimplemented!("not needed for frontier tests")
        }

        fn walk_feature_blobs(
            &self,
            _start: &[Oid],
            _stop: &[Oid],
        ) -> Result<crossbeam_channel::Receiver<Result<spatialidx_objectdb::FeatureBlob>>> {
            let (_tx, rx) = crossbeam_channel::bounded(0);
            Ok(rx)
        }

        fn crs_blob_oids_for_dataset(&self, _dataset_path: &str) -> Result<Vec<Oid>> {
            Ok(Vec::new())
        }
    }

    impl FakeGraph {
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

    #[test]
    fn no_prior_index_indexes_everything() {
        let c1 = oid(1);
        let c2 = oid(2);
        let mut parents = HashMap::new();
        parents.insert(c2, vec![c1]);
        let graph = FakeGraph {
            parents,
            refs: vec![c2],
        };

        match resolve(&graph, &[c2], None).unwrap() {
            Frontier::Update {
                effective_start,
                stop,
                new_frontier,
            } => {
                assert_eq!(effective_start, vec![c2]);
                assert!(stop.is_empty());
                assert_eq!(new_frontier, vec![c2]);
            }
            Frontier::UpToDate => panic!("expected an update"),
        }
    }

    #[test]
    fn already_indexed_ancestor_is_a_no_op() {
        let c1 = oid(1);
        let c2 = oid(2);
        let mut parents = HashMap::new();
        parents.insert(c2, vec![c1]);
        let graph = FakeGraph {
            parents,
            refs: vec![c2],
        };

        let previously = vec![c2];
        let result = resolve(&graph, &[c1], Some(previously)).unwrap();
        assert!(matches!(result, Frontier::UpToDate));
    }

    #[test]
    fn frontier_stays_minimal_when_stop_dominates_start() {
        let c1 = oid(1);
        let c2 = oid(2);
        let mut parents = HashMap::new();
        parents.insert(c2, vec![c1]);
        let graph = FakeGraph {
            parents,
            refs: vec![c2],
        };

        // Requesting c1 (an ancestor of already-indexed c2) must not widen the frontier back to c1.
        let result = resolve(&graph, &[c1], Some(vec![c2])).unwrap();
        assert!(matches!(result, Frontier::UpToDate));
    }
}
