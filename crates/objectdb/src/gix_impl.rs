use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use gix::hashtable::HashSet;
use gix::objs::tree::EntryMode;
use gix::ObjectId;
use tracing::{debug_span, warn};

use crate::{crs_path_pattern, feature_path_pattern, log_path_mismatch, FeatureBlob, ObjectDatabase};
use spatialidx_oid::Oid;

/// An [`ObjectDatabase`] backed directly by a real on-disk repository via `gix`.
///
/// This is the only implementation shipped by the engine; it is kept behind the
/// [`ObjectDatabase`] trait so that the orchestrator and its component tests can be
/// driven against a lightweight in-memory double instead (see `spatialidx-core`'s tests).
pub struct GixObjectDatabase {
    repo: gix::Repository,
}

impl GixObjectDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let opts = gix::open::Options::isolated().open_path_as_is(true);
        let repo = gix::open_opts(path, opts)
            .with_context(|| format!("{} is not a repository", path.display()))?;
        Ok(Self { repo })
    }

    fn commit_parents(&self, oid: ObjectId, scratch: &mut Vec<u8>) -> Result<Vec<ObjectId>> {
        let commit = self
            .repo
            .objects
            .find_commit(&oid, scratch)
            .with_context(|| format!("Failed to read commit {oid}"))?;
        Ok(commit.parents().collect())
    }

    /// Every commit reachable from `tips`, inclusive, as a set.
    fn ancestor_closure(&self, tips: &[ObjectId]) -> Result<HashSet<ObjectId>> {
        let mut seen: HashSet<ObjectId> = HashSet::default();
        let mut stack: Vec<ObjectId> = tips.to_vec();
        let mut scratch = Vec::with_capacity(4096);

        while let Some(oid) = stack.pop() {
            if !seen.insert(oid) {
                continue;
            }
            for parent in self.commit_parents(oid, &mut scratch)? {
                if !seen.contains(&parent) {
                    stack.push(parent);
                }
            }
        }

        Ok(seen)
    }

    /// True if `ancestor` is `descendant` or reachable from it by following parent links.
    fn is_ancestor(&self, ancestor: ObjectId, descendant: ObjectId) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let closure = self.ancestor_closure(&[descendant])?;
        Ok(closure.contains(&ancestor))
    }
}

impl ObjectDatabase for GixObjectDatabase {
    fn resolve_commitish(&self, commitish: &str) -> Result<Oid> {
        let id = self
            .repo
            .rev_parse_single(commitish)
            .with_context(|| format!("Failed to resolve commit-ish {commitish:?}"))?;
        Ok(Oid::from(id.detach()))
    }

    fn all_ref_commits(&self) -> Result<Vec<Oid>> {
        let mut result = Vec::new();
        let platform = self.repo.references().context("Failed to iterate refs")?;
        for reference in platform.all().context("Failed to iterate refs")?.filter_map(|r| r.ok()) {
            let mut reference = reference;
            let id = match reference.peel_to_id_in_place() {
                Ok(id) => id.detach(),
                Err(_) => continue,
            };
            if let Ok(obj) = self.repo.find_object(id) {
                if obj.kind == gix::object::Kind::Commit {
                    result.push(Oid::from(id));
                }
            }
        }
        if let Ok(head_id) = self.repo.head_id() {
            result.push(Oid::from(head_id.detach()));
        }
        result.sort();
        result.dedup();
        Ok(result)
    }

    fn merge_base_independent(&self, commits: &[Oid]) -> Result<Vec<Oid>> {
        let mut ids: Vec<ObjectId> = commits.iter().map(|o| ObjectId::from(*o)).collect();
        ids.sort();
        ids.dedup();

        let mut independent = Vec::with_capacity(ids.len());

        'candidate: for (i, &candidate) in ids.iter().enumerate() {
            for (j, &other) in ids.iter().enumerate() {
                // A candidate is dropped if some other, distinct member of the set is its
                // strict descendant. Ties (identical ancestry both ways, i.e. `candidate == other`
                // after a rename) can't happen post-dedup, so reachability alone decides it.
                if i != j && self.is_ancestor(candidate, other)? {
                    continue 'candidate;
                }
            }
            independent.push(candidate);
        }

        Ok(independent.into_iter().map(Oid::from).collect())
    }

    fn read_blob(&self, oid: Oid) -> Result<Vec<u8>> {
        let id = ObjectId::from(oid);
        let obj = self
            .repo
            .find_object(id)
            .with_context(|| format!("Failed to read blob {oid}"))?;
        Ok(obj.data.to_vec())
    }

    fn walk_feature_blobs(
        &self,
        start: &[Oid],
        stop: &[Oid],
    ) -> Result<crossbeam_channel::Receiver<Result<FeatureBlob>>> {
        let (tx, rx) = crossbeam_channel::bounded(1024);

        let repo = self.repo.clone();
        let start: Vec<ObjectId> = start.iter().map(|o| ObjectId::from(*o)).collect();
        let stop: Vec<ObjectId> = stop.iter().map(|o| ObjectId::from(*o)).collect();

        thread::spawn(move || {
            let _span = debug_span!("walk_feature_blobs").entered();
            if let Err(e) = walk_feature_blobs_inner(&repo, &start, &stop, &tx) {
                let _ = tx.send(Err(e));
            }
        });

        Ok(rx)
    }

    fn crs_blob_oids_for_dataset(&self, dataset_path: &str) -> Result<Vec<Oid>> {
        let pattern = crs_path_pattern();
        let mut result = Vec::new();
        let mut seen_trees: HashSet<ObjectId> = HashSet::default();
        let mut scratch = Vec::with_capacity(4096);

        let all_commits = self.all_ref_commits()?;
        let mut visited_commits: HashSet<ObjectId> = HashSet::default();
        let mut stack: Vec<ObjectId> = all_commits.iter().map(|o| ObjectId::from(*o)).collect();

        while let Some(commit_oid) = stack.pop() {
            if !visited_commits.insert(commit_oid) {
                continue;
            }
            let commit = match self.repo.objects.find_commit(&commit_oid, &mut scratch) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to read commit {commit_oid}: {e}");
                    continue;
                }
            };
            stack.extend(commit.parents());

            walk_tree_for_paths(
                &self.repo,
                commit.tree(),
                String::new(),
                &mut seen_trees,
                &mut |path, oid| {
                    if let Some(caps) = pattern.captures(&path) {
                        if &caps[1] == dataset_path {
                            result.push(Oid::from(oid));
                        }
                    }
                },
            )?;
        }

        result.sort();
        result.dedup();
        Ok(result)
    }
}

fn walk_feature_blobs_inner(
    repo: &gix::Repository,
    start: &[ObjectId],
    stop: &[ObjectId],
    tx: &crossbeam_channel::Sender<Result<FeatureBlob>>,
) -> Result<()> {
    let stop_closure = ancestor_closure_of(repo, stop)?;

    let pattern = feature_path_pattern();
    let mut seen_commits: HashSet<ObjectId> = HashSet::default();
    let mut seen_trees: HashSet<ObjectId> = HashSet::default();
    let mut scratch = Vec::with_capacity(4096);
    let mut stack: Vec<ObjectId> = start.to_vec();

    while let Some(commit_oid) = stack.pop() {
        if stop_closure.contains(&commit_oid) || !seen_commits.insert(commit_oid) {
            continue;
        }
        let commit = match repo.objects.find_commit(&commit_oid, &mut scratch) {
            Ok(c) => c,
            Err(e) => {
                tx.send(Err(anyhow::anyhow!("Failed to read commit {commit_oid}: {e}")))?;
                continue;
            }
        };
        stack.extend(commit.parents());

        walk_tree_for_paths(repo, commit.tree(), String::new(), &mut seen_trees, &mut |path, oid| {
            if let Some(caps) = pattern.captures(&path) {
                let dataset_path = caps[1].to_string();
                let _ = tx.send(Ok(FeatureBlob {
                    dataset_path,
                    blob_oid: Oid::from(oid),
                }));
            } else {
                log_path_mismatch(&path);
            }
        })?;
    }

    Ok(())
}

fn ancestor_closure_of(repo: &gix::Repository, tips: &[ObjectId]) -> Result<HashSet<ObjectId>> {
    let mut seen: HashSet<ObjectId> = HashSet::default();
    let mut stack: Vec<ObjectId> = tips.to_vec();
    let mut scratch = Vec::with_capacity(4096);

    while let Some(oid) = stack.pop() {
        if !seen.insert(oid) {
            continue;
        }
        if let Ok(commit) = repo.objects.find_commit(&oid, &mut scratch) {
            stack.extend(commit.parents());
        }
    }

    Ok(seen)
}

/// Recursively walks a tree, invoking `on_blob(path, oid)` for every blob entry found.
/// Trees already present in `seen` are skipped, mirroring the object-graph-wide dedup
/// that a real `rev-list --objects` performs.
fn walk_tree_for_paths(
    repo: &gix::Repository,
    tree_oid: ObjectId,
    prefix: String,
    seen: &mut HashSet<ObjectId>,
    on_blob: &mut dyn FnMut(String, ObjectId),
) -> Result<()> {
    if !seen.insert(tree_oid) {
        return Ok(());
    }

    let mut scratch = Vec::with_capacity(4096);
    let tree = match repo.objects.find_tree(&tree_oid, &mut scratch) {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to read tree {tree_oid}: {e}");
            return Ok(());
        }
    };

    // Collect owned entries before recursing, since `scratch` is reused by the recursive call.
    let entries: Vec<(EntryMode, ObjectId, String)> = tree
        .entries
        .iter()
        .map(|e| (e.mode, e.oid.into(), e.filename.to_string()))
        .collect();

    for (mode, oid, name) in entries {
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        match mode {
            EntryMode::Tree => walk_tree_for_paths(repo, oid, path, seen, on_blob)?,
            EntryMode::Blob | EntryMode::BlobExecutable => on_blob(path, oid),
            _ => {}
        }
    }

    Ok(())
}
