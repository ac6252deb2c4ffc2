// src/pipeline/dedup.rs
use std::collections::{BTreeMap, HashSet};

/// Keep only candidates whose id is not excluded. Returns (kept, removed_count).
pub fn filter<V>(
    candidates: BTreeMap<String, V>,
    excluded: &HashSet<String>,
) -> (BTreeMap<String, V>, usize) {
    if excluded.is_empty() {
        return (candidates, 0);
    }
    let before = candidates.len();
    let kept: BTreeMap<String, V> = candidates
        .into_iter()
        .filter(|(id, _)| !excluded.contains(id))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Drop already-published ids from the seen set so it does not grow forever.
pub fn prune_seen(seen: &mut HashSet<String>, excluded: &HashSet<String>) -> usize {
    let before = seen.len();
    seen.retain(|id| !excluded.contains(id));
    before - seen.len()
}
