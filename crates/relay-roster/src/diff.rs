//! Roster differ: multiset difference between two consecutive rosters.
//!
//! Counts matter: a member holding two overlapping shifts appears twice, and
//! gaining the second shift is a transition of its own.

use std::collections::HashMap;

use serde::Serialize;

/// Members who went on and off duty between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub started: Vec<String>,
    pub ended: Vec<String>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.ended.is_empty()
    }
}

/// Compute `(started, ended)` between `previous` and `current`.
///
/// `started` repeats each id by how much its count grew, `ended` by how much
/// it shrank. Output follows first appearance in `current` (started) and
/// `previous` (ended).
pub fn diff<S: AsRef<str>>(previous: &[S], current: &[S]) -> Transition {
    Transition {
        started: surplus(current, previous),
        ended: surplus(previous, current),
    }
}

/// Entries of `from` left over after cancelling one-for-one against `against`.
fn surplus<S: AsRef<str>>(from: &[S], against: &[S]) -> Vec<String> {
    let mut budget: HashMap<&str, usize> = HashMap::new();
    for id in against {
        *budget.entry(id.as_ref()).or_default() += 1;
    }

    let mut out = Vec::new();
    for id in from {
        let id = id.as_ref();
        match budget.get_mut(id) {
            Some(n) if *n > 0 => *n -= 1,
            _ => out.push(id.to_string()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn sorted(mut ids: Vec<String>) -> Vec<String> {
        ids.sort();
        ids
    }

    #[test]
    fn test_identical_rosters_are_a_noop() {
        for roster in [v(&[]), v(&["alice"]), v(&["alice", "alice", "bob"]), v(&["b", "a", "b", "c", "a"])] {
            let t = diff(&roster, &roster);
            assert!(t.is_empty(), "diff(R, R) should be empty for {roster:?}");
        }
    }

    #[test]
    fn test_reordered_roster_is_a_noop() {
        let t = diff(&v(&["alice", "bob", "alice"]), &v(&["bob", "alice", "alice"]));
        assert!(t.is_empty());
    }

    #[test]
    fn test_extra_shift_counts_as_started() {
        let t = diff(&v(&["alice"]), &v(&["alice", "alice", "bob"]));
        assert_eq!(sorted(t.started), v(&["alice", "bob"]));
        assert!(t.ended.is_empty());
    }

    #[test]
    fn test_lost_shift_counts_as_ended() {
        let t = diff(&v(&["alice", "alice", "bob"]), &v(&["alice"]));
        assert!(t.started.is_empty());
        assert_eq!(sorted(t.ended), v(&["alice", "bob"]));
    }

    #[test]
    fn test_full_handover() {
        let t = diff(&v(&["alice", "bob"]), &v(&["carol", "dave", "dave"]));
        assert_eq!(t.started, v(&["carol", "dave", "dave"]));
        assert_eq!(t.ended, v(&["alice", "bob"]));
    }

    #[test]
    fn test_counts_are_preserved() {
        let prev = v(&["a", "a", "a", "b"]);
        let curr = v(&["a", "b", "b", "c"]);
        let t = diff(&prev, &curr);
        assert_eq!(sorted(t.started), v(&["b", "c"]));
        assert_eq!(sorted(t.ended), v(&["a", "a"]));
    }

    #[test]
    fn test_diff_from_empty() {
        let t = diff(&v(&[]), &v(&["alice"]));
        assert_eq!(t.started, v(&["alice"]));
        assert!(t.ended.is_empty());
    }
}
