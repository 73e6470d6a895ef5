//! User set differ

use std::collections::HashSet;

use super::model::UserInfo;

/// Compute `(deleted, added)` between two user snapshots.
///
/// `deleted = old - new` and `added = new - old` under full-value equality.
/// Each side keeps its input order and carries no duplicates.
pub fn compare_user_list(old: &[UserInfo], new: &[UserInfo]) -> (Vec<UserInfo>, Vec<UserInfo>) {
    let old_set: HashSet<&UserInfo> = old.iter().collect();
    let new_set: HashSet<&UserInfo> = new.iter().collect();

    let mut seen = HashSet::with_capacity(old.len());
    let deleted = old
        .iter()
        .filter(|u| !new_set.contains(u) && seen.insert(*u))
        .cloned()
        .collect();

    let mut seen = HashSet::with_capacity(new.len());
    let added = new
        .iter()
        .filter(|u| !old_set.contains(u) && seen.insert(*u))
        .cloned()
        .collect();

    (deleted, added)
}
