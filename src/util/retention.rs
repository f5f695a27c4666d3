//! Count based retention of backup artifacts.
//!
//! The same policy is applied to every artifact class the agent owns:
//! local backups, remote backups and backup logs.

use std::fmt::Display;

/// Returns the entries of `ordered` that fall out of retention.
///
/// `ordered` has to be sorted oldest first. The `keep` most recent entries
/// are retained, everything before them is returned for deletion.
///
/// A `keep` of zero or less disables rotation: nothing is ever selected.
pub fn trim<T>(ordered: &[T], keep: i64) -> &[T] {
    if keep <= 0 {
        return &[];
    }

    let keep = usize::try_from(keep).unwrap_or(usize::MAX);
    if ordered.len() <= keep {
        return &[];
    }

    &ordered[..ordered.len() - keep]
}

/// Result of [prune]ing one artifact class.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pruned {
    /// Entries that were deleted.
    pub deleted: Vec<String>,
    /// Entries whose deletion failed.
    pub failed: Vec<String>,
}

/// Applies [trim] to `ordered` and deletes every selected entry with `delete`.
///
/// Each deletion is attempted on its own. A failing deletion is logged and
/// does not stop the remaining ones.
pub fn prune<T, E>(
    class: &str,
    ordered: &[T],
    keep: i64,
    mut delete: impl FnMut(&T) -> Result<(), E>,
) -> Pruned
where
    T: Display,
    E: Display,
{
    let mut pruned = Pruned::default();

    if keep <= 0 {
        log::info!(target: "retention", "Rotation of {class} disabled (keep <= 0)");
        return pruned;
    }

    let expired = trim(ordered, keep);
    if expired.is_empty() {
        log::info!(
            target: "retention",
            "No old {class} to delete (have {}, keeping {keep})",
            ordered.len()
        );
        return pruned;
    }

    log::info!(target: "retention", "Deleting {} old {class}", expired.len());
    for entry in expired {
        match delete(entry) {
            Ok(()) => {
                log::info!(target: "retention", "Deleted old {class}: {entry}");
                pruned.deleted.push(entry.to_string());
            }
            Err(e) => {
                log::error!(target: "retention", "Deleting {class} {entry} failed: {e}");
                pruned.failed.push(entry.to_string());
            }
        }
    }

    pruned
}
