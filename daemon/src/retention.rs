//! Age/count retention pruning for profile and artifact directories
//! (spec §4.6 periodic work). Candidate selection is a pure function over
//! `(id, last_modified)` pairs; the async wrappers do the directory walk
//! and the actual removal, best-effort.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use time::OffsetDateTime;

use crate::config::RetentionPolicy;

/// Returns the ids that should be removed under `retention`, given the full
/// set of `(id, last_modified)` candidates and the ids currently excluded
/// (active sessions are never pruned). Age and count limits are independent:
/// an entry can be selected by either rule.
pub fn select_for_pruning(
    entries: &[(String, OffsetDateTime)],
    now: OffsetDateTime,
    retention: RetentionPolicy,
    active_ids: &HashSet<String>,
) -> Vec<String> {
    let eligible: Vec<&(String, OffsetDateTime)> =
        entries.iter().filter(|(id, _)| !active_ids.contains(id)).collect();

    let mut to_remove: Vec<String> = Vec::new();

    if let Some(max_age_days) = retention.max_age_days {
        let cutoff = now - time::Duration::days(max_age_days as i64);
        for (id, modified_at) in &eligible {
            if *modified_at < cutoff {
                to_remove.push(id.clone());
            }
        }
    }

    if let Some(max_count) = retention.max_count {
        if eligible.len() > max_count {
            let mut by_age = eligible.clone();
            by_age.sort_by_key(|(_, modified_at)| *modified_at);
            let excess = by_age.len() - max_count;
            for (id, _) in by_age.into_iter().take(excess) {
                if !to_remove.contains(id) {
                    to_remove.push(id.clone());
                }
            }
        }
    }

    to_remove
}

async fn subdirectory_candidates(dir: &Path) -> Vec<(String, OffsetDateTime)> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return out,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        out.push((
            entry.file_name().to_string_lossy().to_string(),
            OffsetDateTime::from(modified),
        ));
    }
    out
}

/// Prunes `browser_root/profiles/<sessionId>` directories. Returns the
/// number of directories removed; failures to remove an individual
/// directory are logged and otherwise ignored.
pub async fn prune_profiles(
    profiles_dir: &Path,
    retention: RetentionPolicy,
    active_ids: &HashSet<String>,
    now: OffsetDateTime,
) -> u64 {
    let candidates = subdirectory_candidates(profiles_dir).await;
    let doomed = select_for_pruning(&candidates, now, retention, active_ids);
    remove_all(profiles_dir, &doomed).await
}

/// Prunes `browser_root/<sessionId>` artifact directories, skipping
/// reserved top-level subdirectories (spec §4.6).
pub async fn prune_artifacts(
    browser_root: &Path,
    retention: RetentionPolicy,
    active_ids: &HashSet<String>,
    now: OffsetDateTime,
    reserved: &[&str],
) -> u64 {
    let mut candidates = subdirectory_candidates(browser_root).await;
    candidates.retain(|(id, _)| !reserved.contains(&id.as_str()));
    let doomed = select_for_pruning(&candidates, now, retention, active_ids);
    remove_all(browser_root, &doomed).await
}

async fn remove_all(parent: &Path, ids: &[String]) -> u64 {
    let mut removed = 0u64;
    for id in ids {
        let path: PathBuf = parent.join(id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to prune directory");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::days(n)
    }

    #[test]
    fn age_rule_selects_entries_older_than_cutoff() {
        let entries = vec![("a".to_string(), day(0)), ("b".to_string(), day(100))];
        let now = day(100);
        let retention = RetentionPolicy {
            max_age_days: Some(30),
            max_count: None,
        };
        let doomed = select_for_pruning(&entries, now, retention, &HashSet::new());
        assert_eq!(doomed, vec!["a".to_string()]);
    }

    #[test]
    fn count_rule_keeps_newest_n() {
        let entries = vec![
            ("a".to_string(), day(0)),
            ("b".to_string(), day(1)),
            ("c".to_string(), day(2)),
        ];
        let retention = RetentionPolicy {
            max_age_days: None,
            max_count: Some(2),
        };
        let doomed = select_for_pruning(&entries, day(2), retention, &HashSet::new());
        assert_eq!(doomed, vec!["a".to_string()]);
    }

    #[test]
    fn active_ids_are_never_selected() {
        let entries = vec![("a".to_string(), day(0))];
        let retention = RetentionPolicy {
            max_age_days: Some(1),
            max_count: None,
        };
        let mut active = HashSet::new();
        active.insert("a".to_string());
        let doomed = select_for_pruning(&entries, day(100), retention, &active);
        assert!(doomed.is_empty());
    }

    #[tokio::test]
    async fn prune_profiles_removes_stale_directories() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = dir.path().join("profiles");
        tokio::fs::create_dir_all(profiles.join("stale")).await.unwrap();
        tokio::fs::create_dir_all(profiles.join("active")).await.unwrap();

        let mut active = HashSet::new();
        active.insert("active".to_string());

        let retention = RetentionPolicy {
            max_age_days: Some(0),
            max_count: None,
        };
        let removed = prune_profiles(
            &profiles,
            retention,
            &active,
            OffsetDateTime::now_utc() + time::Duration::days(1),
        )
        .await;

        assert_eq!(removed, 1);
        assert!(!profiles.join("stale").exists());
        assert!(profiles.join("active").exists());
    }
}
