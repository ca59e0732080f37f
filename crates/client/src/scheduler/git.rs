//! Git collaborator: list the files the last HEAD move touched.
//!
//! Shell failures are treated as "no changed files"; a broken git setup must
//! never block or surface into the editing flow.

use std::path::{Path, PathBuf};
use tracing::warn;

/// File extensions the scanner understands.
pub const TRACKED_EXTENSIONS: [&str; 2] = ["sol", "yul"];

/// Repository file to watch for HEAD moves (commit, checkout, pull).
pub fn head_ref_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".git").join("HEAD")
}

/// Workspace-relative paths changed by the last HEAD move, filtered to the
/// tracked extensions.
pub async fn changed_files(repo_root: &Path) -> Vec<PathBuf> {
    let output = tokio::process::Command::new("git")
        .args(["diff", "--name-only", "HEAD@{1}", "HEAD"])
        .current_dir(repo_root)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && has_tracked_extension(line))
            .map(PathBuf::from)
            .collect(),
        Ok(out) => {
            warn!(status = %out.status, "git diff failed; treating as no changed files");
            Vec::new()
        }
        Err(err) => {
            warn!(%err, "git invocation failed; treating as no changed files");
            Vec::new()
        }
    }
}

fn has_tracked_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TRACKED_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter() {
        assert!(has_tracked_extension("contracts/Vault.sol"));
        assert!(has_tracked_extension("lib/opt.yul"));
        assert!(!has_tracked_extension("README.md"));
        assert!(!has_tracked_extension("contracts/Vault.sol.bak"));
    }

    #[tokio::test]
    async fn test_changed_files_outside_a_repo_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = changed_files(dir.path()).await;
        assert!(files.is_empty());
    }
}
