//! Deterministic directory traversal with exclude pruning.
//!
//! Siblings are visited in byte-lexicographic name order at every level, so
//! the stream of events (and therefore the report) is reproducible across
//! runs and platforms. Symlinks are never followed.

use std::path::{Path, PathBuf};

use globset::GlobSet;
use log::{debug, warn};
use walkdir::WalkDir;

/// One traversal observation, in walk order.
#[derive(Debug)]
pub enum WalkEvent {
    /// A regular file to feed through the pipeline.
    File {
        path: PathBuf,
        /// Path relative to the traversal root; mirrors into the output tree.
        rel: PathBuf,
        size: u64,
    },
    /// A file, or a directory pruned whole, matched by an exclude pattern.
    Excluded { path: PathBuf, is_dir: bool },
}

/// Control flow returned by the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Stop,
}

/// Walk `root` depth-first, pruning excluded directories and never yielding
/// anything under `skip_paths` (the report file, when it lives inside the
/// input root).
///
/// Exclude patterns match against paths relative to `root`. Unreadable
/// entries are logged and skipped so one bad directory cannot fail the
/// batch.
pub fn walk<F>(
    root: &Path,
    exclude: &GlobSet,
    skip_paths: &[PathBuf],
    mut visit: F,
) -> std::io::Result<()>
where
    F: FnMut(WalkEvent) -> WalkControl,
{
    let mut iter = WalkDir::new(root).sort_by_file_name().into_iter();
    while let Some(next) = iter.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry: {}", err);
                continue;
            },
        };
        if entry.path() == root {
            continue;
        }
        if is_skipped(entry.path(), skip_paths) {
            debug!("not re-consuming {}", entry.path().display());
            continue;
        }

        let rel = entry.path().strip_prefix(root).unwrap_or_else(|_| entry.path()).to_path_buf();
        let is_dir = entry.file_type().is_dir();
        if exclude.is_match(&rel) {
            if is_dir {
                iter.skip_current_dir();
            }
            let event = WalkEvent::Excluded { path: entry.path().to_path_buf(), is_dir };
            if visit(event) == WalkControl::Stop {
                return Ok(());
            }
            continue;
        }
        if entry.file_type().is_symlink() {
            warn!("not following symlink {}", entry.path().display());
            continue;
        }
        if is_dir {
            continue;
        }

        let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        let event = WalkEvent::File { path: entry.path().to_path_buf(), rel, size };
        if visit(event) == WalkControl::Stop {
            return Ok(());
        }
    }
    Ok(())
}

fn is_skipped(path: &Path, skip_paths: &[PathBuf]) -> bool {
    if skip_paths.is_empty() {
        return false;
    }
    match std::path::absolute(path) {
        Ok(abs) => skip_paths.iter().any(|skip| *skip == abs),
        Err(_) => false,
    }
}

// Tests go below the code where they'll be out of the way when not the target of attention
#[cfg(test)]
mod tests {
    use std::fs;

    use globset::{Glob, GlobSetBuilder};

    use super::*;

    fn glob_set(patterns: &[&str]) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern).unwrap());
        }
        builder.build().unwrap()
    }

    fn collect(root: &Path, exclude: &GlobSet, skip: &[PathBuf]) -> Vec<String> {
        let mut seen = Vec::new();
        walk(root, exclude, skip, |event| {
            seen.push(match event {
                WalkEvent::File { rel, .. } => format!("file:{}", rel.display()),
                WalkEvent::Excluded { path, is_dir } => {
                    let kind = if is_dir { "dir" } else { "file" };
                    format!("excluded-{}:{}", kind, path.file_name().unwrap().to_string_lossy())
                },
            });
            WalkControl::Continue
        })
        .unwrap();
        seen
    }

    #[test]
    fn siblings_come_back_in_byte_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta.txt", "alpha.txt", "mid.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("bdir")).unwrap();
        fs::write(dir.path().join("bdir/inner.txt"), b"x").unwrap();

        assert_eq!(
            collect(dir.path(), &GlobSet::empty(), &[]),
            vec!["file:alpha.txt", "file:bdir/inner.txt", "file:mid.txt", "file:zeta.txt"]
        );
    }

    #[test]
    fn excluded_directory_is_pruned_with_one_event() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/dep.js"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        assert_eq!(
            collect(dir.path(), &glob_set(&["node_modules"]), &[]),
            vec!["file:keep.txt", "excluded-dir:node_modules"]
        );
    }

    #[test]
    fn excluded_file_yields_an_event_but_no_processing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("secret.key"), b"x").unwrap();
        fs::write(dir.path().join("normal.txt"), b"x").unwrap();

        assert_eq!(
            collect(dir.path(), &glob_set(&["*.key"]), &[]),
            vec!["file:normal.txt", "excluded-file:secret.key"]
        );
    }

    #[test]
    fn skip_paths_are_never_yielded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("report.jsonl"), b"x").unwrap();
        fs::write(dir.path().join("data.txt"), b"x").unwrap();
        let skip = vec![std::path::absolute(dir.path().join("report.jsonl")).unwrap()];

        assert_eq!(collect(dir.path(), &GlobSet::empty(), &skip), vec!["file:data.txt"]);
    }

    #[test]
    fn visitor_can_stop_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let mut seen = 0;
        walk(dir.path(), &GlobSet::empty(), &[], |_| {
            seen += 1;
            if seen == 2 { WalkControl::Stop } else { WalkControl::Continue }
        })
        .unwrap();
        assert_eq!(seen, 2);
    }
}
