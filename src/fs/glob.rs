// src/fs/glob.rs

//! Shell-style glob expansion on top of [`FileSystem`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::GlobBuilder;

use super::FileSystem;

fn has_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Expand `pattern` into the sorted list of existing paths matching it.
///
/// `*` and `?` never cross a `/`; `**` matches any number of directories.
/// A pattern without meta characters yields the path itself if it exists.
pub fn expand_glob(fs: &dyn FileSystem, pattern: &str) -> Result<Vec<PathBuf>> {
    let components: Vec<&str> = pattern.split('/').collect();
    let first_meta = match components.iter().position(|c| has_meta(c)) {
        Some(idx) => idx,
        None => {
            let path = PathBuf::from(pattern);
            return Ok(if fs.exists(&path) { vec![path] } else { Vec::new() });
        }
    };

    let absolute = pattern.starts_with('/');
    let implicit_base = first_meta == 0;
    let base = if implicit_base {
        PathBuf::from(".")
    } else if absolute && first_meta == 1 {
        PathBuf::from("/")
    } else {
        PathBuf::from(components[..first_meta].join("/"))
    };

    let remaining = &components[first_meta..];
    let unbounded = remaining.iter().any(|c| c.contains("**"));
    let target_depth = remaining.len();

    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {pattern}"))?
        .compile_matcher();

    if !fs.is_dir(&base) {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(base, 0)];

    while let Some((dir, depth)) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            let entry_depth = depth + 1;
            let candidate = candidate_string(&path, implicit_base);

            if (unbounded || entry_depth == target_depth) && matcher.is_match(&candidate) {
                found.push(path.clone());
            }

            if fs.is_dir(&path) && (unbounded || entry_depth < target_depth) {
                stack.push((path, entry_depth));
            }
        }
    }

    found.sort();
    found.dedup();
    Ok(found)
}

fn candidate_string(path: &Path, implicit_base: bool) -> String {
    let rel = if implicit_base {
        path.strip_prefix(".").unwrap_or(path)
    } else {
        path
    };
    rel.to_string_lossy().replace('\\', "/")
}
