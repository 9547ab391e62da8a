//! Read, write, merge and projection over document trees.

use crate::error::{BusError, Result};
use crate::types::{Tree, Value};

/// Check that a path is non-empty and has no empty segments.
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(BusError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Read the value at `path`.
///
/// Returns `None` if any segment is missing, or if a non-terminal segment
/// names a scalar.
pub fn read<'a>(tree: &'a Tree, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = tree.get(segments.next()?)?;
    for segment in segments {
        match current {
            Value::Tree(child) => current = child.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Write `value` at `path`.
///
/// Missing or scalar intermediate segments are replaced with empty trees.
/// At the target, tree over tree merges recursively; every other
/// combination replaces.
pub fn write(tree: &mut Tree, path: &str, value: Value) {
    let mut segments = path.rsplit('.');
    let Some(last) = segments.next() else {
        return;
    };

    let mut nested = Tree::new();
    nested.insert(last.to_string(), value);
    for segment in segments {
        let mut parent = Tree::new();
        parent.insert(segment.to_string(), Value::Tree(nested));
        nested = parent;
    }
    merge(tree, nested);
}

/// Deep-merge `src` into `dest`, key by key.
pub fn merge(dest: &mut Tree, src: Tree) {
    for (key, value) in src {
        if let Value::Tree(src_child) = value {
            if let Some(Value::Tree(dest_child)) = dest.get_mut(&key) {
                merge(dest_child, src_child);
                continue;
            }
            dest.insert(key, Value::Tree(src_child));
        } else {
            dest.insert(key, value);
        }
    }
}

/// Every terminal path in `tree`, sorted.
///
/// Scalars and empty trees are terminal. Arrays never reach a `Tree`; they
/// are dropped when the JSON is converted.
pub fn leaf_paths(tree: &Tree) -> Vec<String> {
    let mut paths = Vec::new();
    collect_leaves("", tree, &mut paths);
    paths.sort();
    paths
}

fn collect_leaves(prefix: &str, tree: &Tree, out: &mut Vec<String>) {
    for (key, value) in tree {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Tree(child) if !child.is_empty() => collect_leaves(&path, child, out),
            _ => out.push(path),
        }
    }
}

/// Sort, dedup, and drop every path covered by a shorter kept path.
///
/// Coverage is segment-aware: `a` covers `a.b` but not `ab`.
pub fn normalize<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    let mut sorted: Vec<&str> = paths.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut kept: Vec<String> = Vec::with_capacity(sorted.len());
    for path in sorted {
        if kept.iter().any(|k| covers(k, path)) {
            continue;
        }
        kept.push(path.to_string());
    }
    kept
}

/// True if `prefix` equals `path` or is an ancestor of it.
pub fn covers(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

/// `path` and each of its ancestors, shortest first.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('.')
        .map(move |(i, _)| &path[..i])
        .chain(std::iter::once(path))
}

/// Restrict `source` to the branches reachable under `paths`.
pub fn project(source: &Tree, paths: &[String]) -> Tree {
    let mut out = Tree::new();
    for path in paths {
        if let Some(value) = read(source, path) {
            write(&mut out, path, value.clone());
        }
    }
    out
}
