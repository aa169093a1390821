//! Path string utilities
//!
//! Store paths are absolute, `/`-separated strings without a trailing
//! separator (`"/"` for the root). All overlay path arithmetic goes
//! through these helpers so prefix checks stay boundary-aware:
//! `/apps/dyn` is an ancestor of `/apps/dyn/a` but not of `/apps/dynX`.

/// Path separator
pub const SLASH: char = '/';

/// Join a parent path and a child name
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent path, or None for the root
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind(SLASH) {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last path segment, or None for the root
pub fn name_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    path.rfind(SLASH).map(|idx| &path[idx + 1..])
}

/// True if `path` equals `root` or lies below it
pub fn is_at_or_under(path: &str, root: &str) -> bool {
    if root == "/" {
        return path.starts_with(SLASH);
    }
    path == root || (path.starts_with(root) && path.as_bytes().get(root.len()) == Some(&b'/'))
}

/// True if `path` lies strictly below `root`
pub fn is_under(path: &str, root: &str) -> bool {
    path != root && is_at_or_under(path, root)
}

/// Strip `root` (and the separator after it) from `path`
///
/// Returns the empty string when `path == root`, None when `path` is
/// not at or under `root`.
pub fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if !is_at_or_under(path, root) {
        return None;
    }
    let rest = &path[root.len()..];
    Some(rest.strip_prefix(SLASH).unwrap_or(rest))
}
