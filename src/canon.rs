//! Lexical path canonicalization, matching how the graph resolves paths:
//! both separators are accepted, "." and empty components vanish, ".."
//! backs up a component, and a drive letter is uppercased.

/// Whether a path component names a Windows drive, e.g. "c:".
pub fn is_drive(component: &str) -> bool {
    let bytes = component.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
        || path.starts_with('\\')
        || path.split(['/', '\\']).next().map_or(false, is_drive)
}

/// Canonicalize a path without touching the disk, e.g. "foo/./bar" =>
/// "foo/bar".  Leading ".." components of a relative path are kept; at the
/// root of an absolute path they are dropped.
pub fn canon_path(path: &str) -> String {
    let absolute = is_absolute(path);
    let mut prefix = String::new();
    let mut components: Vec<&str> = Vec::new();
    for (i, component) in path.split(['/', '\\']).enumerate() {
        match component {
            "" | "." => {}
            ".." => match components.last() {
                Some(&last) if last != ".." => {
                    components.pop();
                }
                _ if absolute => {}
                _ => components.push(".."),
            },
            c if i == 0 && is_drive(c) => prefix = c.to_ascii_uppercase(),
            c => components.push(c),
        }
    }
    let joined = components.join("/");
    if absolute {
        format!("{}/{}", prefix, joined)
    } else {
        joined
    }
}

/// Resolve `path` against the absolute directory `base`, canonicalized.
pub fn absolute(base: &str, path: &str) -> String {
    if is_absolute(path) {
        canon_path(path)
    } else {
        canon_path(&format!("{}/{}", base, path))
    }
}
