//! Path normalisation for store nodes.
//!
//! Base paths are absolute (`/cfg/primary`), member paths are relative (`db/host`).

/// Normalise an absolute base path: leading slash, no trailing or repeated slashes.
///
/// Returns `None` for empty input or `.`/`..` segments. `"/"` stays `"/"`.
pub fn normalize_base(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let segments = segments(trimmed)?;
    if segments.is_empty() {
        return Some("/".to_string());
    }
    Some(format!("/{}", segments.join("/")))
}

/// Normalise a relative member path. Returns `None` if nothing remains.
pub fn normalize_relative(raw: &str) -> Option<String> {
    let segments = segments(raw.trim())?;
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn segments(raw: &str) -> Option<Vec<&str>> {
    let mut out = Vec::new();
    for segment in raw.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return None;
        }
        out.push(segment);
    }
    Some(out)
}

/// Join a normalised base path and a relative path.
pub fn join(base: &str, relative: &str) -> String {
    if base == "/" {
        format!("/{}", relative)
    } else {
        format!("{}/{}", base, relative)
    }
}

/// The part of `path` below `base`, if `path` is a strict descendant.
pub fn relative_to<'a>(base: &str, path: &'a str) -> Option<&'a str> {
    let rest = if base == "/" {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(base)?.strip_prefix('/')?
    };
    (!rest.is_empty()).then_some(rest)
}

/// Parent of an absolute path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}
