//! Lexical path cleaning for the `/`-separated portable paths used in
//! manifests. Host paths go through [std::path]; these helpers never touch
//! the filesystem.

/// Cleans `p` lexically: collapses repeated separators, removes `.`
/// components and resolves `..` against preceding components. A rooted path
/// stays rooted; `..` never climbs above the root. The empty path cleans to
/// `.`.
pub(crate) fn clean(p: &str) -> String {
    let rooted = p.starts_with('/');
    let mut out: Vec<&str> = Vec::new();

    for component in p.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|c| *c != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            c => out.push(c),
        }
    }

    let joined = out.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_owned(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// Whether `p` is already clean, absolute, and free of `..` components.
/// Manifest paths must satisfy this.
pub(crate) fn is_clean_manifest_path(p: &str) -> bool {
    p.starts_with('/') && clean(p) == p && !p.split('/').any(|c| c == "..")
}

/// Joins `base` and `p` and cleans the result.
pub(crate) fn join(base: &str, p: &str) -> String {
    if p.starts_with('/') {
        clean(p)
    } else {
        clean(&format!("{base}/{p}"))
    }
}

/// The relative path from the directory `from` to `to`. Both must be
/// absolute and clean.
pub(crate) fn relative(from: &str, to: &str) -> String {
    let f: Vec<&str> = from.split('/').filter(|c| !c.is_empty()).collect();
    let t: Vec<&str> = to.split('/').filter(|c| !c.is_empty()).collect();

    let common = f.iter().zip(&t).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = vec![".."; f.len() - common];
    parts.extend(&t[common..]);

    if parts.is_empty() {
        ".".to_owned()
    } else {
        parts.join("/")
    }
}

/// The parent of a cleaned path. The parent of `/` is `/`.
pub(crate) fn parent(p: &str) -> &str {
    match p.rfind('/') {
        Some(0) => "/",
        Some(i) => &p[..i],
        None => ".",
    }
}
