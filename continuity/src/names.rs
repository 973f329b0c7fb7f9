//! Translation of name-form uid/gid strings to numeric ids.
//!
//! Manifests may carry either numeric or name-based identifiers. Lookups go
//! through a process-wide cache; misses are cached as empty strings so a
//! missing name is only searched once. This is the only global state in the
//! crate.

use std::collections::HashMap;
use std::fs;
use std::sync::RwLock;

use lazy_static::lazy_static;

use crate::errors::Error;

#[derive(Default)]
struct Caches {
    users: HashMap<String, String>,
    groups: HashMap<String, String>,
}

lazy_static! {
    static ref CACHE: RwLock<Caches> = RwLock::new(Caches::default());
}

/// Finds `name` in a passwd/group style database and returns the id column.
fn scan_database(path: &str, name: &str) -> String {
    let Ok(contents) = fs::read_to_string(path) else {
        return String::new();
    };

    for line in contents.lines() {
        if line.starts_with('#') {
            continue;
        }
        // name:password:id:...
        let mut fields = line.split(':');
        if fields.next() == Some(name) {
            let _password = fields.next();
            if let Some(id) = fields.next() {
                return id.to_owned();
            }
        }
    }

    String::new()
}

pub(crate) fn lookup_user(name: &str) -> String {
    if let Some(id) = CACHE.read().expect("name cache poisoned").users.get(name) {
        return id.clone();
    }

    let mut cache = CACHE.write().expect("name cache poisoned");
    if let Some(id) = cache.users.get(name) {
        return id.clone();
    }

    let id = scan_database("/etc/passwd", name);
    cache.users.insert(name.to_owned(), id.clone());
    id
}

pub(crate) fn lookup_group(name: &str) -> String {
    if let Some(id) = CACHE.read().expect("name cache poisoned").groups.get(name) {
        return id.clone();
    }

    let mut cache = CACHE.write().expect("name cache poisoned");
    if let Some(id) = cache.groups.get(name) {
        return id.clone();
    }

    let id = scan_database("/etc/group", name);
    cache.groups.insert(name.to_owned(), id.clone());
    id
}

/// Resolves a uid string (numeric or user name) to a numeric id.
pub(crate) fn resolve_uid(uid: &str) -> Result<u32, Error> {
    if let Ok(n) = uid.parse() {
        return Ok(n);
    }
    lookup_user(uid).parse().map_err(|_| Error::NotFound)
}

/// Resolves a gid string (numeric or group name) to a numeric id.
pub(crate) fn resolve_gid(gid: &str) -> Result<u32, Error> {
    if let Ok(n) = gid.parse() {
        return Ok(n);
    }
    lookup_group(gid).parse().map_err(|_| Error::NotFound)
}
