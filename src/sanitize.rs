//! Filename → storage identifier mapping.
//!
//! [`sanitize_stem`] turns an arbitrary (possibly non-ASCII) document name
//! into an identifier that is safe both as a directory name and as a vector
//! collection name: `[A-Za-z0-9._-]{3,100}`, starting and ending with an
//! ASCII alphanumeric.
//!
//! Distinct names can sanitize to the same stem (`"re port.md"` and
//! `"re_port.txt"`). [`identifier_for`] disambiguates every member of
//! such a group with a short hash of the original name. The result depends
//! on the whole file list: adding a file can turn a previously unique stem
//! into a colliding one, which moves that document to a new directory and
//! orphans its old index.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Identifier used when nothing usable survives sanitization.
pub const FALLBACK_IDENTIFIER: &str = "doc";
pub const MIN_IDENTIFIER_LEN: usize = 3;
pub const MAX_IDENTIFIER_LEN: usize = 100;
/// Hex characters of the name hash appended on collision.
pub const COLLISION_HASH_LEN: usize = 8;

/// Sanitize the base name of `filename` with its extension stripped.
///
/// Pure and deterministic.
pub fn sanitize_stem(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    clean(strip_extension(base))
}

/// Sanitize a whole key (no extension handling), e.g. a category name.
pub fn sanitize_key(key: &str) -> String {
    clean(key)
}

/// Identifier for `name` given the full current file list.
///
/// Names whose stem is shared with another *distinct* name get
/// `-<hash8>` appended; all other stems are returned untouched.
/// `name` does not have to be part of `all_names`; it is treated as if it were.
pub fn identifier_for<S: AsRef<str>>(name: &str, all_names: &[S]) -> String {
    lookup(name, all_names, sanitize_stem)
}

/// Identifier for a category key given every current category key.
pub fn category_identifier_for<S: AsRef<str>>(key: &str, all_keys: &[S]) -> String {
    lookup(key, all_keys, sanitize_key)
}

fn lookup<S: AsRef<str>>(name: &str, all: &[S], derive: fn(&str) -> String) -> String {
    let names = all.iter().map(AsRef::as_ref).chain(std::iter::once(name));
    resolve_with(names, derive)
        .remove(name)
        .unwrap_or_else(|| derive(name))
}

/// Longest suffix level: the whole SHA-256 hex digest.
const MAX_SUFFIX_LEVEL: usize = 64 / COLLISION_HASH_LEN;

/// Assign identifiers until no two distinct names share one.
///
/// Every name starts at its plain stem (level 0). In each clashing group the
/// members at the lowest level move up one level, so a suffixed identifier
/// that happens to equal another file's plain stem pushes the plain one
/// aside. Level `n` appends `n * COLLISION_HASH_LEN` hex characters.
fn resolve_with<'a>(
    names: impl Iterator<Item = &'a str>,
    derive: fn(&str) -> String,
) -> BTreeMap<String, String> {
    let mut stems: BTreeMap<&str, String> = BTreeMap::new();
    for name in names {
        stems.entry(name).or_insert_with(|| derive(name));
    }
    let mut levels: BTreeMap<&str, usize> = stems.keys().map(|name| (*name, 0)).collect();

    loop {
        let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for (name, stem) in &stems {
            let id = with_collision_suffix(stem, name, levels[name]);
            groups.entry(id).or_default().push(*name);
        }

        let mut changed = false;
        for members in groups.values().filter(|m| m.len() > 1) {
            let lowest = members.iter().map(|name| levels[name]).min().unwrap_or(0);
            for name in members {
                let level = levels.entry(*name).or_default();
                if *level == lowest && *level < MAX_SUFFIX_LEVEL {
                    *level += 1;
                    changed = true;
                }
            }
        }

        if !changed {
            return groups
                .into_iter()
                .flat_map(|(id, members)| {
                    members.into_iter().map(move |name| (name.to_string(), id.clone()))
                })
                .collect();
        }
    }
}

/// First [`COLLISION_HASH_LEN`] hex characters of the SHA-256 of `name`.
pub fn short_hash(name: &str) -> String {
    hash_prefix(name, COLLISION_HASH_LEN)
}

fn hash_prefix(name: &str, len: usize) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    hex
}

fn with_collision_suffix(stem: &str, original: &str, level: usize) -> String {
    if level == 0 {
        return stem.to_string();
    }
    let hash_len = (COLLISION_HASH_LEN * level).min(64);
    // Keep the suffixed identifier within MAX_IDENTIFIER_LEN.
    let room = MAX_IDENTIFIER_LEN - hash_len - 1;
    let mut base: String = stem.chars().take(room).collect();
    while base.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        base.pop();
    }
    format!("{}-{}", base, hash_prefix(original, hash_len))
}

/// Python-style `splitext`: a leading run of dots is not an extension marker.
fn strip_extension(base: &str) -> &str {
    match base.rfind('.') {
        Some(idx) if base[..idx].chars().any(|c| c != '.') => &base[..idx],
        _ => base,
    }
}

fn clean(raw: &str) -> String {
    let ascii: String = raw.nfkd().filter(char::is_ascii).collect();

    let replaced: String = ascii
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| !c.is_ascii_alphanumeric());

    let mut collapsed = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    // Everything is ASCII by now, so byte and char lengths agree.
    collapsed.truncate(MAX_IDENTIFIER_LEN);
    let result = collapsed.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

    if result.len() < MIN_IDENTIFIER_LEN {
        FALLBACK_IDENTIFIER.to_string()
    } else {
        result.to_string()
    }
}

/// Whether `id` satisfies the identifier invariants.
pub fn is_valid_identifier(id: &str) -> bool {
    let len_ok = (MIN_IDENTIFIER_LEN..=MAX_IDENTIFIER_LEN).contains(&id.len());
    let chars_ok = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    let ends_ok = id.starts_with(|c: char| c.is_ascii_alphanumeric())
        && id.ends_with(|c: char| c.is_ascii_alphanumeric());
    len_ok && chars_ok && ends_ok
}
