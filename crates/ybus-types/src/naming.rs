//! Name transliteration between the model layer and the bus layer.
//!
//! Every identifier has two canonical spellings:
//!
//! - the **model name**: hyphen-separated lowercase with digits, the way
//!   YANG spells things (`foo-bar-v1`);
//! - the **bus name**: CamelCase without hyphens, the way the object bus
//!   spells members and interface segments (`FooBarV1`).
//!
//! [`bus_name`] maps model → bus. [`model_name`] is the inverse heuristic,
//! also used to derive wire names from host-language identifiers
//! (`call_me` → `call-me`, `CallMe` → `call-me`). Object path segments use
//! a third spelling where hyphens become underscores ([`path_segment`]).

/// Maps a model-layer name to its bus-layer spelling.
///
/// The first rune is uppercased; each hyphen is dropped and the rune after
/// it uppercased; every other rune is lowercased.
///
/// ```
/// use ybus_types::naming::bus_name;
/// assert_eq!(bus_name(""), "");
/// assert_eq!(bus_name("f"), "F");
/// assert_eq!(bus_name("foo-bar"), "FooBar");
/// assert_eq!(bus_name("foo-1b"), "Foo1b");
/// ```
#[must_use]
pub fn bus_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for r in name.chars() {
        if r == '-' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(r.to_uppercase());
            upper_next = false;
        } else {
            out.extend(r.to_lowercase());
        }
    }
    out
}

/// Maps a host identifier (or bus name) back to its model-layer spelling.
///
/// A hyphen is injected at every transition from a non-uppercase letter to
/// an uppercase rune, and at every letter-to-digit transition that is not
/// at the end of the identifier; underscores become hyphens; everything is
/// lowercased.
///
/// ```
/// use ybus_types::naming::model_name;
/// assert_eq!(model_name("fooB"), "foo-b");
/// assert_eq!(model_name("fooBAr"), "foo-bar");
/// assert_eq!(model_name("FOOBAR"), "foobar");
/// assert_eq!(model_name("foo1B"), "foo-1b");
/// assert_eq!(model_name("call_me"), "call-me");
/// ```
#[must_use]
pub fn model_name(name: &str) -> String {
    let count = name.chars().count();
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev = '\0';
    for (i, r) in name.chars().enumerate() {
        if r == '_' {
            out.push('-');
            prev = '-';
            continue;
        }
        let at_end = i + 1 == count;
        if (r.is_numeric() && prev.is_alphabetic() && !at_end)
            || (r.is_uppercase() && prev.is_alphabetic() && !prev.is_uppercase())
        {
            out.push('-');
        }
        out.extend(r.to_lowercase());
        prev = r;
    }
    out
}

/// Maps a module name to its object path segment: hyphens become
/// underscores (`foo-v1` → `foo_v1`).
#[must_use]
pub fn path_segment(module: &str) -> String {
    module.replace('-', "_")
}

/// Whether `name` is a well-formed model-layer name: lowercase letters and
/// digits separated by single hyphens, not starting with a digit or a
/// hyphen, not ending with a hyphen.
#[must_use]
pub fn is_model_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let mut prev = '-';
    for (i, r) in name.chars().enumerate() {
        match r {
            'a'..='z' => {}
            '0'..='9' if i != 0 => {}
            '-' if prev != '-' => {}
            _ => return false,
        }
        prev = r;
    }
    prev != '-'
}
