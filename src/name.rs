//! Canonical domain name form used for every table key.
//!
//! Both stores key their tables by the canonical form: ASCII lower-case with
//! exactly one trailing label separator. Two names are the same iff their
//! canonical forms are byte-equal.

/// Convert a domain name into its canonical lookup form.
///
/// Lower-cases the name and guarantees a single trailing dot. Total and
/// idempotent; the empty string canonicalizes to the root name `"."`.
pub fn canonicalize(name: &str) -> String {
    let trimmed = name.trim_end_matches('.');
    let mut canonical = String::with_capacity(trimmed.len() + 1);
    for c in trimmed.chars() {
        canonical.extend(c.to_lowercase());
    }
    canonical.push('.');
    canonical
}
