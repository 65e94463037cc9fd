//! Language code normalization and family matching.
//!
//! Tenant configuration, TTS voice selection, and localization lookups all
//! key off BCP-47-ish codes (`xx-YY`). Upstream data is inconsistent about
//! case and separators, so every lookup goes through [`normalize`] first.

/// Normalizes a language tag to `xx-YY` form: lowercase language subtag,
/// uppercase region subtag, `-` separator. Tags without a region subtag are
/// returned lowercased unchanged.
pub fn normalize(tag: &str) -> String {
    let tag = tag.trim().replace('_', "-");
    let mut parts = tag.splitn(2, '-');
    let lang = parts.next().unwrap_or("").to_lowercase();
    match parts.next() {
        Some(region) if !region.is_empty() => format!("{lang}-{}", region.to_uppercase()),
        _ => lang,
    }
}

/// Returns the bare language subtag (`"th-TH"` -> `"th"`).
pub fn family(tag: &str) -> String {
    normalize(tag)
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Whether two tags share a language family, ignoring region.
pub fn same_family(a: &str, b: &str) -> bool {
    family(a) == family(b)
}
