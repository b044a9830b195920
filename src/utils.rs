use std::hash::BuildHasherDefault;

/// Hasher state for the engine's internal maps, keyed on short keyword and
/// filter-text strings.
pub(crate) type RandomState = BuildHasherDefault<seahash::SeaHasher>;

/// Keywords that partition the rule corpus so poorly they are never used
/// for indexing.
pub(crate) const BAD_KEYWORDS: [&str; 4] = ["http", "https", "com", "js"];

/// Bytes that may appear inside a keyword: lowercase ASCII alphanumerics
/// plus `%`.
#[inline]
pub(crate) fn is_keyword_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'%'
}

#[inline]
pub(crate) fn is_bad_keyword(keyword: &str) -> bool {
    BAD_KEYWORDS.contains(&keyword)
}
