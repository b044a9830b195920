//! Fused fast-reject regexes over a keyword bucket's simple filters.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::filters::Filter;
use crate::request::UrlRequest;

/// Largest bucket that still gets a fused fast-reject regex.
pub const COMPILE_PATTERNS_MAX: usize = 100;

/// One alternation per case variant over a bucket of filters. A miss on
/// both proves no filter in the bucket can match; a hit means the
/// per-filter checks are worth running.
#[derive(Debug)]
pub struct CompiledPatterns {
    case_sensitive: Option<Regex>,
    case_insensitive: Option<Regex>,
}

impl CompiledPatterns {
    /// Fuses the given URL filters. Returns `None` when the bucket exceeds
    /// [`COMPILE_PATTERNS_MAX`] or a fused regex fails to build, in which
    /// case the fast reject is simply skipped.
    pub fn compile(filters: &[Arc<Filter>]) -> Option<CompiledPatterns> {
        if filters.is_empty() || filters.len() > COMPILE_PATTERNS_MAX {
            return None;
        }
        let mut sensitive: Vec<String> = Vec::new();
        let mut insensitive: Vec<String> = Vec::new();
        for filter in filters {
            let data = filter.url_data()?;
            let source = format!("(?:{})", data.regex_source());
            if data.match_case {
                sensitive.push(source);
            } else {
                insensitive.push(source);
            }
        }
        let case_sensitive = match build_alternation(&sensitive, false) {
            Ok(regex) => regex,
            Err(err) => {
                log::debug!("fast reject disabled: {}", err);
                return None;
            }
        };
        let case_insensitive = match build_alternation(&insensitive, true) {
            Ok(regex) => regex,
            Err(err) => {
                log::debug!("fast reject disabled: {}", err);
                return None;
            }
        };
        Some(CompiledPatterns {
            case_sensitive,
            case_insensitive,
        })
    }

    /// True when either fused regex matches its case variant of the URL.
    pub fn test(&self, request: &UrlRequest) -> bool {
        self.case_sensitive
            .as_ref()
            .map_or(false, |regex| regex.is_match(request.href()))
            || self
                .case_insensitive
                .as_ref()
                .map_or(false, |regex| regex.is_match(request.lower_case_href()))
    }
}

fn build_alternation(sources: &[String], case_insensitive: bool) -> Result<Option<Regex>, regex::Error> {
    if sources.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(&sources.join("|"))
        .case_insensitive(case_insensitive)
        .build()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Filter;

    fn filters(texts: &[&str]) -> Vec<Arc<Filter>> {
        texts.iter().map(|t| Arc::new(Filter::parse(t))).collect()
    }

    #[test]
    fn fused_regex_accepts_and_rejects() {
        let patterns = CompiledPatterns::compile(&filters(&["^foo^", "banner|", "||ads.net^"])).unwrap();
        assert!(patterns.test(&UrlRequest::new("https://a.com/foo/x", None)));
        assert!(patterns.test(&UrlRequest::new("https://a.com/banner", None)));
        assert!(patterns.test(&UrlRequest::new("https://ads.net/x", None)));
        assert!(!patterns.test(&UrlRequest::new("https://a.com/clean.js", None)));
    }

    #[test]
    fn case_variants_are_split() {
        let patterns = CompiledPatterns::compile(&filters(&["AdBanner$match-case", "tracker"])).unwrap();
        assert!(patterns.test(&UrlRequest::new("https://a.com/AdBanner", None)));
        assert!(!patterns.test(&UrlRequest::new("https://a.com/adbanner", None)));
        assert!(patterns.test(&UrlRequest::new("https://a.com/TRACKER", None)));
    }

    #[test]
    fn oversized_bucket_disables_fast_reject() {
        let texts: Vec<String> = (0..COMPILE_PATTERNS_MAX + 1)
            .map(|i| format!("/bucket/item{}^", i))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        assert!(CompiledPatterns::compile(&filters(&refs)).is_none());

        let small: Vec<&str> = refs[..COMPILE_PATTERNS_MAX].to_vec();
        assert!(CompiledPatterns::compile(&filters(&small)).is_some());
    }

    #[test]
    fn empty_bucket_has_no_fast_reject() {
        assert!(CompiledPatterns::compile(&[]).is_none());
    }
}
