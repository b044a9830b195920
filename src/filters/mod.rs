//! The filter value model: canonical rule text plus a tagged payload for
//! each recognised rule kind.

pub mod domains;
pub mod network;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::request::UrlRequest;
use crate::utils::RandomState;

pub use domains::{domain_suffixes, DomainMap};
pub use network::{TypeMask, UrlFilterData};

/// Capacity of the process-wide [`Filter::from_text`] memo.
const FROM_TEXT_CACHE_SIZE: usize = 10_000;

/// Why a filter line could not be turned into a usable rule. Invalid
/// filters carry their reason and are never admitted to a matcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("empty filter")]
    Empty,
    #[error("unrecognised option `{0}`")]
    UnrecognisedOption(String),
    #[error("`{0}` is only allowed on exception filters")]
    ExceptionOnlyOption(String),
    #[error("`{0}` is not allowed on exception filters")]
    BlockingOnlyOption(&'static str),
    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),
    #[error("invalid domain list `{0}`")]
    InvalidDomain(String),
    #[error("sitekey option requires a value")]
    InvalidSitekey,
    #[error("invalid csp directive")]
    InvalidCsp,
    #[error("rewrite must name an abp-resource")]
    InvalidRewrite,
    #[error("filter requires a domain restriction")]
    MissingDomain,
}

/// Payload of an element-hiding or snippet filter. Selector bookkeeping is
/// handled elsewhere; only the pieces needed to classify and route the rule
/// are kept.
#[derive(Debug)]
pub struct ContentFilterData {
    pub domains: Option<DomainMap>,
    pub body: String,
}

#[derive(Debug)]
pub enum FilterKind {
    Blocking(UrlFilterData),
    Whitelist(UrlFilterData),
    ElemHide(ContentFilterData),
    ElemHideException(ContentFilterData),
    ElemHideEmulation(ContentFilterData),
    Snippet(ContentFilterData),
    Comment,
    Invalid(FilterParseError),
}

/// A single parsed rule. `text` is the canonical identity: two filters with
/// equal text are interchangeable everywhere.
#[derive(Debug)]
pub struct Filter {
    text: String,
    kind: FilterKind,
}

impl PartialEq for Filter {
    fn eq(&self, other: &Filter) -> bool {
        self.text == other.text
    }
}

impl Eq for Filter {}

impl std::hash::Hash for Filter {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\[adblock(?:plus[\d.]*)?\]$").unwrap());

static FROM_TEXT_CACHE: Lazy<Mutex<LruCache<String, Arc<Filter>, RandomState>>> =
    Lazy::new(|| {
        Mutex::new(LruCache::with_hasher(
            NonZeroUsize::new(FROM_TEXT_CACHE_SIZE).unwrap(),
            RandomState::default(),
        ))
    });

impl Filter {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.kind, FilterKind::Blocking(_))
    }

    pub fn is_whitelist(&self) -> bool {
        matches!(self.kind, FilterKind::Whitelist(_))
    }

    pub fn invalid_reason(&self) -> Option<&FilterParseError> {
        match &self.kind {
            FilterKind::Invalid(reason) => Some(reason),
            _ => None,
        }
    }

    /// The URL filter payload, present for blocking and whitelist rules.
    pub fn url_data(&self) -> Option<&UrlFilterData> {
        match &self.kind {
            FilterKind::Blocking(data) | FilterKind::Whitelist(data) => Some(data),
            _ => None,
        }
    }

    pub fn matches(&self, request: &UrlRequest, type_mask: TypeMask, sitekey: Option<&str>) -> bool {
        self.url_data()
            .map_or(false, |data| data.matches(request, type_mask, sitekey))
    }

    pub fn is_generic(&self) -> bool {
        self.url_data().map_or(false, UrlFilterData::is_generic)
    }

    pub fn is_active_on_domain(&self, doc_domain: Option<&str>, sitekey: Option<&str>) -> bool {
        self.url_data()
            .map_or(false, |data| data.is_active_on_domain(doc_domain, sitekey))
    }

    /// Canonicalizes raw list text: URL filter lines drop all whitespace,
    /// content filter lines are trimmed.
    pub fn normalize(text: &str) -> String {
        let trimmed = text.trim();
        if find_content_separator(trimmed).is_some() {
            trimmed.to_owned()
        } else {
            trimmed.chars().filter(|c| !c.is_whitespace()).collect()
        }
    }

    /// Parses a filter line without consulting the memo. Never fails:
    /// unusable lines become [`FilterKind::Invalid`].
    pub fn parse(text: &str) -> Filter {
        let text = Filter::normalize(text);
        let kind = Filter::classify(&text);
        if let FilterKind::Invalid(reason) = &kind {
            log::debug!("rejected filter {:?}: {}", text, reason);
        }
        Filter { text, kind }
    }

    /// Memoized construction: repeated calls with equal text return the same
    /// handle. The memo is process-wide and holds 10 000 entries.
    pub fn from_text(text: &str) -> Arc<Filter> {
        let mut cache = FROM_TEXT_CACHE.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(filter) = cache.get(text) {
            return Arc::clone(filter);
        }
        let filter = Arc::new(Filter::parse(text));
        cache.put(text.to_owned(), Arc::clone(&filter));
        filter
    }

    fn classify(text: &str) -> FilterKind {
        if text.is_empty() {
            return FilterKind::Invalid(FilterParseError::Empty);
        }
        if text.starts_with('!') || HEADER_RE.is_match(text) {
            return FilterKind::Comment;
        }
        if let Some((domains_end, marker, body_start)) = find_content_separator(text) {
            return Filter::classify_content(text, domains_end, marker, body_start);
        }
        let (body, is_exception) = match text.strip_prefix("@@") {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        match UrlFilterData::parse(body, is_exception) {
            Ok(data) if is_exception => FilterKind::Whitelist(data),
            Ok(data) => FilterKind::Blocking(data),
            Err(reason) => FilterKind::Invalid(reason),
        }
    }

    fn classify_content(text: &str, domains_end: usize, marker: u8, body_start: usize) -> FilterKind {
        let body = text[body_start..].trim();
        if body.is_empty() {
            return FilterKind::Invalid(FilterParseError::Empty);
        }
        let domains_part = &text[..domains_end];
        let domains = if domains_part.is_empty() {
            None
        } else {
            Some(DomainMap::parse(domains_part, ','))
        };
        let data = ContentFilterData {
            domains,
            body: body.to_owned(),
        };
        match marker {
            0 => FilterKind::ElemHide(data),
            b'@' => FilterKind::ElemHideException(data),
            b'?' | b'$' => {
                // Emulation and snippet filters must not run generically.
                let restricted = data.domains.as_ref().map_or(false, |d| {
                    d.iter().any(|(domain, include)| include && !domain.is_empty())
                });
                if !restricted {
                    return FilterKind::Invalid(FilterParseError::MissingDomain);
                }
                if marker == b'?' {
                    FilterKind::ElemHideEmulation(data)
                } else {
                    FilterKind::Snippet(data)
                }
            }
            _ => unreachable!(),
        }
    }
}

/// Locates a content-filter separator (`##`, `#@#`, `#?#` or `#$#`),
/// returning the domain-part end, a marker byte (0 for plain `##`) and the
/// body start.
fn find_content_separator(text: &str) -> Option<(usize, u8, usize)> {
    let bytes = text.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'#') => return Some((i, 0, i + 2)),
            Some(&marker)
                if matches!(marker, b'@' | b'?' | b'$') && bytes.get(i + 2) == Some(&b'#') =>
            {
                return Some((i, marker, i + 3))
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_comments() {
        assert!(matches!(Filter::parse("! a comment").kind(), FilterKind::Comment));
        assert!(matches!(
            Filter::parse("[Adblock Plus 2.0]").kind(),
            FilterKind::Comment
        ));
    }

    #[test]
    fn classifies_url_filter_kinds() {
        assert!(Filter::parse("||ads.example.com^").is_blocking());
        assert!(Filter::parse("@@||ads.example.com^").is_whitelist());
        assert!(matches!(
            Filter::parse("").kind(),
            FilterKind::Invalid(FilterParseError::Empty)
        ));
    }

    #[test]
    fn classifies_content_filter_kinds() {
        let elemhide = Filter::parse("example.com##.ad-banner");
        match elemhide.kind() {
            FilterKind::ElemHide(data) => {
                assert_eq!(data.body, ".ad-banner");
                assert_eq!(data.domains.as_ref().unwrap().get("example.com"), Some(true));
            }
            other => panic!("unexpected kind: {:?}", other),
        }

        assert!(matches!(
            Filter::parse("example.com#@#.ad-banner").kind(),
            FilterKind::ElemHideException(_)
        ));
        assert!(matches!(
            Filter::parse("example.com#?#div:-abp-has(.ad)").kind(),
            FilterKind::ElemHideEmulation(_)
        ));
        assert!(matches!(
            Filter::parse("example.com#$#log 'hi'").kind(),
            FilterKind::Snippet(_)
        ));
        // generic emulation and snippet filters are rejected
        assert!(matches!(
            Filter::parse("#?#div:-abp-has(.ad)").kind(),
            FilterKind::Invalid(FilterParseError::MissingDomain)
        ));
        assert!(matches!(
            Filter::parse("~example.com#$#log 'hi'").kind(),
            FilterKind::Invalid(FilterParseError::MissingDomain)
        ));
    }

    #[test]
    fn normalize_strips_whitespace_from_url_filters() {
        assert_eq!(Filter::normalize("  ||ads. example.com ^ "), "||ads.example.com^");
        assert_eq!(
            Filter::normalize("  example.com## .ad "),
            "example.com## .ad"
        );
    }

    #[test]
    fn from_text_memoizes_by_text() {
        let first = Filter::from_text("||memo-test.example.com^");
        let second = Filter::from_text("||memo-test.example.com^");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.text(), "||memo-test.example.com^");
    }

    #[test]
    fn equality_is_by_text() {
        let a = Filter::parse("||example.com^$script");
        let b = Filter::parse("||example.com^$script");
        assert_eq!(a, b);
    }
}
