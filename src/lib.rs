//! Keyword-partitioned URL filter matching engine.
//!
//! Given a large corpus of parsed filter rules and a stream of network
//! requests, the engine decides for each request whether a blocking rule
//! applies and whether a whitelist rule overrides it. Three layers keep the
//! per-request work small:
//!
//! * every filter is indexed under its rarest keyword, so a URL only ever
//!   meets the handful of filters sharing one of its tokens;
//! * domain-restricted filters sit in a per-keyword [`FiltersByDomain`]
//!   index walked from the most specific document-domain suffix down;
//! * a blocking and a whitelist [`Matcher`] are composed by
//!   [`CombinedMatcher`] behind a bounded LRU result cache.
//!
//! ```
//! use urlfilter::{CombinedMatcher, Filter, TypeMask};
//!
//! let mut matcher = CombinedMatcher::new();
//! matcher.add(&Filter::from_text("||ads.example.com^"));
//! matcher.add(&Filter::from_text("@@||ads.example.com^$domain=example.com"));
//!
//! let hit = matcher.check_url(
//!     "https://ads.example.com/banner.js",
//!     TypeMask::SCRIPT,
//!     Some("example.com"),
//!     None,
//!     false,
//! );
//! assert!(hit.unwrap().is_whitelist());
//! ```
//!
//! All state is in memory and owned by one thread; mutations invalidate the
//! derived indices and the result cache wholesale, queries rebuild them
//! lazily.

pub mod combined;
pub mod compiled_patterns;
pub mod filters;
pub mod filters_by_domain;
pub mod matcher;
pub mod request;
mod utils;

pub use combined::{
    CombinedMatcher, CombinedMatcherOptions, SearchResults, SearchScope, RESULT_CACHE_SIZE,
};
pub use compiled_patterns::{CompiledPatterns, COMPILE_PATTERNS_MAX};
pub use filters::{
    domain_suffixes, ContentFilterData, DomainMap, Filter, FilterKind, FilterParseError, TypeMask,
    UrlFilterData,
};
pub use filters_by_domain::{DomainEntry, FiltersByDomain};
pub use matcher::Matcher;
pub use request::UrlRequest;
