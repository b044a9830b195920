//! Composition of the blocking and whitelist matchers behind the bounded
//! result cache.

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::filters::{Filter, FilterKind, TypeMask};
use crate::matcher::Matcher;
use crate::request::UrlRequest;
use crate::utils::RandomState;

/// Capacity of the result cache.
pub const RESULT_CACHE_SIZE: usize = 10_000;

/// Which filter classes [`CombinedMatcher::search`] should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    All,
    Blocking,
    Whitelist,
}

/// All matching filters of each class for one query.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub blocking: Vec<Arc<Filter>>,
    pub whitelist: Vec<Arc<Filter>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheOp {
    Check,
    Search(SearchScope),
}

// Structured key rather than a concatenated string, so distinct queries can
// never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    op: CacheOp,
    href: String,
    type_mask: u32,
    doc_hostname: Option<String>,
    sitekey: Option<String>,
    specific_only: bool,
}

impl CacheKey {
    fn new(
        op: CacheOp,
        request: &UrlRequest,
        type_mask: TypeMask,
        sitekey: Option<&str>,
        specific_only: bool,
    ) -> CacheKey {
        CacheKey {
            op,
            href: request.href().to_owned(),
            type_mask: type_mask.bits(),
            doc_hostname: request.document_hostname().map(str::to_owned),
            sitekey: sitekey.map(str::to_owned),
            specific_only,
        }
    }
}

#[derive(Clone)]
enum CacheValue {
    Check(Option<Arc<Filter>>),
    Search(SearchResults),
}

/// Options used when constructing a [`CombinedMatcher`].
pub struct CombinedMatcherOptions {
    pub cache_size: usize,
}

impl Default for CombinedMatcherOptions {
    fn default() -> CombinedMatcherOptions {
        CombinedMatcherOptions {
            cache_size: RESULT_CACHE_SIZE,
        }
    }
}

/// Two per-class matchers plus the result cache. Whitelist hits take
/// precedence over blocking hits.
pub struct CombinedMatcher {
    blocking: Matcher,
    whitelist: Matcher,
    cache: RefCell<LruCache<CacheKey, CacheValue, RandomState>>,
}

impl Default for CombinedMatcher {
    fn default() -> CombinedMatcher {
        CombinedMatcher::new()
    }
}

impl CombinedMatcher {
    pub fn new() -> CombinedMatcher {
        CombinedMatcher::with_options(CombinedMatcherOptions::default())
    }

    pub fn with_options(options: CombinedMatcherOptions) -> CombinedMatcher {
        let capacity = NonZeroUsize::new(options.cache_size).unwrap_or(NonZeroUsize::MIN);
        CombinedMatcher {
            blocking: Matcher::new(),
            whitelist: Matcher::new(),
            cache: RefCell::new(LruCache::with_hasher(capacity, RandomState::default())),
        }
    }

    pub fn blocking(&self) -> &Matcher {
        &self.blocking
    }

    pub fn whitelist(&self) -> &Matcher {
        &self.whitelist
    }

    /// Routes a filter to its class matcher. Filters that are not URL
    /// filters are ignored.
    pub fn add(&mut self, filter: &Arc<Filter>) {
        match filter.kind() {
            FilterKind::Whitelist(_) => self.whitelist.add(filter),
            FilterKind::Blocking(_) => self.blocking.add(filter),
            _ => {
                log::debug!("not a URL filter, not indexed: {:?}", filter.text());
                return;
            }
        }
        self.cache.get_mut().clear();
    }

    pub fn remove(&mut self, filter: &Filter) {
        match filter.kind() {
            FilterKind::Whitelist(_) => self.whitelist.remove(filter),
            FilterKind::Blocking(_) => self.blocking.remove(filter),
            _ => return,
        }
        self.cache.get_mut().clear();
    }

    pub fn has(&self, filter: &Filter) -> bool {
        match filter.kind() {
            FilterKind::Whitelist(_) => self.whitelist.has(filter),
            _ => self.blocking.has(filter),
        }
    }

    pub fn clear(&mut self) {
        self.blocking.clear();
        self.whitelist.clear();
        self.cache.get_mut().clear();
    }

    /// Finds the filter governing this request. A whitelist hit suppresses
    /// a blocking hit; the whitelist is only consulted once a blocker
    /// matched or the query named a whitelisting type.
    pub fn check(
        &self,
        request: &UrlRequest,
        type_mask: TypeMask,
        sitekey: Option<&str>,
        specific_only: bool,
    ) -> Option<Arc<Filter>> {
        let key = CacheKey::new(CacheOp::Check, request, type_mask, sitekey, specific_only);
        if let Some(CacheValue::Check(result)) = self.cache.borrow_mut().get(&key) {
            return result.clone();
        }
        let result = self.check_uncached(request, type_mask, sitekey, specific_only);
        self.cache
            .borrow_mut()
            .put(key, CacheValue::Check(result.clone()));
        result
    }

    fn check_uncached(
        &self,
        request: &UrlRequest,
        type_mask: TypeMask,
        sitekey: Option<&str>,
        specific_only: bool,
    ) -> Option<Arc<Filter>> {
        let mut blocking_hit = None;
        if type_mask.intersects(!TypeMask::WHITELISTING_TYPES) {
            blocking_hit = self.blocking.check(request, type_mask, sitekey, specific_only);
        }
        let mut whitelist_hit = None;
        if blocking_hit.is_some() || type_mask.intersects(TypeMask::WHITELISTING_TYPES) {
            whitelist_hit = self.whitelist.check(request, type_mask, sitekey, false);
        }
        whitelist_hit.or(blocking_hit)
    }

    /// Walks all candidates through both matchers and reports every match
    /// of the requested classes.
    pub fn search(
        &self,
        request: &UrlRequest,
        type_mask: TypeMask,
        sitekey: Option<&str>,
        specific_only: bool,
        scope: SearchScope,
    ) -> SearchResults {
        let key = CacheKey::new(
            CacheOp::Search(scope),
            request,
            type_mask,
            sitekey,
            specific_only,
        );
        if let Some(CacheValue::Search(results)) = self.cache.borrow_mut().get(&key) {
            return results.clone();
        }
        let mut results = SearchResults::default();
        if matches!(scope, SearchScope::All | SearchScope::Blocking) {
            self.blocking
                .check_all(request, type_mask, sitekey, specific_only, &mut results.blocking);
        }
        if matches!(scope, SearchScope::All | SearchScope::Whitelist) {
            self.whitelist
                .check_all(request, type_mask, sitekey, false, &mut results.whitelist);
        }
        self.cache
            .borrow_mut()
            .put(key, CacheValue::Search(results.clone()));
        results
    }

    pub fn is_whitelisted(&self, request: &UrlRequest, type_mask: TypeMask, sitekey: Option<&str>) -> bool {
        self.whitelist.check(request, type_mask, sitekey, false).is_some()
    }

    /// Convenience wrapper building the request view in place.
    pub fn check_url(
        &self,
        url: &str,
        type_mask: TypeMask,
        doc_domain: Option<&str>,
        sitekey: Option<&str>,
        specific_only: bool,
    ) -> Option<Arc<Filter>> {
        self.check(&UrlRequest::new(url, doc_domain), type_mask, sitekey, specific_only)
    }
}
