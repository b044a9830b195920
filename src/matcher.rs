//! The per-class matcher: a keyword-partitioned index over URL filters with
//! lazily derived per-keyword sub-indices.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use once_cell::unsync::OnceCell;

use crate::compiled_patterns::CompiledPatterns;
use crate::filters::domains::domain_suffixes;
use crate::filters::{Filter, TypeMask};
use crate::filters_by_domain::FiltersByDomain;
use crate::request::UrlRequest;
use crate::utils::{is_bad_keyword, is_keyword_byte, RandomState};

/// Value side of the keyword index: a lone filter is stored directly and
/// upgraded to an insertion-ordered set on the second insertion.
#[derive(Debug)]
enum FilterBucket {
    One(Arc<Filter>),
    Set(Vec<Arc<Filter>>),
}

impl FilterBucket {
    fn len(&self) -> usize {
        match self {
            FilterBucket::One(_) => 1,
            FilterBucket::Set(filters) => filters.len(),
        }
    }

    fn iter(&self) -> std::slice::Iter<'_, Arc<Filter>> {
        match self {
            FilterBucket::One(filter) => std::slice::from_ref(filter).iter(),
            FilterBucket::Set(filters) => filters.iter(),
        }
    }

    fn insert(&mut self, filter: &Arc<Filter>) {
        match self {
            FilterBucket::One(existing) => {
                if existing.text() == filter.text() {
                    return;
                }
                let previous = Arc::clone(existing);
                *self = FilterBucket::Set(vec![previous, Arc::clone(filter)]);
            }
            FilterBucket::Set(filters) => {
                if !filters.iter().any(|f| f.text() == filter.text()) {
                    filters.push(Arc::clone(filter));
                }
            }
        }
    }

    /// Removes by text, collapsing a two-element set back to the direct
    /// form. Returns true when the bucket is now empty.
    fn remove(&mut self, text: &str) -> bool {
        match self {
            FilterBucket::One(existing) => existing.text() == text,
            FilterBucket::Set(filters) => {
                filters.retain(|f| f.text() != text);
                match filters.len() {
                    0 => true,
                    1 => {
                        let sole = Arc::clone(&filters[0]);
                        *self = FilterBucket::One(sole);
                        false
                    }
                    _ => false,
                }
            }
        }
    }
}

const SPECIAL_TYPE_LIST: [TypeMask; 6] = [
    TypeMask::POPUP,
    TypeMask::CSP,
    TypeMask::DOCUMENT,
    TypeMask::GENERICBLOCK,
    TypeMask::ELEMHIDE,
    TypeMask::GENERICHIDE,
];

/// Derived per-keyword state, rebuilt lazily after any mutation.
///
/// Simple filters (generic, default content type) are scanned linearly
/// behind a fused fast-reject regex; everything else goes through the
/// domain-partitioned index, with a per-special-type slice for queries that
/// name exactly one special type.
#[derive(Debug, Default)]
struct KeywordIndex {
    simple: Vec<Arc<Filter>>,
    complex: FiltersByDomain,
    by_type: HashMap<u32, FiltersByDomain, RandomState>,
    compiled: OnceCell<Option<CompiledPatterns>>,
}

impl KeywordIndex {
    fn compiled_patterns(&self) -> Option<&CompiledPatterns> {
        self.compiled
            .get_or_init(|| CompiledPatterns::compile(&self.simple))
            .as_ref()
    }
}

/// Keyword-indexed set of one filter class (blocking or whitelist).
#[derive(Debug, Default)]
pub struct Matcher {
    keyword_by_filter: HashMap<String, String, RandomState>,
    filters_by_keyword: HashMap<String, FilterBucket, RandomState>,
    derived: RefCell<HashMap<String, Rc<KeywordIndex>, RandomState>>,
}

impl Matcher {
    pub fn new() -> Matcher {
        Matcher::default()
    }

    /// Number of filters currently indexed.
    pub fn len(&self) -> usize {
        self.keyword_by_filter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyword_by_filter.is_empty()
    }

    pub fn clear(&mut self) {
        self.keyword_by_filter.clear();
        self.filters_by_keyword.clear();
        self.derived.get_mut().clear();
    }

    pub fn has(&self, filter: &Filter) -> bool {
        self.keyword_by_filter.contains_key(filter.text())
    }

    /// Indexes a URL filter under its rarest keyword. Duplicate adds and
    /// non-URL filters are ignored.
    pub fn add(&mut self, filter: &Arc<Filter>) {
        if filter.url_data().is_none() || self.has(filter) {
            return;
        }
        let keyword = self.find_keyword(filter);
        match self.filters_by_keyword.entry(keyword.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(FilterBucket::One(Arc::clone(filter)));
            }
            Entry::Occupied(mut slot) => slot.get_mut().insert(filter),
        }
        self.keyword_by_filter
            .insert(filter.text().to_owned(), keyword);
        self.invalidate();
    }

    /// Inverse of [`Matcher::add`]; unknown filters are ignored.
    pub fn remove(&mut self, filter: &Filter) {
        let Some(keyword) = self.keyword_by_filter.remove(filter.text()) else {
            return;
        };
        if let Some(bucket) = self.filters_by_keyword.get_mut(&keyword) {
            if bucket.remove(filter.text()) {
                self.filters_by_keyword.remove(&keyword);
            }
        }
        self.invalidate();
    }

    fn invalidate(&mut self) {
        let derived = self.derived.get_mut();
        if !derived.is_empty() {
            derived.clear();
        }
    }

    /// Picks the pattern keyword currently indexing the fewest filters,
    /// breaking ties towards the longer keyword. Returns `""` when the
    /// pattern yields no usable candidate (including pure regex filters).
    pub fn find_keyword(&self, filter: &Filter) -> String {
        let Some(pattern) = filter.url_data().and_then(|data| data.pattern()) else {
            return String::new();
        };
        let lowered;
        let pattern = if pattern.bytes().any(|b| b.is_ascii_uppercase()) {
            lowered = pattern.to_lowercase();
            &lowered
        } else {
            pattern
        };

        let mut result = "";
        let mut result_count = usize::MAX;
        let mut result_length = 0;
        for candidate in keyword_candidates(pattern) {
            if is_bad_keyword(candidate) {
                continue;
            }
            let count = self
                .filters_by_keyword
                .get(candidate)
                .map_or(0, FilterBucket::len);
            if count < result_count || (count == result_count && candidate.len() > result_length) {
                result = candidate;
                result_count = count;
                result_length = candidate.len();
            }
        }
        result.to_owned()
    }

    /// Returns the first filter in candidate order that matches the
    /// request.
    pub fn check(
        &self,
        request: &UrlRequest,
        type_mask: TypeMask,
        sitekey: Option<&str>,
        specific_only: bool,
    ) -> Option<Arc<Filter>> {
        if self.is_empty() {
            return None;
        }
        for keyword in request.candidate_keywords() {
            if let Some(hit) =
                self.check_entry_match(keyword, request, type_mask, sitekey, specific_only, None)
            {
                return Some(hit);
            }
        }
        None
    }

    /// Appends every matching filter to `hits`.
    pub fn check_all(
        &self,
        request: &UrlRequest,
        type_mask: TypeMask,
        sitekey: Option<&str>,
        specific_only: bool,
        hits: &mut Vec<Arc<Filter>>,
    ) {
        if self.is_empty() {
            return;
        }
        for keyword in request.candidate_keywords() {
            self.check_entry_match(keyword, request, type_mask, sitekey, specific_only, Some(hits));
        }
    }

    /// Checks one keyword bucket. Without `collection`, the first hit is
    /// returned; with it, every hit is appended and `None` is returned.
    pub fn check_entry_match(
        &self,
        keyword: &str,
        request: &UrlRequest,
        type_mask: TypeMask,
        sitekey: Option<&str>,
        specific_only: bool,
        mut collection: Option<&mut Vec<Arc<Filter>>>,
    ) -> Option<Arc<Filter>> {
        if !self.filters_by_keyword.contains_key(keyword) {
            return None;
        }
        let index = self.keyword_index(keyword);

        // Simple filters only ever match resource loads and are all
        // generic, so the whole set is skipped for specific-only queries.
        if !specific_only
            && type_mask.intersects(TypeMask::RESOURCE_TYPES)
            && !index.simple.is_empty()
        {
            let worth_scanning = index
                .compiled_patterns()
                .map_or(true, |patterns| patterns.test(request));
            if worth_scanning {
                for filter in &index.simple {
                    if filter.matches(request, type_mask, sitekey) {
                        match collection.as_deref_mut() {
                            None => return Some(Arc::clone(filter)),
                            Some(hits) => push_unique(hits, filter),
                        }
                    }
                }
            }
        }

        let by_domain = if type_mask.is_single_special() {
            match index.by_type.get(&type_mask.bits()) {
                Some(restricted) => restricted,
                None => return None,
            }
        } else {
            &index.complex
        };
        check_entry_match_by_domain(by_domain, request, type_mask, sitekey, specific_only, collection)
    }

    fn keyword_index(&self, keyword: &str) -> Rc<KeywordIndex> {
        if let Some(index) = self.derived.borrow().get(keyword) {
            return Rc::clone(index);
        }
        let index = Rc::new(self.build_keyword_index(keyword));
        self.derived
            .borrow_mut()
            .insert(keyword.to_owned(), Rc::clone(&index));
        index
    }

    fn build_keyword_index(&self, keyword: &str) -> KeywordIndex {
        let mut index = KeywordIndex::default();
        let Some(bucket) = self.filters_by_keyword.get(keyword) else {
            return index;
        };
        for filter in bucket.iter() {
            let Some(data) = filter.url_data() else {
                continue;
            };
            let simple = data.content_type == TypeMask::RESOURCE_TYPES
                && data.domains.is_none()
                && data.sitekeys.is_none();
            if simple {
                index.simple.push(Arc::clone(filter));
            } else {
                index.complex.add(filter);
                let specials = data.content_type & TypeMask::SPECIAL_TYPES;
                for special in SPECIAL_TYPE_LIST {
                    if specials.contains(special) {
                        index.by_type.entry(special.bits()).or_default().add(filter);
                    }
                }
            }
        }
        index
    }
}

/// Walks the domain suffixes of the document hostname from most specific to
/// least, honoring exclusions seen along the way: a filter applies iff the
/// most specific suffix that names it marks it as included.
fn check_entry_match_by_domain(
    filters_by_domain: &FiltersByDomain,
    request: &UrlRequest,
    type_mask: TypeMask,
    sitekey: Option<&str>,
    specific_only: bool,
    mut collection: Option<&mut Vec<Arc<Filter>>>,
) -> Option<Arc<Filter>> {
    let mut excluded: HashSet<&str, RandomState> = HashSet::default();
    let doc_domain = request.document_hostname().unwrap_or("");
    for suffix in domain_suffixes(doc_domain, !specific_only) {
        let Some(entry) = filters_by_domain.get(suffix) else {
            continue;
        };
        for (filter, include) in entry.iter() {
            if !include {
                excluded.insert(filter.text());
            } else if !excluded.contains(filter.text())
                && filter.matches(request, type_mask, sitekey)
            {
                match collection.as_deref_mut() {
                    None => return Some(Arc::clone(filter)),
                    Some(hits) => push_unique(hits, filter),
                }
            }
        }
    }
    None
}

fn push_unique(hits: &mut Vec<Arc<Filter>>, filter: &Arc<Filter>) {
    if !hits.iter().any(|f| f.text() == filter.text()) {
        hits.push(Arc::clone(filter));
    }
}

/// Keyword candidates of a filter pattern: runs of `[a-z0-9%]` of length at
/// least two, with a character on each side that is neither a keyword
/// character nor `*`.
fn keyword_candidates(pattern: &str) -> Vec<&str> {
    let bytes = pattern.as_bytes();
    let mut candidates = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if !is_keyword_byte(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && is_keyword_byte(bytes[i]) {
            i += 1;
        }
        let delimited_before = start > 0 && bytes[start - 1] != b'*';
        let delimited_after = i < bytes.len() && bytes[i] != b'*';
        if delimited_before && delimited_after && i - start >= 2 {
            candidates.push(&pattern[start..i]);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Filter;

    fn filter(text: &str) -> Arc<Filter> {
        Arc::new(Filter::parse(text))
    }

    fn request(url: &str, doc: &str) -> UrlRequest {
        UrlRequest::new(url, Some(doc))
    }

    #[test]
    fn keyword_candidates_need_delimiters_on_both_sides() {
        assert_eq!(keyword_candidates("/foo/bar"), vec!["foo"]);
        assert_eq!(keyword_candidates("/foo/bar/"), vec!["foo", "bar"]);
        // wildcards disqualify adjacent tokens
        assert_eq!(keyword_candidates("/foo*/bar/"), vec!["bar"]);
        assert_eq!(keyword_candidates("/*foo/bar/"), vec!["bar"]);
        // single characters are not keywords
        assert_eq!(keyword_candidates("/f/bar/"), vec!["bar"]);
        assert!(keyword_candidates("plain").is_empty());
    }

    #[test]
    fn find_keyword_prefers_rare_then_long() {
        let mut matcher = Matcher::new();
        // ties break towards the longer keyword
        assert_eq!(matcher.find_keyword(&filter("/ab/longer/")), "longer");

        matcher.add(&filter("/crowded/one"));
        matcher.add(&filter("/crowded/two"));
        // "crowded" now indexes two filters, "fresh" none
        assert_eq!(matcher.find_keyword(&filter("/crowded/fresh/")), "fresh");
    }

    #[test]
    fn find_keyword_skips_bad_keywords_and_regexes() {
        let matcher = Matcher::new();
        assert_eq!(matcher.find_keyword(&filter("|https://baz|")), "baz");
        assert_eq!(matcher.find_keyword(&filter("/com/js/")), "");
        assert_eq!(matcher.find_keyword(&filter("/ads[0-9]+/")), "");
        assert_eq!(matcher.find_keyword(&filter("ads")), "");
    }

    #[test]
    fn add_is_idempotent_and_remove_is_inverse() {
        let mut matcher = Matcher::new();
        let f = filter("^foo^");
        matcher.add(&f);
        matcher.add(&f);
        assert_eq!(matcher.len(), 1);
        assert!(matcher.has(&f));

        let req = request("https://a.com/foo/x", "p.com");
        assert!(matcher.check(&req, TypeMask::SCRIPT, None, false).is_some());

        matcher.remove(&f);
        matcher.remove(&f);
        assert!(!matcher.has(&f));
        assert!(matcher.is_empty());
        assert!(matcher.check(&req, TypeMask::SCRIPT, None, false).is_none());
    }

    #[test]
    fn fallback_bucket_catches_keywordless_filters() {
        let mut matcher = Matcher::new();
        matcher.add(&filter("ads"));
        let req = request("https://a.com/ads/x", "p.com");
        let hit = matcher.check(&req, TypeMask::SCRIPT, None, false).unwrap();
        assert_eq!(hit.text(), "ads");
    }

    #[test]
    fn specific_only_skips_generic_filters() {
        let mut matcher = Matcher::new();
        matcher.add(&filter("^foo^"));
        matcher.add(&filter("^foo^$domain=page.com"));

        let req = request("https://a.com/foo/x", "page.com");
        let hit = matcher.check(&req, TypeMask::SCRIPT, None, true).unwrap();
        assert_eq!(hit.text(), "^foo^$domain=page.com");

        let off_domain = request("https://a.com/foo/x", "other.com");
        assert!(matcher.check(&off_domain, TypeMask::SCRIPT, None, true).is_none());
        assert!(matcher.check(&off_domain, TypeMask::SCRIPT, None, false).is_some());
    }

    #[test]
    fn domain_exclusion_beats_parent_inclusion() {
        let mut matcher = Matcher::new();
        matcher.add(&filter("^foo^$domain=example.com|~www.example.com"));

        let on = request("http://x/foo", "example.com");
        assert!(matcher.check(&on, TypeMask::SCRIPT, None, false).is_some());

        let excluded = request("http://x/foo", "www.example.com");
        assert!(matcher.check(&excluded, TypeMask::SCRIPT, None, false).is_none());

        let sub = request("http://x/foo", "sub.example.com");
        assert!(matcher.check(&sub, TypeMask::SCRIPT, None, false).is_some());
    }

    #[test]
    fn single_special_type_uses_type_slice() {
        let mut matcher = Matcher::new();
        matcher.add(&filter("^foo^"));
        matcher.add(&filter("||frame.com^$popup"));

        let popup = request("https://frame.com/foo", "p.com");
        let hit = matcher.check(&popup, TypeMask::POPUP, None, false).unwrap();
        assert_eq!(hit.text(), "||frame.com^$popup");

        // no popup filters for this keyword bucket
        let miss = request("https://clean.org/x", "p.com");
        assert!(matcher.check(&miss, TypeMask::POPUP, None, false).is_none());
    }

    #[test]
    fn check_entry_match_collects_all_hits() {
        let mut matcher = Matcher::new();
        matcher.add(&filter("/foo/a"));
        matcher.add(&filter("/foo/ab"));
        matcher.add(&filter("/foo/zzz"));

        let req = request("https://a.com/foo/ab", "p.com");
        let mut hits = Vec::new();
        let result =
            matcher.check_entry_match("foo", &req, TypeMask::SCRIPT, None, false, Some(&mut hits));
        assert!(result.is_none());
        let texts: Vec<_> = hits.iter().map(|f| f.text()).collect();
        assert_eq!(texts, vec!["/foo/a", "/foo/ab"]);
    }

    #[test]
    fn order_of_adds_does_not_change_results() {
        let texts = [
            "^foo^",
            "^foo^$domain=example.com",
            "^foo^$domain=~example.com",
            "||a.com^$script",
            "/foo/bar$image",
        ];
        let requests = [
            ("https://a.com/foo/bar", "example.com", TypeMask::SCRIPT),
            ("https://a.com/foo/bar", "other.com", TypeMask::SCRIPT),
            ("https://a.com/foo/bar", "example.com", TypeMask::IMAGE),
        ];

        let build = |order: &[&str]| {
            let mut matcher = Matcher::new();
            for text in order {
                matcher.add(&filter(text));
            }
            matcher
        };
        let forward = build(&texts);
        let mut reversed_texts = texts;
        reversed_texts.reverse();
        let reversed = build(&reversed_texts);

        for (url, doc, mask) in requests {
            let req = request(url, doc);
            let mut a = Vec::new();
            let mut b = Vec::new();
            forward.check_all(&req, mask, None, false, &mut a);
            reversed.check_all(&req, mask, None, false, &mut b);
            let mut a: Vec<_> = a.iter().map(|f| f.text().to_owned()).collect();
            let mut b: Vec<_> = b.iter().map(|f| f.text().to_owned()).collect();
            a.sort();
            b.sort();
            assert_eq!(a, b, "results diverged for {} on {}", url, doc);
        }
    }

    #[test]
    fn oversized_bucket_matches_without_fast_reject() {
        let mut matcher = Matcher::new();
        for i in 0..150 {
            matcher.add(&filter(&format!("/adframe/y{}e", i)));
        }
        let req = request("https://a.com/adframe/y42e", "p.com");
        let hit = matcher.check(&req, TypeMask::SCRIPT, None, false).unwrap();
        assert_eq!(hit.text(), "/adframe/y42e");
    }
}
