//! A derived, cache-friendly view of one network request. Built once per
//! match call and discarded afterwards.

use memchr::memchr;
use smallvec::SmallVec;

use crate::utils::{is_bad_keyword, is_keyword_byte};

/// Everything the matchers need to know about a request: the URL in both
/// case variants, the normalized document hostname, the third-party flag
/// and the candidate keywords extracted from the lowercased URL.
#[derive(Debug)]
pub struct UrlRequest {
    href: String,
    lower_case_href: String,
    document_hostname: Option<String>,
    third_party: bool,
    keyword_ranges: SmallVec<[(u32, u32); 16]>,
}

impl UrlRequest {
    /// Builds the request view for `url` loaded by a page on `doc_domain`.
    /// The request is third-party when the two registrable domains differ;
    /// with no document domain it counts as first-party.
    pub fn new(url: &str, doc_domain: Option<&str>) -> UrlRequest {
        let href = url.to_owned();
        let lower_case_href = url.to_lowercase();
        let document_hostname = doc_domain
            .filter(|domain| !domain.is_empty())
            .map(normalize_hostname);
        let third_party = match (&document_hostname, extract_host(&lower_case_href)) {
            (Some(doc), Some(host)) => registrable_domain(host) != registrable_domain(doc),
            _ => false,
        };
        let keyword_ranges = extract_keyword_ranges(&lower_case_href);
        UrlRequest {
            href,
            lower_case_href,
            document_hostname,
            third_party,
            keyword_ranges,
        }
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn lower_case_href(&self) -> &str {
        &self.lower_case_href
    }

    /// Lowercased document hostname with any trailing dot removed.
    pub fn document_hostname(&self) -> Option<&str> {
        self.document_hostname.as_deref()
    }

    pub fn is_third_party(&self) -> bool {
        self.third_party
    }

    /// Candidate keywords in extraction order, ending with the fallback
    /// bucket `""`.
    pub fn candidate_keywords(&self) -> impl Iterator<Item = &str> {
        self.keyword_ranges
            .iter()
            .map(move |&(start, end)| &self.lower_case_href[start as usize..end as usize])
            .chain(std::iter::once(""))
    }
}

fn extract_keyword_ranges(lower_href: &str) -> SmallVec<[(u32, u32); 16]> {
    let mut ranges = SmallVec::new();
    let bytes = lower_href.as_bytes();
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
        if i - start >= 2 && !is_bad_keyword(&lower_href[start..i]) {
            ranges.push((start as u32, i as u32));
        }
    }
    ranges
}

/// Host extraction without a full URL parse: the scheme, optional userinfo
/// and port are peeled off byte-wise.
fn extract_host(url: &str) -> Option<&str> {
    let bytes = url.as_bytes();
    let colon = memchr(b':', bytes)?;
    if bytes.len() < colon + 3 || bytes[colon + 1] != b'/' || bytes[colon + 2] != b'/' {
        return None;
    }
    let authority_start = colon + 3;
    let mut end = bytes.len();
    for (i, &b) in bytes[authority_start..].iter().enumerate() {
        if matches!(b, b'/' | b'?' | b'#') {
            end = authority_start + i;
            break;
        }
    }
    let authority = &url[authority_start..end];
    let host = match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    };
    if host.starts_with('[') {
        return host.find(']').map(|close| &host[..=close]);
    }
    match host.rfind(':') {
        Some(port) => Some(&host[..port]),
        None => Some(host),
    }
}

fn normalize_hostname(host: &str) -> String {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    if trimmed.is_ascii() {
        trimmed.to_ascii_lowercase()
    } else {
        idna::domain_to_ascii(trimmed).unwrap_or_else(|_| trimmed.to_lowercase())
    }
}

fn registrable_domain(host: &str) -> &str {
    addr::parse_domain_name(host)
        .ok()
        .and_then(|name| name.root())
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_candidate_keywords_in_order() {
        let request = UrlRequest::new("https://sub.example.com/foo/bar.js?q=1", None);
        let keywords: Vec<_> = request.candidate_keywords().collect();
        // "https", "com" and "js" are bad keywords, "q" is too short
        assert_eq!(keywords, vec!["sub", "example", "foo", "bar", ""]);
    }

    #[test]
    fn empty_url_still_yields_fallback_keyword() {
        let request = UrlRequest::new("", None);
        assert_eq!(request.candidate_keywords().collect::<Vec<_>>(), vec![""]);
    }

    #[test]
    fn third_party_follows_registrable_domains() {
        let first = UrlRequest::new("https://static.example.com/a.js", Some("www.example.com"));
        assert!(!first.is_third_party());

        let third = UrlRequest::new("https://tracker.com/a.js", Some("www.example.com"));
        assert!(third.is_third_party());

        let no_doc = UrlRequest::new("https://tracker.com/a.js", None);
        assert!(!no_doc.is_third_party());
    }

    #[test]
    fn document_hostname_is_normalized() {
        let request = UrlRequest::new("https://a.com/x", Some("WWW.Example.COM."));
        assert_eq!(request.document_hostname(), Some("www.example.com"));

        let blank = UrlRequest::new("https://a.com/x", Some(""));
        assert_eq!(blank.document_hostname(), None);
    }

    #[test]
    fn host_extraction_handles_ports_userinfo_and_missing_scheme() {
        assert_eq!(extract_host("https://example.com/x"), Some("example.com"));
        assert_eq!(extract_host("https://example.com:8080/x"), Some("example.com"));
        assert_eq!(extract_host("https://user@example.com/x"), Some("example.com"));
        assert_eq!(extract_host("example.com/x"), None);
    }

    #[test]
    fn href_keeps_original_case() {
        let request = UrlRequest::new("https://a.com/AdBanner", Some("a.com"));
        assert_eq!(request.href(), "https://a.com/AdBanner");
        assert_eq!(request.lower_case_href(), "https://a.com/adbanner");
    }
}
