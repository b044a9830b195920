//! URL filter payloads: the content-type universe, filter options, pattern
//! translation and the per-filter match predicate.

use once_cell::sync::{Lazy, OnceCell};
use regex::{Regex, RegexBuilder};

use crate::filters::domains::{domain_suffixes, DomainMap};
use crate::filters::FilterParseError;
use crate::request::UrlRequest;

bitflags::bitflags! {
    /// Content-type universe over which filters and queries are matched.
    ///
    /// Resource types occupy the low bits; special types live high so the
    /// derived masks stay disjoint. `RESOURCE_TYPES` is the default content
    /// type of a filter with no type options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeMask: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;
        const WEBSOCKET = 1 << 6;
        const WEBRTC = 1 << 7;
        const PING = 1 << 8;
        const XMLHTTPREQUEST = 1 << 9;
        const MEDIA = 1 << 10;
        const FONT = 1 << 11;

        const POPUP = 1 << 24;
        const CSP = 1 << 25;
        const DOCUMENT = 1 << 26;
        const GENERICBLOCK = 1 << 27;
        const ELEMHIDE = 1 << 28;
        const GENERICHIDE = 1 << 29;

        const RESOURCE_TYPES = Self::OTHER.bits()
            | Self::SCRIPT.bits()
            | Self::IMAGE.bits()
            | Self::STYLESHEET.bits()
            | Self::OBJECT.bits()
            | Self::SUBDOCUMENT.bits()
            | Self::WEBSOCKET.bits()
            | Self::WEBRTC.bits()
            | Self::PING.bits()
            | Self::XMLHTTPREQUEST.bits()
            | Self::MEDIA.bits()
            | Self::FONT.bits();

        const SPECIAL_TYPES = Self::POPUP.bits()
            | Self::CSP.bits()
            | Self::DOCUMENT.bits()
            | Self::GENERICBLOCK.bits()
            | Self::ELEMHIDE.bits()
            | Self::GENERICHIDE.bits();

        /// Special types that only exception filters may carry.
        const WHITELISTING_TYPES = Self::DOCUMENT.bits()
            | Self::GENERICBLOCK.bits()
            | Self::ELEMHIDE.bits()
            | Self::GENERICHIDE.bits();
    }
}

impl TypeMask {
    fn from_option_name(name: &str) -> Option<TypeMask> {
        Some(match name {
            "other" => TypeMask::OTHER,
            "script" => TypeMask::SCRIPT,
            "image" | "background" => TypeMask::IMAGE,
            "stylesheet" => TypeMask::STYLESHEET,
            "object" | "object-subrequest" => TypeMask::OBJECT,
            "subdocument" => TypeMask::SUBDOCUMENT,
            "websocket" => TypeMask::WEBSOCKET,
            "webrtc" => TypeMask::WEBRTC,
            "ping" => TypeMask::PING,
            "xmlhttprequest" => TypeMask::XMLHTTPREQUEST,
            "media" => TypeMask::MEDIA,
            "font" => TypeMask::FONT,
            "popup" => TypeMask::POPUP,
            "csp" => TypeMask::CSP,
            "document" => TypeMask::DOCUMENT,
            "genericblock" => TypeMask::GENERICBLOCK,
            "elemhide" => TypeMask::ELEMHIDE,
            "generichide" => TypeMask::GENERICHIDE,
            _ => return None,
        })
    }

    /// True for a mask with exactly one bit set, that bit being a special
    /// type. Such queries dispatch through the per-type sub-index.
    pub(crate) fn is_single_special(self) -> bool {
        self.bits().count_ones() == 1 && TypeMask::SPECIAL_TYPES.contains(self)
    }
}

/// Pattern payload of a URL filter: a wildcard/anchor pattern compiled to a
/// regex on first use, or a verbatim `/…/` literal compiled at parse time.
#[derive(Debug)]
enum UrlPattern {
    Pattern {
        source: String,
        compiled: OnceCell<Option<Regex>>,
    },
    Regex {
        source: String,
        regex: Regex,
    },
}

#[derive(Debug)]
pub struct UrlFilterData {
    pub content_type: TypeMask,
    pub match_case: bool,
    /// `None` matches either party, `Some(true)` only third-party requests,
    /// `Some(false)` only first-party requests.
    pub third_party: Option<bool>,
    pub domains: Option<DomainMap>,
    /// Uppercased public-key identifiers from `$sitekey=`.
    pub sitekeys: Option<Vec<String>>,
    /// Internal resource name from `$rewrite=abp-resource:…`.
    pub rewrite: Option<String>,
    pub csp: Option<String>,
    pattern: UrlPattern,
}

// Options must look like a well-formed option list at the very end of the
// line, otherwise the `$` belongs to the pattern (e.g. regex literals).
static OPTIONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(~?[\w-]+(?:=[^,]*)?(?:,~?[\w-]+(?:=[^,]*)?)*)$").unwrap()
});

impl UrlFilterData {
    /// Parses the part of a URL filter line after any `@@` marker.
    pub(crate) fn parse(line: &str, is_exception: bool) -> Result<UrlFilterData, FilterParseError> {
        let (pattern_text, options) = match OPTIONS_RE.captures(line) {
            Some(caps) => {
                let whole = caps.get(0).unwrap();
                (&line[..whole.start()], Some(caps.get(1).unwrap().as_str()))
            }
            None => (line, None),
        };

        let mut content_type: Option<TypeMask> = None;
        let mut match_case = false;
        let mut third_party: Option<bool> = None;
        let mut domains: Option<DomainMap> = None;
        let mut sitekeys: Option<Vec<String>> = None;
        let mut rewrite: Option<String> = None;
        let mut csp: Option<String> = None;

        for raw_option in options.into_iter().flat_map(|o| o.split(',')) {
            let negated = raw_option.starts_with('~');
            let option = raw_option.trim_start_matches('~');
            let (name, value) = match option.split_once('=') {
                Some((name, value)) => (name, value),
                None => (option, ""),
            };
            let name = name.to_ascii_lowercase();

            match (name.as_str(), negated) {
                ("match-case", false) => match_case = true,
                ("third-party", false) => third_party = Some(true),
                ("third-party", true) => third_party = Some(false),
                ("domain", false) => {
                    if value.is_empty() {
                        return Err(FilterParseError::InvalidDomain(raw_option.to_owned()));
                    }
                    domains = Some(DomainMap::parse(value, '|'));
                }
                ("sitekey", false) => {
                    if value.is_empty() {
                        return Err(FilterParseError::InvalidSitekey);
                    }
                    sitekeys = Some(value.split('|').map(|k| k.to_ascii_uppercase()).collect());
                }
                ("rewrite", false) => {
                    if is_exception {
                        return Err(FilterParseError::BlockingOnlyOption("rewrite"));
                    }
                    match value.strip_prefix("abp-resource:") {
                        Some(resource) if !resource.is_empty() => {
                            rewrite = Some(resource.to_owned());
                        }
                        _ => return Err(FilterParseError::InvalidRewrite),
                    }
                }
                ("csp", false) => {
                    let lowered = value.to_ascii_lowercase();
                    if lowered.contains("report-uri") || lowered.contains("report-to") {
                        return Err(FilterParseError::InvalidCsp);
                    }
                    if !is_exception && value.is_empty() {
                        return Err(FilterParseError::InvalidCsp);
                    }
                    apply_type_option(&mut content_type, TypeMask::CSP, false);
                    if !value.is_empty() {
                        csp = Some(value.to_owned());
                    }
                }
                _ => match TypeMask::from_option_name(&name) {
                    Some(mask) => {
                        if !negated
                            && !is_exception
                            && TypeMask::WHITELISTING_TYPES.contains(mask)
                        {
                            return Err(FilterParseError::ExceptionOnlyOption(name));
                        }
                        apply_type_option(&mut content_type, mask, negated);
                    }
                    None => {
                        return Err(FilterParseError::UnrecognisedOption(raw_option.to_owned()))
                    }
                },
            }
        }

        if rewrite.is_some() {
            let restricted = third_party == Some(false)
                || domains
                    .as_ref()
                    .map_or(false, |d| d.iter().any(|(domain, inc)| inc && !domain.is_empty()));
            if !restricted {
                return Err(FilterParseError::MissingDomain);
            }
        }

        let pattern = if pattern_text.len() >= 2
            && pattern_text.starts_with('/')
            && pattern_text.ends_with('/')
        {
            let source = pattern_text[1..pattern_text.len() - 1].to_owned();
            let regex = RegexBuilder::new(&source)
                .case_insensitive(!match_case)
                .build()
                .map_err(|err| FilterParseError::InvalidRegex(err.to_string()))?;
            UrlPattern::Regex { source, regex }
        } else {
            let source = if match_case {
                pattern_text.to_owned()
            } else {
                pattern_text.to_lowercase()
            };
            UrlPattern::Pattern {
                source,
                compiled: OnceCell::new(),
            }
        };

        Ok(UrlFilterData {
            content_type: content_type.unwrap_or(TypeMask::RESOURCE_TYPES),
            match_case,
            third_party,
            domains,
            sitekeys,
            rewrite,
            csp,
            pattern,
        })
    }

    /// The wildcard pattern text, or `None` for a regex-literal filter.
    pub fn pattern(&self) -> Option<&str> {
        match &self.pattern {
            UrlPattern::Pattern { source, .. } => Some(source),
            UrlPattern::Regex { .. } => None,
        }
    }

    /// Regex source contributed to a fused fast-reject alternation.
    pub(crate) fn regex_source(&self) -> String {
        match &self.pattern {
            UrlPattern::Pattern { source, .. } => pattern_to_regex_source(source),
            UrlPattern::Regex { source, .. } => source.clone(),
        }
    }

    /// A generic filter is restricted neither to specific domains nor to a
    /// sitekey.
    pub fn is_generic(&self) -> bool {
        self.sitekeys.is_none()
            && self
                .domains
                .as_ref()
                .map_or(true, |domains| domains.applies_generically())
    }

    /// Whether the filter is switched on for a page on `doc_domain` given
    /// the sitekey the page supplied, walking domain suffixes from the most
    /// specific down.
    pub fn is_active_on_domain(&self, doc_domain: Option<&str>, sitekey: Option<&str>) -> bool {
        if let Some(keys) = &self.sitekeys {
            let supplied = match sitekey {
                Some(key) => key.to_ascii_uppercase(),
                None => return false,
            };
            if !keys.iter().any(|key| *key == supplied) {
                return false;
            }
        }
        let Some(domains) = &self.domains else {
            return true;
        };
        match doc_domain {
            None => domains.applies_generically(),
            Some(doc) => {
                for suffix in domain_suffixes(doc, true) {
                    if let Some(include) = domains.get(suffix) {
                        return include;
                    }
                }
                false
            }
        }
    }

    /// Full match predicate: content type, party, URL pattern and domain
    /// activation must all pass.
    pub fn matches(&self, request: &UrlRequest, type_mask: TypeMask, sitekey: Option<&str>) -> bool {
        if (self.content_type & type_mask).is_empty() {
            return false;
        }
        if let Some(third_party) = self.third_party {
            if third_party != request.is_third_party() {
                return false;
            }
        }
        if !self.matches_location(request) {
            return false;
        }
        self.is_active_on_domain(request.document_hostname(), sitekey)
    }

    fn matches_location(&self, request: &UrlRequest) -> bool {
        match &self.pattern {
            UrlPattern::Regex { regex, .. } => regex.is_match(request.href()),
            UrlPattern::Pattern { source, compiled } => {
                let haystack = if self.match_case {
                    request.href()
                } else {
                    request.lower_case_href()
                };
                // A pattern with no wildcards or anchors is a plain
                // substring.
                if !source.bytes().any(|b| matches!(b, b'*' | b'^' | b'|')) {
                    return haystack.contains(source.as_str());
                }
                match compiled.get_or_init(|| Regex::new(&pattern_to_regex_source(source)).ok()) {
                    Some(regex) => regex.is_match(haystack),
                    None => false,
                }
            }
        }
    }
}

fn apply_type_option(content_type: &mut Option<TypeMask>, mask: TypeMask, negated: bool) {
    *content_type = Some(if negated {
        content_type.unwrap_or(TypeMask::RESOURCE_TYPES) & !mask
    } else {
        content_type.unwrap_or(TypeMask::empty()) | mask
    });
}

/// `^` placeholder: any byte a URL treats as a delimiter, or the end of the
/// URL.
const SEPARATOR_CLASS: &str =
    r"(?:[\x00-\x24\x26-\x2c\x2f\x3a-\x40\x5b-\x5e\x60\x7b-\x7f]|$)";

/// `||` anchor: a scheme, its slashes, then optionally any chain of
/// subdomain labels.
const EXTENDED_ANCHOR: &str = r"^[\w\-]+:/+(?:[^/]+\.)?";

/// Translates a filter pattern into a regex source, honoring `*` wildcards,
/// the `^` separator placeholder and `|`/`||` anchors.
pub(crate) fn pattern_to_regex_source(pattern: &str) -> String {
    // Runs of wildcards collapse to one.
    let mut collapsed = String::with_capacity(pattern.len());
    let mut previous_star = false;
    for c in pattern.chars() {
        if c == '*' {
            if !previous_star {
                collapsed.push('*');
            }
            previous_star = true;
        } else {
            collapsed.push(c);
            previous_star = false;
        }
    }

    let mut rest = collapsed.as_str();
    // A trailing "^|" anchors no better than the separator itself.
    if rest.ends_with("^|") {
        rest = &rest[..rest.len() - 1];
    }

    let mut hostname_anchor = false;
    let mut start_anchor = false;
    let mut end_anchor = false;
    if let Some(stripped) = rest.strip_prefix("||") {
        hostname_anchor = true;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('|') {
        start_anchor = true;
        rest = stripped;
    }
    if let Some(stripped) = rest.strip_suffix('|') {
        end_anchor = true;
        rest = stripped;
    }
    // Edge wildcards are implied on unanchored sides.
    if !hostname_anchor && !start_anchor {
        rest = rest.trim_start_matches('*');
    }
    if !end_anchor {
        rest = rest.trim_end_matches('*');
    }

    let mut source = String::with_capacity(rest.len() + 32);
    if hostname_anchor {
        source.push_str(EXTENDED_ANCHOR);
    } else if start_anchor {
        source.push('^');
    }
    for c in rest.chars() {
        match c {
            '*' => source.push_str(".*"),
            '^' => source.push_str(SEPARATOR_CLASS),
            '|' | '.' | '$' | '+' | '?' | '{' | '}' | '(' | ')' | '[' | ']' | '\\' => {
                source.push('\\');
                source.push(c);
            }
            _ => source.push(c),
        }
    }
    if end_anchor {
        source.push('$');
    }
    source
}
