//! Domain lists attached to filters, and the suffix walk used to match a
//! document hostname against them.

/// Ordered `domain → include` mapping parsed from a filter's domain list.
///
/// The empty-string key is always present and captures the filter's generic
/// applicability: `true` for a pure-exclusion list ("everywhere except …"),
/// `false` as soon as any inclusion is listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMap {
    entries: Vec<(String, bool)>,
}

impl DomainMap {
    /// Parses a separated domain list such as `example.com|~www.example.com`.
    /// Tokens are lowercased; a `~` prefix marks an exclusion. Empty tokens
    /// are dropped and a repeated domain keeps the last include flag seen.
    pub fn parse(source: &str, separator: char) -> DomainMap {
        let source = source.to_lowercase();
        let tokens: Vec<&str> = source.split(separator).collect();

        // The single-inclusion form keeps the generic entry up front.
        if tokens.len() == 1 && !tokens[0].is_empty() && !tokens[0].starts_with('~') {
            return DomainMap {
                entries: vec![(String::new(), false), (tokens[0].to_owned(), true)],
            };
        }

        let mut entries: Vec<(String, bool)> = Vec::with_capacity(tokens.len() + 1);
        let mut has_includes = false;
        for token in tokens {
            let (domain, include) = match token.strip_prefix('~') {
                Some(rest) => (rest, false),
                None => (token, true),
            };
            if domain.is_empty() {
                continue;
            }
            if include {
                has_includes = true;
            }
            match entries.iter_mut().find(|(d, _)| d == domain) {
                Some(slot) => slot.1 = include,
                None => entries.push((domain.to_owned(), include)),
            }
        }
        entries.push((String::new(), !has_includes));
        DomainMap { entries }
    }

    pub fn get(&self, domain: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(d, _)| d == domain)
            .map(|(_, include)| *include)
    }

    /// Entries in the order they were listed, the generic entry last (or
    /// first for a single-inclusion list).
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries
            .iter()
            .map(|(domain, include)| (domain.as_str(), *include))
    }

    /// Whether the filter applies on domains the list does not name.
    pub fn applies_generically(&self) -> bool {
        self.get("") == Some(true)
    }
}

/// Iterates `domain`, then each suffix obtained by dropping one leading
/// label, and finally the empty string when `include_blank` is set. The most
/// specific suffix comes first.
pub fn domain_suffixes(domain: &str, include_blank: bool) -> DomainSuffixes<'_> {
    DomainSuffixes {
        current: (!domain.is_empty()).then_some(domain),
        include_blank,
    }
}

pub struct DomainSuffixes<'a> {
    current: Option<&'a str>,
    include_blank: bool,
}

impl<'a> Iterator for DomainSuffixes<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if let Some(current) = self.current.take() {
            self.current = match current.find('.') {
                Some(dot) if dot + 1 < current.len() => Some(&current[dot + 1..]),
                _ => None,
            };
            return Some(current);
        }
        if self.include_blank {
            self.include_blank = false;
            return Some("");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_walk_parent_domains() {
        let all: Vec<_> = domain_suffixes("www.a.b", true).collect();
        assert_eq!(all, vec!["www.a.b", "a.b", "b", ""]);

        let no_blank: Vec<_> = domain_suffixes("www.a.b", false).collect();
        assert_eq!(no_blank, vec!["www.a.b", "a.b", "b"]);
    }

    #[test]
    fn suffixes_of_empty_host() {
        assert_eq!(domain_suffixes("", true).collect::<Vec<_>>(), vec![""]);
        assert!(domain_suffixes("", false).next().is_none());
    }

    #[test]
    fn single_inclusion_disables_generic() {
        let map = DomainMap::parse("example.com", '|');
        assert_eq!(map.get("example.com"), Some(true));
        assert_eq!(map.get(""), Some(false));
        assert!(!map.applies_generically());
    }

    #[test]
    fn pure_exclusions_stay_generic() {
        let map = DomainMap::parse("~a.com|~b.com", '|');
        assert_eq!(map.get("a.com"), Some(false));
        assert_eq!(map.get("b.com"), Some(false));
        assert!(map.applies_generically());
    }

    #[test]
    fn mixed_list_orders_entries_and_lowercases() {
        let map = DomainMap::parse("Example.com|~WWW.example.com", '|');
        let entries: Vec<_> = map.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("example.com", true),
                ("www.example.com", false),
                ("", false),
            ]
        );
    }

    #[test]
    fn repeated_domain_keeps_last_flag() {
        let map = DomainMap::parse("a.com|~a.com|b.com", '|');
        assert_eq!(map.get("a.com"), Some(false));
        assert_eq!(map.get("b.com"), Some(true));
    }
}
