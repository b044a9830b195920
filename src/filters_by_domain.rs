//! The domain-partitioned sub-index: for one keyword bucket, which filters
//! are switched on or off under which document domain suffix.

use std::collections::HashMap;
use std::sync::Arc;

use crate::filters::Filter;
use crate::utils::RandomState;

/// Value stored under one domain key.
///
/// The overwhelmingly common case is a single filter included under a
/// domain, so that case carries no map at all. The map form is entered on
/// the second filter (or the first exclusion) and never degenerates back to
/// a lone included filter.
#[derive(Debug, Clone)]
pub enum DomainEntry {
    Single(Arc<Filter>),
    Map(Vec<(Arc<Filter>, bool)>),
}

impl DomainEntry {
    /// Filter/include pairs in insertion order, a bare filter reading as
    /// included.
    pub fn iter(&self) -> DomainEntryIter<'_> {
        match self {
            DomainEntry::Single(filter) => DomainEntryIter {
                single: Some(filter),
                map: (&[] as &[(Arc<Filter>, bool)]).iter(),
            },
            DomainEntry::Map(map) => DomainEntryIter {
                single: None,
                map: map.iter(),
            },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DomainEntry::Single(_) => 1,
            DomainEntry::Map(map) => map.len(),
        }
    }
}

pub struct DomainEntryIter<'a> {
    single: Option<&'a Arc<Filter>>,
    map: std::slice::Iter<'a, (Arc<Filter>, bool)>,
}

impl<'a> Iterator for DomainEntryIter<'a> {
    type Item = (&'a Arc<Filter>, bool);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(filter) = self.single.take() {
            return Some((filter, true));
        }
        self.map.next().map(|(filter, include)| (filter, *include))
    }
}

/// Maps domain suffixes to the filters that switch on or off there.
#[derive(Debug, Default)]
pub struct FiltersByDomain {
    map: HashMap<String, DomainEntry, RandomState>,
    order: Vec<String>,
}

impl FiltersByDomain {
    pub fn new() -> FiltersByDomain {
        FiltersByDomain::default()
    }

    /// Indexes `filter` under every domain its list names, or under the
    /// blank domain when it has no list. Idempotent per (filter, domain);
    /// the pair `("", exclude)` is never stored.
    pub fn add(&mut self, filter: &Arc<Filter>) {
        match filter.url_data().and_then(|data| data.domains.as_ref()) {
            Some(domains) => {
                for (domain, include) in domains.iter() {
                    if domain.is_empty() && !include {
                        continue;
                    }
                    self.add_pair(filter, domain, include);
                }
            }
            None => self.add_pair(filter, "", true),
        }
    }

    /// Removes `filter` from every domain key its list names, restoring the
    /// pre-add shape. Unknown filters are ignored.
    pub fn remove(&mut self, filter: &Arc<Filter>) {
        match filter.url_data().and_then(|data| data.domains.as_ref()) {
            Some(domains) => {
                for (domain, _) in domains.iter() {
                    self.remove_from(filter, domain);
                }
            }
            None => self.remove_from(filter, ""),
        }
    }

    pub fn get(&self, domain: &str) -> Option<&DomainEntry> {
        self.map.get(domain)
    }

    pub fn has(&self, domain: &str) -> bool {
        self.map.contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Entries in domain-insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &DomainEntry)> {
        self.order
            .iter()
            .map(|domain| (domain.as_str(), &self.map[domain.as_str()]))
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn add_pair(&mut self, filter: &Arc<Filter>, domain: &str, include: bool) {
        match self.map.get_mut(domain) {
            None => {
                let entry = if include {
                    DomainEntry::Single(Arc::clone(filter))
                } else {
                    DomainEntry::Map(vec![(Arc::clone(filter), false)])
                };
                self.map.insert(domain.to_owned(), entry);
                self.order.push(domain.to_owned());
            }
            Some(entry) => match entry {
                DomainEntry::Single(existing) => {
                    if existing.text() == filter.text() {
                        return;
                    }
                    let previous = Arc::clone(existing);
                    *entry = DomainEntry::Map(vec![(previous, true), (Arc::clone(filter), include)]);
                }
                DomainEntry::Map(map) => {
                    match map.iter_mut().find(|(f, _)| f.text() == filter.text()) {
                        Some(slot) => slot.1 = include,
                        None => map.push((Arc::clone(filter), include)),
                    }
                }
            },
        }
    }

    fn remove_from(&mut self, filter: &Arc<Filter>, domain: &str) {
        let remove_key = match self.map.get_mut(domain) {
            None => return,
            Some(DomainEntry::Single(existing)) => existing.text() == filter.text(),
            Some(entry) => {
                let DomainEntry::Map(map) = entry else {
                    unreachable!()
                };
                map.retain(|(f, _)| f.text() != filter.text());
                if map.is_empty() {
                    true
                } else {
                    let collapse = match map.as_slice() {
                        [(sole, true)] => Some(Arc::clone(sole)),
                        _ => None,
                    };
                    if let Some(sole) = collapse {
                        *entry = DomainEntry::Single(sole);
                    }
                    false
                }
            }
        };
        if remove_key {
            self.map.remove(domain);
            self.order.retain(|d| d != domain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(text: &str) -> Arc<Filter> {
        Arc::new(Filter::parse(text))
    }

    fn entry_texts(entry: &DomainEntry) -> Vec<(String, bool)> {
        entry
            .iter()
            .map(|(f, include)| (f.text().to_owned(), include))
            .collect()
    }

    #[test]
    fn index_takes_expected_shapes() {
        let mut index = FiltersByDomain::new();
        let foo = filter("^foo^$domain=example.com|~www.example.com");
        index.add(&foo);

        assert_eq!(index.len(), 2);
        assert!(matches!(index.get("example.com"), Some(DomainEntry::Single(f)) if f.text() == foo.text()));
        assert_eq!(
            entry_texts(index.get("www.example.com").unwrap()),
            vec![(foo.text().to_owned(), false)]
        );
        assert!(!index.has(""));

        // a second filter on the same domain upgrades the bare entry
        let bar = filter("^bar^$domain=example.com");
        index.add(&bar);
        assert_eq!(
            entry_texts(index.get("example.com").unwrap()),
            vec![(foo.text().to_owned(), true), (bar.text().to_owned(), true)]
        );

        // a pure-exclusion filter lands in the blank bucket too
        let lambda = filter("^lambda^$domain=~images.example.com");
        index.add(&lambda);
        assert_eq!(index.len(), 4);
        assert!(matches!(index.get(""), Some(DomainEntry::Single(f)) if f.text() == lambda.text()));
        assert_eq!(
            entry_texts(index.get("images.example.com").unwrap()),
            vec![(lambda.text().to_owned(), false)]
        );

        // removing the first filter collapses and drops its entries
        index.remove(&foo);
        assert_eq!(index.len(), 3);
        assert!(!index.has("www.example.com"));
        assert!(matches!(index.get("example.com"), Some(DomainEntry::Single(f)) if f.text() == bar.text()));
    }

    #[test]
    fn add_is_idempotent_and_remove_is_inverse() {
        let mut index = FiltersByDomain::new();
        let generic = filter("ads");
        let restricted = filter("^foo^$domain=a.com|~b.a.com");

        index.add(&generic);
        index.add(&generic);
        index.add(&restricted);
        index.add(&restricted);
        assert_eq!(index.len(), 3);
        assert_eq!(index.get("").unwrap().len(), 1);

        index.remove(&restricted);
        index.remove(&restricted);
        assert_eq!(index.len(), 1);
        assert!(index.has(""));

        index.remove(&generic);
        assert!(index.is_empty());
        assert_eq!(index.entries().count(), 0);
    }

    #[test]
    fn entries_iterate_in_insertion_order() {
        let mut index = FiltersByDomain::new();
        index.add(&filter("x$domain=b.com"));
        index.add(&filter("y$domain=a.com"));
        index.add(&filter("z"));
        let domains: Vec<_> = index.entries().map(|(domain, _)| domain).collect();
        assert_eq!(domains, vec!["b.com", "a.com", ""]);
    }

    #[test]
    fn exclusion_then_inclusion_keeps_map_form() {
        let mut index = FiltersByDomain::new();
        let excluded = filter("^a^$domain=~x.com");
        index.add(&excluded);
        // the x.com entry is a map holding a lone exclusion
        assert_eq!(
            entry_texts(index.get("x.com").unwrap()),
            vec![(excluded.text().to_owned(), false)]
        );

        let included = filter("^b^$domain=x.com");
        index.add(&included);
        assert_eq!(
            entry_texts(index.get("x.com").unwrap()),
            vec![
                (excluded.text().to_owned(), false),
                (included.text().to_owned(), true),
            ]
        );
    }
}
