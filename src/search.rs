//! Resource search and filtering.

use crate::store::Resource;

/// Ranks resources against a free-text query.
pub trait ResourceMatcher {
  /// Matching resources, best first.
  fn search<'a>(&self, resources: &'a [Resource], query: &str) -> Vec<&'a Resource>;
}

/// Default matcher: exact, prefix, substring, then subsequence matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankedMatcher;

impl RankedMatcher {
  /// Lower is better; `None` means no match.
  fn rank(resource: &Resource, query: &str) -> Option<u32> {
    let title = resource.title.to_lowercase();

    // Exact match on title
    if title == query {
      return Some(0);
    }

    // Prefix match on title
    if title.starts_with(query) {
      return Some(1);
    }

    // Prefix match on any word of the title
    if title.split_whitespace().any(|w| w.starts_with(query)) {
      return Some(2);
    }

    // Substring of title
    if title.contains(query) {
      return Some(3);
    }

    // Subject, category or tag
    let subject = resource.subject.to_lowercase();
    let category = resource.category.to_lowercase();
    if subject.contains(query)
      || category.contains(query)
      || resource.tags.iter().any(|t| t.to_lowercase().contains(query))
    {
      return Some(4);
    }

    if resource.description.to_lowercase().contains(query) {
      return Some(5);
    }

    // Fuzzy match: query characters appear in order in the title
    if is_subsequence(query, &title) {
      return Some(6);
    }

    None
  }
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
  let mut chars = haystack.chars();
  needle
    .chars()
    .filter(|c| !c.is_whitespace())
    .all(|c| chars.any(|h| h == c))
}

impl ResourceMatcher for RankedMatcher {
  fn search<'a>(&self, resources: &'a [Resource], query: &str) -> Vec<&'a Resource> {
    let query = query.trim().to_lowercase();

    if query.is_empty() {
      return resources.iter().collect();
    }

    let mut matches: Vec<(&Resource, u32)> = resources
      .iter()
      .filter_map(|r| Self::rank(r, &query).map(|rank| (r, rank)))
      .collect();

    // Stable sort keeps mirror order within a rank
    matches.sort_by_key(|(_, rank)| *rank);

    matches.into_iter().map(|(r, _)| r).collect()
  }
}

/// Category and subject filters applied after matching.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
  pub category: Option<String>,
  pub subject: Option<String>,
}

impl ResourceFilter {
  pub fn matches(&self, resource: &Resource) -> bool {
    let eq = |want: &Option<String>, have: &str| {
      want
        .as_deref()
        .map(|w| w.eq_ignore_ascii_case(have))
        .unwrap_or(true)
    };
    eq(&self.category, &resource.category) && eq(&self.subject, &resource.subject)
  }
}

/// Search then filter.
pub fn find<'a>(
  matcher: &impl ResourceMatcher,
  resources: &'a [Resource],
  query: &str,
  filter: &ResourceFilter,
) -> Vec<&'a Resource> {
  matcher
    .search(resources, query)
    .into_iter()
    .filter(|r| filter.matches(r))
    .collect()
}
