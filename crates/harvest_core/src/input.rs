use std::collections::HashSet;

use url::Url;

/// Parses the master list of collection names.
///
/// One name per line; blank lines and `#` comments are ignored and a trailing
/// `.txt` is stripped so the list may name the URL files directly.
pub fn parse_collection_names(raw: &str) -> Vec<String> {
    let names = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.strip_suffix(".txt").unwrap_or(line))
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned)
        .collect();
    dedupe_preserving_order(names)
}

/// Parses a per-collection URL list.
///
/// Keeps lines that start with `prefix` and parse as absolute URLs. Repeats
/// are dropped so every URL is fetched at most once per run.
pub fn parse_url_list(raw: &str, prefix: &str) -> Vec<String> {
    let urls = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.starts_with(prefix))
        .filter(|line| is_absolute_url(line))
        .map(ToOwned::to_owned)
        .collect();
    dedupe_preserving_order(urls)
}

pub fn dedupe_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn is_absolute_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| url.has_host())
        .unwrap_or(false)
}
