use std::collections::HashSet;

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// Canonical form of a single DOI: trimmed, resolver/`doi:` prefix removed, lowercased.
pub fn canonical_doi(raw: &str) -> String {
    let mut s = raw.trim();
    for prefix in DOI_PREFIXES {
        if s.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            s = s[prefix.len()..].trim_start();
            break;
        }
    }
    s.to_lowercase()
}

/// Clean a raw seed list into unique canonical DOIs, preserving first-seen order.
/// Blank entries are dropped.
pub fn normalize_dois<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in raw {
        let doi = canonical_doi(item.as_ref());
        if doi.is_empty() {
            continue;
        }
        if seen.insert(doi.clone()) {
            out.push(doi);
        }
    }
    out
}
