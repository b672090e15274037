//! Query normalization, the intention cache shortcut, and query-pattern
//! analytics.
//!
//! Two normalizations exist on purpose and are kept separate: the plain
//! rule feeds pattern recording, while the synonym-aware rule (which also
//! maps common Spanish terms onto their English equivalents) keys the
//! intention cache. Merging them would silently re-key learned intentions.

use regex::Regex;
use std::sync::LazyLock;

/// Plain normalization: lowercase, strip question marks, collapse
/// whitespace.
pub fn normalize_query(query: &str) -> String {
    let lowered = query.to_lowercase().replace('?', "");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Synonym map applied on top of [`normalize_query`] for intention-cache
/// keys. Spanish-aware so `"crear sesion de stripe"` and `"create stripe
/// session"` land on the same entry.
const SYNONYMS: &[(&str, &str)] = &[
    ("crear", "create"),
    ("creamos", "create"),
    ("nueva", "new"),
    ("nuevo", "new"),
    ("como", "how"),
    ("donde", "where"),
    ("buscar", "search"),
    ("busca", "search"),
    ("funcion", "function"),
    ("función", "function"),
    ("sesion", "session"),
    ("sesión", "session"),
    ("pago", "payment"),
    ("pagos", "payment"),
    ("usuario", "user"),
    ("usuarios", "user"),
    ("archivo", "file"),
    ("clase", "class"),
    ("de", ""),
    ("del", ""),
    ("la", ""),
    ("el", ""),
];

/// Intention-cache normalization: plain rule plus the synonym map.
pub fn normalize_intent(query: &str) -> String {
    let base = normalize_query(query);
    let mapped: Vec<&str> = base
        .split_whitespace()
        .map(|word| {
            SYNONYMS
                .iter()
                .find(|(from, _)| *from == word)
                .map(|(_, to)| *to)
                .unwrap_or(word)
        })
        .filter(|w| !w.is_empty())
        .collect();
    mapped.join(" ")
}

/// Named-entity suffixes stripped to placeholders for analytics. Only the
/// shape of the query is recorded, never the entity itself.
static ENTITY_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\b\w+Session\b", "<Session>"),
        (r"\b\w+Service\b", "<Service>"),
        (r"\b\w+Controller\b", "<Controller>"),
        (r"(?i)\bstripe\b", "<stripe>"),
    ]
    .iter()
    .map(|(pattern, placeholder)| (Regex::new(pattern).expect("valid regex"), *placeholder))
    .collect()
});

/// Anonymize a query into its recordable pattern. Case is preserved (the
/// entity suffixes are camelCase-sensitive); question marks and extra
/// whitespace are not.
pub fn query_pattern(query: &str) -> String {
    let stripped = query.replace('?', "");
    let mut pattern = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    for (regex, placeholder) in ENTITY_PATTERNS.iter() {
        pattern = regex.replace_all(&pattern, *placeholder).into_owned();
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_and_collapses() {
        assert_eq!(normalize_query("  How do I  Create a Session? "), "how do i create a session");
    }

    #[test]
    fn intent_normalization_maps_spanish() {
        assert_eq!(normalize_intent("crear sesion de stripe"), "create session stripe");
        assert_eq!(normalize_intent("create stripe session"), "create stripe session");
    }

    #[test]
    fn both_normalizations_stay_distinct() {
        let query = "crear sesion";
        assert_eq!(normalize_query(query), "crear sesion");
        assert_eq!(normalize_intent(query), "create session");
    }

    #[test]
    fn patterns_strip_entities() {
        assert_eq!(query_pattern("create checkoutSession now"), "create <Session> now");
        assert_eq!(query_pattern("find PaymentService"), "find <Service>");
        assert_eq!(query_pattern("how does Stripe  work?"), "how does <stripe> work");
    }
}
