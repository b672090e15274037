//! Descriptive metadata extraction: doc comments, `@pampa-*` annotations,
//! auto-derived tags, and important variables.

use regex::Regex;
use std::sync::LazyLock;

static TAG_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@pampa-tags:\s*([^\n*]+)").expect("valid regex"));
static INTENT_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@pampa-intent:\s*([^\n*]+)").expect("valid regex"));
static DESCRIPTION_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@pampa-description:\s*([^\n*]+)").expect("valid regex"));

/// Declarations worth surfacing to the embedding text: configuration
/// constants, API endpoints/keys, environment lookups.
static VARIABLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)^\s*(?:const|let|var|static|final|val)\s+([A-Z][A-Z0-9_]{2,})\s*=\s*(.+)$",
        r"(?m)^\s*([A-Z][A-Z0-9_]{2,})\s*=\s*(.+)$",
        r#"(?m)(\w*(?:api|API)_?(?:key|KEY|url|URL|endpoint|ENDPOINT)\w*)\s*=\s*(.+)$"#,
        r#"(?m)(\w*(?:config|CONFIG|settings|SETTINGS)\w*)\s*=\s*(\{.*)$"#,
        r"process\.env\.([A-Z][A-Z0-9_]*)",
        r"env!\(\s*\x22([A-Z][A-Z0-9_]*)\x22",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Small dictionary of domain keywords used for auto-tagging.
const TAG_KEYWORDS: &[&str] = &[
    "auth", "login", "session", "user", "payment", "stripe", "checkout", "cart", "order",
    "database", "query", "cache", "http", "request", "response", "api", "config", "search",
    "index", "parse", "token", "email", "webhook", "queue", "test",
];

const MAX_AUTO_TAGS: usize = 10;
const MAX_VARIABLE_VALUE: usize = 100;

/// Parsed `@pampa-*` annotations from a doc comment.
#[derive(Debug, Default, PartialEq)]
pub struct PampaAnnotations {
    pub tags: Vec<String>,
    pub intent: Option<String>,
    pub description: Option<String>,
}

/// Extract explicit annotations from a doc comment block.
pub fn parse_annotations(doc: &str) -> PampaAnnotations {
    let tags = TAG_ANNOTATION
        .captures(doc)
        .map(|c| {
            c[1].split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let intent = INTENT_ANNOTATION
        .captures(doc)
        .map(|c| c[1].trim().to_string());
    let description = DESCRIPTION_ANNOTATION
        .captures(doc)
        .map(|c| c[1].trim().to_string());
    PampaAnnotations {
        tags,
        intent,
        description,
    }
}

fn push_unique(tags: &mut Vec<String>, tag: String) {
    if tags.len() < MAX_AUTO_TAGS && tag.len() > 2 && !tags.contains(&tag) {
        tags.push(tag);
    }
}

/// Split an identifier on underscores, dashes, and camelCase humps.
fn split_identifier(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    for piece in name.split(['_', '-', '.', '/']) {
        let mut current = String::new();
        for ch in piece.chars() {
            if ch.is_uppercase() && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.push(ch.to_ascii_lowercase());
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

/// Derive tags from the file path, symbol name, keyword dictionary hits, and
/// declaration shape. Explicit tags come first; insertion order is kept and
/// the list caps at ten.
pub fn auto_tags(
    explicit: &[String],
    file_path: &str,
    symbol: &str,
    code: &str,
) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in explicit {
        push_unique(&mut tags, tag.clone());
    }

    // Path segments minus the file extension.
    let stem = file_path.rsplit('/').next().unwrap_or(file_path);
    let stem = stem.split('.').next().unwrap_or(stem);
    for word in file_path
        .split('/')
        .rev()
        .skip(1)
        .flat_map(|seg| split_identifier(seg))
        .chain(split_identifier(stem))
    {
        push_unique(&mut tags, word);
    }

    for word in split_identifier(symbol) {
        push_unique(&mut tags, word);
    }

    let lower = code.to_lowercase();
    for keyword in TAG_KEYWORDS {
        if lower.contains(keyword) {
            push_unique(&mut tags, (*keyword).to_string());
        }
    }

    // Declaration shape.
    if lower.contains("async ") || lower.contains("await ") {
        push_unique(&mut tags, "async".to_string());
    }
    if lower.contains("class ") {
        push_unique(&mut tags, "class".to_string());
    }

    tags
}

/// Collect config/API/constant declarations from the code, formatted as
/// `NAME = value` with values capped at 100 characters.
pub fn important_variables(code: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for pattern in VARIABLE_PATTERNS.iter() {
        for caps in pattern.captures_iter(code) {
            let name = caps[1].trim().to_string();
            if seen.contains(&name) {
                continue;
            }
            seen.push(name.clone());
            let entry = match caps.get(2) {
                Some(value) => {
                    let mut v = value.as_str().trim().trim_end_matches(';').to_string();
                    if v.len() > MAX_VARIABLE_VALUE {
                        v.truncate(
                            (0..=MAX_VARIABLE_VALUE)
                                .rev()
                                .find(|&i| v.is_char_boundary(i))
                                .unwrap_or(0),
                        );
                        v.push('…');
                    }
                    format!("{name} = {v}")
                }
                None => name,
            };
            out.push(entry);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_annotations() {
        let doc = "/**\n * Creates a checkout session.\n * @pampa-tags: stripe, payment, Checkout\n * @pampa-intent: create stripe checkout session\n * @pampa-description: Builds and returns a session\n */";
        let ann = parse_annotations(doc);
        assert_eq!(ann.tags, vec!["stripe", "payment", "checkout"]);
        assert_eq!(ann.intent.as_deref(), Some("create stripe checkout session"));
        assert_eq!(ann.description.as_deref(), Some("Builds and returns a session"));
    }

    #[test]
    fn no_annotations_is_empty() {
        assert_eq!(parse_annotations("// plain comment"), PampaAnnotations::default());
    }

    #[test]
    fn auto_tags_from_path_and_symbol() {
        let tags = auto_tags(
            &[],
            "src/services/PaymentService.js",
            "createCheckoutSession",
            "function createCheckoutSession() { return stripe.sessions.create(); }",
        );
        assert!(tags.contains(&"payment".to_string()));
        assert!(tags.contains(&"checkout".to_string()));
        assert!(tags.contains(&"session".to_string()));
        assert!(tags.contains(&"stripe".to_string()));
        assert!(tags.len() <= 10);
    }

    #[test]
    fn explicit_tags_lead_and_dedupe() {
        let tags = auto_tags(
            &["payment".to_string()],
            "src/pay.js",
            "payment",
            "function payment() {}",
        );
        assert_eq!(tags.iter().filter(|t| *t == "payment").count(), 1);
        assert_eq!(tags[0], "payment");
    }

    #[test]
    fn variables_capture_constants_and_cap_length() {
        let code = format!(
            "const API_URL = \"https://api.example.com\";\nconst LONG_VALUE = \"{}\";\n",
            "x".repeat(200)
        );
        let vars = important_variables(&code);
        assert!(vars.iter().any(|v| v.starts_with("API_URL = ")));
        let long = vars.iter().find(|v| v.starts_with("LONG_VALUE")).unwrap();
        assert!(long.chars().count() < 130);
    }

    #[test]
    fn env_lookups_are_captured() {
        let vars = important_variables("const key = process.env.STRIPE_SECRET_KEY;");
        assert!(vars.iter().any(|v| v.contains("STRIPE_SECRET_KEY")));
    }
}
