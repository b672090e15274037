//! Per-language chunking rules: which AST node types become chunks, and how
//! oversized nodes subdivide.

use super::Language;

/// Chunking rule for one language.
#[derive(Debug)]
pub struct LangRule {
    /// Node types emitted as chunks during the walk.
    pub node_types: &'static [&'static str],
    /// For each subdividable node type, the child node types to split into.
    pub subdivision_types: &'static [(&'static str, &'static [&'static str])],
}

impl LangRule {
    pub fn is_chunk_node(&self, kind: &str) -> bool {
        self.node_types.contains(&kind)
    }

    /// Child node types an oversized node of `kind` subdivides into, if any.
    pub fn subdivision_for(&self, kind: &str) -> Option<&'static [&'static str]> {
        self.subdivision_types
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, children)| *children)
    }

    /// Chunk-type label for an emitted node.
    pub fn chunk_type_for(kind: &str) -> &'static str {
        match kind {
            k if k.contains("class") || k.contains("impl") || k.contains("object") => "class",
            k if k.contains("method") => "method",
            _ => "function",
        }
    }
}

/// The static rule table. Languages without structural rules (JSON) fall back
/// to whole-file chunks.
pub fn rule_for(lang: Language) -> &'static LangRule {
    match lang {
        Language::JavaScript | Language::TypeScript | Language::Tsx => &LangRule {
            node_types: &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
                "class_declaration",
                "lexical_declaration",
            ],
            subdivision_types: &[
                ("class_declaration", &["method_definition"]),
                ("lexical_declaration", &["arrow_function", "function_expression"]),
            ],
        },
        Language::Python => &LangRule {
            node_types: &["function_definition", "class_definition", "decorated_definition"],
            subdivision_types: &[
                ("class_definition", &["function_definition", "decorated_definition"]),
                ("decorated_definition", &["function_definition"]),
            ],
        },
        Language::Php => &LangRule {
            node_types: &["function_definition", "method_declaration", "class_declaration"],
            subdivision_types: &[("class_declaration", &["method_declaration"])],
        },
        Language::Java => &LangRule {
            node_types: &[
                "method_declaration",
                "constructor_declaration",
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
            ],
            subdivision_types: &[
                ("class_declaration", &["method_declaration", "constructor_declaration"]),
                ("interface_declaration", &["method_declaration"]),
            ],
        },
        Language::Kotlin => &LangRule {
            node_types: &["function_declaration", "class_declaration", "object_declaration"],
            subdivision_types: &[
                ("class_declaration", &["function_declaration"]),
                ("object_declaration", &["function_declaration"]),
            ],
        },
        Language::Go => &LangRule {
            node_types: &["function_declaration", "method_declaration", "type_declaration"],
            subdivision_types: &[],
        },
        Language::Rust => &LangRule {
            node_types: &[
                "function_item",
                "impl_item",
                "struct_item",
                "enum_item",
                "trait_item",
            ],
            subdivision_types: &[
                ("impl_item", &["function_item"]),
                ("trait_item", &["function_item"]),
            ],
        },
        Language::C => &LangRule {
            node_types: &["function_definition", "struct_specifier"],
            subdivision_types: &[],
        },
        Language::Cpp => &LangRule {
            node_types: &["function_definition", "class_specifier", "struct_specifier"],
            subdivision_types: &[
                ("class_specifier", &["function_definition"]),
                ("struct_specifier", &["function_definition"]),
            ],
        },
        Language::CSharp => &LangRule {
            node_types: &[
                "method_declaration",
                "constructor_declaration",
                "class_declaration",
                "interface_declaration",
                "property_declaration",
            ],
            subdivision_types: &[
                (
                    "class_declaration",
                    &["method_declaration", "constructor_declaration", "property_declaration"],
                ),
                ("interface_declaration", &["method_declaration"]),
            ],
        },
        Language::Ruby => &LangRule {
            node_types: &["method", "singleton_method", "class", "module"],
            subdivision_types: &[
                ("class", &["method", "singleton_method"]),
                ("module", &["method", "singleton_method"]),
            ],
        },
        Language::Scala => &LangRule {
            node_types: &[
                "function_definition",
                "class_definition",
                "object_definition",
                "trait_definition",
            ],
            subdivision_types: &[
                ("class_definition", &["function_definition"]),
                ("object_definition", &["function_definition"]),
                ("trait_definition", &["function_definition"]),
            ],
        },
        Language::Swift => &LangRule {
            node_types: &["function_declaration", "class_declaration", "protocol_declaration"],
            subdivision_types: &[("class_declaration", &["function_declaration"])],
        },
        Language::Lua => &LangRule {
            node_types: &["function_declaration", "function_definition"],
            subdivision_types: &[],
        },
        Language::OCaml => &LangRule {
            node_types: &["value_definition", "module_definition", "type_definition"],
            subdivision_types: &[],
        },
        Language::Haskell => &LangRule {
            node_types: &["function", "data_type", "class", "instance"],
            subdivision_types: &[],
        },
        Language::Elixir => &LangRule {
            // Elixir definitions parse as `call` nodes (def/defmodule); the
            // minimum-size skip keeps ordinary call sites out.
            node_types: &["call"],
            subdivision_types: &[],
        },
        Language::Bash => &LangRule {
            node_types: &["function_definition"],
            subdivision_types: &[],
        },
        Language::Html => &LangRule {
            node_types: &["script_element", "style_element"],
            subdivision_types: &[],
        },
        Language::Css => &LangRule {
            node_types: &["rule_set"],
            subdivision_types: &[],
        },
        Language::Json => &LangRule {
            node_types: &[],
            subdivision_types: &[],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn javascript_rule_subdivides_classes() {
        let rule = rule_for(Language::JavaScript);
        assert!(rule.is_chunk_node("function_declaration"));
        assert_eq!(
            rule.subdivision_for("class_declaration"),
            Some(&["method_definition"][..])
        );
        assert!(rule.subdivision_for("function_declaration").is_none());
    }

    #[test]
    fn json_has_no_structural_rule() {
        let rule = rule_for(Language::Json);
        assert!(rule.node_types.is_empty());
    }

    #[test]
    fn chunk_type_labels() {
        assert_eq!(LangRule::chunk_type_for("class_declaration"), "class");
        assert_eq!(LangRule::chunk_type_for("method_definition"), "method");
        assert_eq!(LangRule::chunk_type_for("function_item"), "function");
        assert_eq!(LangRule::chunk_type_for("impl_item"), "class");
    }
}
