//! Symbol shape extraction: signature, parameters, return type, and call
//! edges for one chunk's AST node.

use crate::types::{ParamInfo, SymbolInfo};
use tree_sitter::Node;

const MAX_CALLS: usize = 64;

/// Node kinds that hold a parameter list, across the grammar families.
const PARAM_LIST_KINDS: &[&str] = &[
    "formal_parameters",
    "parameters",
    "parameter_list",
    "function_value_parameters",
    "method_parameters",
];

/// Node kinds that represent a call site, across the grammar families.
const CALL_KINDS: &[&str] = &[
    "call_expression",
    "call",
    "method_invocation",
    "invocation_expression",
    "function_call_expression",
    "member_call_expression",
    "macro_invocation",
    "scoped_call_expression",
];

/// Extract the declared shape of a chunk.
pub fn extract_symbol_info(node: Node, code: &str) -> SymbolInfo {
    SymbolInfo {
        signature: extract_signature(node, code),
        parameters: extract_parameters(node, code),
        return_type: extract_return_type(node, code),
        calls: extract_calls(node, code),
    }
}

fn node_text<'a>(node: Node, code: &'a str) -> &'a str {
    &code[node.byte_range()]
}

/// The declaration head: everything up to and including the parameter list
/// plus any return annotation, collapsed to a single line.
fn extract_signature(node: Node, code: &str) -> Option<String> {
    let text = node_text(node, code);
    let header_end = match text.find('(') {
        Some(open) => {
            // Walk to the matching close paren of the parameter list.
            let mut depth = 0usize;
            let mut end = None;
            for (i, ch) in text[open..].char_indices() {
                match ch {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(open + i + 1);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let close = end?;
            // A trailing return annotation (`-> T`, `: T`) belongs to the
            // signature; the body opener does not.
            let rest = &text[close..];
            if rest.trim_start().starts_with("->") || rest.trim_start().starts_with(':') {
                let stop = rest.find(['{', '\n']).unwrap_or(rest.len());
                close + stop
            } else {
                close
            }
        }
        None => text.lines().next()?.len(),
    };

    let raw = &text[..header_end];
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn extract_parameters(node: Node, code: &str) -> Vec<ParamInfo> {
    let Some(params_node) = find_descendant(node, PARAM_LIST_KINDS, 3) else {
        return Vec::new();
    };

    let mut params = Vec::new();
    let mut cursor = params_node.walk();
    for child in params_node.named_children(&mut cursor) {
        let kind = child.kind();
        if kind.contains("comment") {
            continue;
        }
        let text = node_text(child, code).trim();
        if text.is_empty() || text == "self" || text == "&self" || text == "&mut self" {
            continue;
        }

        // Field-based extraction first, with a text split fallback.
        let name = child
            .child_by_field_name("name")
            .or_else(|| child.child_by_field_name("pattern"))
            .map(|n| node_text(n, code).trim().to_string())
            .unwrap_or_else(|| {
                text.split([':', '=', ' '])
                    .next()
                    .unwrap_or(text)
                    .trim_matches(['*', '&', '$'])
                    .to_string()
            });
        if name.is_empty() {
            continue;
        }

        let type_hint = child
            .child_by_field_name("type")
            .map(|n| node_text(n, code).trim().to_string())
            .or_else(|| {
                text.split_once(':')
                    .map(|(_, t)| t.split('=').next().unwrap_or(t).trim().to_string())
                    .filter(|t| !t.is_empty())
            });
        let default = child
            .child_by_field_name("value")
            .or_else(|| child.child_by_field_name("default"))
            .map(|n| node_text(n, code).trim().to_string())
            .or_else(|| {
                text.split_once('=')
                    .map(|(_, d)| d.trim().to_string())
                    .filter(|d| !d.is_empty())
            });

        params.push(ParamInfo {
            name,
            type_hint,
            default,
        });
    }
    params
}

fn extract_return_type(node: Node, code: &str) -> Option<String> {
    if let Some(ret) = node
        .child_by_field_name("return_type")
        .or_else(|| node.child_by_field_name("result"))
        .or_else(|| node.child_by_field_name("type"))
    {
        let text = node_text(ret, code)
            .trim()
            .trim_start_matches("->")
            .trim_start_matches(':')
            .trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    None
}

/// Callee identifiers from every call site inside the node, deduplicated in
/// insertion order and capped.
fn extract_calls(node: Node, code: &str) -> Vec<String> {
    let mut calls = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if calls.len() >= MAX_CALLS {
            break;
        }
        if CALL_KINDS.contains(&current.kind())
            && let Some(name) = callee_name(current, code)
            && !calls.contains(&name)
        {
            calls.push(name);
        }
        // Push children in reverse so the walk stays source-ordered.
        let mut cursor = current.walk();
        let children: Vec<Node> = current.named_children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    calls
}

/// The rightmost identifier of a call target: `stripe.sessions.create(...)`
/// yields `create`.
fn callee_name(call: Node, code: &str) -> Option<String> {
    let target = call
        .child_by_field_name("function")
        .or_else(|| call.child_by_field_name("name"))
        .or_else(|| call.named_child(0))?;
    let text = node_text(target, code);
    let last = text
        .rsplit(['.', ':', '/'])
        .next()
        .unwrap_or(text)
        .trim()
        .trim_end_matches('!');
    if last.is_empty()
        || !last
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
    {
        return None;
    }
    Some(
        last.chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect(),
    )
}

/// Breadth-limited search for the first descendant of any listed kind.
fn find_descendant<'t>(node: Node<'t>, kinds: &[&str], max_depth: usize) -> Option<Node<'t>> {
    let mut frontier = vec![node];
    for _ in 0..=max_depth {
        let mut next = Vec::new();
        for candidate in frontier {
            if kinds.contains(&candidate.kind()) && candidate != node {
                return Some(candidate);
            }
            let mut cursor = candidate.walk();
            next.extend(candidate.children(&mut cursor));
        }
        frontier = next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::Language;

    fn parse(lang: Language, code: &str) -> tree_sitter::Tree {
        lang.parser().unwrap().parse(code, None).unwrap()
    }

    fn first_named<'t>(tree: &'t tree_sitter::Tree) -> Node<'t> {
        tree.root_node().named_child(0).unwrap()
    }

    #[test]
    fn javascript_function_shape() {
        let code = "function createSession(user, amount = 100) {\n  const s = stripe.sessions.create(user);\n  return format(s);\n}";
        let tree = parse(Language::JavaScript, code);
        let info = extract_symbol_info(first_named(&tree), code);

        assert_eq!(
            info.signature.as_deref(),
            Some("function createSession(user, amount = 100)")
        );
        assert_eq!(info.parameters.len(), 2);
        assert_eq!(info.parameters[0].name, "user");
        assert_eq!(info.parameters[1].name, "amount");
        assert_eq!(info.parameters[1].default.as_deref(), Some("100"));
        assert_eq!(info.calls, vec!["create", "format"]);
    }

    #[test]
    fn rust_function_shape() {
        let code = "fn lookup(key: &str, fallback: u32) -> Option<u32> {\n    parse_key(key)\n}";
        let tree = parse(Language::Rust, code);
        let info = extract_symbol_info(first_named(&tree), code);

        assert!(info.signature.as_deref().unwrap().contains("fn lookup(key: &str, fallback: u32)"));
        assert_eq!(info.parameters.len(), 2);
        assert_eq!(info.parameters[0].type_hint.as_deref(), Some("&str"));
        assert_eq!(info.return_type.as_deref(), Some("Option<u32>"));
        assert_eq!(info.calls, vec!["parse_key"]);
    }

    #[test]
    fn calls_dedupe_in_insertion_order() {
        let code = "def run():\n    setup()\n    step()\n    step()\n    teardown()\n";
        let tree = parse(Language::Python, code);
        let info = extract_symbol_info(first_named(&tree), code);
        assert_eq!(info.calls, vec!["setup", "step", "teardown"]);
    }
}
