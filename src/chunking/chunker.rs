//! AST-driven hierarchical chunker.
//!
//! Walks a tree-sitter syntax tree pre-order and emits chunks for every node
//! type the language rule names. Oversized nodes subdivide into their listed
//! child types; undersized subdivision candidates merge into one combined
//! chunk; oversized nodes with nothing to subdivide into fall back to
//! line-rolled statement chunks with overlap. A file that cannot be parsed
//! at all becomes a single whole-file chunk.

use crate::chunking::annotations::{self, PampaAnnotations};
use crate::chunking::size::{ChunkLimits, SizeAnalyzer, SizeDecision, TokenCounter, estimate_tokens};
use crate::chunking::symbols;
use crate::error::{IndexError, IndexResult};
use crate::parsing::{LangRule, Language, rules};
use crate::storage::sha1_hex;
use crate::types::{Chunk, ChunkMetadata, ChunkingStats, ContextInfo, chunk_id};
use std::collections::HashSet;
use tree_sitter::{Node, Tree};

/// Sources at or above this size are fed to the parser in slices; some
/// grammars enforce a buffer-length limit that whole-buffer parsing trips.
pub const STREAMING_THRESHOLD: usize = 30 * 1024;

/// Fraction of lines carried between adjacent statement-fallback parts.
const PART_OVERLAP: f64 = 0.2;

/// Keyword tokens never accepted as a declaration identifier.
const KEYWORDS: &[&str] = &[
    "public", "private", "protected", "static", "function", "class", "def", "fn", "fun",
    "async", "await", "export", "default", "const", "let", "var", "val", "pub", "final",
    "abstract", "override", "return", "new", "void", "int", "struct", "enum", "trait",
    "impl", "interface", "module", "package", "import", "use", "defmodule",
];

/// Identifier-bearing node kinds across the grammar families.
const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "name",
    "property_identifier",
    "field_identifier",
    "type_identifier",
    "simple_identifier",
    "constant",
    "word",
];

pub struct ChunkerOutput {
    pub chunks: Vec<Chunk>,
    pub stats: ChunkingStats,
    /// The parser produced no usable tree and the file became a single
    /// whole-file chunk. Recovered locally, but callers record it.
    pub parse_failed: bool,
}

/// One-file chunker. Holds the language rule and sizing machinery; the
/// indexer constructs one per run and reuses it across files of the same
/// language.
pub struct Chunker<'a> {
    lang: Language,
    rule: &'static LangRule,
    analyzer: &'a SizeAnalyzer,
    counter: &'a TokenCounter,
    limits: ChunkLimits,
}

impl<'a> Chunker<'a> {
    pub fn new(
        lang: Language,
        analyzer: &'a SizeAnalyzer,
        counter: &'a TokenCounter,
        limits: ChunkLimits,
    ) -> Self {
        Self {
            lang,
            rule: rules::rule_for(lang),
            analyzer,
            counter,
            limits,
        }
    }

    /// Chunk one file's source. `file_path` is repo-relative with forward
    /// slashes; it becomes part of every chunk id.
    pub fn chunk_source(&self, file_path: &str, source: &str) -> IndexResult<ChunkerOutput> {
        let mut stats = ChunkingStats::default();
        let tree = match self.parse(source) {
            Ok(Some(tree)) => tree,
            Ok(None) | Err(_) => {
                let chunks = vec![self.whole_file_chunk(file_path, source)];
                stats.normal_chunks += 1;
                return Ok(ChunkerOutput {
                    chunks,
                    stats,
                    parse_failed: true,
                });
            }
        };

        let mut chunks = Vec::new();
        let mut processed: HashSet<usize> = HashSet::new();
        self.walk(
            tree.root_node(),
            source,
            file_path,
            false,
            &mut processed,
            &mut chunks,
            &mut stats,
        );

        if chunks.is_empty() && !source.trim().is_empty() {
            chunks.push(self.whole_file_chunk(file_path, source));
            stats.normal_chunks += 1;
        }
        Ok(ChunkerOutput {
            chunks,
            stats,
            parse_failed: false,
        })
    }

    fn parse(&self, source: &str) -> Result<Option<Tree>, IndexError> {
        let mut parser = self
            .lang
            .parser()
            .map_err(|reason| IndexError::ParserInit {
                language: self.lang.tag().to_string(),
                reason,
            })?;

        let tree = if source.len() < STREAMING_THRESHOLD {
            parser.parse(source, None)
        } else {
            let bytes = source.as_bytes();
            parser.parse_with_options(
                &mut |offset, _point| {
                    if offset >= bytes.len() {
                        &[] as &[u8]
                    } else {
                        let end = (offset + STREAMING_THRESHOLD).min(bytes.len());
                        &bytes[offset..end]
                    }
                },
                None,
                None,
            )
        };
        Ok(tree)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        node: Node,
        source: &str,
        file_path: &str,
        inside_chunk: bool,
        processed: &mut HashSet<usize>,
        chunks: &mut Vec<Chunk>,
        stats: &mut ChunkingStats,
    ) {
        let is_chunk = self.is_chunk_node(node, source);
        let entered = inside_chunk || is_chunk;
        if is_chunk && !processed.contains(&node.id()) {
            stats.total_nodes += 1;
            let code = &source[node.byte_range()];
            let analysis = self.analyzer.analyze(code, &self.limits, self.counter, false);

            match analysis.decision {
                SizeDecision::TooSmall if inside_chunk => {
                    stats.skipped_small += 1;
                }
                SizeDecision::TooLarge => {
                    self.split_oversized(node, source, file_path, processed, chunks, stats);
                }
                _ => {
                    chunks.push(self.emit_node(node, source, file_path));
                    stats.normal_chunks += 1;
                }
            }
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.walk(child, source, file_path, entered, processed, chunks, stats);
        }
    }

    fn is_chunk_node(&self, node: Node, source: &str) -> bool {
        let kind = node.kind();
        if !self.rule.is_chunk_node(kind) {
            return false;
        }
        // A lexical declaration only counts when it binds a function value;
        // plain constants stay inside their surrounding chunk.
        if kind == "lexical_declaration" {
            let code = &source[node.byte_range()];
            return code.contains("=>") || code.contains("function");
        }
        true
    }

    /// An oversized node: subdivide into the rule's child types, or fall
    /// back to statement-level parts.
    fn split_oversized(
        &self,
        node: Node,
        source: &str,
        file_path: &str,
        processed: &mut HashSet<usize>,
        chunks: &mut Vec<Chunk>,
        stats: &mut ChunkingStats,
    ) {
        processed.insert(node.id());

        let candidates = self
            .rule
            .subdivision_for(node.kind())
            .map(|kinds| collect_candidates(node, kinds))
            .unwrap_or_default();

        if candidates.is_empty() {
            self.statement_split(node, source, file_path, chunks, stats);
            return;
        }
        stats.subdivided += 1;

        let codes: Vec<&str> = candidates
            .iter()
            .map(|n| &source[n.byte_range()])
            .collect();
        // Estimation is permitted here: anything mis-screened as large gets
        // subdivided further, never dropped.
        let analyses = self.analyzer.analyze_batch(&codes, &self.limits, self.counter, true);

        let mut small: Vec<Node> = Vec::new();
        for (candidate, analysis) in candidates.iter().zip(&analyses) {
            processed.insert(candidate.id());
            if analysis.decision == SizeDecision::TooSmall {
                small.push(*candidate);
                continue;
            }
            if analysis.decision == SizeDecision::TooLarge {
                self.split_oversized(*candidate, source, file_path, processed, chunks, stats);
            } else {
                chunks.push(self.emit_node(*candidate, source, file_path));
                stats.normal_chunks += 1;
            }
        }

        if small.is_empty() {
            return;
        }

        let combined: usize = small
            .iter()
            .map(|n| estimate_tokens(&source[n.byte_range()]))
            .sum();
        if combined >= self.limits.min || small.len() >= 3 {
            chunks.push(self.emit_merged(node, &small, source, file_path));
            stats.merged_small += 1;
        } else {
            stats.skipped_small += small.len();
        }
    }

    /// Line-rolled parts with overlap, for oversized nodes that have no
    /// subdivision candidates.
    fn statement_split(
        &self,
        node: Node,
        source: &str,
        file_path: &str,
        chunks: &mut Vec<Chunk>,
        stats: &mut ChunkingStats,
    ) {
        stats.statement_fallback += 1;
        let code = &source[node.byte_range()];
        let base_symbol = self.node_symbol(node, source);
        let start_line = node.start_position().row + 1;
        let lines: Vec<&str> = code.lines().collect();
        let line_tokens: Vec<usize> = lines.iter().map(|l| estimate_tokens(l).max(1)).collect();

        // Greedy contiguous ranges, each within the max budget (a single
        // line larger than the budget still forms its own range).
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut cursor = 0usize;
        while cursor < lines.len() {
            let mut budget = 0usize;
            let mut end = cursor;
            while end < lines.len() {
                if budget + line_tokens[end] > self.limits.max && end > cursor {
                    break;
                }
                budget += line_tokens[end];
                end += 1;
            }
            ranges.push((cursor, end));
            cursor = end;
        }

        // Fold any range below the minimum into its neighbor so the
        // fallback never produces fragments smaller than min.
        let range_size =
            |r: &(usize, usize)| -> usize { line_tokens[r.0..r.1].iter().sum() };
        let mut folded: Vec<(usize, usize)> = Vec::new();
        for range in ranges {
            match folded.last_mut() {
                Some(last)
                    if range_size(last) < self.limits.min
                        || range_size(&range) < self.limits.min =>
                {
                    last.1 = range.1;
                }
                _ => folded.push(range),
            }
        }

        for (i, &(range_start, range_end)) in folded.iter().enumerate() {
            // Carry >= 20% of the previous part's lines into this one.
            let emit_start = if i == 0 {
                range_start
            } else {
                let prev_len = folded[i - 1].1 - folded[i - 1].0;
                let overlap = ((prev_len as f64 * PART_OVERLAP).ceil() as usize).max(1);
                range_start.saturating_sub(overlap)
            };
            let part_index = i + 1;
            let part_code = lines[emit_start..range_end].join("\n");
            chunks.push(self.build_chunk(
                file_path,
                part_code,
                format!("{base_symbol}_part{part_index}"),
                format!("{}_part{part_index}", node.kind()),
                start_line + emit_start,
                start_line + range_end.saturating_sub(1),
                None,
            ));
        }
    }

    fn emit_node(&self, node: Node, source: &str, file_path: &str) -> Chunk {
        let code = source[node.byte_range()].to_string();
        let symbol = self.node_symbol(node, source);
        let chunk_type = LangRule::chunk_type_for(node.kind()).to_string();
        let doc = preceding_doc_comment(node, source);
        let mut chunk = self.build_chunk(
            file_path,
            code,
            symbol,
            chunk_type,
            node.start_position().row + 1,
            node.end_position().row + 1,
            doc,
        );
        chunk.symbol_info = Some(symbols::extract_symbol_info(node, source));
        chunk
    }

    /// A merged chunk covering several undersized siblings. Its SHA is
    /// computed over the joined constituents separated by blank lines, not
    /// over the literal source span.
    fn emit_merged(&self, parent: Node, members: &[Node], source: &str, file_path: &str) -> Chunk {
        let joined = members
            .iter()
            .map(|n| &source[n.byte_range()])
            .collect::<Vec<_>>()
            .join("\n\n");
        let parent_symbol = self.node_symbol(parent, source);
        let symbol = format!("{parent_symbol}_small_methods_{}", members.len());
        let chunk_type = format!("{}_merged", parent.kind());
        let first = members.first().expect("merged chunk has members");
        let last = members.last().expect("merged chunk has members");
        self.build_chunk(
            file_path,
            joined,
            symbol,
            chunk_type,
            first.start_position().row + 1,
            last.end_position().row + 1,
            None,
        )
    }

    fn whole_file_chunk(&self, file_path: &str, source: &str) -> Chunk {
        let basename = file_path.rsplit('/').next().unwrap_or(file_path);
        let symbol = basename.split('.').next().unwrap_or(basename).to_string();
        let line_count = source.lines().count().max(1);
        self.build_chunk(
            file_path,
            source.to_string(),
            symbol,
            "file".to_string(),
            1,
            line_count,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_chunk(
        &self,
        file_path: &str,
        code: String,
        symbol: String,
        chunk_type: String,
        start_line: usize,
        end_line: usize,
        doc_comment: Option<String>,
    ) -> Chunk {
        let PampaAnnotations {
            tags: explicit_tags,
            intent,
            description,
        } = doc_comment
            .as_deref()
            .map(annotations::parse_annotations)
            .unwrap_or_default();

        let tags = annotations::auto_tags(&explicit_tags, file_path, &symbol, &code);
        let variables = annotations::important_variables(&code);
        let sha = sha1_hex(code.as_bytes());
        let context = ContextInfo {
            start_line,
            end_line,
            code_length: code.len(),
            has_pampa_tags: !explicit_tags.is_empty(),
            has_intent: intent.is_some(),
            has_documentation: doc_comment.is_some(),
            variable_count: variables.len(),
        };

        Chunk {
            id: chunk_id(file_path, &symbol, &sha),
            file_path: file_path.to_string(),
            symbol,
            sha,
            lang: self.lang.tag().to_string(),
            chunk_type,
            code,
            metadata: ChunkMetadata {
                doc_comment,
                tags,
                intent,
                description,
                variables,
                context,
            },
            symbol_info: None,
        }
    }

    /// Declaration identifier for a node: named field first, then the first
    /// non-keyword identifier in the subtree, then a language regex over the
    /// text, then a synthetic `<nodeType>_<offset>` name.
    fn node_symbol(&self, node: Node, source: &str) -> String {
        if let Some(name) = node
            .child_by_field_name("name")
            .map(|n| source[n.byte_range()].to_string())
            .filter(|n| !n.is_empty())
        {
            return name;
        }

        if let Some(name) = first_identifier(node, source) {
            return name;
        }

        let code = &source[node.byte_range()];
        if let Some(name) = regex_symbol(code) {
            return name;
        }

        format!("{}_{}", node.kind(), node.start_byte())
    }
}

/// Subdivision candidates: descendants of the listed kinds, found without
/// descending into a matched node.
fn collect_candidates<'t>(node: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let mut stack: Vec<Node> = {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        children.into_iter().rev().collect()
    };
    while let Some(current) = stack.pop() {
        if kinds.contains(&current.kind()) {
            found.push(current);
            continue;
        }
        let mut cursor = current.walk();
        let children: Vec<Node> = current.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    found
}

/// First identifier in the subtree whose text is not a language keyword.
fn first_identifier(node: Node, source: &str) -> Option<String> {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if IDENTIFIER_KINDS.contains(&current.kind()) {
            let text = &source[current.byte_range()];
            if !text.is_empty() && !KEYWORDS.contains(&text) {
                return Some(text.to_string());
            }
        }
        let mut cursor = current.walk();
        let children: Vec<Node> = current.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    None
}

/// Regex fallback over the declaration text.
fn regex_symbol(code: &str) -> Option<String> {
    use regex::Regex;
    use std::sync::LazyLock;
    static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"(?:function|fn|def|fun)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
            r"(?:class|trait|interface|object|module|struct|enum|impl)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
            r"(?:const|let|var|val)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    });
    PATTERNS
        .iter()
        .find_map(|p| p.captures(code).map(|c| c[1].to_string()))
}

/// Contiguous comment siblings directly above the node, joined in source
/// order.
fn preceding_doc_comment(node: Node, source: &str) -> Option<String> {
    let mut pieces = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if !sibling.kind().contains("comment") {
            break;
        }
        pieces.push(source[sibling.byte_range()].to_string());
        current = sibling.prev_sibling();
    }
    if pieces.is_empty() {
        return None;
    }
    pieces.reverse();
    Some(pieces.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: ChunkLimits = ChunkLimits {
        min: 20,
        optimal: 400,
        max: 700,
    };

    fn chunk(lang: Language, file: &str, source: &str) -> ChunkerOutput {
        let analyzer = SizeAnalyzer::new();
        let counter = TokenCounter::Chars;
        let chunker = Chunker::new(lang, &analyzer, &counter, LIMITS);
        chunker.chunk_source(file, source).unwrap()
    }

    fn method_of_tokens(name: &str, tokens: usize) -> String {
        // Pad the body with comment filler at ~4 chars/token.
        let filler = "abcd".repeat(tokens.saturating_sub(8));
        format!("  {name}() {{\n    // {filler}\n    return 1;\n  }}\n")
    }

    #[test]
    fn simple_functions_one_chunk_each() {
        let source = "\
function alpha(a, b) { return a + b; }\n\n\
function beta(c) { return c * 2; }\n";
        let out = chunk(Language::JavaScript, "src/math.js", source);
        let symbols: Vec<&str> = out.chunks.iter().map(|c| c.symbol.as_str()).collect();
        assert!(symbols.contains(&"alpha"));
        assert!(symbols.contains(&"beta"));
        assert_eq!(out.stats.normal_chunks, out.chunks.len());
    }

    #[test]
    fn chunk_ids_are_stable() {
        let source = "function alpha() { return 1; }\n";
        let a = chunk(Language::JavaScript, "a.js", source);
        let b = chunk(Language::JavaScript, "a.js", source);
        assert_eq!(a.chunks[0].id, b.chunks[0].id);
        assert_eq!(a.chunks[0].sha, b.chunks[0].sha);
        assert!(a.chunks[0].id.starts_with("a.js:alpha:"));
    }

    #[test]
    fn oversized_class_subdivides_with_merge_and_parts() {
        // Eight tiny methods plus one far-over-max method inside one class.
        let mut body = String::new();
        for i in 0..8 {
            body.push_str(&method_of_tokens(&format!("tiny{i}"), 10));
        }
        body.push_str(&method_of_tokens("huge", 1200));
        let source = format!("class Payments {{\n{body}}}\n");

        let out = chunk(Language::JavaScript, "src/payments.js", &source);

        // The tiny methods merged into one labeled chunk.
        let merged: Vec<_> = out
            .chunks
            .iter()
            .filter(|c| c.chunk_type.ends_with("_merged"))
            .collect();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].symbol, "Payments_small_methods_8");

        // The huge method fell back to statement parts.
        assert!(out.stats.statement_fallback >= 1);
        assert!(
            out.chunks
                .iter()
                .any(|c| c.symbol.starts_with("huge_part"))
        );

        // No emitted chunk sits below the minimum.
        for c in &out.chunks {
            let tokens = estimate_tokens(&c.code);
            assert!(
                tokens >= LIMITS.min || c.chunk_type.ends_with("_merged"),
                "chunk {} of ~{tokens} tokens is below min",
                c.symbol
            );
        }
        assert_eq!(out.stats.merged_small, 1);
        assert!(out.stats.subdivided >= 1);
    }

    #[test]
    fn merged_sha_is_over_joined_sources() {
        let mut body = String::new();
        for i in 0..4 {
            body.push_str(&method_of_tokens(&format!("m{i}"), 10));
        }
        body.push_str(&method_of_tokens("big", 900));
        let source = format!("class Box {{\n{body}}}\n");
        let out = chunk(Language::JavaScript, "box.js", &source);
        let merged = out
            .chunks
            .iter()
            .find(|c| c.chunk_type.ends_with("_merged"))
            .unwrap();
        assert_eq!(merged.sha, sha1_hex(merged.code.as_bytes()));
        assert!(merged.code.contains("\n\n"));
    }

    #[test]
    fn statement_parts_overlap() {
        let mut lines = String::new();
        for i in 0..400 {
            lines.push_str(&format!("    total = total + compute_step_{i}(total)\n"));
        }
        let source = format!("def mega(total):\n{lines}");
        let out = chunk(Language::Python, "mega.py", &source);

        let parts: Vec<_> = out
            .chunks
            .iter()
            .filter(|c| c.symbol.starts_with("mega_part"))
            .collect();
        assert!(parts.len() >= 2, "expected multiple parts, got {}", parts.len());

        // Adjacent parts share at least one line.
        let first_lines: Vec<&str> = parts[0].code.lines().collect();
        let second_lines: Vec<&str> = parts[1].code.lines().collect();
        assert!(
            second_lines.iter().any(|l| first_lines.contains(l)),
            "no overlap between adjacent parts"
        );
    }

    #[test]
    fn unparsable_source_falls_back_to_file_chunk() {
        let out = chunk(Language::Json, "config/settings.json", "{\"key\": true}");
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk_type, "file");
        assert_eq!(out.chunks[0].symbol, "settings");
    }

    #[test]
    fn streaming_threshold_parses_identically() {
        // One source just below and the same content padded to cross the
        // threshold; the function chunk must be identical either way.
        let function = "function alpha() { return 42; }\n";
        let pad = format!("// {}\n", "x".repeat(STREAMING_THRESHOLD));
        let small = function.to_string();
        let large = format!("{pad}{function}");
        assert!(large.len() >= STREAMING_THRESHOLD);

        let a = chunk(Language::JavaScript, "a.js", &small);
        let b = chunk(Language::JavaScript, "a.js", &large);
        let sym_a = a.chunks.iter().find(|c| c.symbol == "alpha").unwrap();
        let sym_b = b.chunks.iter().find(|c| c.symbol == "alpha").unwrap();
        assert_eq!(sym_a.sha, sym_b.sha);
    }

    #[test]
    fn doc_comment_and_annotations_flow_through() {
        let source = "\
/**\n * Create a checkout session.\n * @pampa-tags: stripe, checkout\n * @pampa-intent: create stripe checkout session\n */\nfunction createCheckoutSession(cart) { return stripe.checkout.sessions.create(cart); }\n";
        let out = chunk(Language::JavaScript, "src/stripe.js", source);
        let c = out
            .chunks
            .iter()
            .find(|c| c.symbol == "createCheckoutSession")
            .unwrap();
        assert!(c.metadata.doc_comment.is_some());
        assert_eq!(
            c.metadata.intent.as_deref(),
            Some("create stripe checkout session")
        );
        assert!(c.metadata.tags.contains(&"stripe".to_string()));
        assert!(c.metadata.context.has_pampa_tags);
        assert!(c.metadata.context.has_documentation);
        let info = c.symbol_info.as_ref().unwrap();
        assert!(info.calls.contains(&"create".to_string()));
    }

    #[test]
    fn rust_impl_subdivides_into_functions() {
        let mut body = String::new();
        for i in 0..6 {
            let filler = "abcd ".repeat(180);
            body.push_str(&format!(
                "    fn method{i}(&self) -> usize {{\n        // {filler}\n        {i}\n    }}\n"
            ));
        }
        let source = format!("struct W;\nimpl W {{\n{body}}}\n");
        let out = chunk(Language::Rust, "src/w.rs", &source);
        assert!(out.stats.subdivided >= 1);
        assert!(out.chunks.iter().any(|c| c.symbol == "method0"));
        // Each subdivided method was emitted exactly once.
        let count = out.chunks.iter().filter(|c| c.symbol == "method0").count();
        assert_eq!(count, 1);
    }
}
