//! Supported source languages and their tree-sitter grammars.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every language the chunker understands. Files with other extensions are
/// ignored by the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Php,
    Java,
    Kotlin,
    Go,
    Rust,
    C,
    Cpp,
    CSharp,
    Ruby,
    Scala,
    Swift,
    Lua,
    OCaml,
    Haskell,
    Elixir,
    Bash,
    Html,
    Css,
    Json,
}

impl Language {
    /// Detect language from a file extension (lowercased).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "py" | "pyi" => Some(Self::Python),
            "php" => Some(Self::Php),
            "java" => Some(Self::Java),
            "kt" | "kts" => Some(Self::Kotlin),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(Self::Cpp),
            "cs" => Some(Self::CSharp),
            "rb" => Some(Self::Ruby),
            "scala" | "sc" => Some(Self::Scala),
            "swift" => Some(Self::Swift),
            "lua" => Some(Self::Lua),
            "ml" | "mli" => Some(Self::OCaml),
            "hs" => Some(Self::Haskell),
            "ex" | "exs" => Some(Self::Elixir),
            "sh" | "bash" => Some(Self::Bash),
            "html" | "htm" => Some(Self::Html),
            "css" => Some(Self::Css),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Every extension the walker should pick up.
    pub fn all_extensions() -> &'static [&'static str] {
        &[
            "js", "jsx", "mjs", "cjs", "ts", "mts", "cts", "tsx", "py", "pyi", "php", "java",
            "kt", "kts", "go", "rs", "c", "h", "cpp", "cc", "cxx", "hpp", "hh", "cs", "rb",
            "scala", "sc", "swift", "lua", "ml", "mli", "hs", "ex", "exs", "sh", "bash", "html",
            "htm", "css", "json",
        ]
    }

    /// Stable tag stored in the database and codemap.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Python => "python",
            Self::Php => "php",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Scala => "scala",
            Self::Swift => "swift",
            Self::Lua => "lua",
            Self::OCaml => "ocaml",
            Self::Haskell => "haskell",
            Self::Elixir => "elixir",
            Self::Bash => "bash",
            Self::Html => "html",
            Self::Css => "css",
            Self::Json => "json",
        }
    }

    /// The tree-sitter grammar for this language.
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::Kotlin => tree_sitter_kotlin::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Self::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Self::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            Self::Scala => tree_sitter_scala::LANGUAGE.into(),
            Self::Swift => tree_sitter_swift::LANGUAGE.into(),
            Self::Lua => tree_sitter_lua::LANGUAGE.into(),
            Self::OCaml => tree_sitter_ocaml::LANGUAGE_OCAML.into(),
            Self::Haskell => tree_sitter_haskell::LANGUAGE.into(),
            Self::Elixir => tree_sitter_elixir::LANGUAGE.into(),
            Self::Bash => tree_sitter_bash::LANGUAGE.into(),
            Self::Html => tree_sitter_html::LANGUAGE.into(),
            Self::Css => tree_sitter_css::LANGUAGE.into(),
            Self::Json => tree_sitter_json::LANGUAGE.into(),
        }
    }

    /// Build a parser configured for this language.
    pub fn parser(&self) -> Result<tree_sitter::Parser, String> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.grammar())
            .map_err(|e| format!("failed to set {} grammar: {e}", self.tag()))?;
        Ok(parser)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_detection() {
        assert_eq!(Language::from_extension("js"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("TSX"), Some(Language::Tsx));
        assert_eq!(Language::from_extension("py"), Some(Language::Python));
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("exs"), Some(Language::Elixir));
        assert_eq!(Language::from_extension("md"), None);
    }

    #[test]
    fn path_detection() {
        assert_eq!(
            Language::from_path(Path::new("src/app/checkout.service.ts")),
            Some(Language::TypeScript)
        );
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn every_extension_maps_back() {
        for ext in Language::all_extensions() {
            assert!(
                Language::from_extension(ext).is_some(),
                "extension {ext} has no language"
            );
        }
    }
}
