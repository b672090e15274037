//! Language detection and per-language chunking rules.

pub mod language;
pub mod rules;

pub use language::Language;
pub use rules::LangRule;
