//! Tree-sitter symbol extraction backend.
//!
//! The backend ships grammars for python, rust, javascript and
//! typescript/tsx; every other recognized language is served by the regex
//! registry alone. When the `ast` feature is compiled out the factory
//! returns `None` for every language and callers take the fallback path,
//! which is the same contract an unavailable grammar has at runtime.

use crate::extract::fallback::Lang;
use crate::types::{RelType, RelationRow, RootId, SymbolId, SymbolKind, SymbolRow};

/// A resolved symbol span inside one file, used by symbol-mode edits.
#[derive(Debug, Clone)]
pub struct SymbolSpan {
    pub name: String,
    pub qualname: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
}

#[cfg(feature = "ast")]
mod backend {
    use super::*;
    use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

    /// Returns true when the backend is compiled in and the language has a
    /// bundled grammar.
    #[must_use]
    pub fn supports(lang: Lang) -> bool {
        language_for(lang).is_some()
    }

    #[must_use]
    pub fn backend_available() -> bool {
        true
    }

    fn language_for(lang: Lang) -> Option<Language> {
        match lang {
            Lang::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Lang::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Lang::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Lang::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Lang::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            _ => None,
        }
    }

    /// Broad queries only; field predicates beyond `name:` tend to drift
    /// across grammar minor versions.
    fn query_source(lang: Lang) -> &'static str {
        match lang {
            Lang::Python => {
                r"
                (function_definition name: (identifier) @name) @item
                (class_definition name: (identifier) @name) @item
                "
            }
            Lang::Rust => {
                r"
                (function_item name: (identifier) @name) @item
                (struct_item name: (type_identifier) @name) @item
                (enum_item name: (type_identifier) @name) @item
                (trait_item name: (type_identifier) @name) @item
                (mod_item name: (identifier) @name) @item
                "
            }
            Lang::JavaScript => {
                r"
                (function_declaration name: (identifier) @name) @item
                (class_declaration name: (identifier) @name) @item
                (method_definition name: (property_identifier) @name) @item
                "
            }
            Lang::TypeScript | Lang::Tsx => {
                r"
                (function_declaration name: (identifier) @name) @item
                (class_declaration name: (type_identifier) @name) @item
                (interface_declaration name: (type_identifier) @name) @item
                (enum_declaration name: (identifier) @name) @item
                (method_definition name: (property_identifier) @name) @item
                "
            }
            _ => "",
        }
    }

    fn parse(lang: Lang, source: &str) -> Option<(Parser, tree_sitter::Tree, Language)> {
        let language = language_for(lang)?;
        let mut parser = Parser::new();
        parser.set_language(&language).ok()?;
        let tree = parser.parse(source, None)?;
        Some((parser, tree, language))
    }

    /// Classifies a definition node by its own kind and its ancestry.
    fn classify(node: Node<'_>, lang: Lang) -> SymbolKind {
        let base = match node.kind() {
            "class_definition" | "class_declaration" => SymbolKind::Class,
            "interface_declaration" => SymbolKind::Interface,
            "struct_item" => SymbolKind::Struct,
            "enum_item" | "enum_declaration" => SymbolKind::Enum,
            "trait_item" => SymbolKind::Trait,
            "mod_item" => SymbolKind::Module,
            "method_definition" => SymbolKind::Method,
            _ => SymbolKind::Function,
        };
        if base == SymbolKind::Function && lang == Lang::Python {
            if enclosing_class_name(node).is_some() {
                return SymbolKind::Method;
            }
        }
        base
    }

    fn enclosing_class_name(node: Node<'_>) -> Option<Node<'_>> {
        let mut current = node.parent();
        while let Some(n) = current {
            if matches!(n.kind(), "class_definition" | "class_declaration") {
                return Some(n);
            }
            current = n.parent();
        }
        None
    }

    fn node_name<'a>(node: Node<'a>, source: &'a [u8]) -> Option<&'a str> {
        node.child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
    }

    /// Extracts symbols (and call relations) for a supported language.
    ///
    /// Returns `None` when the language has no bundled grammar or the
    /// parse fails outright, so the caller can record `ast_status=failed`
    /// and fall back.
    #[must_use]
    pub fn extract(
        db_path: &str,
        root_id: &RootId,
        lang: Lang,
        source: &str,
        importance: f64,
    ) -> Option<(Vec<SymbolRow>, Vec<RelationRow>)> {
        let (_parser, tree, language) = parse(lang, source)?;
        let query = Query::new(&language, query_source(lang)).ok()?;
        let bytes = source.as_bytes();

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, tree.root_node(), bytes);
        let cap_names: Vec<&str> = query.capture_names().to_vec();

        let mut symbols = Vec::new();
        while let Some(m) = matches.next() {
            let mut item: Option<Node> = None;
            let mut name: Option<String> = None;
            for cap in m.captures {
                match cap_names[cap.index as usize] {
                    "item" => item = Some(cap.node),
                    "name" => name = cap.node.utf8_text(bytes).ok().map(str::to_string),
                    _ => {}
                }
            }
            let (Some(node), Some(name)) = (item, name) else {
                continue;
            };
            let kind = classify(node, lang);
            let parent = enclosing_class_name(node)
                .and_then(|c| node_name(c, bytes))
                .map(str::to_string);
            let qualname = match &parent {
                Some(p) => format!("{p}.{name}"),
                None => name.clone(),
            };
            let start_line = node.start_position().row as u32 + 1;
            let end_line = node.end_position().row as u32 + 1;
            symbols.push(SymbolRow {
                symbol_id: SymbolId::derive(db_path, kind, &qualname),
                path: db_path.to_string(),
                root_id: root_id.clone(),
                name,
                qualname,
                kind,
                line: start_line,
                end_line,
                content: node.utf8_text(bytes).unwrap_or_default().to_string(),
                parent,
                meta_json: "{}".into(),
                doc_comment: String::new(),
                importance_score: importance,
            });
        }

        let relations = extract_calls(db_path, lang, &tree, &language, bytes, &symbols);
        Some((symbols, relations))
    }

    fn call_query_source(lang: Lang) -> &'static str {
        match lang {
            Lang::Python => r"(call function: (identifier) @callee)",
            Lang::Rust => r"(call_expression function: (identifier) @callee)",
            Lang::JavaScript | Lang::TypeScript | Lang::Tsx => {
                r"(call_expression function: (identifier) @callee)"
            }
            _ => "",
        }
    }

    fn extract_calls(
        db_path: &str,
        lang: Lang,
        tree: &tree_sitter::Tree,
        language: &Language,
        bytes: &[u8],
        symbols: &[SymbolRow],
    ) -> Vec<RelationRow> {
        let src = call_query_source(lang);
        if src.is_empty() {
            return Vec::new();
        }
        let Ok(query) = Query::new(language, src) else {
            return Vec::new();
        };
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, tree.root_node(), bytes);

        let mut relations = Vec::new();
        let mut seen = ahash::AHashSet::new();
        while let Some(m) = matches.next() {
            for cap in m.captures {
                let Ok(callee) = cap.node.utf8_text(bytes) else {
                    continue;
                };
                let line = cap.node.start_position().row as u32 + 1;
                // Attribute the call to the innermost symbol containing it.
                let from = symbols
                    .iter()
                    .filter(|s| s.line < line && line <= s.end_line)
                    .min_by_key(|s| s.end_line - s.line);
                let Some(from) = from else { continue };
                if from.name == callee || !seen.insert((from.symbol_id.clone(), callee.to_string()))
                {
                    continue;
                }
                let target = symbols.iter().find(|s| s.name == callee);
                relations.push(RelationRow {
                    from_symbol_id: Some(from.symbol_id.clone()),
                    from_symbol: from.name.clone(),
                    from_path: db_path.to_string(),
                    to_symbol_id: target.map(|s| s.symbol_id.clone()),
                    to_symbol: callee.to_string(),
                    to_path: target.map(|_| db_path.to_string()),
                    rel_type: RelType::Calls,
                    line,
                });
            }
        }
        relations
    }

    /// Parses python content and reports whether the tree is error-free.
    ///
    /// `None` means the backend cannot answer (grammar missing).
    #[must_use]
    pub fn python_parse_ok(source: &str) -> Option<bool> {
        let (_parser, tree, _language) = parse(Lang::Python, source)?;
        Some(!tree.root_node().has_error())
    }

    /// Locates candidate spans for a named symbol, for symbol-mode edits.
    #[must_use]
    pub fn find_symbol_spans(
        lang: Lang,
        source: &str,
        name: &str,
        kind: Option<SymbolKind>,
    ) -> Option<Vec<SymbolSpan>> {
        let root_id = RootId("root-span".into());
        let (symbols, _) = extract("span-probe", &root_id, lang, source, 0.0)?;
        Some(
            symbols
                .into_iter()
                .filter(|s| s.name == name && kind.map_or(true, |k| s.kind == k))
                .map(|s| SymbolSpan {
                    name: s.name,
                    qualname: s.qualname,
                    kind: s.kind,
                    start_line: s.line,
                    end_line: s.end_line,
                })
                .collect(),
        )
    }
}

#[cfg(not(feature = "ast"))]
mod backend {
    use super::*;

    #[must_use]
    pub fn supports(_lang: Lang) -> bool {
        false
    }

    #[must_use]
    pub fn backend_available() -> bool {
        false
    }

    #[must_use]
    pub fn extract(
        _db_path: &str,
        _root_id: &RootId,
        _lang: Lang,
        _source: &str,
        _importance: f64,
    ) -> Option<(Vec<SymbolRow>, Vec<RelationRow>)> {
        None
    }

    #[must_use]
    pub fn python_parse_ok(_source: &str) -> Option<bool> {
        None
    }

    #[must_use]
    pub fn find_symbol_spans(
        _lang: Lang,
        _source: &str,
        _name: &str,
        _kind: Option<SymbolKind>,
    ) -> Option<Vec<SymbolSpan>> {
        None
    }
}

pub use backend::{backend_available, extract, find_symbol_spans, python_parse_ok, supports};

#[cfg(all(test, feature = "ast"))]
mod tests {
    use super::*;

    #[test]
    fn test_python_extraction() {
        let src = "class Greeter:\n    def hello(self):\n        return 1\n\ndef top():\n    return hello()\n";
        let root_id = RootId("root-t".into());
        let (symbols, relations) =
            extract("root-t/a.py", &root_id, Lang::Python, src, 1.0).unwrap();
        let hello = symbols.iter().find(|s| s.name == "hello").unwrap();
        assert_eq!(hello.kind, SymbolKind::Method);
        assert_eq!(hello.qualname, "Greeter.hello");
        assert_eq!(hello.line, 2);
        assert!(symbols.iter().any(|s| s.name == "top" && s.kind == SymbolKind::Function));
        assert!(relations
            .iter()
            .any(|r| r.from_symbol == "top" && r.to_symbol == "hello"));
    }

    #[test]
    fn test_rust_extraction() {
        let src = "pub struct Cfg;\n\npub fn load() -> Cfg {\n    Cfg\n}\n";
        let root_id = RootId("root-t".into());
        let (symbols, _) = extract("root-t/a.rs", &root_id, Lang::Rust, src, 1.0).unwrap();
        assert!(symbols.iter().any(|s| s.name == "Cfg" && s.kind == SymbolKind::Struct));
        assert!(symbols.iter().any(|s| s.name == "load" && s.kind == SymbolKind::Function));
    }

    #[test]
    fn test_python_parse_ok_detects_errors() {
        assert_eq!(python_parse_ok("def ok():\n    return 1\n"), Some(true));
        assert_eq!(python_parse_ok("def broken(:\n"), Some(false));
    }

    #[test]
    fn test_find_symbol_spans() {
        let src = "def target():\n    return 1\n\ndef other():\n    return 2\n";
        let spans = find_symbol_spans(Lang::Python, src, "target", None).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[0].end_line, 2);
    }

    #[test]
    fn test_unsupported_language_is_none() {
        assert!(extract(
            "root-t/a.sql",
            &RootId("root-t".into()),
            Lang::Sql,
            "CREATE TABLE x (id int);",
            1.0
        )
        .is_none());
    }
}
