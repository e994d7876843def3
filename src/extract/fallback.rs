//! Regex-based symbol extraction.
//!
//! This is the compile-time registry of built-in extractors. It supplies
//! symbols whenever the AST backend is unavailable for a language, and its
//! results are merged with (and deduplicated against) AST symbols when both
//! run. Patterns are deliberately line-anchored and conservative: a missed
//! symbol is recoverable by code search, a bogus one pollutes the graph.

use crate::types::{RelType, RelationRow, RootId, SymbolId, SymbolKind, SymbolRow};
use regex::Regex;

/// Languages recognized by the extraction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Java,
    Kotlin,
    Go,
    Rust,
    C,
    Cpp,
    CSharp,
    Swift,
    Ruby,
    Php,
    Scala,
    Yaml,
    Dockerfile,
    Markdown,
    Bash,
    Sql,
    Hcl,
    Xml,
    Vue,
    Jsp,
}

impl Lang {
    /// Resolves a language from a file's extension or well-known name.
    #[must_use]
    pub fn from_rel_path(rel_path: &str) -> Option<Self> {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        let lower = name.to_ascii_lowercase();
        if lower == "dockerfile" || lower.starts_with("dockerfile.") {
            return Some(Self::Dockerfile);
        }
        let ext = lower.rsplit('.').next().unwrap_or("");
        match ext {
            "py" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::JavaScript),
            "ts" | "mts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "java" => Some(Self::Java),
            "kt" | "kts" => Some(Self::Kotlin),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(Self::Cpp),
            "cs" => Some(Self::CSharp),
            "swift" => Some(Self::Swift),
            "rb" => Some(Self::Ruby),
            "php" => Some(Self::Php),
            "scala" => Some(Self::Scala),
            "yaml" | "yml" => Some(Self::Yaml),
            "md" | "markdown" => Some(Self::Markdown),
            "sh" | "bash" | "zsh" => Some(Self::Bash),
            "sql" => Some(Self::Sql),
            "tf" | "hcl" => Some(Self::Hcl),
            "xml" => Some(Self::Xml),
            "vue" => Some(Self::Vue),
            "jsp" => Some(Self::Jsp),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Swift => "swift",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Scala => "scala",
            Self::Yaml => "yaml",
            Self::Dockerfile => "dockerfile",
            Self::Markdown => "markdown",
            Self::Bash => "bash",
            Self::Sql => "sql",
            Self::Hcl => "hcl",
            Self::Xml => "xml",
            Self::Vue => "vue",
            Self::Jsp => "jsp",
        }
    }

    fn uses_braces(self) -> bool {
        !matches!(
            self,
            Self::Python | Self::Yaml | Self::Markdown | Self::Sql | Self::Xml
        )
    }
}

struct Pattern {
    re: Regex,
    kind: SymbolKind,
}

fn patterns_for(lang: Lang) -> Vec<Pattern> {
    let table: &[(&str, SymbolKind)] = match lang {
        Lang::Python => &[
            (r"^\s*def\s+([A-Za-z_]\w*)\s*\(", SymbolKind::Function),
            (r"^\s*class\s+([A-Za-z_]\w*)", SymbolKind::Class),
        ],
        Lang::JavaScript | Lang::Vue | Lang::Jsp => &[
            (r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$]\w*)\s*\(", SymbolKind::Function),
            (r"^\s*(?:export\s+)?(?:default\s+)?class\s+([A-Za-z_$]\w*)", SymbolKind::Class),
            (r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$]\w*)\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$]\w*)\s*=>", SymbolKind::Function),
        ],
        Lang::TypeScript | Lang::Tsx => &[
            (r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$]\w*)\s*\(", SymbolKind::Function),
            (r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$]\w*)", SymbolKind::Class),
            (r"^\s*(?:export\s+)?interface\s+([A-Za-z_$]\w*)", SymbolKind::Interface),
            (r"^\s*(?:export\s+)?(?:const\s+)?enum\s+([A-Za-z_$]\w*)", SymbolKind::Enum),
            (r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$]\w*)\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$]\w*)\s*=>", SymbolKind::Function),
        ],
        Lang::Java => &[
            (r"^\s*(?:public\s+|private\s+|protected\s+|static\s+|final\s+|abstract\s+)*class\s+([A-Za-z_]\w*)", SymbolKind::Class),
            (r"^\s*(?:public\s+|private\s+)?interface\s+([A-Za-z_]\w*)", SymbolKind::Interface),
            (r"^\s*(?:public\s+|private\s+)?enum\s+([A-Za-z_]\w*)", SymbolKind::Enum),
        ],
        Lang::Kotlin => &[
            (r"^\s*(?:suspend\s+)?fun\s+(?:<[^>]*>\s*)?([A-Za-z_]\w*)\s*\(", SymbolKind::Function),
            (r"^\s*(?:data\s+|sealed\s+|open\s+|abstract\s+)*class\s+([A-Za-z_]\w*)", SymbolKind::Class),
            (r"^\s*interface\s+([A-Za-z_]\w*)", SymbolKind::Interface),
            (r"^\s*object\s+([A-Za-z_]\w*)", SymbolKind::Module),
        ],
        Lang::Go => &[
            (r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*\(", SymbolKind::Function),
            (r"^type\s+([A-Za-z_]\w*)\s+struct\b", SymbolKind::Struct),
            (r"^type\s+([A-Za-z_]\w*)\s+interface\b", SymbolKind::Interface),
        ],
        Lang::Rust => &[
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)", SymbolKind::Function),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+([A-Za-z_]\w*)", SymbolKind::Struct),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+([A-Za-z_]\w*)", SymbolKind::Enum),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+([A-Za-z_]\w*)", SymbolKind::Trait),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_]\w*)", SymbolKind::Module),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+([A-Z_][A-Z0-9_]*)\s*:", SymbolKind::Variable),
        ],
        Lang::C | Lang::Cpp => &[
            (r"^[A-Za-z_][\w\s\*&:<>,~]*?\b([A-Za-z_]\w*)\s*\([^;{]*\)\s*\{", SymbolKind::Function),
            (r"^\s*(?:typedef\s+)?struct\s+([A-Za-z_]\w*)", SymbolKind::Struct),
            (r"^\s*class\s+([A-Za-z_]\w*)", SymbolKind::Class),
            (r"^\s*enum\s+(?:class\s+)?([A-Za-z_]\w*)", SymbolKind::Enum),
        ],
        Lang::CSharp => &[
            (r"^\s*(?:public\s+|private\s+|internal\s+|protected\s+|static\s+|sealed\s+|abstract\s+|partial\s+)*class\s+([A-Za-z_]\w*)", SymbolKind::Class),
            (r"^\s*(?:public\s+|internal\s+)?interface\s+([A-Za-z_]\w*)", SymbolKind::Interface),
            (r"^\s*(?:public\s+|internal\s+)?enum\s+([A-Za-z_]\w*)", SymbolKind::Enum),
            (r"^\s*(?:public\s+|internal\s+)?struct\s+([A-Za-z_]\w*)", SymbolKind::Struct),
        ],
        Lang::Swift => &[
            (r"^\s*(?:public\s+|private\s+|internal\s+|open\s+)?func\s+([A-Za-z_]\w*)", SymbolKind::Function),
            (r"^\s*(?:public\s+|open\s+|final\s+)*class\s+([A-Za-z_]\w*)", SymbolKind::Class),
            (r"^\s*(?:public\s+)?struct\s+([A-Za-z_]\w*)", SymbolKind::Struct),
            (r"^\s*(?:public\s+)?protocol\s+([A-Za-z_]\w*)", SymbolKind::Interface),
            (r"^\s*(?:public\s+)?enum\s+([A-Za-z_]\w*)", SymbolKind::Enum),
        ],
        Lang::Ruby => &[
            (r"^\s*def\s+(?:self\.)?([A-Za-z_]\w*[?!]?)", SymbolKind::Function),
            (r"^\s*class\s+([A-Z]\w*)", SymbolKind::Class),
            (r"^\s*module\s+([A-Z]\w*)", SymbolKind::Module),
        ],
        Lang::Php => &[
            (r"^\s*(?:public\s+|private\s+|protected\s+|static\s+)*function\s+([A-Za-z_]\w*)\s*\(", SymbolKind::Function),
            (r"^\s*(?:abstract\s+|final\s+)?class\s+([A-Za-z_]\w*)", SymbolKind::Class),
            (r"^\s*interface\s+([A-Za-z_]\w*)", SymbolKind::Interface),
        ],
        Lang::Scala => &[
            (r"^\s*(?:override\s+)?def\s+([A-Za-z_]\w*)", SymbolKind::Function),
            (r"^\s*(?:case\s+)?class\s+([A-Za-z_]\w*)", SymbolKind::Class),
            (r"^\s*trait\s+([A-Za-z_]\w*)", SymbolKind::Trait),
            (r"^\s*object\s+([A-Za-z_]\w*)", SymbolKind::Module),
        ],
        Lang::Yaml => &[(r"^([A-Za-z_][\w\-]*):", SymbolKind::Variable)],
        Lang::Dockerfile => &[(r"(?i)^FROM\s+\S+\s+AS\s+([A-Za-z_][\w\-]*)", SymbolKind::Module)],
        Lang::Markdown => &[(r"^#{1,6}\s+(.+?)\s*$", SymbolKind::Module)],
        Lang::Bash => &[
            (r"^\s*([A-Za-z_]\w*)\s*\(\)\s*\{", SymbolKind::Function),
            (r"^\s*function\s+([A-Za-z_]\w*)", SymbolKind::Function),
        ],
        Lang::Sql => &[
            (r"(?i)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([A-Za-z_][\w\.]*)", SymbolKind::Struct),
            (r"(?i)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?(?:FUNCTION|PROCEDURE)\s+([A-Za-z_][\w\.]*)", SymbolKind::Function),
            (r"(?i)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?VIEW\s+([A-Za-z_][\w\.]*)", SymbolKind::Module),
        ],
        Lang::Hcl => &[
            (r#"^\s*(?:resource|data)\s+"[^"]+"\s+"([^"]+)""#, SymbolKind::Module),
            (r#"^\s*(?:module|variable|output|provider)\s+"([^"]+)""#, SymbolKind::Variable),
        ],
        Lang::Xml => &[],
    };
    table
        .iter()
        .filter_map(|(src, kind)| {
            Regex::new(src).ok().map(|re| Pattern { re, kind: *kind })
        })
        .collect()
}

const PYTHON_CALL_KEYWORDS: &[&str] = &[
    "if", "elif", "while", "for", "return", "and", "or", "not", "with", "def", "class", "in",
    "is", "lambda", "yield", "assert", "raise", "except", "match", "case",
];

/// Extracts symbols and relations from one file by regex.
#[must_use]
pub fn extract_symbols(
    lang: Lang,
    db_path: &str,
    root_id: &RootId,
    content: &str,
    importance: f64,
) -> (Vec<SymbolRow>, Vec<RelationRow>) {
    let patterns = patterns_for(lang);
    if patterns.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let lines: Vec<&str> = content.lines().collect();
    let mut symbols: Vec<SymbolRow> = Vec::new();
    // (indent, name) stack of enclosing python scopes for qualnames
    let mut scope_stack: Vec<(usize, String)> = Vec::new();

    for (idx, raw_line) in lines.iter().enumerate() {
        for pattern in &patterns {
            let Some(caps) = pattern.re.captures(raw_line) else {
                continue;
            };
            let Some(name) = caps.get(1).map(|m| m.as_str().to_string()) else {
                continue;
            };
            let line = (idx + 1) as u32;
            let indent = indent_of(raw_line);

            let (parent, mut kind) = if lang == Lang::Python {
                while scope_stack.last().is_some_and(|(i, _)| *i >= indent) {
                    scope_stack.pop();
                }
                let parent = scope_stack.last().map(|(_, n)| n.clone());
                let kind = if pattern.kind == SymbolKind::Function && parent.is_some() {
                    SymbolKind::Method
                } else {
                    pattern.kind
                };
                scope_stack.push((indent, name.clone()));
                (parent, kind)
            } else {
                (None, pattern.kind)
            };
            if lang == Lang::Markdown {
                kind = SymbolKind::Module;
            }

            let end_line = if lang == Lang::Python {
                python_block_end(&lines, idx)
            } else if lang.uses_braces() && pattern.kind != SymbolKind::Variable {
                brace_block_end(&lines, idx)
            } else {
                line
            };
            let qualname = match &parent {
                Some(p) => format!("{p}.{name}"),
                None => name.clone(),
            };
            let block: String = lines[idx..(end_line as usize).min(lines.len())].join("\n");
            symbols.push(SymbolRow {
                symbol_id: SymbolId::derive(db_path, kind, &qualname),
                path: db_path.to_string(),
                root_id: root_id.clone(),
                name,
                qualname,
                kind,
                line,
                end_line,
                content: block,
                parent,
                meta_json: "{}".into(),
                doc_comment: doc_above(&lines, idx),
                importance_score: importance,
            });
            break;
        }
    }

    let relations = extract_relations(lang, db_path, content, &symbols);
    (symbols, relations)
}

/// Pulls call/extends/uses relations out of the already-located symbol
/// blocks. Only languages with low false-positive call syntax take part.
fn extract_relations(
    lang: Lang,
    db_path: &str,
    content: &str,
    symbols: &[SymbolRow],
) -> Vec<RelationRow> {
    if !matches!(
        lang,
        Lang::Python | Lang::Rust | Lang::JavaScript | Lang::TypeScript | Lang::Tsx | Lang::Go
    ) {
        return Vec::new();
    }
    let call_re = Regex::new(r"([A-Za-z_]\w*)\s*\(").expect("static regex");
    let extends_re = Regex::new(r"^\s*class\s+([A-Za-z_]\w*)\s*\(\s*([A-Za-z_][\w\.]*)")
        .expect("static regex");
    let import_re = Regex::new(r"^\s*(?:from\s+([\w\.]+)\s+import|import\s+([\w\.]+))")
        .expect("static regex");

    let lines: Vec<&str> = content.lines().collect();
    let defined: ahash::AHashSet<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    let mut relations = Vec::new();

    for sym in symbols {
        if !matches!(sym.kind, SymbolKind::Function | SymbolKind::Method) {
            continue;
        }
        let start = sym.line as usize; // skip the definition line itself
        let end = (sym.end_line as usize).min(lines.len());
        let mut seen = ahash::AHashSet::new();
        for (offset, body_line) in lines[start..end].iter().enumerate() {
            for caps in call_re.captures_iter(body_line) {
                let callee = caps.get(1).map_or("", |m| m.as_str());
                if callee == sym.name || PYTHON_CALL_KEYWORDS.contains(&callee) {
                    continue;
                }
                if !seen.insert(callee.to_string()) {
                    continue;
                }
                let to_symbol_id = defined.contains(callee).then(|| {
                    symbols
                        .iter()
                        .find(|s| s.name == callee)
                        .map(|s| s.symbol_id.clone())
                        .expect("callee just looked up")
                });
                relations.push(RelationRow {
                    from_symbol_id: Some(sym.symbol_id.clone()),
                    from_symbol: sym.name.clone(),
                    from_path: db_path.to_string(),
                    to_symbol_id,
                    to_symbol: callee.to_string(),
                    to_path: defined.contains(callee).then(|| db_path.to_string()),
                    rel_type: RelType::Calls,
                    line: (start + offset + 1) as u32,
                });
            }
        }
    }

    if lang == Lang::Python {
        for (idx, line) in lines.iter().enumerate() {
            if let Some(caps) = extends_re.captures(line) {
                let class_name = caps.get(1).map_or("", |m| m.as_str());
                let base = caps.get(2).map_or("", |m| m.as_str());
                if base == "object" || base.is_empty() {
                    continue;
                }
                let from = symbols.iter().find(|s| s.name == class_name);
                relations.push(RelationRow {
                    from_symbol_id: from.map(|s| s.symbol_id.clone()),
                    from_symbol: class_name.to_string(),
                    from_path: db_path.to_string(),
                    to_symbol_id: None,
                    to_symbol: base.to_string(),
                    to_path: None,
                    rel_type: RelType::Extends,
                    line: (idx + 1) as u32,
                });
            }
            if let Some(caps) = import_re.captures(line) {
                let module = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map_or("", |m| m.as_str());
                if module.is_empty() {
                    continue;
                }
                relations.push(RelationRow {
                    from_symbol_id: None,
                    from_symbol: String::new(),
                    from_path: db_path.to_string(),
                    to_symbol_id: None,
                    to_symbol: module.to_string(),
                    to_path: None,
                    rel_type: RelType::Uses,
                    line: (idx + 1) as u32,
                });
            }
        }
    }

    relations
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Last line of an indentation-delimited block (1-based).
fn python_block_end(lines: &[&str], start_idx: usize) -> u32 {
    let base = indent_of(lines[start_idx]);
    let mut end = start_idx;
    for (idx, line) in lines.iter().enumerate().skip(start_idx + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= base {
            break;
        }
        end = idx;
    }
    (end + 1) as u32
}

/// Last line of a brace-delimited block (1-based). Falls back to the
/// definition line when no opening brace is found nearby.
fn brace_block_end(lines: &[&str], start_idx: usize) -> u32 {
    const MAX_BLOCK_LINES: usize = 2000;
    let mut depth: i32 = 0;
    let mut opened = false;
    for (idx, line) in lines
        .iter()
        .enumerate()
        .skip(start_idx)
        .take(MAX_BLOCK_LINES)
    {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return (idx + 1) as u32;
        }
        // Signature without a body on the first lines: bail out.
        if !opened && idx > start_idx + 2 {
            break;
        }
    }
    (start_idx + 1) as u32
}

/// Contiguous comment lines directly above a definition.
fn doc_above(lines: &[&str], idx: usize) -> String {
    let mut docs: Vec<&str> = Vec::new();
    let mut i = idx;
    while i > 0 {
        i -= 1;
        let trimmed = lines[i].trim();
        if trimmed.starts_with('#') || trimmed.starts_with("//") {
            docs.push(trimmed.trim_start_matches(['#', '/']).trim());
        } else {
            break;
        }
    }
    docs.reverse();
    docs.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lang: Lang, content: &str) -> (Vec<SymbolRow>, Vec<RelationRow>) {
        extract_symbols(lang, "root-aaa/x", &RootId("root-aaa".into()), content, 1.0)
    }

    #[test]
    fn test_python_functions_and_methods() {
        let src = "class Greeter:\n    def hello(self):\n        return 1\n\ndef top():\n    pass\n";
        let (symbols, _) = run(Lang::Python, src);
        let kinds: Vec<(String, SymbolKind)> = symbols
            .iter()
            .map(|s| (s.name.clone(), s.kind))
            .collect();
        assert!(kinds.contains(&("Greeter".into(), SymbolKind::Class)));
        assert!(kinds.contains(&("hello".into(), SymbolKind::Method)));
        assert!(kinds.contains(&("top".into(), SymbolKind::Function)));
        let hello = symbols.iter().find(|s| s.name == "hello").unwrap();
        assert_eq!(hello.qualname, "Greeter.hello");
        assert_eq!(hello.line, 2);
        assert_eq!(hello.end_line, 3);
    }

    #[test]
    fn test_python_block_span() {
        let src = "def target():\n    return 1\n";
        let (symbols, _) = run(Lang::Python, src);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].line, 1);
        assert_eq!(symbols[0].end_line, 2);
        assert!(symbols[0].content.contains("return 1"));
    }

    #[test]
    fn test_rust_items() {
        let src = "pub struct Config {\n    x: u32,\n}\n\npub fn load() -> Config {\n    Config { x: 1 }\n}\n";
        let (symbols, _) = run(Lang::Rust, src);
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Config"));
        assert!(names.contains(&"load"));
        let load = symbols.iter().find(|s| s.name == "load").unwrap();
        assert_eq!(load.line, 5);
        assert_eq!(load.end_line, 7);
    }

    #[test]
    fn test_typescript_interface_and_arrow() {
        let src = "export interface User {\n  id: number;\n}\nconst fetchUser = async (id: number) => {\n  return id;\n};\n";
        let (symbols, _) = run(Lang::TypeScript, src);
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"User"));
        assert!(names.contains(&"fetchUser"));
    }

    #[test]
    fn test_python_call_relations() {
        let src = "def helper():\n    return 1\n\ndef main():\n    x = helper()\n    return x\n";
        let (_, relations) = run(Lang::Python, src);
        let call = relations
            .iter()
            .find(|r| r.rel_type == RelType::Calls && r.to_symbol == "helper")
            .expect("call relation present");
        assert_eq!(call.from_symbol, "main");
        assert!(call.to_symbol_id.is_some());
    }

    #[test]
    fn test_python_extends_relation() {
        let src = "class Base:\n    pass\n\nclass Child(Base):\n    pass\n";
        let (_, relations) = run(Lang::Python, src);
        assert!(relations
            .iter()
            .any(|r| r.rel_type == RelType::Extends && r.to_symbol == "Base"));
    }

    #[test]
    fn test_markdown_headings() {
        let (symbols, _) = run(Lang::Markdown, "# Title\n\ntext\n\n## Section\n");
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].kind, SymbolKind::Module);
    }

    #[test]
    fn test_lang_detection() {
        assert_eq!(Lang::from_rel_path("a/b/x.py"), Some(Lang::Python));
        assert_eq!(Lang::from_rel_path("Dockerfile"), Some(Lang::Dockerfile));
        assert_eq!(Lang::from_rel_path("x.tsx"), Some(Lang::Tsx));
        assert_eq!(Lang::from_rel_path("noext"), None);
    }
}
