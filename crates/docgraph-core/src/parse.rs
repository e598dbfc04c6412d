//! Markdown document parser.
//!
//! Splits raw text into optional YAML front matter and a body, then pulls
//! headings, internal links, and fenced code blocks out of the body.
//!
//! # Front matter
//!
//! Recognized only when the very first line is `---` and a later line is
//! `---` (or `...`). Anything else, including an opening delimiter that is
//! never closed, is treated as plain body with no front matter.
//!
//! Keys are lowercased at every nesting level so lookups are
//! case-insensitive. Values are normalized into [`serde_json::Value`]:
//! sequences become arrays, mappings become string-keyed objects, and
//! scalars keep their YAML type.
//!
//! # Failure
//!
//! [`parse`] never returns an error. If the front matter block exists but is
//! not valid YAML (or not a mapping), the result has `success == false`, an
//! `error` message, and the untouched raw input as `body`.
//!
//! # Example
//!
//! ```rust
//! use docgraph_core::parse::parse;
//!
//! let doc = parse("---\nTitle: Setup\n---\n\n# Ignored\n\nSee [install](install.md).");
//! assert!(doc.success);
//! assert!(doc.has_frontmatter());
//! assert_eq!(doc.title, "Setup");
//! assert_eq!(doc.links[0].target, "install.md");
//! ```

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Normalized front matter: lowercase keys, JSON-shaped values.
pub type Frontmatter = Map<String, Value>;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*))?$").unwrap());

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})[ \t]*([^`\s]*)").unwrap());

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(!?)\[([^\]]*)\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).unwrap()
});

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap());

/// A Markdown ATX heading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub level: u8,
    pub text: String,
    /// 0-based line number within the body.
    pub line: usize,
}

/// A relative link to another document or anchor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub text: String,
    pub target: String,
    pub line: usize,
}

/// A fenced code block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlock {
    pub language: Option<String>,
    /// De-indented code with surrounding blank lines removed.
    pub code: String,
    /// Line of the opening fence, 0-based within the body.
    pub start_line: usize,
    /// Line of the closing fence (or the last line if never closed).
    pub end_line: usize,
}

/// Result of [`parse`]. Check [`success`](ParsedDocument::success).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedDocument {
    pub success: bool,
    pub error: Option<String>,
    pub frontmatter: Option<Frontmatter>,
    pub body: String,
    pub headers: Vec<Header>,
    pub links: Vec<Link>,
    pub code_blocks: Vec<CodeBlock>,
    pub title: String,
}

impl ParsedDocument {
    fn failed(raw: &str, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            frontmatter: None,
            body: raw.to_string(),
            headers: Vec::new(),
            links: Vec::new(),
            code_blocks: Vec::new(),
            title: String::new(),
        }
    }

    pub fn has_frontmatter(&self) -> bool {
        self.frontmatter.is_some()
    }

    /// Front matter value by key (case-insensitive).
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.frontmatter
            .as_ref()
            .and_then(|fm| fm.get(&key.to_lowercase()))
    }

    /// Front matter string value by key, ignoring blank strings.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.field(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Parse a raw Markdown document.
pub fn parse(raw: &str) -> ParsedDocument {
    let (frontmatter, body) = match split_frontmatter(raw) {
        Some((yaml, body)) => match parse_yaml(yaml) {
            Ok(fm) => (Some(fm), body),
            Err(e) => {
                tracing::debug!(error = %e, "front matter rejected");
                return ParsedDocument::failed(raw, e);
            }
        },
        None => (None, raw),
    };

    let body = strip_leading_blank_lines(body).to_string();
    let (headers, links, code_blocks) = extract_structure(&body);

    let title = frontmatter
        .as_ref()
        .and_then(|fm| fm.get("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .iter()
                .find(|h| h.level == 1)
                .map(|h| h.text.clone())
        })
        .unwrap_or_default();

    ParsedDocument {
        success: true,
        error: None,
        frontmatter,
        body,
        headers,
        links,
        code_blocks,
        title,
    }
}

/// Headings, internal links, and code blocks of a body, in document order.
///
/// Headings and links inside fenced code are ignored.
pub fn extract_structure(body: &str) -> (Vec<Header>, Vec<Link>, Vec<CodeBlock>) {
    let mut headers = Vec::new();
    let mut links = Vec::new();
    let mut code_blocks = Vec::new();

    let mut open: Option<OpenFence> = None;
    let mut last_line = 0;

    for (line_no, line) in body.lines().enumerate() {
        last_line = line_no;

        if let Some(fence) = open.as_mut() {
            if is_closing_fence(line, &fence.marker) {
                if let Some(fence) = open.take() {
                    code_blocks.push(fence.close(line_no));
                }
            } else {
                fence.lines.push(line);
            }
            continue;
        }

        if let Some(caps) = FENCE_RE.captures(line) {
            let language = caps
                .get(2)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            open = Some(OpenFence {
                marker: caps[1].to_string(),
                language,
                start_line: line_no,
                lines: Vec::new(),
            });
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            let level = caps[1].len() as u8;
            let text = clean_heading(caps.get(2).map_or("", |m| m.as_str()));
            headers.push(Header {
                level,
                text,
                line: line_no,
            });
        }

        for caps in LINK_RE.captures_iter(line) {
            if &caps[1] == "!" {
                continue;
            }
            let target = caps[3].trim_matches(|c| c == '<' || c == '>');
            if is_external(target) {
                continue;
            }
            links.push(Link {
                text: caps[2].trim().to_string(),
                target: target.to_string(),
                line: line_no,
            });
        }
    }

    // Unterminated fence runs to the end of the body.
    if let Some(fence) = open {
        code_blocks.push(fence.close(last_line));
    }

    (headers, links, code_blocks)
}

struct OpenFence<'a> {
    marker: String,
    language: Option<String>,
    start_line: usize,
    lines: Vec<&'a str>,
}

impl OpenFence<'_> {
    fn close(self, end_line: usize) -> CodeBlock {
        CodeBlock {
            language: self.language,
            code: clean_code(&self.lines),
            start_line: self.start_line,
            end_line,
        }
    }
}

/// Locate a front matter block. Returns `(yaml, body)` slices of `raw`.
fn split_frontmatter(raw: &str) -> Option<(&str, &str)> {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" {
        return None;
    }

    let yaml_start = first.len();
    let mut pos = yaml_start;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &text[yaml_start..pos];
            let body = &text[pos + line.len()..];
            return Some((yaml, body));
        }
        pos += line.len();
    }
    None
}

fn parse_yaml(yaml: &str) -> Result<Frontmatter, String> {
    if yaml.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| format!("invalid front matter: {}", e))?;
    match normalize_yaml(value) {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err("invalid front matter: expected a key/value mapping".to_string()),
    }
}

/// Convert YAML into plain JSON values with lowercase keys.
fn normalize_yaml(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Y;
    match value {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(n.to_string()))
            }
        }
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(items.into_iter().map(normalize_yaml).collect()),
        Y::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                let key = match k {
                    Y::String(s) => s,
                    Y::Bool(b) => b.to_string(),
                    Y::Number(n) => n.to_string(),
                    other => match normalize_yaml(other) {
                        Value::String(s) => s,
                        v => v.to_string(),
                    },
                };
                map.insert(key.to_lowercase(), normalize_yaml(v));
            }
            Value::Object(map)
        }
        Y::Tagged(tagged) => normalize_yaml(tagged.value),
    }
}

fn strip_leading_blank_lines(body: &str) -> &str {
    let mut start = 0;
    for line in body.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    &body[start..]
}

fn clean_heading(text: &str) -> String {
    let t = text.trim();
    let stripped = t.trim_end_matches('#');
    if stripped.is_empty() || stripped.ends_with([' ', '\t']) {
        stripped.trim_end().to_string()
    } else {
        t.to_string()
    }
}

fn is_closing_fence(line: &str, fence: &str) -> bool {
    let trimmed = line.trim();
    let marker = fence.chars().next().unwrap_or('`');
    trimmed.len() >= fence.len() && trimmed.chars().all(|c| c == marker)
}

fn is_external(target: &str) -> bool {
    target.starts_with("//") || SCHEME_RE.is_match(target)
}

/// Strip indentation shared by all non-blank lines, then blank lines at
/// either end.
fn clean_code(lines: &[&str]) -> String {
    let common = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let dedented: Vec<&str> = lines
        .iter()
        .map(|l| l.get(common..).unwrap_or_else(|| l.trim_start()))
        .collect();

    let joined = dedented.join("\n");
    strip_leading_blank_lines(&joined).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontmatter_and_body() {
        let doc = parse("---\ntitle: Guide\ntags: [a, b]\n---\n\n\nBody text.\n");
        assert!(doc.success);
        assert!(doc.has_frontmatter());
        assert_eq!(doc.title, "Guide");
        assert_eq!(doc.body, "Body text.\n");
        assert_eq!(doc.field("tags"), Some(&serde_json::json!(["a", "b"])));
    }

    #[test]
    fn test_unterminated_frontmatter_is_body() {
        let raw = "---\ntitle: Oops\n\n# Heading\n";
        let doc = parse(raw);
        assert!(doc.success);
        assert!(!doc.has_frontmatter());
        assert_eq!(doc.body, raw);
        assert_eq!(doc.title, "Heading");
    }

    #[test]
    fn test_delimiter_must_be_first_line() {
        let doc = parse("\n---\ntitle: x\n---\nbody");
        assert!(!doc.has_frontmatter());
    }

    #[test]
    fn test_keys_case_insensitive_and_nested() {
        let doc = parse("---\nTitle: T\nOwner:\n  Team: Docs\n  Members: [1, 2]\nDraft: true\n---\nx");
        assert_eq!(doc.field_str("TITLE"), Some("T"));
        assert_eq!(
            doc.field("owner"),
            Some(&serde_json::json!({"team": "Docs", "members": [1, 2]}))
        );
        assert_eq!(doc.field("draft"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_empty_frontmatter_block() {
        let doc = parse("---\n---\nbody");
        assert!(doc.success);
        assert!(doc.has_frontmatter());
        assert_eq!(doc.body, "body");
    }

    #[test]
    fn test_invalid_yaml_fails_with_raw_body() {
        let raw = "---\ntitle: [unclosed\n---\nbody";
        let doc = parse(raw);
        assert!(!doc.success);
        assert!(doc.error.as_deref().unwrap().contains("front matter"));
        assert_eq!(doc.body, raw);
    }

    #[test]
    fn test_scalar_frontmatter_fails() {
        let doc = parse("---\njust a string\n---\nbody");
        assert!(!doc.success);
    }

    #[test]
    fn test_title_falls_back_to_first_h1() {
        let doc = parse("---\ntitle: \"  \"\n---\n## Sub\n# Main\n# Second");
        assert_eq!(doc.title, "Main");
        let none = parse("## Only sub\ntext");
        assert_eq!(none.title, "");
    }

    #[test]
    fn test_headers_in_order_with_levels() {
        let doc = parse("# One\ntext\n### Three ###\n#NotHeading\n###### Six");
        let got: Vec<(u8, &str, usize)> = doc
            .headers
            .iter()
            .map(|h| (h.level, h.text.as_str(), h.line))
            .collect();
        assert_eq!(got, vec![(1, "One", 0), (3, "Three", 2), (6, "Six", 4)]);
    }

    #[test]
    fn test_only_internal_links() {
        let doc = parse(
            "See [a](./a.md), [b](https://x.io), [c](mailto:me@x.io), [d](../d.md#part \"T\"), ![img](pic.png), [e](#anchor)",
        );
        let targets: Vec<&str> = doc.links.iter().map(|l| l.target.as_str()).collect();
        assert_eq!(targets, vec!["./a.md", "../d.md#part", "#anchor"]);
    }

    #[test]
    fn test_code_blocks_with_lines() {
        let body = "intro\n```rust\n    fn main() {}\n    // x\n```\ntext\n~~~\nplain\n~~~";
        let doc = parse(body);
        assert_eq!(doc.code_blocks.len(), 2);
        let first = &doc.code_blocks[0];
        assert_eq!(first.language.as_deref(), Some("rust"));
        assert_eq!(first.code, "fn main() {}\n// x");
        assert_eq!((first.start_line, first.end_line), (1, 4));
        let second = &doc.code_blocks[1];
        assert_eq!(second.language, None);
        assert_eq!((second.start_line, second.end_line), (6, 8));
    }

    #[test]
    fn test_headings_inside_code_are_ignored() {
        let doc = parse("```\n# not a heading\n[x](y.md)\n```\n# Real");
        assert_eq!(doc.headers.len(), 1);
        assert_eq!(doc.headers[0].text, "Real");
        assert!(doc.links.is_empty());
    }

    #[test]
    fn test_unterminated_code_block_runs_to_end() {
        let doc = parse("a\n```sh\necho hi\nmore");
        assert_eq!(doc.code_blocks.len(), 1);
        assert_eq!(doc.code_blocks[0].code, "echo hi\nmore");
        assert_eq!(doc.code_blocks[0].end_line, 3);
    }
}
