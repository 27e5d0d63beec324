//! Locating the preprocessing directives of Learn Markdown.
//!
//! Three directive kinds are recognised:
//!
//! - `[!include[title](path)]`: inline another Markdown file
//! - `:::code language="..." source="..." highlight="..." range="..." id="...":::`
//! - `:::image type="..." source="..." alt-text="...":::`, optionally followed by
//!   a long description closed with `:::image-end:::` when `type="complex"`
//!
//! Every directive is reported with the byte span it occupies in the text it
//! was found in. Spans are only valid for that exact text; callers collect
//! every span of a pass first and then [`splice`] replacements in reverse
//! order so earlier spans stay valid.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[!include\[([^\]]*)\]\(\s*([^)]*?)\s*\)\]").expect("valid regex")
});
static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is):::code\s+(.*?):::").expect("valid regex"));
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is):::image\s+(.*?):::").expect("valid regex"));
static IMAGE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i):::image-end:::").expect("valid regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z][\w-]*)\s*=\s*"([^"]*)""#).expect("valid regex")
});
static RELATIVE_MD_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!\[([^\]]*)\]\(((?:\.{1,2}|~)/[^)\s]+)(\s+"[^"]*")?\)"#).expect("valid regex")
});

/// Prefix of a Markdown image target that is relative to the repository
/// root rather than to the document it appears in.
pub const ROOT_PREFIX: &str = "~/";

/// Highlight ranges wider than this are treated as malformed.
const MAX_HIGHLIGHT_SPAN: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub span: Range<usize>,
    pub title: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDirective {
    pub span: Range<usize>,
    pub language: Option<String>,
    pub source: Option<String>,
    pub highlight: Option<String>,
    pub range: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDirective {
    pub span: Range<usize>,
    pub kind: Option<String>,
    pub source: Option<String>,
    pub alt_text: String,
    /// Attributes other than type/source/alt-text (lightbox, border, ...).
    pub attributes: BTreeMap<String, String>,
    /// Body of a `type="complex"` image, up to `:::image-end:::`.
    pub description: Option<String>,
}

/// A plain Markdown image whose target is relative (`./` or `../`).
#[derive(Debug, Clone, PartialEq, Eq)]
/// A Markdown image whose target is `./`, `../` or `~/` relative.
pub struct RelativeImage {
    pub span: Range<usize>,
    pub alt: String,
    pub target: String,
    pub title: Option<String>,
}

pub fn find_includes(text: &str) -> Vec<IncludeDirective> {
    INCLUDE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(IncludeDirective {
                span: whole.range(),
                title: caps.get(1).map_or("", |m| m.as_str()).to_string(),
                path: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
            })
        })
        .collect()
}

pub fn find_code(text: &str) -> Vec<CodeDirective> {
    CODE.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let mut attrs = parse_attributes(caps.get(1).map_or("", |m| m.as_str()));
            Some(CodeDirective {
                span: whole.range(),
                language: attrs.remove("language"),
                source: attrs.remove("source"),
                highlight: attrs.remove("highlight"),
                range: attrs.remove("range"),
                id: attrs.remove("id"),
            })
        })
        .collect()
}

pub fn find_images(text: &str) -> Vec<ImageDirective> {
    let headers: Vec<_> = IMAGE.captures_iter(text).collect();
    let mut images = Vec::with_capacity(headers.len());
    let mut consumed_until = 0;

    for (idx, caps) in headers.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() < consumed_until {
            // Inside a previous complex image's description.
            continue;
        }

        let mut attrs = parse_attributes(caps.get(1).map_or("", |m| m.as_str()));
        let kind = attrs.remove("type");
        let source = attrs.remove("source");
        let alt_text = attrs.remove("alt-text").unwrap_or_default();

        let mut span = whole.range();
        let mut description = None;
        if kind.as_deref().is_some_and(|k| k.eq_ignore_ascii_case("complex")) {
            let next_header = headers[idx + 1..]
                .iter()
                .filter_map(|c| c.get(0))
                .map(|m| m.start())
                .next()
                .unwrap_or(text.len());
            if let Some(end) = IMAGE_END.find_at(text, whole.end()) {
                if end.start() <= next_header {
                    description = Some(text[whole.end()..end.start()].trim().to_string());
                    span.end = end.end();
                }
            }
        }

        consumed_until = span.end;
        images.push(ImageDirective {
            span,
            kind,
            source,
            alt_text,
            attributes: attrs,
            description,
        });
    }
    images
}

pub fn find_relative_images(text: &str) -> Vec<RelativeImage> {
    RELATIVE_MD_IMAGE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(RelativeImage {
                span: whole.range(),
                alt: caps.get(1).map_or("", |m| m.as_str()).to_string(),
                target: caps.get(2)?.as_str().to_string(),
                title: caps.get(3).map(|m| m.as_str().trim().to_string()),
            })
        })
        .collect()
}

/// `key="value"` pairs; keys are lowercased, later duplicates win.
pub fn parse_attributes(raw: &str) -> BTreeMap<String, String> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|caps| (caps[1].to_ascii_lowercase(), caps[2].to_string()))
        .collect()
}

/// Expand a highlight list such as `1,3-5` into line numbers. Entries that
/// are not numbers or ranges of numbers are skipped.
pub fn parse_highlight(ranges: &str) -> BTreeSet<u32> {
    let mut lines = BTreeSet::new();
    for entry in ranges.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('-') {
            Some((start, end)) => {
                let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
                else {
                    continue;
                };
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                if hi - lo > MAX_HIGHLIGHT_SPAN {
                    continue;
                }
                lines.extend((lo..=hi).filter(|n| *n > 0));
            }
            None => {
                if let Ok(line) = entry.parse::<u32>() {
                    if line > 0 {
                        lines.insert(line);
                    }
                }
            }
        }
    }
    lines
}

/// Leading whitespace of the line containing `offset`.
pub fn line_indent(text: &str, offset: usize) -> &str {
    let line_start = text[..offset].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &text[line_start..offset];
    &prefix[..prefix.len() - prefix.trim_start().len()]
}

/// Prefix every line but the first with `indent`.
pub fn reindent(text: &str, indent: &str) -> String {
    if indent.is_empty() {
        return text.to_string();
    }
    text.split('\n')
        .collect::<Vec<_>>()
        .join(&format!("\n{}", indent))
}

/// Apply non-overlapping replacements, last span first.
pub fn splice(text: &str, mut replacements: Vec<(Range<usize>, String)>) -> String {
    replacements.sort_by_key(|(span, _)| span.start);
    let mut out = text.to_string();
    for (span, replacement) in replacements.into_iter().rev() {
        out.replace_range(span, &replacement);
    }
    out
}

/// A relative path found in a document that is about to be inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeRef {
    pub span: Range<usize>,
    pub value: String,
    /// Target of a Markdown image rather than a directive `source`.
    pub markdown_image: bool,
}

/// Spans of relative `source="..."` values inside code/image directives and
/// of `./`/`../` Markdown image targets, in no particular order.
pub fn relative_references(text: &str) -> Vec<RelativeRef> {
    let mut refs = Vec::new();
    for directive in CODE.find_iter(text).chain(IMAGE.find_iter(text)) {
        for caps in ATTRIBUTE.captures_iter(directive.as_str()) {
            let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            if key.as_str().eq_ignore_ascii_case("source") && value.as_str().starts_with('.') {
                let start = directive.start() + value.start();
                refs.push(RelativeRef {
                    span: start..start + value.len(),
                    value: value.as_str().to_string(),
                    markdown_image: false,
                });
            }
        }
    }
    for caps in RELATIVE_MD_IMAGE.captures_iter(text) {
        match caps.get(2) {
            Some(target) if target.as_str().starts_with('.') => refs.push(RelativeRef {
                span: target.range(),
                value: target.as_str().to_string(),
                markdown_image: true,
            }),
            _ => {}
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_includes() {
        let text = "a\n[!include[Intro](../includes/1-intro.md)]\nb [!INCLUDE[]( x.md )]";
        let found = find_includes(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].title, "Intro");
        assert_eq!(found[0].path, "../includes/1-intro.md");
        assert_eq!(&text[found[0].span.clone()], "[!include[Intro](../includes/1-intro.md)]");
        assert_eq!(found[1].path, "x.md");
    }

    #[test]
    fn test_find_code() {
        let text = r#":::code language="csharp" source="./code/a.cs" highlight="1,3-4" range="2-10" id="snippet":::"#;
        let found = find_code(text);
        assert_eq!(found.len(), 1);
        let code = &found[0];
        assert_eq!(code.span, 0..text.len());
        assert_eq!(code.language.as_deref(), Some("csharp"));
        assert_eq!(code.source.as_deref(), Some("./code/a.cs"));
        assert_eq!(code.highlight.as_deref(), Some("1,3-4"));
        assert_eq!(code.range.as_deref(), Some("2-10"));
        assert_eq!(code.id.as_deref(), Some("snippet"));
    }

    #[test]
    fn test_find_images_simple_and_complex() {
        let text = concat!(
            ":::image type=\"content\" source=\"../media/a.png\" alt-text=\"A\" lightbox=\"../media/a-big.png\":::\n",
            "text\n",
            ":::image type=\"complex\" source=\"../media/b.png\" alt-text=\"B\":::\n",
            "Long description.\n",
            ":::image-end:::\n",
            "tail"
        );
        let found = find_images(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].alt_text, "A");
        assert_eq!(found[0].attributes.get("lightbox").map(String::as_str), Some("../media/a-big.png"));
        assert_eq!(found[0].description, None);

        assert_eq!(found[1].kind.as_deref(), Some("complex"));
        assert_eq!(found[1].description.as_deref(), Some("Long description."));
        assert!(text[found[1].span.clone()].ends_with(":::image-end:::"));
    }

    #[test]
    fn test_complex_image_without_end_marker_stays_short() {
        let text = concat!(
            ":::image type=\"complex\" source=\"a.png\" alt-text=\"A\":::\n",
            ":::image type=\"content\" source=\"b.png\" alt-text=\"B\":::\n",
            ":::image-end:::"
        );
        let found = find_images(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].description, None);
    }

    #[test]
    fn test_image_end_is_not_a_header() {
        assert!(find_images(":::image-end:::").is_empty());
    }

    #[test]
    fn test_find_relative_images() {
        let text = r#"![pic](../media/p.png "Title") ![abs](https://x/y.png) ![here](./q.png) ![root](~/m/r.png) ![site](/azure/s.png)"#;
        let found = find_relative_images(text);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].target, "../media/p.png");
        assert_eq!(found[0].title.as_deref(), Some("\"Title\""));
        assert_eq!(found[1].alt, "here");
        assert_eq!(found[2].target, "~/m/r.png");
    }

    #[test]
    fn test_parse_highlight() {
        let expected: BTreeSet<u32> = [1, 3, 4, 5].into_iter().collect();
        assert_eq!(parse_highlight("1,3-5"), expected);
        assert_eq!(parse_highlight(" 5-3 , 1 "), expected);
        assert_eq!(parse_highlight("x,1,a-b,3-5,"), expected);
        assert!(parse_highlight("").is_empty());
        assert!(parse_highlight("0,1-99999999").is_empty());
    }

    #[test]
    fn test_line_indent() {
        let text = "first\n    - [!include[](a.md)]";
        let offset = text.find('[').unwrap();
        assert_eq!(line_indent(text, offset), "    ");
        assert_eq!(line_indent("[!include", 0), "");
    }

    #[test]
    fn test_reindent() {
        assert_eq!(reindent("a\nb\nc", "  "), "a\n  b\n  c");
        assert_eq!(reindent("a\nb", ""), "a\nb");
    }

    #[test]
    fn test_splice_preserves_surrounding_text() {
        let text = "AxBxxCx";
        let replacements = vec![
            (6..7, "__".to_string()),
            (1..2, String::new()),
            (3..5, "yyyy".to_string()),
        ];
        assert_eq!(splice(text, replacements), "AByyyyC__");
    }

    #[test]
    fn test_splice_adjacent_spans() {
        let text = "[a][b][c]";
        let replacements = vec![
            (0..3, "1".to_string()),
            (3..6, "22222".to_string()),
            (6..9, String::new()),
        ];
        assert_eq!(splice(text, replacements), "122222");
        assert_eq!(splice("unchanged", vec![]), "unchanged");
    }

    #[test]
    fn test_relative_references() {
        let text = concat!(
            ":::code language=\"py\" source=\"./a.py\":::\n",
            ":::image type=\"content\" source=\"learn-pr/abs.png\" alt-text=\"x\":::\n",
            "![p](../media/p.png) ![r](~/m/media/r.png)"
        );
        let refs = relative_references(text);
        let values: Vec<_> = refs.iter().map(|r| (r.value.as_str(), r.markdown_image)).collect();
        assert_eq!(values, vec![("./a.py", false), ("../media/p.png", true)]);
        for r in &refs {
            assert_eq!(&text[r.span.clone()], r.value);
        }
    }
}
