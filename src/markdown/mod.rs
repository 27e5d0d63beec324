pub mod directives;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use base64::Engine;
use futures::future::{join_all, FutureExt, LocalBoxFuture};
use serde::Serialize;
use tracing::{debug, warn};

use crate::fetch::FetchError;
use crate::paths::{file_name, image_ref, resolve_relative};

use directives::{
    find_code, find_images, find_includes, find_relative_images, line_indent, parse_highlight,
    reindent, relative_references, splice, CodeDirective, ImageDirective, ROOT_PREFIX,
};

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100" viewBox="0 0 200 100"><rect width="200" height="100" fill="#f3f2f1" stroke="#a19f9d"/><text x="100" y="55" font-family="sans-serif" font-size="16" text-anchor="middle" fill="#a4262c">Error</text></svg>"##;

/// Stand-in image for image directives that could not be resolved.
static PLACEHOLDER_IMAGE: LazyLock<String> = LazyLock::new(|| {
    format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(PLACEHOLDER_SVG)
    )
});

/// Read access to repository files by path, used to pull in included
/// documents and code snippets.
#[allow(async_fn_in_trait)]
pub trait FileReader {
    async fn read_file(&self, path: &str) -> Result<Arc<str>, FetchError>;
}

/// Markdown with every directive resolved.
///
/// `content` carries the comment-based metadata convention inline; the same
/// metadata is also listed here in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedMarkdown {
    pub content: String,
    pub code_blocks: Vec<CodeBlockMeta>,
    pub images: Vec<ImageMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlockMeta {
    pub language: String,
    pub source: String,
    pub filename: String,
    pub highlight: Option<String>,
    pub highlighted_lines: BTreeSet<u32>,
    pub range: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    /// `IMG_REF_` token the image URL was replaced with.
    pub reference: String,
    pub source: String,
    pub kind: Option<String>,
    pub alt_text: String,
    pub attributes: BTreeMap<String, String>,
    pub description: Option<String>,
}

/// Resolve every directive in `text`, a document living at `doc_path`.
///
/// Includes are expanded first (recursively), then code snippets, then
/// images, each pass over the output of the previous one. The image pass
/// leaves the fenced blocks of inlined snippets untouched.
pub async fn expand<R: FileReader>(reader: &R, text: &str, doc_path: &str) -> ExpandedMarkdown {
    let included = expand_includes(reader, text.to_string(), doc_path.to_string(), HashSet::new()).await;
    let (with_code, code_blocks, fenced) = expand_code(reader, &included, doc_path).await;
    let (content, images) = expand_images(&with_code, doc_path, &fenced);

    debug!(
        path = doc_path,
        code_blocks = code_blocks.len(),
        images = images.len(),
        "expanded document"
    );
    ExpandedMarkdown {
        content,
        code_blocks,
        images,
    }
}

/// Inline `[!include[]()]` targets. `ancestors` holds the documents
/// currently being expanded on this branch; including one of them again
/// leaves a circular-reference marker instead of recursing.
fn expand_includes<'a, R: FileReader + 'a>(
    reader: &'a R,
    text: String,
    doc_path: String,
    ancestors: HashSet<String>,
) -> LocalBoxFuture<'a, String> {
    async move {
        let includes = find_includes(&text);
        if includes.is_empty() {
            return text;
        }

        let mut in_progress = ancestors;
        in_progress.insert(doc_path.clone());

        let text_ref = &text;
        let doc_path = &doc_path;
        let in_progress = &in_progress;
        let replacements = join_all(includes.into_iter().map(|include| async move {
            let indent = line_indent(text_ref, include.span.start);
            let resolved = resolve_relative(&include.path, doc_path);

            let body = if resolved.is_empty() {
                warn!(path = %include.path, from = %doc_path, "unresolvable include");
                format!("<!-- Error: could not resolve include path: {} -->", include.path)
            } else if in_progress.contains(&resolved) {
                warn!(path = %resolved, from = %doc_path, "circular include");
                format!("<!-- Error: circular include detected: {} -->", resolved)
            } else {
                match reader.read_file(&resolved).await {
                    Ok(raw) => {
                        let nested =
                            expand_includes(reader, raw.to_string(), resolved.clone(), in_progress.clone())
                                .await;
                        let rebased = rebase_relative_references(&nested, &resolved);
                        reindent(rebased.trim_end_matches(['\n', '\r']), indent)
                    }
                    Err(e) => {
                        warn!(path = %resolved, error = %e, "include download failed");
                        format!("<!-- Error: failed to include {}: {} -->", resolved, e)
                    }
                }
            };
            (include.span, body)
        }))
        .await;

        splice(&text, replacements)
    }
    .boxed_local()
}

/// Rewrite relative code/image sources of an included document so they
/// resolve against the included file rather than the document it lands in.
/// Markdown image targets become `~/` rooted so the image pass still sees them.
fn rebase_relative_references(text: &str, included_path: &str) -> String {
    let replacements = relative_references(text)
        .into_iter()
        .filter_map(|r| {
            let resolved = resolve_relative(&r.value, included_path);
            if resolved.is_empty() {
                return None;
            }
            let value = if r.markdown_image {
                format!("{}{}", ROOT_PREFIX, resolved)
            } else {
                resolved
            };
            Some((r.span, value))
        })
        .collect();
    splice(text, replacements)
}

/// Returns the new text, the metadata of every loaded snippet, and the spans
/// the emitted blocks occupy in the new text.
async fn expand_code<R: FileReader>(
    reader: &R,
    text: &str,
    doc_path: &str,
) -> (String, Vec<CodeBlockMeta>, Vec<Range<usize>>) {
    let directives = find_code(text);
    if directives.is_empty() {
        return (text.to_string(), Vec::new(), Vec::new());
    }

    let rendered = join_all(
        directives
            .iter()
            .map(|directive| render_code(reader, text, directive, doc_path)),
    )
    .await;

    let mut replacements = Vec::with_capacity(rendered.len());
    let mut metadata = Vec::new();
    for (directive, (block, meta)) in directives.iter().zip(rendered) {
        replacements.push((directive.span.clone(), block));
        metadata.extend(meta);
    }

    // Directives come back in document order, so each block moves by the
    // size change of the blocks before it.
    let mut fenced = Vec::with_capacity(replacements.len());
    let mut shift = 0isize;
    for (span, block) in &replacements {
        let start = span.start.saturating_add_signed(shift);
        fenced.push(start..start + block.len());
        shift += block.len() as isize - span.len() as isize;
    }
    (splice(text, replacements), metadata, fenced)
}

async fn render_code<R: FileReader>(
    reader: &R,
    text: &str,
    directive: &CodeDirective,
    doc_path: &str,
) -> (String, Option<CodeBlockMeta>) {
    let indent = line_indent(text, directive.span.start);
    let language = directive.language.clone().unwrap_or_else(|| "text".to_string());
    let source = directive.source.as_deref().unwrap_or("").trim();
    let resolved = resolve_relative(source, doc_path);

    if resolved.is_empty() {
        warn!(source, from = doc_path, "code directive without resolvable source");
        return (code_error_block(source, "source path could not be resolved", indent), None);
    }

    let content = match reader.read_file(&resolved).await {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %resolved, error = %e, "code snippet download failed");
            return (code_error_block(source, &e.to_string(), indent), None);
        }
    };

    let meta = CodeBlockMeta {
        language: language.clone(),
        filename: file_name(&resolved).to_string(),
        source: resolved.clone(),
        highlighted_lines: directive.highlight.as_deref().map(parse_highlight).unwrap_or_default(),
        highlight: directive.highlight.clone(),
        range: directive.range.clone(),
        id: directive.id.clone(),
    };

    let mut body = String::new();
    if let Some(highlight) = &meta.highlight {
        body.push_str(&format!("// @highlight: {}\n", highlight));
    }
    body.push_str(&format!("// @filename: {}\n", meta.filename));
    body.push_str(&format!("// @source: {}\n", meta.source));
    body.push_str(content.trim_end_matches(['\n', '\r']));

    let block = format!("```{}\n{}\n```", language, body);
    (reindent(&block, indent), Some(meta))
}

fn code_error_block(source: &str, reason: &str, indent: &str) -> String {
    let block = format!(
        "```text\nError: unable to load code snippet from \"{}\": {}\n```",
        source, reason
    );
    reindent(&block, indent)
}

/// Replace image directives and relative Markdown images with `IMG_REF_`
/// references, skipping anything that overlaps a `fenced` span. No I/O: the
/// tokens are resolved later from the module's media map.
fn expand_images(text: &str, doc_path: &str, fenced: &[Range<usize>]) -> (String, Vec<ImageMeta>) {
    enum Found {
        Directive(ImageDirective),
        Markdown(directives::RelativeImage),
    }

    let mut found: Vec<(Range<usize>, Found)> = find_images(text)
        .into_iter()
        .map(|d| (d.span.clone(), Found::Directive(d)))
        .chain(
            find_relative_images(text)
                .into_iter()
                .map(|m| (m.span.clone(), Found::Markdown(m))),
        )
        .filter(|(span, _)| !fenced.iter().any(|f| span.start < f.end && f.start < span.end))
        .collect();
    found.sort_by_key(|(span, _)| span.start);

    let mut replacements = Vec::with_capacity(found.len());
    let mut metadata = Vec::new();
    let mut last_end = 0;
    for (span, item) in found {
        if span.start < last_end {
            continue;
        }
        last_end = span.end;

        match item {
            Found::Directive(directive) => {
                let (markdown, meta) = render_image(&directive, doc_path);
                replacements.push((span, markdown));
                metadata.extend(meta);
            }
            Found::Markdown(image) => {
                let resolved = match image.target.strip_prefix(ROOT_PREFIX) {
                    Some(rooted) => rooted.trim_start_matches('/').to_string(),
                    None => resolve_relative(&image.target, doc_path),
                };
                if resolved.is_empty() {
                    continue;
                }
                let reference = image_ref(&resolved);
                let title = image.title.map(|t| format!(" {}", t)).unwrap_or_default();
                replacements.push((span, format!("![{}]({}{})", image.alt, reference, title)));
                metadata.push(ImageMeta {
                    reference,
                    source: resolved,
                    kind: None,
                    alt_text: image.alt,
                    attributes: BTreeMap::new(),
                    description: None,
                });
            }
        }
    }

    (splice(text, replacements), metadata)
}

fn render_image(directive: &ImageDirective, doc_path: &str) -> (String, Option<ImageMeta>) {
    let source = directive.source.as_deref().unwrap_or("").trim();
    let resolved = resolve_relative(source, doc_path);
    if resolved.is_empty() {
        warn!(source, from = doc_path, "image directive without resolvable source");
        let alt = if directive.alt_text.is_empty() {
            "Error".to_string()
        } else {
            format!("Error: {}", directive.alt_text)
        };
        return (format!("![{}]({})", alt, PLACEHOLDER_IMAGE.as_str()), None);
    }

    let reference = image_ref(&resolved);
    let kind = directive.kind.clone().unwrap_or_else(|| "content".to_string());
    let markdown = format!(
        "![{alt}]({reference}) <!-- @type: {kind} --><!-- @enhanced: true --><!-- @ref: {reference} -->",
        alt = directive.alt_text,
        reference = reference,
        kind = kind,
    );
    let meta = ImageMeta {
        reference,
        source: resolved,
        kind: Some(kind),
        alt_text: directive.alt_text.clone(),
        attributes: directive.attributes.clone(),
        description: directive.description.clone(),
    };
    (markdown, Some(meta))
}
