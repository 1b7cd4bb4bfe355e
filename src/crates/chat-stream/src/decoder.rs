//! Marker decoder
//!
//! Splits a turn's accumulated text on bracketed labels such as `【回答】` or
//! `[thinking]`. A small tokenizer finds candidate brackets and the
//! [`MARKERS`] table decides which labels are markers; a bracket whose label
//! is not in the table is ordinary text.
//!
//! Text before the first marker, or text without any marker, becomes a RAW
//! block exactly as received. Marker bodies lose trailing whitespace and the
//! blank lines after the label; indentation of their first line is kept.

use crate::block::{BlockKind, ContentBlock};
use crate::{Result, StreamError};
use tracing::warn;

/// Marker label to block kind. ASCII labels match case-insensitively.
pub const MARKERS: &[(&str, BlockKind)] = &[
    ("思考", BlockKind::Thinking),
    ("thinking", BlockKind::Thinking),
    ("分析", BlockKind::Analyzing),
    ("analyzing", BlockKind::Analyzing),
    ("analysis", BlockKind::Analyzing),
    ("回答", BlockKind::Answer),
    ("answer", BlockKind::Answer),
    ("回复", BlockKind::Response),
    ("response", BlockKind::Response),
    ("文档", BlockKind::DocumentRef),
    ("参考", BlockKind::DocumentRef),
    ("参考文档", BlockKind::DocumentRef),
    ("document", BlockKind::DocumentRef),
    ("reference", BlockKind::DocumentRef),
    ("references", BlockKind::DocumentRef),
];

/// Opening and closing bracket pairs
const BRACKETS: &[(char, char)] = &[('【', '】'), ('[', ']')];

/// Longest label, in characters, the tokenizer will consider
const MAX_LABEL_CHARS: usize = 16;

/// Kind for a marker label, if it is one
pub fn classify_marker(label: &str) -> Option<BlockKind> {
    let label = label.trim();
    MARKERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(label))
        .map(|(_, kind)| *kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Marker(BlockKind),
}

fn closing_bracket(open: char) -> Option<char> {
    BRACKETS
        .iter()
        .find(|(o, _)| *o == open)
        .map(|(_, close)| *close)
}

fn slice(text: &str, start: usize, end: usize) -> Result<&str> {
    text.get(start..end)
        .ok_or_else(|| StreamError::Decode(format!("no char boundary at {}..{}", start, end)))
}

/// Label between `start` and the matching `close`, with the offset just past
/// the closing bracket.
fn scan_label(text: &str, start: usize, close: char) -> Result<Option<(&str, usize)>> {
    let rest = slice(text, start, text.len())?;
    for (count, (offset, ch)) in rest.char_indices().enumerate() {
        if count > MAX_LABEL_CHARS || ch == '\n' || closing_bracket(ch).is_some() {
            return Ok(None);
        }
        if ch == close {
            let label = slice(text, start, start + offset)?;
            return Ok(Some((label, start + offset + ch.len_utf8())));
        }
    }
    Ok(None)
}

fn tokenize(text: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while pos < text.len() {
        let Some(ch) = slice(text, pos, text.len())?.chars().next() else {
            break;
        };

        if let Some(close) = closing_bracket(ch) {
            if let Some((label, end)) = scan_label(text, pos + ch.len_utf8(), close)? {
                if let Some(kind) = classify_marker(label) {
                    if text_start < pos {
                        tokens.push(Token::Text(slice(text, text_start, pos)?));
                    }
                    tokens.push(Token::Marker(kind));
                    pos = end;
                    text_start = end;
                    continue;
                }
            }
        }
        pos += ch.len_utf8();
    }

    if text_start < text.len() {
        tokens.push(Token::Text(slice(text, text_start, text.len())?));
    }
    Ok(tokens)
}

/// Decode `text` into blocks with ids `{id_prefix}-{index}`.
///
/// Fails only on an internal tokenizer fault; [`decode`] turns that into a
/// RAW passthrough.
pub fn try_decode(text: &str, id_prefix: &str) -> Result<Vec<ContentBlock>> {
    let tokens = tokenize(text)?;
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let next_id = |blocks: &Vec<ContentBlock>| format!("{}-{}", id_prefix, blocks.len());

    if !tokens.iter().any(|t| matches!(t, Token::Marker(_))) {
        if !text.is_empty() {
            blocks.push(ContentBlock::new(next_id(&blocks), BlockKind::Raw, text));
        }
        return Ok(blocks);
    }

    let mut tokens = tokens.into_iter().peekable();
    while let Some(token) = tokens.next() {
        match token {
            Token::Text(lead) => {
                // only possible before the first marker
                blocks.push(ContentBlock::new(next_id(&blocks), BlockKind::Raw, lead));
            }
            Token::Marker(kind) => {
                let body = match tokens.peek() {
                    Some(Token::Text(body)) => {
                        let body = trim_body(body);
                        tokens.next();
                        body
                    }
                    _ => "",
                };
                blocks.push(ContentBlock::new(next_id(&blocks), kind, body));
            }
        }
    }

    Ok(blocks)
}

/// Strip a marker body's trailing whitespace and the whitespace between the
/// label and its content. When the content starts on a later line, that
/// line's indentation stays.
fn trim_body(body: &str) -> &str {
    let body = body.trim_end();
    let content_start = body.len() - body.trim_start().len();
    match body[..content_start].rfind('\n') {
        Some(newline) => &body[newline + 1..],
        None => &body[content_start..],
    }
}

/// Decode `text`, degrading to one verbatim RAW block if decoding fails.
pub fn decode(text: &str, id_prefix: &str) -> Vec<ContentBlock> {
    match try_decode(text, id_prefix) {
        Ok(blocks) => blocks,
        Err(e) => {
            warn!(error = %e, len = text.len(), "marker decoding failed, passing text through");
            if text.is_empty() {
                Vec::new()
            } else {
                vec![ContentBlock::new(
                    format!("{}-0", id_prefix),
                    BlockKind::Raw,
                    text,
                )]
            }
        }
    }
}

/// Decode text that is still streaming.
///
/// A trailing bracket that could still become a marker is held back until
/// the next chunk settles it, so half-received labels never show up as text.
pub fn decode_streaming(text: &str, id_prefix: &str) -> Vec<ContentBlock> {
    let cut = pending_marker_start(text).unwrap_or(text.len());
    decode(text.get(..cut).unwrap_or(text), id_prefix)
}

/// Byte offset of an unterminated trailing bracket whose label so far is a
/// prefix of some marker.
fn pending_marker_start(text: &str) -> Option<usize> {
    let (start, open) = text
        .char_indices()
        .rev()
        .find(|(_, ch)| closing_bracket(*ch).is_some())?;
    let close = closing_bracket(open)?;
    let partial = text.get(start + open.len_utf8()..)?;

    if partial.contains(close) || partial.contains('\n') {
        return None;
    }
    if partial.chars().count() > MAX_LABEL_CHARS {
        return None;
    }

    let partial = partial.to_ascii_lowercase();
    MARKERS
        .iter()
        .any(|(name, _)| name.to_ascii_lowercase().starts_with(&partial))
        .then_some(start)
}
