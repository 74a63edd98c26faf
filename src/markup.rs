//! Rendering of segments into the two anchor-tagged output streams.
//!
//! Anchored segments become `<a href="ANCHOR" class="KIND">TEXT</a>`; every
//! other segment is written as escaped text. Anchor values are the matched
//! source text, so the same value tags a span in both streams.

use std::fmt::Write;
use std::ops::Range;

use crate::convert::{Segment, SegmentKind};

pub fn source_html(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        push_span(&mut out, segment, &segment.source);
    }
    out
}

pub fn target_html(segments: &[Segment]) -> String {
    let mut out = String::new();
    for_each_target(segments, |segment, space| {
        if space {
            out.push(' ');
        }
        push_span(&mut out, segment, &segment.target);
    });
    out
}

pub fn target_plain(segments: &[Segment]) -> String {
    let mut out = String::new();
    for_each_target(segments, |segment, space| {
        if space {
            out.push(' ');
        }
        out.push_str(&segment.target);
    });
    out
}

/// Byte range of the first anchored span whose anchor equals `anchor`.
pub fn find_anchor(html: &str, anchor: &str) -> Option<Range<usize>> {
    let mut needle = String::from("<a href=\"");
    escape_into(&mut needle, anchor);
    needle.push('"');

    let start = html.find(&needle)?;
    let close = "</a>";
    let end = html[start..].find(close)? + start + close.len();
    Some(start..end)
}

/// Walks the segments with a non-empty target, telling the callback whether a
/// word space precedes each one.
fn for_each_target<'a>(segments: &'a [Segment], mut f: impl FnMut(&'a Segment, bool)) {
    let mut prev: Option<&Segment> = None;
    for segment in segments.iter().filter(|s| !s.target.is_empty()) {
        let space = prev.is_some_and(|p| needs_space(p, segment));
        f(segment, space);
        prev = Some(segment);
    }
}

fn is_word(kind: SegmentKind) -> bool {
    matches!(
        kind,
        SegmentKind::Name | SegmentKind::Phrase | SegmentKind::Reading
    )
}

/// Translated words are space-separated. Untranslated text is never padded.
fn needs_space(prev: &Segment, next: &Segment) -> bool {
    if prev.kind == SegmentKind::Verbatim || next.kind == SegmentKind::Verbatim {
        return false;
    }
    let (Some(last), Some(first)) = (prev.target.chars().last(), next.target.chars().next())
    else {
        return false;
    };
    if last.is_whitespace() || first.is_whitespace() {
        return false;
    }

    let closes = match prev.kind {
        SegmentKind::RuleClose => true,
        SegmentKind::Punctuation => {
            matches!(last, ',' | '.' | ';' | ':' | '!' | '?' | ')' | ']' | '»' | '›')
        }
        kind => is_word(kind) && last.is_alphanumeric(),
    };
    let opens =
        next.kind == SegmentKind::RuleOpen || (is_word(next.kind) && first.is_alphanumeric());

    closes && opens
}

fn push_span(out: &mut String, segment: &Segment, text: &str) {
    match &segment.anchor {
        Some(anchor) => {
            out.push_str("<a href=\"");
            escape_into(out, anchor);
            let _ = write!(out, "\" class=\"{}\">", segment.kind.as_str());
            escape_into(out, text);
            out.push_str("</a>");
        }
        None => escape_into(out, text),
    }
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
