//! The conversion driver: walks the input, applies dictionary matches and
//! bracket rules, and produces the aligned source/target segments.

use serde::Serialize;

use crate::dictionary::Dictionary;
use crate::markup;
use crate::rule::Rule;
use crate::side_table::Fallback;
use crate::trie::Priority;

/// How far past the cursor a rule's end token is searched for, in characters.
pub const DEFAULT_RULE_LOOKAHEAD: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub rule_lookahead: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            rule_lookahead: DEFAULT_RULE_LOOKAHEAD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Name,
    Phrase,
    RuleOpen,
    RuleClose,
    Reading,
    Punctuation,
    Verbatim,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Name => "name",
            SegmentKind::Phrase => "phrase",
            SegmentKind::RuleOpen => "rule_open",
            SegmentKind::RuleClose => "rule_close",
            SegmentKind::Reading => "reading",
            SegmentKind::Punctuation => "punctuation",
            SegmentKind::Verbatim => "verbatim",
        }
    }
}

/// One emitted span. `start` and `end` are character offsets into the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub kind: SegmentKind,
    pub source: String,
    pub target: String,
    /// Shared by the source and target rendering of this span.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// The ranked meanings of a phrase match, top meaning first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

/// The result of converting one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Conversion {
    pub segments: Vec<Segment>,
}

impl Conversion {
    /// The source text with anchor-tagged spans.
    pub fn source_html(&self) -> String {
        markup::source_html(&self.segments)
    }

    /// The target text with anchor-tagged spans.
    pub fn target_html(&self) -> String {
        markup::target_html(&self.segments)
    }

    pub fn into_html_pair(self) -> (String, String) {
        (self.source_html(), self.target_html())
    }

    pub fn source_text(&self) -> String {
        self.segments.iter().map(|s| s.source.as_str()).collect()
    }

    pub fn target_text(&self) -> String {
        markup::target_plain(&self.segments)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.segments)
    }
}

/// Converts `input`, returning the anchor-tagged source and target strings.
///
/// `progress` receives the number of characters processed after every
/// advance, in strictly increasing order. It is never called for empty input.
pub fn convert(
    dictionary: &Dictionary,
    input: &str,
    progress: Option<&dyn Fn(usize)>,
) -> (String, String) {
    let chars: Vec<char> = input.chars().collect();
    Driver::new(dictionary, &chars, ConvertOptions::default())
        .run(progress)
        .into_html_pair()
}

struct OpenRule<'a> {
    rule: &'a Rule,
    end_pos: usize,
    end_len: usize,
}

struct RuleHit<'a> {
    rule: &'a Rule,
    start_len: usize,
    end_pos: usize,
    end_len: usize,
}

pub(crate) struct Driver<'a> {
    dictionary: &'a Dictionary,
    chars: &'a [char],
    options: ConvertOptions,
    segments: Vec<Segment>,
    open: Vec<OpenRule<'a>>,
}

impl<'a> Driver<'a> {
    pub(crate) fn new(
        dictionary: &'a Dictionary,
        chars: &'a [char],
        options: ConvertOptions,
    ) -> Self {
        Self {
            dictionary,
            chars,
            options,
            segments: Vec::new(),
            open: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, progress: Option<&dyn Fn(usize)>) -> Conversion {
        let len = self.chars.len();
        let mut i = 0;

        while i < len {
            // Nothing inside an open rule may cross its end token.
            let limit = self.open.last().map_or(len, |open| open.end_pos);

            i += if i == limit {
                self.close_rule(i)
            } else if let Some(hit) = self.find_rule(i, limit) {
                self.open_rule(i, hit)
            } else {
                self.emit_match(i, limit)
            };

            if let Some(report) = progress {
                report(i);
            }
        }

        Conversion {
            segments: self.segments,
        }
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    /// Nearest closing token for the longest rule start at `i`, within the
    /// lookahead window and the enclosing span.
    fn find_rule(&self, i: usize, limit: usize) -> Option<RuleHit<'a>> {
        let window_end = limit.min(i.saturating_add(self.options.rule_lookahead));
        let scope = &self.chars[..limit];

        for start in self.dictionary.rule_starts(scope, i) {
            let search_from = i + start.start_len;
            let mut best: Option<RuleHit<'a>> = None;

            for rule in start.rules {
                let end: Vec<char> = rule.original_end.chars().collect();
                let Some(end_pos) = find_token(self.chars, &end, search_from, window_end) else {
                    continue;
                };
                if best.as_ref().is_none_or(|b| end_pos < b.end_pos) {
                    best = Some(RuleHit {
                        rule,
                        start_len: start.start_len,
                        end_pos,
                        end_len: end.len(),
                    });
                }
            }

            if best.is_some() {
                return best;
            }
        }

        None
    }

    fn open_rule(&mut self, i: usize, hit: RuleHit<'a>) -> usize {
        let end = i + hit.start_len;
        self.segments.push(Segment {
            start: i,
            end,
            kind: SegmentKind::RuleOpen,
            source: self.text(i, end),
            target: hit.rule.translation_start.clone(),
            anchor: Some(hit.rule.original_start.clone()),
            alternatives: Vec::new(),
        });
        self.open.push(OpenRule {
            rule: hit.rule,
            end_pos: hit.end_pos,
            end_len: hit.end_len,
        });
        hit.start_len
    }

    fn close_rule(&mut self, i: usize) -> usize {
        let Some(open) = self.open.pop() else {
            return 1;
        };
        let end = i + open.end_len;
        self.segments.push(Segment {
            start: i,
            end,
            kind: SegmentKind::RuleClose,
            source: self.text(i, end),
            target: open.rule.translation_end.clone(),
            anchor: Some(open.rule.original_end.clone()),
            alternatives: Vec::new(),
        });
        open.end_len
    }

    fn emit_match(&mut self, i: usize, limit: usize) -> usize {
        let m = self.dictionary.find(&self.chars[..limit], i);

        if !m.is_none() {
            let end = i + m.len;
            let source = self.text(i, end);
            let (kind, alternatives) = match m.priority {
                Priority::Name => (SegmentKind::Name, Vec::new()),
                _ => (SegmentKind::Phrase, m.alternatives.to_vec()),
            };
            self.segments.push(Segment {
                start: i,
                end,
                kind,
                target: m.translation.to_string(),
                anchor: Some(source.clone()),
                source,
                alternatives,
            });
            return m.len;
        }

        let c = self.chars[i];
        let source = c.to_string();
        let (kind, target, anchor) = match self.dictionary.side_tables().lookup(c) {
            Some(Fallback::Punctuation(p)) => (SegmentKind::Punctuation, p.to_string(), None),
            Some(Fallback::Reading(r)) => {
                (SegmentKind::Reading, r.to_string(), Some(source.clone()))
            }
            None => (SegmentKind::Verbatim, source.clone(), None),
        };
        self.segments.push(Segment {
            start: i,
            end: i + 1,
            kind,
            source,
            target,
            anchor,
            alternatives: Vec::new(),
        });
        1
    }
}

/// First position `p` in `from..to` where `token` occurs entirely before `to`.
fn find_token(chars: &[char], token: &[char], from: usize, to: usize) -> Option<usize> {
    if token.is_empty() || to > chars.len() || from + token.len() > to {
        return None;
    }
    chars[from..to]
        .windows(token.len())
        .position(|window| window == token)
        .map(|offset| from + offset)
}
