//! Main library for hanviet.
//!
//! Chinese text is converted by greedy longest-match lookups against a
//! prioritized dictionary trie. Names outrank phrases, bracket rules translate
//! a start/end token pair as a unit, and unmatched characters fall back to
//! punctuation and reading tables. The output is two aligned, anchor-tagged
//! streams: the source text and its translation.
//!
//! # Example
//! ```
//! use hanviet::{Converter, Dictionary, Priority};
//!
//! let mut dictionary = Dictionary::new();
//! dictionary.insert("你好", "xin chào", Priority::Phrase);
//! dictionary.finish_load();
//!
//! let conversion = Converter::new(&dictionary).convert("你好");
//! assert_eq!(conversion.target_text(), "xin chào");
//! ```

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;

pub use crate::convert::{
    Conversion, ConvertOptions, DEFAULT_RULE_LOOKAHEAD, Segment, SegmentKind, convert,
};
pub use crate::dictionary::{Dictionary, LoadState, LoadStats};
pub use crate::rule::Rule;
pub use crate::side_table::{Fallback, SideTables};
pub use crate::store::{
    DictRow, DictSource, ImportError, NameSet, NameSetSummary, SqliteStore, StoreError,
};
pub use crate::text::{DEFAULT_PAGE_LENGTH, TextError};
pub use crate::trie::{BULK_DELIMITER, Entry, Match, Priority, TrieStore};
pub use crate::worker::{ConversionService, ConversionTask, TaskEvent, load_in_background};

use crate::convert::Driver;

mod convert;
mod dictionary;
pub mod markup;
mod rule;
mod side_table;
mod store;
pub mod text;
mod trie;
mod worker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Html,
    Plain,
    Json,
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("The dictionary is not ready yet (state: {0:?})")]
    NotReady(LoadState),

    #[error("The conversion worker stopped without a result")]
    Disconnected,

    #[error("Failed to serialize the result to JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Synchronous conversion against a borrowed dictionary.
#[derive(Debug, Clone, Copy)]
pub struct Converter<'d> {
    dictionary: &'d Dictionary,
    options: ConvertOptions,
}

impl<'d> Converter<'d> {
    pub fn new(dictionary: &'d Dictionary) -> Self {
        Self::with_options(dictionary, ConvertOptions::default())
    }

    pub fn with_options(dictionary: &'d Dictionary, options: ConvertOptions) -> Self {
        Self {
            dictionary,
            options,
        }
    }

    pub fn convert(&self, input: &str) -> Conversion {
        self.convert_with_progress(input, |_| {})
    }

    /// Converts `input`, reporting the processed character count after each advance.
    pub fn convert_with_progress(&self, input: &str, progress: impl Fn(usize)) -> Conversion {
        let chars: Vec<char> = input.chars().collect();
        Driver::new(self.dictionary, &chars, self.options).run(Some(&progress))
    }

    /// Converts independent pages in parallel. The output order matches `pages`.
    pub fn convert_pages(&self, pages: &[&str]) -> Vec<Conversion> {
        pages.par_iter().map(|page| self.convert(page)).collect()
    }

    /// Renders `conversion` in `format`. HTML yields the source and target
    /// streams on separate lines, plain text yields the target only.
    pub fn render(conversion: &Conversion, format: OutputFormat) -> Result<String, ConvertError> {
        Ok(match format {
            OutputFormat::Html => {
                format!("{}\n{}", conversion.source_html(), conversion.target_html())
            }
            OutputFormat::Plain => conversion.target_text(),
            OutputFormat::Json => conversion.to_json()?,
        })
    }
}
