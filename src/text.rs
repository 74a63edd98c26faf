//! Loading raw text and splitting it into pages.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PAGE_LENGTH: usize = 2000;

#[derive(Error, Debug)]
pub enum TextError {
    #[error("No text available.")]
    NoText,

    #[error("Cannot read text. Make sure the source is a UTF-8 text file.")]
    NotText,

    #[error("Cannot open '{path}': {source}")]
    Unreadable { path: PathBuf, source: io::Error },
}

/// A source of clipboard text.
pub trait Clipboard {
    fn text(&self) -> Option<String>;
}

/// Splits `input` into pages of at least `page_length` characters, each
/// extended to the end of its line. When no newline follows the target
/// length, the page ends after its last newline instead. A page with no
/// newline at all is cut at exactly `page_length` characters.
///
/// A `page_length` of 0 disables pagination.
pub fn paginate(input: &str, page_length: usize) -> Vec<&str> {
    if input.is_empty() {
        return Vec::new();
    }
    if page_length == 0 {
        return vec![input];
    }

    let mut pages = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some((target, _)) = rest.char_indices().nth(page_length) else {
            pages.push(rest);
            break;
        };
        let cut = match rest[target..].find('\n') {
            Some(newline) => target + newline + 1,
            None => rest[..target].rfind('\n').map_or(target, |newline| newline + 1),
        };
        let (page, remainder) = rest.split_at(cut);
        pages.push(page);
        rest = remainder;
    }

    pages
}

pub fn load_from_file(path: impl AsRef<Path>) -> Result<String, TextError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| TextError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    decode(bytes)
}

pub fn load_from_reader<R: Read>(mut reader: R) -> Result<String, TextError> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|source| TextError::Unreadable {
            path: PathBuf::from("-"),
            source,
        })?;
    decode(bytes)
}

pub fn load_from_clipboard(clipboard: &dyn Clipboard) -> Result<String, TextError> {
    match clipboard.text() {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(TextError::NoText),
    }
}

fn decode(bytes: Vec<u8>) -> Result<String, TextError> {
    if bytes.is_empty() {
        return Err(TextError::NoText);
    }
    let text = String::from_utf8(bytes).map_err(|_| TextError::NotText)?;
    // Strip a UTF-8 byte order mark.
    Ok(match text.strip_prefix('\u{FEFF}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn pages_end_on_line_boundaries() {
        let input = "一二三\n四五\n六七八九\n十";
        assert_eq!(paginate(input, 2), vec!["一二三\n", "四五\n", "六七八九\n", "十"]);
        assert_eq!(paginate(input, 5), vec!["一二三\n四五\n", "六七八九\n", "十"]);
    }

    #[test]
    fn pages_are_hard_cut_without_a_newline() {
        assert_eq!(paginate("一二三四五", 2), vec!["一二", "三四", "五"]);
        assert_eq!(paginate("一二\n三四五六七", 3), vec!["一二\n", "三四五", "六七"]);
    }

    #[test]
    fn pages_fall_back_to_an_earlier_line_end() {
        assert_eq!(paginate("ab\ncdefgh", 5), vec!["ab\n", "cdefg", "h"]);
        assert_eq!(paginate("一\n二\n三四五六", 4), vec!["一\n二\n", "三四五六"]);
    }

    #[test]
    fn short_and_empty_inputs() {
        assert_eq!(paginate("一二", 10), vec!["一二"]);
        assert!(paginate("", 10).is_empty());
        assert_eq!(paginate("一二三", 0), vec!["一二三"]);
    }

    #[test]
    fn pages_concatenate_to_the_input() {
        let input = "第一行\n第二行很长很长很长\n\n第四行";
        for length in 1..12 {
            assert_eq!(paginate(input, length).concat(), input);
        }
    }

    struct FixedClipboard(Option<String>);

    impl Clipboard for FixedClipboard {
        fn text(&self) -> Option<String> {
            self.0.clone()
        }
    }

    #[test]
    fn clipboard_without_text_is_reported() {
        assert!(matches!(
            load_from_clipboard(&FixedClipboard(None)),
            Err(TextError::NoText)
        ));
        assert!(matches!(
            load_from_clipboard(&FixedClipboard(Some(String::new()))),
            Err(TextError::NoText)
        ));
        assert_eq!(
            load_from_clipboard(&FixedClipboard(Some("你好".into()))).unwrap(),
            "你好"
        );
    }

    #[test]
    fn readers_distinguish_binary_from_empty() {
        assert!(matches!(
            load_from_reader(Cursor::new(vec![0xff, 0xfe, 0x00])),
            Err(TextError::NotText)
        ));
        assert!(matches!(
            load_from_reader(Cursor::new(Vec::new())),
            Err(TextError::NoText)
        ));
        assert_eq!(load_from_reader(Cursor::new("\u{FEFF}你好".as_bytes())).unwrap(), "你好");
    }

    #[test]
    fn missing_files_are_unreadable() {
        assert!(matches!(
            load_from_file("/definitely/not/here.txt"),
            Err(TextError::Unreadable { .. })
        ));
    }
}
