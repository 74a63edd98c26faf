//! SQLite persistence for the dictionary, rules, side tables and name sets.

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::rule::Rule;
use crate::side_table::single_char;
use crate::trie::{BULK_DELIMITER, Priority};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS phrases (
        original TEXT PRIMARY KEY,
        translations TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS names (
        original TEXT PRIMARY KEY,
        translated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS rules (
        original_start TEXT NOT NULL,
        original_end TEXT NOT NULL,
        translation_start TEXT NOT NULL,
        translation_end TEXT NOT NULL,
        PRIMARY KEY (original_start, original_end)
    );

    CREATE TABLE IF NOT EXISTS readings (
        character TEXT PRIMARY KEY,
        reading TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS punctuations (
        character TEXT PRIMARY KEY,
        replacement TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS name_sets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS name_set_entries (
        set_id INTEGER NOT NULL REFERENCES name_sets(id) ON DELETE CASCADE,
        original TEXT NOT NULL,
        translated TEXT NOT NULL,
        PRIMARY KEY (set_id, original)
    );
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("A name set titled '{0}' already exists")]
    DuplicateTitle(String),

    #[error("No name set with id {0}")]
    UnknownNameSet(i64),
}

/// Why a name set import was rejected. Nothing is written when any of these occur.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Could not create name set '{0}'. The name might already exist.")]
    DuplicateTitle(String),

    #[error("Format error at line {line}: Missing '=' separator.")]
    MissingSeparator { line: usize },

    #[error("Format error at line {line}: Original or translated text is empty.")]
    EmptyField { line: usize },

    #[error("Database error at line {line}: {source}")]
    Database { line: usize, source: rusqlite::Error },

    #[error("Failed to read line {line}: {source}")]
    Read { line: usize, source: io::Error },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    /// The 1-based input line the import stopped at, if the failure is tied to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            ImportError::MissingSeparator { line }
            | ImportError::EmptyField { line }
            | ImportError::Database { line, .. }
            | ImportError::Read { line, .. } => Some(*line),
            ImportError::DuplicateTitle(_) | ImportError::Store(_) => None,
        }
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Store(StoreError::Database(err))
    }
}

/// One persisted dictionary row, fed to `insert_bulk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictRow {
    pub key: String,
    pub priority: Priority,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameSet {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameSetSummary {
    pub id: i64,
    pub title: String,
    pub entries: usize,
}

/// Supplies the rows a [`Dictionary`](crate::Dictionary) is built from.
pub trait DictSource {
    fn for_each_entry(&self, f: &mut dyn FnMut(DictRow)) -> Result<(), StoreError>;
    fn rules(&self) -> Result<Vec<Rule>, StoreError>;
    fn readings(&self) -> Result<Vec<(char, String)>, StoreError>;
    fn punctuations(&self) -> Result<Vec<(char, String)>, StoreError>;
    fn name_set_entries(&self, id: i64) -> Result<Vec<(String, String)>, StoreError>;
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl SqliteStore {
    /// Opens (and if needed creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn phrases(&self, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        let joined: Option<String> = self
            .conn
            .query_row(
                "SELECT translations FROM phrases WHERE original = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(joined.map(|s| {
            s.split(BULK_DELIMITER)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        }))
    }

    fn write_phrases(&self, key: &str, list: &[String]) -> Result<(), StoreError> {
        if list.is_empty() {
            self.remove_phrases(key)?;
            return Ok(());
        }
        let joined = list.join(&BULK_DELIMITER.to_string());
        self.conn.execute(
            "INSERT INTO phrases (original, translations) VALUES (?1, ?2)
             ON CONFLICT(original) DO UPDATE SET translations = excluded.translations",
            params![key, joined],
        )?;
        Ok(())
    }

    /// Adds a meaning as the new default, moving it up if already present.
    pub fn add_meaning(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut list = self.phrases(key)?.unwrap_or_default();
        list.retain(|existing| existing != value);
        list.insert(0, value.to_string());
        self.write_phrases(key, &list)
    }

    pub fn remove_meaning(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(mut list) = self.phrases(key)? {
            list.retain(|existing| existing != value);
            self.write_phrases(key, &list)?;
        }
        Ok(())
    }

    pub fn reorder(&self, key: &str, new_order: &[String]) -> Result<(), StoreError> {
        if self.phrases(key)?.is_some() {
            self.write_phrases(key, new_order)?;
        }
        Ok(())
    }

    pub fn remove_phrases(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM phrases WHERE original = ?1", params![key])?;
        Ok(())
    }

    pub fn set_name(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO names (original, translated) VALUES (?1, ?2)
             ON CONFLICT(original) DO UPDATE SET translated = excluded.translated",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_name(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM names WHERE original = ?1", params![key])?;
        Ok(())
    }

    pub fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO rules (original_start, original_end, translation_start, translation_end)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(original_start, original_end) DO UPDATE SET
                translation_start = excluded.translation_start,
                translation_end = excluded.translation_end",
            params![
                rule.original_start,
                rule.original_end,
                rule.translation_start,
                rule.translation_end,
            ],
        )?;
        Ok(())
    }

    pub fn remove_rule(&self, start: &str, end: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM rules WHERE original_start = ?1 AND original_end = ?2",
            params![start, end],
        )?;
        Ok(())
    }

    pub fn set_reading(&self, c: char, reading: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO readings (character, reading) VALUES (?1, ?2)",
            params![c.to_string(), reading],
        )?;
        Ok(())
    }

    pub fn set_punctuation(&self, c: char, replacement: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO punctuations (character, replacement) VALUES (?1, ?2)",
            params![c.to_string(), replacement],
        )?;
        Ok(())
    }

    pub fn name_sets(&self) -> Result<Vec<NameSetSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.title, COUNT(e.original)
             FROM name_sets s LEFT JOIN name_set_entries e ON e.set_id = s.id
             GROUP BY s.id, s.title ORDER BY s.id",
        )?;
        let sets = stmt
            .query_map([], |row| {
                Ok(NameSetSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    entries: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sets)
    }

    pub fn create_name_set(&self, title: &str) -> Result<NameSet, StoreError> {
        match self
            .conn
            .execute("INSERT INTO name_sets (title) VALUES (?1)", params![title])
        {
            Ok(_) => Ok(NameSet {
                id: self.conn.last_insert_rowid(),
                title: title.to_string(),
            }),
            Err(e) if is_constraint_violation(&e) => {
                Err(StoreError::DuplicateTitle(title.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn rename_name_set(&self, id: i64, title: &str) -> Result<(), StoreError> {
        let updated = match self.conn.execute(
            "UPDATE name_sets SET title = ?1 WHERE id = ?2",
            params![title, id],
        ) {
            Ok(n) => n,
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::DuplicateTitle(title.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if updated == 0 {
            return Err(StoreError::UnknownNameSet(id));
        }
        Ok(())
    }

    /// Deletes a name set together with its entries.
    pub fn delete_name_set(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM name_sets WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::UnknownNameSet(id));
        }
        info!(id, "name set deleted");
        Ok(())
    }

    pub fn add_name_set_entry(
        &self,
        id: i64,
        original: &str,
        translated: &str,
    ) -> Result<(), StoreError> {
        match self.conn.execute(
            "INSERT INTO name_set_entries (set_id, original, translated) VALUES (?1, ?2, ?3)
             ON CONFLICT(set_id, original) DO UPDATE SET translated = excluded.translated",
            params![id, original, translated],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::UnknownNameSet(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove_name_set_entry(&self, id: i64, original: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM name_set_entries WHERE set_id = ?1 AND original = ?2",
            params![id, original],
        )?;
        Ok(())
    }

    /// Creates a name set from `original=translated` lines in one transaction.
    ///
    /// Blank lines are skipped. The first malformed line aborts the import and
    /// nothing is written, not even the set itself.
    pub fn import_name_set<R: BufRead>(
        &mut self,
        title: &str,
        reader: R,
    ) -> Result<NameSet, ImportError> {
        let tx = self.conn.transaction()?;

        let id = match tx.execute("INSERT INTO name_sets (title) VALUES (?1)", params![title]) {
            Ok(_) => tx.last_insert_rowid(),
            Err(e) if is_constraint_violation(&e) => {
                return Err(ImportError::DuplicateTitle(title.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut imported = 0usize;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO name_set_entries (set_id, original, translated)
                 VALUES (?1, ?2, ?3)",
            )?;

            for (index, line) in reader.lines().enumerate() {
                let line_number = index + 1;
                let line = line.map_err(|source| ImportError::Read {
                    line: line_number,
                    source,
                })?;

                let line = match line_number {
                    1 => line.strip_prefix('\u{FEFF}').unwrap_or(&line),
                    _ => &line,
                };
                if line.trim().is_empty() {
                    continue;
                }

                let Some((original, translated)) = line.split_once('=') else {
                    return Err(ImportError::MissingSeparator { line: line_number });
                };
                if original.is_empty() || translated.is_empty() {
                    return Err(ImportError::EmptyField { line: line_number });
                }

                insert
                    .execute(params![id, original, translated])
                    .map_err(|source| ImportError::Database {
                        line: line_number,
                        source,
                    })?;
                imported += 1;
            }
        }

        tx.commit()?;
        info!(id, title, entries = imported, "name set imported");
        Ok(NameSet {
            id,
            title: title.to_string(),
        })
    }

    /// Writes the entries of name set `id` as `original=translated` lines.
    pub fn export_name_set<W: Write>(&self, id: i64, mut writer: W) -> Result<usize, StoreError> {
        let entries = self.name_set_entries(id)?;
        for (original, translated) in &entries {
            writeln!(writer, "{original}={translated}")?;
        }
        writer.flush()?;
        Ok(entries.len())
    }

    fn char_table(&self, sql: &str, table: &str) -> Result<Vec<(char, String)>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, value)| match single_char(&key) {
                Some(c) => Some((c, value)),
                None => {
                    warn!(table, key = %key, "skipping side table row with a multi-character key");
                    None
                }
            })
            .collect())
    }
}

impl DictSource for SqliteStore {
    fn for_each_entry(&self, f: &mut dyn FnMut(DictRow)) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT original, translations FROM phrases")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            f(DictRow {
                key: row.get(0)?,
                priority: Priority::Phrase,
                value: row.get(1)?,
            });
        }

        let mut stmt = self.conn.prepare("SELECT original, translated FROM names")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            f(DictRow {
                key: row.get(0)?,
                priority: Priority::Name,
                value: row.get(1)?,
            });
        }
        Ok(())
    }

    fn rules(&self) -> Result<Vec<Rule>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT original_start, original_end, translation_start, translation_end FROM rules",
        )?;
        let rules = stmt
            .query_map([], |row| {
                Ok(Rule {
                    original_start: row.get(0)?,
                    original_end: row.get(1)?,
                    translation_start: row.get(2)?,
                    translation_end: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    fn readings(&self) -> Result<Vec<(char, String)>, StoreError> {
        self.char_table("SELECT character, reading FROM readings", "readings")
    }

    fn punctuations(&self) -> Result<Vec<(char, String)>, StoreError> {
        self.char_table(
            "SELECT character, replacement FROM punctuations",
            "punctuations",
        )
    }

    fn name_set_entries(&self, id: i64) -> Result<Vec<(String, String)>, StoreError> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT id FROM name_sets WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownNameSet(id));
        }

        let mut stmt = self.conn.prepare(
            "SELECT original, translated FROM name_set_entries WHERE set_id = ?1 ORDER BY rowid",
        )?;
        let entries = stmt
            .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use std::io::Cursor;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn meanings_are_promoted_removed_and_reordered() {
        let store = store();
        store.add_meaning("做", "do").unwrap();
        store.add_meaning("做", "Do").unwrap();
        store.add_meaning("做", "do").unwrap();
        assert_eq!(store.phrases("做").unwrap(), Some(vec!["do".into(), "Do".into()]));

        store.reorder("做", &["Do".into(), "do".into()]).unwrap();
        assert_eq!(store.phrases("做").unwrap(), Some(vec!["Do".into(), "do".into()]));

        store.remove_meaning("做", "Do").unwrap();
        store.remove_meaning("做", "do").unwrap();
        assert_eq!(store.phrases("做").unwrap(), None);
    }

    #[test]
    fn reorder_matches_the_in_memory_trie() {
        let store = store();
        store.set_name("李白", "Lý Bạch").unwrap();
        store.add_meaning("做", "do").unwrap();

        store.reorder("李白", &["Li Bai".into()]).unwrap();
        store.reorder("做", &[]).unwrap();

        let mut dictionary = Dictionary::new();
        dictionary.insert("李白", "Lý Bạch", Priority::Name);
        dictionary.insert("做", "do", Priority::Phrase);
        dictionary.reorder("李白", vec!["Li Bai".into()]);
        dictionary.reorder("做", Vec::new());

        let mut reloaded = Dictionary::new();
        reloaded.load(&store).unwrap();
        for key in ["李白", "做"] {
            assert_eq!(reloaded.find_exact(key), dictionary.find_exact(key));
        }
        assert_eq!(store.phrases("李白").unwrap(), None);
        assert_eq!(store.phrases("做").unwrap(), None);
    }

    #[test]
    fn rows_are_streamed_with_their_tier() {
        let store = store();
        store.add_meaning("做", "To do").unwrap();
        store.add_meaning("做", "Do").unwrap();
        store.set_name("李白", "Lý Bạch").unwrap();

        let mut rows = Vec::new();
        store.for_each_entry(&mut |row| rows.push(row)).unwrap();
        assert_eq!(
            rows,
            vec![
                DictRow {
                    key: "做".into(),
                    priority: Priority::Phrase,
                    value: "Do\x1FTo do".into(),
                },
                DictRow {
                    key: "李白".into(),
                    priority: Priority::Name,
                    value: "Lý Bạch".into(),
                },
            ]
        );
    }

    #[test]
    fn rules_upsert_by_key() {
        let store = store();
        store.upsert_rule(&Rule::new("在", "上", "on ", "")).unwrap();
        store.upsert_rule(&Rule::new("在", "上", "upon ", "")).unwrap();
        assert_eq!(store.rules().unwrap(), vec![Rule::new("在", "上", "upon ", "")]);
        store.remove_rule("在", "上").unwrap();
        assert!(store.rules().unwrap().is_empty());
    }

    #[test]
    fn side_tables_skip_multi_character_keys() {
        let store = store();
        store.set_reading('好', "hảo").unwrap();
        store
            .conn
            .execute("INSERT INTO readings VALUES ('你好', 'x')", [])
            .unwrap();
        assert_eq!(store.readings().unwrap(), vec![('好', "hảo".to_string())]);
    }

    #[test]
    fn name_set_titles_are_unique() {
        let store = store();
        let set = store.create_name_set("Tây Du Ký").unwrap();
        assert!(matches!(
            store.create_name_set("Tây Du Ký"),
            Err(StoreError::DuplicateTitle(_))
        ));
        store.rename_name_set(set.id, "Journey").unwrap();
        assert!(matches!(
            store.rename_name_set(99, "Other"),
            Err(StoreError::UnknownNameSet(99))
        ));
    }

    #[test]
    fn deleting_a_name_set_cascades() {
        let store = store();
        let set = store.create_name_set("a").unwrap();
        store.add_name_set_entry(set.id, "悟空", "Ngộ Không").unwrap();
        assert_eq!(store.name_sets().unwrap()[0].entries, 1);

        store.delete_name_set(set.id).unwrap();
        assert!(store.name_sets().unwrap().is_empty());
        let orphans: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM name_set_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
        assert!(matches!(
            store.name_set_entries(set.id),
            Err(StoreError::UnknownNameSet(_))
        ));
    }

    #[test]
    fn import_skips_blank_lines_and_keeps_order() {
        let mut store = store();
        let input = "悟空=Ngộ Không\n\n八戒=Bát Giới\n";
        let set = store.import_name_set("Tây Du Ký", Cursor::new(input)).unwrap();

        assert_eq!(
            store.name_set_entries(set.id).unwrap(),
            vec![
                ("悟空".to_string(), "Ngộ Không".to_string()),
                ("八戒".to_string(), "Bát Giới".to_string()),
            ]
        );
    }

    #[test]
    fn import_drops_a_leading_byte_order_mark() {
        let mut store = store();
        let input = "\u{FEFF}悟空=Ngộ Không\n八戒=Bát Giới\n";
        let set = store.import_name_set("Tây Du Ký", Cursor::new(input)).unwrap();

        let entries = store.name_set_entries(set.id).unwrap();
        assert_eq!(entries[0].0, "悟空");

        let mut dictionary = Dictionary::new();
        dictionary.load_name_set(set.id, &store).unwrap();
        assert_eq!(dictionary.find_exact_overlay("悟空"), Some("Ngộ Không"));
    }

    #[test]
    fn import_failure_reports_the_line_and_writes_nothing() {
        let mut store = store();
        let input = "悟空=Ngộ Không\n\n八戒 Bát Giới\n";
        let err = store
            .import_name_set("Tây Du Ký", Cursor::new(input))
            .unwrap_err();

        assert!(matches!(err, ImportError::MissingSeparator { line: 3 }));
        assert_eq!(err.to_string(), "Format error at line 3: Missing '=' separator.");
        assert!(store.name_sets().unwrap().is_empty());

        let err = store
            .import_name_set("Tây Du Ký", Cursor::new("=Ngộ Không"))
            .unwrap_err();
        assert_eq!(err.line(), Some(1));
        assert!(matches!(err, ImportError::EmptyField { .. }));
    }

    #[test]
    fn import_rejects_existing_titles() {
        let mut store = store();
        store.create_name_set("Tây Du Ký").unwrap();
        let err = store
            .import_name_set("Tây Du Ký", Cursor::new("悟空=Ngộ Không"))
            .unwrap_err();
        assert!(matches!(err, ImportError::DuplicateTitle(_)));
        assert_eq!(store.name_sets().unwrap().len(), 1);
    }

    #[test]
    fn export_writes_one_line_per_entry() {
        let mut store = store();
        let set = store
            .import_name_set("x", Cursor::new("悟空=Ngộ Không\n八戒=Bát Giới"))
            .unwrap();
        let mut buf = Vec::new();
        assert_eq!(store.export_name_set(set.id, &mut buf).unwrap(), 2);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "悟空=Ngộ Không\n八戒=Bát Giới\n"
        );
    }
}
