//! The priority-merge layer over the general trie and the active name set.

use serde::Serialize;
use tracing::{info, warn};

use crate::rule::Rule;
use crate::side_table::SideTables;
use crate::store::{DictSource, StoreError};
use crate::trie::{Entry, Match, Priority, RuleStart, TrieStore};

/// Whether lookups against the dictionary are authoritative yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub entries: usize,
    pub rules: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    general: TrieStore,
    overlay: TrieStore,
    active_name_set: Option<i64>,
    side_tables: SideTables,
    state: LoadState,
}

impl Dictionary {
    /// An empty dictionary with no side tables. Mark it ready with
    /// [`Dictionary::finish_load`] once populated by hand.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn begin_load(&mut self) {
        self.state = LoadState::Loading;
    }

    pub fn finish_load(&mut self) {
        self.state = LoadState::Ready;
    }

    /// Materializes the general dictionary from persisted rows.
    ///
    /// On failure the dictionary is reset, so a partial load is never visible.
    pub fn load(&mut self, source: &dyn DictSource) -> Result<LoadStats, StoreError> {
        *self = Self::default();
        self.begin_load();
        match self.load_rows(source) {
            Ok(stats) => {
                self.finish_load();
                info!(
                    entries = stats.entries,
                    rules = stats.rules,
                    skipped = stats.skipped,
                    "dictionary loaded"
                );
                Ok(stats)
            }
            Err(err) => {
                *self = Self::default();
                Err(err)
            }
        }
    }

    fn load_rows(&mut self, source: &dyn DictSource) -> Result<LoadStats, StoreError> {
        let mut stats = LoadStats::default();

        source.for_each_entry(&mut |row| {
            if row.key.is_empty() || row.priority == Priority::None {
                warn!(key = %row.key, "skipping malformed dictionary row");
                stats.skipped += 1;
                return;
            }
            self.general.insert_bulk(&row.key, row.priority, &row.value);
            stats.entries += 1;
        })?;

        for rule in source.rules()? {
            if !rule.is_well_formed() {
                warn!(
                    start = %rule.original_start,
                    end = %rule.original_end,
                    "skipping malformed rule"
                );
                stats.skipped += 1;
                continue;
            }
            self.general.insert_rule(rule);
            stats.rules += 1;
        }

        let mut tables = SideTables::builtin();
        for (c, replacement) in source.punctuations()? {
            tables.insert_punctuation(c, replacement);
        }
        for (c, reading) in source.readings()? {
            tables.insert_reading(c, reading);
        }
        self.side_tables = tables;

        Ok(stats)
    }

    pub fn side_tables(&self) -> &SideTables {
        &self.side_tables
    }

    pub fn side_tables_mut(&mut self) -> &mut SideTables {
        &mut self.side_tables
    }

    /// Longest match at `start`, consulting the active name set first.
    ///
    /// The overlay result is kept unless the general result outranks it.
    pub fn find(&self, text: &[char], start: usize) -> Match<'_> {
        let general = self.general.find(text, start);
        if self.active_name_set.is_none() {
            return general;
        }
        let overlay = self.overlay.find(text, start);
        if general.outranks(&overlay) {
            general
        } else {
            overlay
        }
    }

    pub fn find_exact(&self, key: &str) -> Entry<'_> {
        self.general.find_exact(key)
    }

    /// The active name set's translation for `key`, if any.
    pub fn find_exact_overlay(&self, key: &str) -> Option<&str> {
        self.overlay.find_exact(key).name
    }

    pub fn insert(&mut self, key: &str, value: &str, priority: Priority) {
        self.general.insert(key, value, priority);
    }

    pub fn insert_bulk(&mut self, key: &str, priority: Priority, value: &str) {
        self.general.insert_bulk(key, priority, value);
    }

    pub fn remove(&mut self, key: &str, priority: Priority) {
        self.general.remove(key, priority);
    }

    pub fn remove_meaning(&mut self, key: &str, value: &str) {
        self.general.remove_meaning(key, value);
    }

    pub fn reorder(&mut self, key: &str, new_order: Vec<String>) {
        self.general.reorder(key, new_order);
    }

    pub fn insert_rule(&mut self, rule: Rule) {
        self.general.insert_rule(rule);
    }

    pub fn find_exact_rule(&self, start: &str, end: &str) -> Option<&Rule> {
        self.general.find_exact_rule(start, end)
    }

    pub fn edit_rule(&mut self, start: &str, end: &str, t_start: &str, t_end: &str) -> bool {
        self.general.edit_rule(start, end, t_start, t_end)
    }

    pub fn remove_rule(&mut self, start: &str, end: &str) {
        self.general.remove_rule(start, end);
    }

    pub fn rule_starts(&self, text: &[char], start: usize) -> Vec<RuleStart<'_>> {
        self.general.rule_starts(text, start)
    }

    pub fn active_name_set(&self) -> Option<i64> {
        self.active_name_set
    }

    /// Replaces the overlay with `entries` and makes `id` the active set.
    pub fn activate_name_set<I, K, V>(&mut self, id: i64, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.overlay.clear();
        let mut count = 0usize;
        for (original, translated) in entries {
            self.overlay
                .insert(original.as_ref(), translated.as_ref(), Priority::Name);
            count += 1;
        }
        self.active_name_set = Some(id);
        info!(id, entries = count, "name set activated");
    }

    /// Loads the persisted entries of name set `id` into the overlay.
    pub fn load_name_set(&mut self, id: i64, source: &dyn DictSource) -> Result<(), StoreError> {
        let entries = source.name_set_entries(id)?;
        self.activate_name_set(id, entries);
        Ok(())
    }

    pub fn deactivate_name_set(&mut self) {
        if let Some(id) = self.active_name_set.take() {
            self.overlay.clear();
            info!(id, "name set deactivated");
        }
    }

    /// Forgets a deleted name set; clears the overlay only if it was active.
    pub fn delete_name_set(&mut self, id: i64) {
        if self.active_name_set == Some(id) {
            self.deactivate_name_set();
        }
    }

    /// Adds a name to the active set. Ignored when no set is active.
    pub fn insert_name_set_entry(&mut self, original: &str, translated: &str) {
        if self.active_name_set.is_some() {
            self.overlay.insert(original, translated, Priority::Name);
        }
    }

    pub fn remove_name_set_entry(&mut self, original: &str) {
        self.overlay.remove(original, Priority::Name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DictRow;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[derive(Default)]
    struct MemorySource {
        rows: Vec<DictRow>,
        rules: Vec<Rule>,
        names: Vec<(String, String)>,
        fail: bool,
    }

    impl DictSource for MemorySource {
        fn for_each_entry(&self, f: &mut dyn FnMut(DictRow)) -> Result<(), StoreError> {
            for row in &self.rows {
                f(row.clone());
            }
            if self.fail {
                return Err(StoreError::UnknownNameSet(0));
            }
            Ok(())
        }

        fn rules(&self) -> Result<Vec<Rule>, StoreError> {
            Ok(self.rules.clone())
        }

        fn readings(&self) -> Result<Vec<(char, String)>, StoreError> {
            Ok(vec![('好', "hảo".to_string())])
        }

        fn punctuations(&self) -> Result<Vec<(char, String)>, StoreError> {
            Ok(Vec::new())
        }

        fn name_set_entries(&self, _id: i64) -> Result<Vec<(String, String)>, StoreError> {
            Ok(self.names.clone())
        }
    }

    fn row(key: &str, priority: Priority, value: &str) -> DictRow {
        DictRow {
            key: key.to_string(),
            priority,
            value: value.to_string(),
        }
    }

    #[test]
    fn load_marks_ready_and_skips_malformed_rows() {
        let source = MemorySource {
            rows: vec![
                row("做", Priority::Phrase, "Do\x1Fdo\x1FTo do"),
                row("", Priority::Phrase, "nothing"),
                row("李白", Priority::Name, "Lý Bạch"),
            ],
            rules: vec![Rule::new("「", "」", "\"", "\""), Rule::new("", "x", "", "")],
            ..Default::default()
        };

        let mut dict = Dictionary::new();
        assert_eq!(dict.state(), LoadState::Uninitialized);
        let stats = dict.load(&source).unwrap();

        assert!(dict.is_ready());
        assert_eq!(stats, LoadStats { entries: 2, rules: 1, skipped: 2 });
        assert_eq!(dict.find_exact("做").phrases.map(<[String]>::len), Some(3));
        assert_eq!(dict.find_exact("李白").name, Some("Lý Bạch"));
        assert!(dict.find_exact_rule("「", "」").is_some());
        assert_eq!(dict.side_tables().reading('好'), Some("hảo"));
        assert!(dict.side_tables().lookup('，').is_some());
    }

    #[test]
    fn failed_load_leaves_nothing_behind() {
        let source = MemorySource {
            rows: vec![row("做", Priority::Phrase, "Do")],
            fail: true,
            ..Default::default()
        };
        let mut dict = Dictionary::new();
        assert!(dict.load(&source).is_err());
        assert_eq!(dict.state(), LoadState::Uninitialized);
        assert_eq!(dict.find_exact("做"), Entry::default());
    }

    #[test]
    fn overlay_name_beats_general_phrase() {
        let mut dict = Dictionary::new();
        dict.insert("小明", "little bright", Priority::Phrase);
        dict.activate_name_set(7, [("小明", "Tiểu Minh")]);

        let m = dict.find(&chars("小明说"), 0);
        assert_eq!((m.len, m.priority, m.translation), (2, Priority::Name, "Tiểu Minh"));
        assert_eq!(dict.active_name_set(), Some(7));
    }

    #[test]
    fn overlay_wins_equal_rank_and_general_fills_gaps() {
        let mut dict = Dictionary::new();
        dict.insert("小明", "Xiao Ming", Priority::Name);
        dict.insert("你好", "hello", Priority::Phrase);
        dict.activate_name_set(1, [("小明", "Tiểu Minh")]);

        assert_eq!(dict.find(&chars("小明"), 0).translation, "Tiểu Minh");
        assert_eq!(dict.find(&chars("你好"), 0).translation, "hello");
    }

    #[test]
    fn longer_general_name_outranks_shorter_overlay_name() {
        let mut dict = Dictionary::new();
        dict.insert("王小明", "Vương Tiểu Minh", Priority::Name);
        dict.activate_name_set(1, [("王", "Vương")]);
        assert_eq!(dict.find(&chars("王小明"), 0).len, 3);
    }

    #[test]
    fn deleting_the_active_set_clears_the_overlay() {
        let source = MemorySource {
            names: vec![("小明".to_string(), "Tiểu Minh".to_string())],
            ..Default::default()
        };
        let mut dict = Dictionary::new();
        dict.load_name_set(3, &source).unwrap();
        assert_eq!(dict.find_exact_overlay("小明"), Some("Tiểu Minh"));

        dict.delete_name_set(4);
        assert_eq!(dict.active_name_set(), Some(3));

        dict.delete_name_set(3);
        assert_eq!(dict.active_name_set(), None);
        assert!(dict.find(&chars("小明"), 0).is_none());
    }

    #[test]
    fn name_set_entries_follow_the_active_set() {
        let mut dict = Dictionary::new();
        dict.insert_name_set_entry("小红", "Tiểu Hồng");
        assert_eq!(dict.find_exact_overlay("小红"), None);

        dict.activate_name_set(2, Vec::<(String, String)>::new());
        dict.insert_name_set_entry("小红", "Tiểu Hồng");
        assert_eq!(dict.find(&chars("小红"), 0).translation, "Tiểu Hồng");

        dict.remove_name_set_entry("小红");
        assert!(dict.find(&chars("小红"), 0).is_none());
    }
}
