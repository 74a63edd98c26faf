//! Character-keyed prefix tree holding ranked translations and bracket rules.
//!
//! Each node owns its children directly, sorted by character, so dropping the
//! root tears the whole tree down.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::rule::Rule;

/// Separator between translations in a bulk-loaded phrase row.
pub const BULK_DELIMITER: char = '\x1F';

/// Priority tier of a translation. Ordering is significant: `Name` outranks
/// `Phrase`, which outranks `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    None,
    Phrase,
    Name,
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: BTreeMap<char, TrieNode>,
    phrase_translations: Option<Vec<String>>,
    name_translation: Option<String>,
    rules: Vec<Rule>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty()
            && self.phrase_translations.is_none()
            && self.name_translation.is_none()
            && self.rules.is_empty()
    }

    fn count(&self) -> usize {
        1 + self.children.values().map(TrieNode::count).sum::<usize>()
    }
}

/// The result of a longest-match lookup.
///
/// `len` is measured in characters; a `len` of 0 means no match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'a> {
    pub len: usize,
    pub priority: Priority,
    pub translation: &'a str,
    /// The full ranked list the translation was taken from.
    pub alternatives: &'a [String],
}

impl Match<'_> {
    pub fn none() -> Self {
        Match {
            len: 0,
            priority: Priority::None,
            translation: "",
            alternatives: &[],
        }
    }

    pub fn is_none(&self) -> bool {
        self.len == 0
    }

    /// Tier first, then length.
    pub fn outranks(&self, other: &Match<'_>) -> bool {
        (self.priority, self.len) > (other.priority, other.len)
    }
}

/// Exact-key lookup result. Both slots are reported independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Entry<'a> {
    pub name: Option<&'a str>,
    pub phrases: Option<&'a [String]>,
}

/// Rules whose start token spans `start_len` characters at the queried offset.
#[derive(Debug, Clone, Copy)]
pub struct RuleStart<'a> {
    pub start_len: usize,
    pub rules: &'a [Rule],
}

#[derive(Debug, Clone, Default)]
pub struct TrieStore {
    root: TrieNode,
}

impl TrieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of nodes below the root.
    pub fn node_count(&self) -> usize {
        self.root.count() - 1
    }

    pub fn clear(&mut self) {
        self.root = TrieNode::default();
    }

    fn path_mut(&mut self, key: &str) -> &mut TrieNode {
        let mut node = &mut self.root;
        for c in key.chars() {
            node = node.children.entry(c).or_default();
        }
        node
    }

    fn walk(&self, key: &str) -> Option<&TrieNode> {
        key.chars()
            .try_fold(&self.root, |node, c| node.children.get(&c))
    }

    fn walk_mut(&mut self, key: &str) -> Option<&mut TrieNode> {
        let mut node = &mut self.root;
        for c in key.chars() {
            node = node.children.get_mut(&c)?;
        }
        Some(node)
    }

    /// Inserts a single translation.
    ///
    /// A name overwrites the node's name slot. A phrase is moved (or added) to
    /// the front of the ranked list, so re-adding a meaning makes it the default.
    pub fn insert(&mut self, key: &str, value: &str, priority: Priority) {
        if key.is_empty() {
            return;
        }
        match priority {
            Priority::Name => {
                self.path_mut(key).name_translation = Some(value.to_string());
            }
            Priority::Phrase => {
                let list = self
                    .path_mut(key)
                    .phrase_translations
                    .get_or_insert_with(Vec::new);
                list.retain(|existing| existing != value);
                list.insert(0, value.to_string());
            }
            Priority::None => {}
        }
    }

    /// Inserts a persisted row. Phrase values are `BULK_DELIMITER`-separated and
    /// appended in order without promotion.
    pub fn insert_bulk(&mut self, key: &str, priority: Priority, value: &str) {
        if key.is_empty() {
            return;
        }
        match priority {
            Priority::Name => {
                self.path_mut(key).name_translation = Some(value.to_string());
            }
            Priority::Phrase => {
                let mut items = value
                    .split(BULK_DELIMITER)
                    .filter(|item| !item.is_empty())
                    .peekable();
                if items.peek().is_none() {
                    return;
                }
                self.path_mut(key)
                    .phrase_translations
                    .get_or_insert_with(Vec::new)
                    .extend(items.map(str::to_string));
            }
            Priority::None => {}
        }
    }

    pub fn find_exact(&self, key: &str) -> Entry<'_> {
        match self.walk(key) {
            Some(node) if !key.is_empty() => Entry {
                name: node.name_translation.as_deref(),
                phrases: node.phrase_translations.as_deref(),
            },
            _ => Entry::default(),
        }
    }

    /// Clears the name slot or the whole phrase list of `key`.
    pub fn remove(&mut self, key: &str, priority: Priority) {
        let Some(node) = self.walk_mut(key) else {
            return;
        };
        match priority {
            Priority::Name => node.name_translation = None,
            Priority::Phrase => node.phrase_translations = None,
            Priority::None => return,
        }
        self.prune(key);
    }

    /// Removes one meaning from the phrase list. An emptied list becomes absent.
    pub fn remove_meaning(&mut self, key: &str, value: &str) {
        let Some(node) = self.walk_mut(key) else {
            return;
        };
        let Some(list) = node.phrase_translations.as_mut() else {
            return;
        };
        list.retain(|existing| existing != value);
        if list.is_empty() {
            node.phrase_translations = None;
            self.prune(key);
        }
    }

    /// Replaces the phrase list of a key that already has one. An empty
    /// order removes the list.
    pub fn reorder(&mut self, key: &str, new_order: Vec<String>) {
        if key.is_empty() {
            return;
        }
        let Some(node) = self.walk_mut(key) else {
            return;
        };
        if node.phrase_translations.is_none() {
            return;
        }
        if new_order.is_empty() {
            node.phrase_translations = None;
            self.prune(key);
        } else {
            node.phrase_translations = Some(new_order);
        }
    }

    /// Longest match starting at `start`.
    ///
    /// A name found at any depth beats every phrase, and a deeper name beats a
    /// shallower one. A phrase only replaces a shorter phrase.
    pub fn find(&self, text: &[char], start: usize) -> Match<'_> {
        let mut best = Match::none();
        let mut node = &self.root;

        for (depth, c) in text.get(start..).unwrap_or_default().iter().enumerate() {
            let Some(next) = node.children.get(c) else {
                break;
            };
            node = next;
            let len = depth + 1;

            if let Some(name) = &node.name_translation {
                best = Match {
                    len,
                    priority: Priority::Name,
                    translation: name,
                    alternatives: std::slice::from_ref(name),
                };
            } else if best.priority != Priority::Name
                && len > best.len
                && let Some(list) = &node.phrase_translations
                && let Some(first) = list.first()
            {
                best = Match {
                    len,
                    priority: Priority::Phrase,
                    translation: first,
                    alternatives: list,
                };
            }
        }

        best
    }

    /// Adds a rule on the node of its start token. Last write wins per key.
    pub fn insert_rule(&mut self, rule: Rule) {
        if !rule.is_well_formed() {
            return;
        }
        let rules = &mut self.path_mut(&rule.original_start).rules;
        match rules
            .iter_mut()
            .find(|existing| existing.original_end == rule.original_end)
        {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }

    pub fn find_exact_rule(&self, start: &str, end: &str) -> Option<&Rule> {
        if start.is_empty() {
            return None;
        }
        self.walk(start)?
            .rules
            .iter()
            .find(|rule| rule.original_end == end)
    }

    /// Returns whether a rule was updated.
    pub fn edit_rule(&mut self, start: &str, end: &str, t_start: &str, t_end: &str) -> bool {
        let Some(rule) = self.walk_mut(start).and_then(|node| {
            node.rules
                .iter_mut()
                .find(|rule| rule.original_end == end)
        }) else {
            return false;
        };
        rule.translation_start = t_start.to_string();
        rule.translation_end = t_end.to_string();
        true
    }

    pub fn remove_rule(&mut self, start: &str, end: &str) {
        let Some(node) = self.walk_mut(start) else {
            return;
        };
        let before = node.rules.len();
        node.rules.retain(|rule| rule.original_end != end);
        if node.rules.len() != before {
            self.prune(start);
        }
    }

    /// Every node along the path from `start` that anchors rules, longest first.
    pub fn rule_starts(&self, text: &[char], start: usize) -> Vec<RuleStart<'_>> {
        let mut found = Vec::new();
        let mut node = &self.root;

        for (depth, c) in text.get(start..).unwrap_or_default().iter().enumerate() {
            let Some(next) = node.children.get(c) else {
                break;
            };
            node = next;
            if !node.rules.is_empty() {
                found.push(RuleStart {
                    start_len: depth + 1,
                    rules: &node.rules,
                });
            }
        }

        found.reverse();
        found
    }

    /// Drops the empty tail of the path for `key`.
    fn prune(&mut self, key: &str) {
        let path: Vec<char> = key.chars().collect();
        prune_path(&mut self.root, &path);
    }
}

fn prune_path(node: &mut TrieNode, path: &[char]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if let Some(child) = node.children.get_mut(first) {
        prune_path(child, rest);
        if child.is_empty() {
            node.children.remove(first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn name_is_returned_until_overwritten() {
        let mut trie = TrieStore::new();
        trie.insert("李白", "Lý Bạch", Priority::Name);
        assert_eq!(trie.find_exact("李白").name, Some("Lý Bạch"));
        assert_eq!(trie.find_exact("李白").phrases, None);

        trie.insert("李白", "Li Bai", Priority::Name);
        assert_eq!(trie.find_exact("李白").name, Some("Li Bai"));

        trie.remove("李白", Priority::Name);
        assert_eq!(trie.find_exact("李白"), Entry::default());
    }

    #[test]
    fn reinserting_a_phrase_promotes_it() {
        let mut trie = TrieStore::new();
        trie.insert_bulk("做", Priority::Phrase, "a\x1Fb\x1Fc\x1Fd");
        trie.insert("做", "c", Priority::Phrase);
        assert_eq!(trie.find_exact("做").phrases, Some(&strings(&["c", "a", "b", "d"])[..]));

        trie.insert("做", "new", Priority::Phrase);
        assert_eq!(
            trie.find_exact("做").phrases,
            Some(&strings(&["new", "c", "a", "b", "d"])[..])
        );
    }

    #[test]
    fn bulk_load_preserves_order() {
        let mut trie = TrieStore::new();
        trie.insert_bulk("做", Priority::Phrase, "Do\x1Fdo\x1FTo do");
        assert_eq!(trie.find_exact("做").phrases, Some(&strings(&["Do", "do", "To do"])[..]));
    }

    #[test]
    fn find_never_runs_past_the_text() {
        let mut trie = TrieStore::new();
        trie.insert("你好吗", "how are you", Priority::Phrase);
        trie.insert("你好", "hello", Priority::Phrase);
        let text = chars("说你好");
        let m = trie.find(&text, 1);
        assert_eq!(m.len, 2);
        assert!(m.len <= text.len() - 1);
        assert!(trie.find(&text, 3).is_none());
        assert!(trie.find(&text, 10).is_none());
    }

    #[test]
    fn name_tier_dominates_length() {
        let mut trie = TrieStore::new();
        trie.insert("你", "You", Priority::Name);
        trie.insert("你好吗", "How are you", Priority::Phrase);

        let m = trie.find(&chars("你好吗"), 0);
        assert_eq!(m.len, 1);
        assert_eq!(m.priority, Priority::Name);
        assert_eq!(m.translation, "You");
    }

    #[test]
    fn longer_name_beats_shorter_phrase() {
        let mut trie = TrieStore::new();
        trie.insert("你好", "Hello", Priority::Name);
        trie.insert("你", "You", Priority::Phrase);

        let m = trie.find(&chars("你好吗"), 0);
        assert_eq!((m.len, m.priority, m.translation), (2, Priority::Name, "Hello"));
    }

    #[test]
    fn longest_phrase_wins_with_its_top_meaning() {
        let mut trie = TrieStore::new();
        trie.insert_bulk("中", Priority::Phrase, "trung");
        trie.insert_bulk("中国", Priority::Phrase, "Trung Quốc\x1FChina");

        let m = trie.find(&chars("中国人"), 0);
        assert_eq!(m.len, 2);
        assert_eq!(m.translation, "Trung Quốc");
        assert_eq!(m.alternatives.len(), 2);
    }

    #[test]
    fn remove_meaning_clears_the_slot_when_empty() {
        let mut trie = TrieStore::new();
        trie.insert_bulk("做", Priority::Phrase, "Do\x1Fdo");
        trie.remove_meaning("做", "Do");
        assert_eq!(trie.find_exact("做").phrases, Some(&strings(&["do"])[..]));

        trie.remove_meaning("做", "do");
        assert_eq!(trie.find_exact("做").phrases, None);
    }

    #[test]
    fn reorder_replaces_the_list() {
        let mut trie = TrieStore::new();
        trie.insert_bulk("做", Priority::Phrase, "Do\x1Fdo\x1FTo do");
        let order = strings(&["To do", "Do", "do"]);
        trie.reorder("做", order.clone());
        assert_eq!(trie.find_exact("做").phrases, Some(&order[..]));

        trie.reorder("没有", order);
        assert_eq!(trie.find_exact("没有"), Entry::default());
    }

    #[test]
    fn reorder_needs_an_existing_list() {
        let mut trie = TrieStore::new();
        trie.insert("李白", "Lý Bạch", Priority::Name);
        trie.reorder("李白", strings(&["Li Bai"]));
        assert_eq!(trie.find_exact("李白").phrases, None);
        // "李" resolves to a node too, but has no list of its own.
        trie.reorder("李", strings(&["Lý"]));
        assert_eq!(trie.find_exact("李").phrases, None);

        trie.insert("做", "do", Priority::Phrase);
        trie.reorder("做", Vec::new());
        assert_eq!(trie.find_exact("做"), Entry::default());
        assert_eq!(trie.node_count(), 2);
    }

    #[test]
    fn removals_prune_dead_branches() {
        let mut trie = TrieStore::new();
        trie.insert("你好", "hello", Priority::Phrase);
        trie.insert("你", "you", Priority::Phrase);
        assert_eq!(trie.node_count(), 2);

        trie.remove("你好", Priority::Phrase);
        assert_eq!(trie.node_count(), 1);
        trie.remove_meaning("你", "you");
        assert!(trie.is_empty());
    }

    #[test]
    fn unresolved_keys_are_no_ops() {
        let mut trie = TrieStore::new();
        trie.insert("你好", "hello", Priority::Phrase);
        trie.remove("你们", Priority::Phrase);
        trie.remove_meaning("好", "hello");
        assert_eq!(trie.find_exact("你好").phrases.map(<[String]>::len), Some(1));
    }

    #[test]
    fn rules_are_keyed_by_start_and_end() {
        let mut trie = TrieStore::new();
        trie.insert_rule(Rule::new("在", "上", "on ", ""));
        trie.insert_rule(Rule::new("在", "里", "in ", ""));
        trie.insert_rule(Rule::new("在", "上", "upon ", ""));

        assert_eq!(trie.find_exact_rule("在", "上").unwrap().translation_start, "upon ");
        assert!(trie.edit_rule("在", "里", "inside ", ""));
        assert_eq!(trie.find_exact_rule("在", "里").unwrap().translation_start, "inside ");
        assert!(!trie.edit_rule("在", "下", "under ", ""));

        trie.remove_rule("在", "上");
        assert!(trie.find_exact_rule("在", "上").is_none());
        trie.remove_rule("在", "里");
        assert!(trie.is_empty());
    }

    #[test]
    fn rule_starts_are_reported_longest_first() {
        let mut trie = TrieStore::new();
        trie.insert_rule(Rule::new("「", "」", "\"", "\""));
        trie.insert_rule(Rule::new("「「", "」」", "<<", ">>"));
        let starts = trie.rule_starts(&chars("「「x"), 0);
        let lens: Vec<usize> = starts.iter().map(|s| s.start_len).collect();
        assert_eq!(lens, vec![2, 1]);
    }
}
