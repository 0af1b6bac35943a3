use regex::Regex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::OnceLock;
use unidecode::unidecode;

/// Flags controlling which cleaning passes run. Every pass can be toggled
/// independently; the defaults are what series-name comparison wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NormalizeOptions {
    pub lowercase: bool,
    pub collapse_whitespace: bool,
    pub strip_brackets: bool,
    pub transliterate: bool,
    pub strip_stopwords: bool,
    pub strip_punctuation: bool,
    /// Dropping a trailing "s" can mangle names that legitimately end in "s"
    /// ("Gantz", "Berserk of Gluttony Chronicles"), so this stays off unless
    /// a caller opts in.
    pub singularize: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            lowercase: true,
            collapse_whitespace: true,
            strip_brackets: true,
            transliterate: true,
            strip_stopwords: true,
            strip_punctuation: true,
            singularize: false,
        }
    }
}

impl NormalizeOptions {
    /// Keep brackets intact; used when the caller still needs to classify
    /// bracketed tokens (publisher, release group, year).
    pub fn keep_brackets() -> Self {
        NormalizeOptions {
            strip_brackets: false,
            ..Default::default()
        }
    }
}

// English articles, Japanese grammatical particles, and edition/format
// words. All of these are noise when comparing series names: "The Promised
// Neverland" and "Promised Neverland" are the same series, and "(Digital)"
// or "Omnibus" say nothing about identity.
const STOPWORDS: &[&str] = &[
    // articles
    "the", "a", "an",
    // Japanese particles commonly kept in romanized titles
    "no", "wa", "ga", "wo", "ni", "de", "to", "na",
    // edition / format words
    "digital", "omnibus", "special", "edition", "deluxe", "complete",
    "collection", "extended",
];

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn year_group_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\(\[](?:19|20)\d{2}[\)\]]").unwrap())
}

/// Pure normalization pass. Same input + options always yields the same
/// output; callers that normalize in a hot loop should go through
/// [`Normalizer`] which memoizes this function.
pub fn normalize(input: &str, options: &NormalizeOptions) -> String {
    let mut s = input.trim().to_string();

    // Transliterate first so every later pass sees plain ASCII. Skipped
    // entirely for ASCII input to avoid an allocation per call.
    if options.transliterate && !s.is_ascii() {
        s = unidecode(&s);
    }

    if options.lowercase {
        s = s.to_lowercase();
    }

    if options.strip_brackets {
        s = strip_bracket_groups(&s);
    }

    if options.strip_stopwords {
        s = strip_stopwords(&s);
    }

    if options.strip_punctuation {
        s = strip_punctuation(&s);
    }

    if options.singularize {
        s = singularize_words(&s);
    }

    if options.collapse_whitespace {
        s = whitespace_re().replace_all(&s, " ").trim().to_string();
    }

    s
}

/// Remove bracketed groups, with two carve-outs:
///
/// - if the ENTIRE string is exactly one bracket group, keep it: the series
///   name itself happens to be fully bracketed and stripping would destroy it;
/// - a group glued to a hyphen or immediately followed by more letters is
///   usually part of the title ("(Un)Lucky Girl -Remix-"), not metadata.
///
/// `(YYYY)` year groups are always stripped regardless of adjacency.
fn strip_bracket_groups(s: &str) -> String {
    let trimmed = s.trim();

    // Whole-string carve-out.
    if is_single_bracket_group(trimmed) {
        return year_group_re().replace_all(trimmed, " ").to_string();
    }

    let bytes = trimmed.as_bytes();
    let mut out = String::with_capacity(trimmed.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let close = match c {
            '(' => Some(')'),
            '[' => Some(']'),
            '{' => Some('}'),
            _ => None,
        };

        if let Some(close) = close {
            if let Some(end) = trimmed[i..].find(close).map(|off| i + off) {
                let group = &trimmed[i..=end];
                let preceded_by_hyphen =
                    i > 0 && trimmed[..i].trim_end().ends_with('-');
                let followed_by_letter = trimmed[end + 1..]
                    .chars()
                    .next()
                    .map(|c| c.is_alphabetic())
                    .unwrap_or(false);

                if year_group_re().is_match(group)
                    || (!preceded_by_hyphen && !followed_by_letter)
                {
                    out.push(' ');
                    i = end + 1;
                    continue;
                }
            }
        }

        let ch_len = trimmed[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&trimmed[i..i + ch_len]);
        i += ch_len;
    }

    out
}

fn is_single_bracket_group(s: &str) -> bool {
    let opens = [('(', ')'), ('[', ']'), ('{', '}')];
    for (open, close) in opens {
        if s.starts_with(open) && s.ends_with(close) {
            // Must be ONE group: the first close must be the last char.
            if let Some(idx) = s.find(close) {
                return idx == s.len() - close.len_utf8();
            }
        }
    }
    false
}

fn strip_stopwords(s: &str) -> String {
    s.split_whitespace()
        .filter(|word| {
            let bare: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            !STOPWORDS.contains(&bare.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// Internal '+' is preserved: it distinguishes titles like "Blood+".
fn strip_punctuation(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '+' {
                c
            } else {
                ' '
            }
        })
        .collect()
}

fn singularize_words(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
                &word[..word.len() - 1]
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Explicit bounded memo cache with least-recently-used eviction. Replaces
/// ambient function-level memoization: the owner decides capacity and the
/// cache dies with it, so repeated runs and tests never leak state.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        BoundedCache {
            map: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(value) = self.map.get(key) {
            let value = value.clone();
            // Refresh recency.
            if let Some(pos) = self.order.iter().position(|k| k == key) {
                let k = self.order.remove(pos).unwrap();
                self.order.push_back(k);
            }
            Some(value)
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.map.contains_key(&key) {
            self.map.insert(key.clone(), value);
            if let Some(pos) = self.order.iter().position(|k| *k == key) {
                let k = self.order.remove(pos).unwrap();
                self.order.push_back(k);
            }
            return;
        }

        while self.map.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            } else {
                break;
            }
        }

        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Memoizing wrapper around [`normalize`]. The same series names get
/// normalized thousands of times per run while matching, so this is the hot
/// path's front door.
#[derive(Debug)]
pub struct Normalizer {
    cache: BoundedCache<(String, NormalizeOptions), String>,
}

impl Normalizer {
    pub fn new(capacity: usize) -> Self {
        Normalizer {
            cache: BoundedCache::new(capacity),
        }
    }

    pub fn clean(&mut self, input: &str, options: &NormalizeOptions) -> String {
        let key = (input.to_string(), *options);
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }
        let result = normalize(input, options);
        self.cache.insert(key, result.clone());
        result
    }

    /// Default-options shortcut, used for nearly all series-name comparisons.
    pub fn clean_default(&mut self, input: &str) -> String {
        self.clean(input, &NormalizeOptions::default())
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_normalize_lowercases_and_collapses() {
        let result = normalize("One   Piece", &NormalizeOptions::default());
        assert_eq!(result, "one piece");
    }

    #[test]
    fn test_strips_metadata_brackets() {
        let result = normalize(
            "One Piece (2023) (Digital) [GroupA]",
            &NormalizeOptions::default(),
        );
        assert_eq!(result, "one piece");
    }

    #[test]
    fn test_whole_string_bracket_group_is_preserved() {
        // The entire name is one bracket group: stripping would destroy it.
        let result = normalize("(Something)", &NormalizeOptions::default());
        assert_eq!(result, "something");
    }

    #[test]
    fn test_year_group_always_stripped() {
        let result = normalize("(2021)", &NormalizeOptions::default());
        assert_eq!(result, "");
    }

    #[test]
    fn test_bracket_adjacent_to_hyphen_is_kept() {
        // "- (Remix)" style groups are usually part of the title.
        let result = normalize("Title -(Remix)", &NormalizeOptions::default());
        assert!(result.contains("remix"), "got: {result}");
    }

    #[test]
    fn test_bracket_followed_by_letters_is_kept() {
        let result = normalize("(Un)Lucky Girl", &NormalizeOptions::default());
        assert!(result.contains("un"), "got: {result}");
        assert!(result.contains("lucky"), "got: {result}");
    }

    #[test]
    fn test_stopword_removal() {
        let result = normalize(
            "The Rising of the Shield Hero Omnibus Edition",
            &NormalizeOptions::default(),
        );
        assert_eq!(result, "rising of shield hero");
    }

    #[test]
    fn test_transliteration() {
        let result = normalize("Tōkyō Ghoul", &NormalizeOptions::default());
        assert_eq!(result, "tokyo ghoul");
    }

    #[test]
    fn test_transliteration_skipped_for_ascii() {
        let options = NormalizeOptions {
            lowercase: false,
            strip_punctuation: false,
            strip_stopwords: false,
            ..Default::default()
        };
        assert_eq!(normalize("Plain Name", &options), "Plain Name");
    }

    #[test]
    fn test_plus_preserved() {
        let result = normalize("Blood+", &NormalizeOptions::default());
        assert_eq!(result, "blood+");
    }

    #[test]
    fn test_singularize_off_by_default() {
        let result = normalize("Gantz", &NormalizeOptions::default());
        assert_eq!(result, "gantz");
    }

    #[test]
    fn test_singularize_when_enabled() {
        let options = NormalizeOptions {
            singularize: true,
            ..Default::default()
        };
        let result = normalize("dragons", &options);
        assert_eq!(result, "dragon");
    }

    #[test]
    fn test_normalize_is_pure() {
        let options = NormalizeOptions::default();
        let a = normalize("Some Series v01 [Group]", &options);
        let b = normalize("Some Series v01 [Group]", &options);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bounded_cache_evicts_lru() {
        let mut cache: BoundedCache<u32, u32> = BoundedCache::new(2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        // Touch 1 so 2 becomes the eviction candidate.
        assert_eq!(cache.get(&1), Some(10));
        cache.insert(3, 30);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_bounded_cache_update_does_not_grow() {
        let mut cache: BoundedCache<u32, u32> = BoundedCache::new(2);
        cache.insert(1, 10);
        cache.insert(1, 11);
        cache.insert(2, 20);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some(11));
    }

    #[test]
    fn test_normalizer_memoizes() {
        let mut normalizer = Normalizer::new(8);
        let first = normalizer.clean_default("Tōkyō Ghoul (2014)");
        let second = normalizer.clean_default("Tōkyō Ghoul (2014)");
        assert_eq!(first, second);
        assert_eq!(normalizer.cache.len(), 1);
    }
}
