use crate::collaborators::ImageComparator;
use crate::normalize::{BoundedCache, Normalizer};
use crate::record::ReleaseRecord;
use log::debug;
use std::collections::HashMap;

/// String similarity with a bounded pair cache. The same folder name gets
/// compared against many downloaded files per run, so the ratio for a pair
/// is computed once and reused.
#[derive(Debug)]
pub struct SimilarityEngine {
    cache: BoundedCache<(String, String), f64>,
    pub normalizer: Normalizer,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        SimilarityEngine {
            cache: BoundedCache::new(8192),
            normalizer: Normalizer::default(),
        }
    }
}

impl SimilarityEngine {
    /// Normalized-edit-distance ratio in [0, 1]. Symmetric; identical
    /// strings score 1.0; anything against an empty string scores 0.0.
    pub fn string_similarity(&mut self, a: &str, b: &str) -> f64 {
        if a == b {
            return if a.is_empty() { 0.0 } else { 1.0 };
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        // Order the key so (a, b) and (b, a) share a cache slot.
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };

        if let Some(score) = self.cache.get(&key) {
            return score;
        }

        let score = strsim::normalized_levenshtein(&key.0, &key.1);
        self.cache.insert(key, score);
        score
    }

    /// Similarity of two names after default cleaning.
    pub fn clean_similarity(&mut self, a: &str, b: &str) -> f64 {
        let a = self.normalizer.clean_default(a);
        let b = self.normalizer.clean_default(b);
        self.string_similarity(&a, &b)
    }

    /// OR-of-heuristics fallback gate. Any single strong signal allows a
    /// fallback match attempt even when the primary similarity score fails:
    /// real series names vary far more in formatting (subtitle dropped,
    /// translated word order) than in core vocabulary.
    pub fn alternative_match_allowed(
        &mut self,
        candidate_folder_name: &str,
        record: &ReleaseRecord,
        word_keep_fraction: f64,
        required_score: f64,
        corpus_word_frequency: &HashMap<String, usize>,
        distinctive_word_max_frequency: usize,
    ) -> bool {
        let clean_candidate = self.normalizer.clean_default(candidate_folder_name);
        let clean_series = self.normalizer.clean_default(&record.series_name);
        let clean_short = self.normalizer.clean_default(&record.shortened_series_name);

        if clean_candidate.is_empty() || clean_series.is_empty() {
            return false;
        }

        // (a) cleaned names equal.
        if clean_candidate == clean_series || clean_candidate == clean_short {
            return true;
        }

        let candidate_words: Vec<&str> = clean_candidate.split_whitespace().collect();
        let series_words: Vec<&str> = clean_series.split_whitespace().collect();
        let short_words: Vec<&str> = clean_short.split_whitespace().collect();

        // (b) truncated word lists: drop trailing words per the keep
        // fraction, then compare what remains. Catches names that only
        // diverge in a tacked-on tail.
        let truncated_candidate = truncate_words(&candidate_words, word_keep_fraction);
        let truncated_series = truncate_words(&series_words, word_keep_fraction);
        if !truncated_candidate.is_empty()
            && self.string_similarity(&truncated_candidate, &truncated_series)
                >= required_score
        {
            debug!(
                "Alternative match via truncated words: {:?} ~ {:?}",
                truncated_candidate, truncated_series
            );
            return true;
        }

        // (c) three consecutive shared words in either form.
        if shares_consecutive_words(&candidate_words, &series_words, 3)
            || shares_consecutive_words(&candidate_words, &short_words, 3)
        {
            debug!(
                "Alternative match via consecutive words: {:?} ~ {:?}",
                candidate_words, series_words
            );
            return true;
        }

        // (d) a shared corpus-rare word. Rare shared words are strong
        // identity evidence even when overall similarity is low.
        for word in &series_words {
            if word.len() > 2
                && candidate_words.contains(word)
                && corpus_word_frequency
                    .get(*word)
                    .map(|count| *count <= distinctive_word_max_frequency)
                    .unwrap_or(false)
            {
                debug!("Alternative match via distinctive word {:?}", word);
                return true;
            }
        }

        // (e) both carry a dash-subtitle and the subtitles agree.
        if let (Some(candidate_sub), Some(record_sub)) = (
            dash_subtitle(candidate_folder_name),
            record
                .subtitle
                .clone()
                .or_else(|| dash_subtitle(&record.series_name)),
        ) {
            let a = self.normalizer.clean_default(&candidate_sub);
            let b = self.normalizer.clean_default(&record_sub);
            if !a.is_empty() && (a == b || self.string_similarity(&a, &b) >= required_score) {
                debug!("Alternative match via subtitle {:?} ~ {:?}", a, b);
                return true;
            }
        }

        false
    }
}

/// Keep the leading `ceil(len * fraction)` words, joined back into a string.
fn truncate_words(words: &[&str], fraction: f64) -> String {
    if words.is_empty() {
        return String::new();
    }
    let keep = ((words.len() as f64) * fraction).ceil() as usize;
    words[..keep.clamp(1, words.len())].join(" ")
}

/// True if any run of `run_length` consecutive words from `a` appears
/// consecutively (in order) in `b`.
pub fn shares_consecutive_words(a: &[&str], b: &[&str], run_length: usize) -> bool {
    if a.len() < run_length || b.len() < run_length {
        return false;
    }
    for window in a.windows(run_length) {
        if b.windows(run_length).any(|other| other == window) {
            return true;
        }
    }
    false
}

/// Text after the first " - " separator, if any.
pub fn dash_subtitle(name: &str) -> Option<String> {
    name.split_once(" - ")
        .map(|(_, subtitle)| subtitle.trim().to_string())
        .filter(|subtitle| !subtitle.is_empty())
}

/// Word-frequency table over a corpus of candidate folder names (cleaned).
/// Feeds the distinctive-word heuristic: a word that appears in only a
/// handful of folder names pins down identity.
pub fn word_frequency(names: &[String], normalizer: &mut Normalizer) -> HashMap<String, usize> {
    let mut table: HashMap<String, usize> = HashMap::new();
    for name in names {
        let cleaned = normalizer.clean_default(name);
        for word in cleaned.split_whitespace() {
            *table.entry(word.to_string()).or_insert(0) += 1;
        }
    }
    table
}

/// Cover-image calling policy. The numeric comparison itself is an external
/// collaborator; this gate decides whether its score clears the (high)
/// image threshold. Callers must only reach here after
/// `alternative_match_allowed` has passed.
pub fn cover_match(
    comparator: &dyn ImageComparator,
    a: &[u8],
    b: &[u8],
    threshold: f64,
) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let score = comparator.similarity(a, b);
    debug!("Cover similarity score {:.3} (threshold {:.3})", score, threshold);
    score >= threshold
}
