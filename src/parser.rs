use crate::collaborators::EmbeddedMetadata;
use crate::config::Settings;
use crate::record::{FileRecord, FileType, Publisher, ReleaseRecord, VolumeNumber};
use crate::similarity::SimilarityEngine;
use log::debug;
use regex::Regex;

/// Where the containing folder sits relative to the configured roots.
/// Drives the parent-folder series-name fallback and one-shot detection.
#[derive(Debug, Clone, Default)]
pub struct FolderContext {
    pub parent_name: Option<String>,
    /// True when the parent IS a configured library/download root; its name
    /// must never be mistaken for a series name.
    pub parent_is_root: bool,
    pub files_in_folder: Option<usize>,
    /// True when the file sits directly in a download folder.
    pub in_download_root: bool,
}

/// What kind of token produced the number. Order in `build_patterns` is the
/// cascade order and is load-bearing: looser patterns must only apply when
/// stricter ones fail, and range patterns must run before scalar patterns or
/// a range gets silently truncated to its first number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberKind {
    VolumeRange,
    ChapterRange,
    VolumeKeyword,
    ChapterKeyword,
    HashNumber,
    BareList,
    BareScalar,
}

impl NumberKind {
    fn is_volume_keyword(self) -> bool {
        matches!(self, NumberKind::VolumeRange | NumberKind::VolumeKeyword)
    }

    fn is_chapter_keyword(self) -> bool {
        matches!(
            self,
            NumberKind::ChapterRange | NumberKind::ChapterKeyword | NumberKind::HashNumber
        )
    }

    fn is_bare(self) -> bool {
        matches!(self, NumberKind::BareList | NumberKind::BareScalar)
    }
}

#[derive(Debug)]
struct NumberMatch {
    kind: NumberKind,
    start: usize,
    end: usize,
    numbers: Vec<f64>,
}

// A bare number next to one of these means something other than a
// volume/chapter index and must not be captured by the loose patterns.
const EXCLUSION_KEYWORDS: &[&str] = &[
    "part", "episode", "ep", "arc", "season", "side", "omake", "extra", "page",
];

/// Parses raw filenames into [`ReleaseRecord`]s via an ordered
/// (pattern, extractor) cascade with explicit first-match-wins.
#[derive(Debug)]
pub struct ReleaseParser {
    patterns: Vec<(NumberKind, Regex)>,
    volume_keyword_re: Regex,
    number_re: Regex,
    part_re: Regex,
    premium_re: Regex,
    year_re: Regex,
    bracket_token_re: Regex,
    leading_tag_re: Regex,
    whitespace_re: Regex,
    known_publishers: Vec<String>,
    known_groups: Vec<String>,
    publisher_similarity: f64,
    group_similarity: f64,
    engine: SimilarityEngine,
}

fn build_patterns() -> Vec<(NumberKind, Regex)> {
    let num = r"\d+(?:\.\d+)?";
    vec![
        // 1. Multi-volume range: "v01-v12", "vol 1-3", "Volumes 1, 2, 3".
        (
            NumberKind::VolumeRange,
            Regex::new(&format!(
                r"(?i)(?:\b|_)v(?:ol(?:ume)?s?)?\.?\s*{num}(?:\s*[-_,~]\s*v?(?:ol(?:ume)?s?)?\.?\s*{num})+"
            ))
            .unwrap(),
        ),
        // 2. Multi-chapter range: "c001-005", "ch 10-12".
        (
            NumberKind::ChapterRange,
            Regex::new(&format!(
                r"(?i)(?:\b|_)(?:chapters?|chap|ch)\.?\s*{num}(?:\s*[-_,~]\s*(?:c|ch|chap)?\.?\s*{num})+|(?:\b|_)c{num}(?:\s*[-_,~]\s*c?{num})+"
            ))
            .unwrap(),
        ),
        // 3. Volume keyword + number, keyword adjacent.
        (
            NumberKind::VolumeKeyword,
            Regex::new(&format!(
                r"(?i)(?:\b|_)(?:volumes?|vol|lv|book|tome)\.?\s*{num}\b|(?:\b|_)v\.?{num}\b"
            ))
            .unwrap(),
        ),
        // 4. Chapter keyword + number. Bare "c" must touch its digits:
        //    "c045" is a chapter token, "C 045" is probably a title word.
        (
            NumberKind::ChapterKeyword,
            Regex::new(&format!(
                r"(?i)(?:\b|_)(?:chapters?|chap|ch)\.?\s*{num}\b|(?:\b|_)c{num}\b"
            ))
            .unwrap(),
        ),
        // 5. "#12" style.
        (
            NumberKind::HashNumber,
            Regex::new(&format!(r"#\s*{num}(?:\s*[-,]\s*{num})*")).unwrap(),
        ),
        // 6. Bare trailing number list: "Series 1, 2, 3, 5".
        (
            NumberKind::BareList,
            Regex::new(&format!(r"{num}(?:\s*[-,]\s*{num})+\s*$")).unwrap(),
        ),
        // 7. Bare trailing number, the loosest pattern of all.
        (
            NumberKind::BareScalar,
            Regex::new(&format!(r"{num}\s*$")).unwrap(),
        ),
    ]
}

impl ReleaseParser {
    pub fn new(
        settings: &Settings,
        known_publishers: Vec<String>,
        known_groups: Vec<String>,
    ) -> Self {
        ReleaseParser {
            patterns: build_patterns(),
            volume_keyword_re: Regex::new(
                r"(?i)(?:\b|_)(?:volumes?|vol|lv|book|tome)\.?\s*\d|(?:\b|_)v\.?\d",
            )
            .unwrap(),
            number_re: Regex::new(r"\d+(?:\.\d+)?").unwrap(),
            part_re: Regex::new(r"(?i)\bpart[\s._]*(\d+(?:\.\d+)?)").unwrap(),
            premium_re: Regex::new(r"(?i)\bpremium\b").unwrap(),
            year_re: Regex::new(r"[\(\[]((?:19|20)\d{2})[\)\]]").unwrap(),
            bracket_token_re: Regex::new(r"\[([^\]]*)\]|\(([^)]*)\)").unwrap(),
            leading_tag_re: Regex::new(r"^\s*(?:\[[^\]]*\]|\([^)]*\)|\{[^}]*\})\s*").unwrap(),
            whitespace_re: Regex::new(r"\s+").unwrap(),
            known_publishers,
            known_groups,
            publisher_similarity: settings.publisher_similarity,
            group_similarity: settings.release_group_similarity,
            engine: SimilarityEngine::default(),
        }
    }

    /// Build a [`ReleaseRecord`] from a raw file. Pure with respect to the
    /// inputs: the same name and context always produce the same record.
    pub fn parse(
        &mut self,
        file: &FileRecord,
        ctx: &FolderContext,
        metadata: Option<&EmbeddedMetadata>,
    ) -> ReleaseRecord {
        let stem = file.stem();
        // Number search runs on a masked copy with bracketed regions blanked
        // out, so revision tags like "[v2]" can never produce an index. The
        // mask preserves byte positions, so match offsets map straight back
        // to the original stem.
        let masked = mask_brackets(stem);
        let number_match = self.find_number(&masked);

        let volume_number = match &number_match {
            Some(m) => VolumeNumber::from_numbers(&m.numbers),
            None => VolumeNumber::Absent,
        };

        // Series name: everything before the matched token; fall back to the
        // parent folder (cleaned the same way, once) when nothing remains.
        let before = number_match
            .as_ref()
            .map(|m| &stem[..m.start])
            .unwrap_or(stem);
        let mut series_name = self.tidy_series(before);
        if series_name.is_empty() {
            if let Some(parent) = ctx.parent_name.as_deref() {
                if !ctx.parent_is_root {
                    series_name = self.derive_series_from_folder(parent);
                    debug!(
                        "Series name for {:?} fell back to folder {:?}",
                        file.name, series_name
                    );
                }
            }
        }

        let shortened_series_name = series_name
            .split_once(" - ")
            .map(|(head, _)| head.trim().to_string())
            .unwrap_or_else(|| series_name.clone());

        let year = self
            .year_re
            .captures(stem)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok());

        let subtitle = number_match
            .as_ref()
            .and_then(|m| self.derive_subtitle(&stem[m.end..]));

        let volume_part = self
            .part_re
            .captures(&masked)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        let (publisher_from_filename, release_group, extras, premium_bracket) =
            self.classify_brackets(stem);

        let is_premium = premium_bracket || self.premium_re.is_match(&masked);

        let publisher = Publisher {
            from_metadata: metadata.and_then(|m| m.publisher.clone()),
            from_filename: publisher_from_filename,
        };

        // Chapter only when a chapter-shaped token matched AND no volume
        // keyword appears anywhere: volume keywords always take precedence.
        let volume_keyword_anywhere = self.volume_keyword_re.is_match(&masked);
        let file_type = match &number_match {
            Some(m) if m.kind.is_volume_keyword() => FileType::Volume,
            Some(m) if (m.kind.is_chapter_keyword() || m.kind.is_bare())
                && !volume_keyword_anywhere =>
            {
                FileType::Chapter
            }
            _ => FileType::Volume,
        };

        let keyword_matched = number_match
            .as_ref()
            .map(|m| !m.kind.is_bare())
            .unwrap_or(false);
        let is_one_shot = !keyword_matched
            && volume_number.is_absent()
            && (ctx.files_in_folder == Some(1) || ctx.in_download_root);

        let is_multi_volume = file_type == FileType::Volume && volume_number.is_range();

        ReleaseRecord {
            file_type,
            series_name,
            shortened_series_name,
            volume_number,
            volume_part,
            year,
            subtitle,
            publisher,
            release_group,
            extras,
            is_premium,
            is_one_shot,
            is_multi_volume,
            path: file.path.clone(),
            root: file.root.clone(),
            name: file.name.clone(),
            extension: file.extension.clone(),
        }
    }

    /// Ordered cascade over the masked stem; the first pattern that matches
    /// (and survives the exclusion guard) wins.
    fn find_number(&self, masked: &str) -> Option<NumberMatch> {
        for (kind, pattern) in &self.patterns {
            let Some(m) = pattern.find(masked) else {
                continue;
            };

            if kind.is_bare() && self.bare_number_excluded(masked, m.start()) {
                debug!("Bare number at {} rejected by exclusion keyword", m.start());
                continue;
            }

            let numbers: Vec<f64> = self
                .number_re
                .find_iter(m.as_str())
                .filter_map(|n| n.as_str().parse::<f64>().ok())
                .collect();
            if numbers.is_empty() {
                continue;
            }

            return Some(NumberMatch {
                kind: *kind,
                start: m.start(),
                end: m.end(),
                numbers,
            });
        }
        None
    }

    /// The word immediately before a bare number decides whether the number
    /// is an index at all: "Part 2", "Episode 3", "Season 1" are not.
    fn bare_number_excluded(&self, masked: &str, match_start: usize) -> bool {
        let before = &masked[..match_start];
        let last_word: String = before
            .split_whitespace()
            .last()
            .unwrap_or("")
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        EXCLUSION_KEYWORDS.contains(&last_word.as_str())
    }

    /// Strip a leading bracketed tag, turn underscores into spaces, and trim
    /// separator debris off both ends.
    fn tidy_series(&self, raw: &str) -> String {
        let without_tag = self.leading_tag_re.replace(raw, "");
        let spaced = without_tag.replace('_', " ");
        let collapsed = self.whitespace_re.replace_all(&spaced, " ");
        collapsed
            .trim_matches(|c: char| {
                c.is_whitespace() || matches!(c, '-' | '~' | '.' | ',' | ':')
            })
            .to_string()
    }

    /// One-level folder fallback: clean the folder name with the same
    /// number-stripping treatment, but never recurse further.
    fn derive_series_from_folder(&self, folder_name: &str) -> String {
        let masked = mask_brackets(folder_name);
        let before = match self.find_number(&masked) {
            Some(m) => &folder_name[..m.start],
            None => folder_name,
        };
        self.tidy_series(before)
    }

    /// Trailing text after the number token is only a subtitle when the tail
    /// also carries a year, a "(Digital)" marker, or a known publisher
    /// bracket; otherwise it is unclassified garbage and stays out of the
    /// record.
    fn derive_subtitle(&mut self, after: &str) -> Option<String> {
        let trimmed = after.trim_start();
        let rest = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix(": "))
            .or_else(|| trimmed.strip_prefix('-').map(str::trim_start))?;

        let anchored = self.year_re.is_match(rest)
            || rest.to_lowercase().contains("(digital)")
            || self.has_publisher_bracket(rest);
        if !anchored {
            return None;
        }

        let text_end = rest.find(['(', '[']).unwrap_or(rest.len());
        let subtitle = rest[..text_end].trim().trim_matches('-').trim();
        if subtitle.is_empty() {
            None
        } else {
            Some(subtitle.to_string())
        }
    }

    fn has_publisher_bracket(&mut self, text: &str) -> bool {
        let tokens: Vec<String> = self
            .bracket_token_re
            .captures_iter(text)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().trim().to_string())
            .collect();
        tokens
            .iter()
            .any(|token| self.match_known_name(token, true).is_some())
    }

    /// Walk every bracketed token in original order and classify it: year
    /// (already captured), premium marker, publisher, release group, or
    /// leftover "extra".
    fn classify_brackets(
        &mut self,
        stem: &str,
    ) -> (Option<String>, Option<String>, Vec<String>, bool) {
        let tokens: Vec<String> = self
            .bracket_token_re
            .captures_iter(stem)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();

        let mut publisher: Option<String> = None;
        let mut group: Option<String> = None;
        let mut extras: Vec<String> = Vec::new();
        let mut premium = false;

        for token in tokens {
            if self.is_year_token(&token) {
                continue;
            }
            if token.to_lowercase().contains("premium") {
                premium = true;
                continue;
            }
            if publisher.is_none() {
                if let Some(name) = self.match_known_name(&token, true) {
                    publisher = Some(name);
                    continue;
                }
            }
            if group.is_none() {
                if let Some(name) = self.match_known_name(&token, false) {
                    group = Some(name);
                    continue;
                }
            }
            extras.push(token);
        }

        (publisher, group, extras, premium)
    }

    fn is_year_token(&self, token: &str) -> bool {
        token.len() == 4
            && (token.starts_with("19") || token.starts_with("20"))
            && token.chars().all(|c| c.is_ascii_digit())
    }

    /// Fuzzy lookup against the known publisher/group lists. Returns the
    /// canonical list entry so downstream always sees one spelling.
    fn match_known_name(&mut self, token: &str, publishers: bool) -> Option<String> {
        let (list, threshold) = if publishers {
            (&self.known_publishers, self.publisher_similarity)
        } else {
            (&self.known_groups, self.group_similarity)
        };

        let token_lower = token.to_lowercase();
        let mut best: Option<(f64, &String)> = None;
        for name in list {
            let score = self
                .engine
                .string_similarity(&token_lower, &name.to_lowercase());
            if score >= threshold && best.map(|(b, _)| score > b).unwrap_or(true) {
                best = Some((score, name));
            }
        }
        best.map(|(_, name)| name.clone())
    }
}

/// Blank out bracketed regions (including the brackets) with spaces,
/// preserving byte positions so match offsets stay valid in the original.
fn mask_brackets(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    for c in s.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                out.push(' ');
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                out.push(' ');
            }
            _ if depth > 0 => {
                for _ in 0..c.len_utf8() {
                    out.push(' ');
                }
            }
            _ => out.push(c),
        }
    }
    out
}
