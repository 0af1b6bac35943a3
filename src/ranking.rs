use crate::config::KeywordRuleConfig;
use crate::record::{FileType, ReleaseRecord};
use anyhow::{Context, Result};
use log::debug;
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::Path;

/// One compiled scoring rule. `applies_to: None` means both file types.
#[derive(Debug)]
pub struct KeywordRule {
    pub name: String,
    pub pattern: Regex,
    pub weight: f64,
    pub applies_to: Option<FileType>,
}

impl KeywordRule {
    pub fn compile(configs: &[KeywordRuleConfig]) -> Result<Vec<KeywordRule>> {
        configs
            .iter()
            .map(|config| {
                let pattern = Regex::new(&config.pattern)
                    .with_context(|| format!("bad keyword pattern {:?}", config.pattern))?;
                let applies_to = match config.applies_to.as_deref() {
                    Some("volume") => Some(FileType::Volume),
                    Some("chapter") => Some(FileType::Chapter),
                    _ => None,
                };
                Ok(KeywordRule {
                    name: config.pattern.clone(),
                    pattern,
                    weight: config.weight,
                    applies_to,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedKeyword {
    pub name: String,
    pub weight: f64,
}

/// Score for exactly one record. Purely derived and recomputed per
/// comparison; never cached on the record.
#[derive(Debug, Clone)]
pub struct RankedKeywordResult {
    pub total_score: f64,
    pub matched_keywords: Vec<MatchedKeyword>,
}

/// Sum the weights of every rule matching the record's raw filename.
pub fn rank(record: &ReleaseRecord, rules: &[KeywordRule]) -> RankedKeywordResult {
    let mut total = 0.0;
    let mut matched = Vec::new();

    for rule in rules {
        if let Some(required) = rule.applies_to {
            if required != record.file_type {
                continue;
            }
        }
        if rule.pattern.is_match(&record.name) {
            total += rule.weight;
            matched.push(MatchedKeyword {
                name: rule.name.clone(),
                weight: rule.weight,
            });
        }
    }

    RankedKeywordResult {
        total_score: total,
        matched_keywords: matched,
    }
}

/// How an exact score tie was broken (or deliberately not broken).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Same content hash: true duplicates, keeping either loses nothing.
    ContentDuplicate,
    /// Different content at equal score: don't guess. Deferred to a manual
    /// decision (auto-skipped in unattended mode).
    Unresolved,
}

/// Outcome of comparing a challenger against an incumbent. Consumed
/// immediately to drive one file operation, then discarded.
#[derive(Debug)]
pub struct UpgradeDecision {
    /// True iff the challenger strictly out-scores the incumbent.
    pub is_upgrade: bool,
    pub winner: ReleaseRecord,
    pub loser: ReleaseRecord,
    pub winner_score: f64,
    pub loser_score: f64,
    pub tie: Option<TieBreak>,
}

/// Rank both releases and decide whether `challenger` is an upgrade over
/// `incumbent`. Strictly-greater only: an equal total is NEVER an upgrade in
/// either direction. Ties fall through to the content-hash policy.
pub fn decide_upgrade(
    challenger: &ReleaseRecord,
    incumbent: &ReleaseRecord,
    rules: &[KeywordRule],
) -> Result<UpgradeDecision> {
    let challenger_rank = rank(challenger, rules);
    let incumbent_rank = rank(incumbent, rules);

    debug!(
        "Ranked {:?} = {:.1} vs {:?} = {:.1}",
        challenger.name, challenger_rank.total_score, incumbent.name, incumbent_rank.total_score
    );

    if challenger_rank.total_score > incumbent_rank.total_score {
        return Ok(UpgradeDecision {
            is_upgrade: true,
            winner: challenger.clone(),
            loser: incumbent.clone(),
            winner_score: challenger_rank.total_score,
            loser_score: incumbent_rank.total_score,
            tie: None,
        });
    }

    if challenger_rank.total_score < incumbent_rank.total_score {
        return Ok(UpgradeDecision {
            is_upgrade: false,
            winner: incumbent.clone(),
            loser: challenger.clone(),
            winner_score: incumbent_rank.total_score,
            loser_score: challenger_rank.total_score,
            tie: None,
        });
    }

    // Exactly equal scores: compare content. Identical bytes mean either
    // copy can go; different bytes mean guessing would irreversibly delete
    // content, so nobody wins.
    let tie = if files_content_equal(&challenger.path, &incumbent.path)? {
        TieBreak::ContentDuplicate
    } else {
        TieBreak::Unresolved
    };

    Ok(UpgradeDecision {
        is_upgrade: false,
        winner: incumbent.clone(),
        loser: challenger.clone(),
        winner_score: incumbent_rank.total_score,
        loser_score: challenger_rank.total_score,
        tie: Some(tie),
    })
}

fn files_content_equal(a: &Path, b: &Path) -> Result<bool> {
    Ok(compute_md5(a)? == compute_md5(b)?)
}

/// Streaming md5 of a file's contents.
pub fn compute_md5(path: &Path) -> Result<String> {
    const BUFFER_SIZE: usize = 8192;

    let mut file = fs::File::open(path)
        .with_context(|| format!("opening {:?} for hashing", path))?;
    let mut hasher = md5::Context::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.compute()))
}
