use crate::collaborators::Collaborators;
use crate::config::Settings;
use crate::parser::{FolderContext, ReleaseParser};
use crate::path_cache::{shares_word_prefix, PathCache};
use crate::record::{FileRecord, FileType, ReleaseRecord};
use crate::similarity::{cover_match, SimilarityEngine};
use anyhow::Result;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Which tier produced the match. Carried in logs and the run report so a
/// surprising placement can be traced back to the evidence that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    CacheHit(PathBuf),
    IdentifierHit(PathBuf),
    NameSimilarityHit(PathBuf),
    ImageSimilarityHit(PathBuf),
    NoMatch,
}

impl MatchOutcome {
    pub fn folder(&self) -> Option<&Path> {
        match self {
            MatchOutcome::CacheHit(path)
            | MatchOutcome::IdentifierHit(path)
            | MatchOutcome::NameSimilarityHit(path)
            | MatchOutcome::ImageSimilarityHit(path) => Some(path),
            MatchOutcome::NoMatch => None,
        }
    }
}

/// What a series folder already holds: the archive extensions and release
/// types present in it. A cheap gate run before any similarity scoring —
/// a folder of volumes is never the home of a loose chapter, and an .epub
/// novel folder never takes a .cbz, no matter how well the names score.
#[derive(Debug, Clone, Default)]
pub struct FolderProfile {
    extensions: HashSet<String>,
    file_types: HashSet<FileType>,
}

impl FolderProfile {
    /// An empty folder carries no evidence and accepts anything.
    pub fn accepts(&self, record: &ReleaseRecord) -> bool {
        self.extensions.is_empty()
            || (self.extensions.contains(&record.extension)
                && self.file_types.contains(&record.file_type))
    }
}

/// Per-run matching state: the persistent Path Cache, the set of series
/// already known not to match (so a folder of twenty chapters fails the
/// expensive search once, not twenty times), the word-frequency table over
/// library folder names, and per-folder identifier and content profiles.
#[derive(Debug)]
pub struct MatchContext {
    pub path_cache: PathCache,
    unmatched: HashSet<String>,
    pub word_frequency: HashMap<String, usize>,
    identifier_cache: HashMap<PathBuf, Vec<String>>,
    profile_cache: HashMap<PathBuf, FolderProfile>,
}

impl MatchContext {
    pub fn new(path_cache: PathCache) -> Self {
        MatchContext {
            path_cache,
            unmatched: HashSet::new(),
            word_frequency: HashMap::new(),
            identifier_cache: HashMap::new(),
            profile_cache: HashMap::new(),
        }
    }

    /// Build the distinctive-word table from every series folder name under
    /// the library roots. Done once per run.
    pub fn build_word_frequency(&mut self, library_dirs: &[PathBuf], engine: &mut SimilarityEngine) {
        let names: Vec<String> = candidate_folders(library_dirs)
            .iter()
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()))
            .map(|name| name.to_string())
            .collect();
        self.word_frequency = crate::similarity::word_frequency(&names, &mut engine.normalizer);
        debug!(
            "Word frequency table built over {} folder names ({} distinct words)",
            names.len(),
            self.word_frequency.len()
        );
    }

    fn unmatched_key(record: &ReleaseRecord) -> String {
        format!(
            "{}|{:?}|{}",
            record.series_name.to_lowercase(),
            record.file_type,
            record.extension
        )
    }

    pub fn mark_unmatched(&mut self, record: &ReleaseRecord) {
        self.unmatched.insert(Self::unmatched_key(record));
    }

    pub fn is_unmatched(&self, record: &ReleaseRecord) -> bool {
        self.unmatched.contains(&Self::unmatched_key(record))
    }

    /// Identifiers embedded in any archive directly inside `folder`,
    /// computed once per folder per run.
    fn folder_identifiers(
        &mut self,
        folder: &Path,
        collaborators: &Collaborators,
        extensions: &[String],
    ) -> Vec<String> {
        if let Some(cached) = self.identifier_cache.get(folder) {
            return cached.clone();
        }

        let mut identifiers = Vec::new();
        for file in archive_files(folder, extensions) {
            match collaborators.archive.metadata(&file) {
                Ok(metadata) => {
                    for id in metadata.identifiers {
                        if !identifiers.contains(&id) {
                            identifiers.push(id);
                        }
                    }
                }
                Err(err) => debug!("No metadata from {:?}: {}", file, err),
            }
        }

        self.identifier_cache
            .insert(folder.to_path_buf(), identifiers.clone());
        identifiers
    }

    /// Content profile of a folder, computed once per folder per run.
    fn folder_profile(
        &mut self,
        folder: &Path,
        extensions: &[String],
        parser: &mut ReleaseParser,
    ) -> FolderProfile {
        if let Some(cached) = self.profile_cache.get(folder) {
            return cached.clone();
        }

        let folder_ctx = FolderContext {
            parent_name: folder
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_string()),
            parent_is_root: false,
            files_in_folder: None,
            in_download_root: false,
        };

        let mut profile = FolderProfile::default();
        for file in archive_files(folder, extensions) {
            let Some(file_record) = FileRecord::from_path(&file) else {
                continue;
            };
            let parsed = parser.parse(&file_record, &folder_ctx, None);
            profile.extensions.insert(parsed.extension);
            profile.file_types.insert(parsed.file_type);
        }

        self.profile_cache
            .insert(folder.to_path_buf(), profile.clone());
        profile
    }
}

/// Finds the library folder a release belongs to. Tiers run cheapest-first
/// and stop at the first hit: path cache, embedded identifiers, folder-name
/// similarity, cover-image similarity. Every hit promotes the folder in the
/// Path Cache so the next file of the same series takes the fast path.
#[derive(Debug, Default)]
pub struct SeriesMatcher {
    pub engine: SimilarityEngine,
}

impl SeriesMatcher {
    pub fn find_series_folder(
        &mut self,
        record: &ReleaseRecord,
        ctx: &mut MatchContext,
        settings: &Settings,
        collaborators: &Collaborators,
        parser: &mut ReleaseParser,
    ) -> Result<MatchOutcome> {
        if record.series_name.is_empty() {
            debug!("No series name for {:?}; nothing to match", record.name);
            return Ok(MatchOutcome::NoMatch);
        }
        if ctx.is_unmatched(record) {
            debug!("{:?} already failed to match this run", record.series_name);
            return Ok(MatchOutcome::NoMatch);
        }

        let query = self.engine.normalizer.clean_default(&record.series_name);
        let query_words: Vec<&str> = query.split_whitespace().collect();

        // Tier 1: previously matched folders, likeliest first.
        let cached: Vec<PathBuf> = ctx
            .path_cache
            .reordered_for(&query_words)
            .into_iter()
            .cloned()
            .collect();
        for path in cached {
            if !ctx
                .folder_profile(&path, &settings.archive_extensions, parser)
                .accepts(record)
            {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if self.name_score(name, record) >= settings.cache_match_threshold {
                    debug!("Cache hit for {:?}: {:?}", record.series_name, path);
                    ctx.path_cache.promote(&path);
                    return Ok(MatchOutcome::CacheHit(path));
                }
            }
        }

        let candidates = candidate_folders(&settings.library_dirs);

        // Tier 2: exact identifier containment, volumes only. An embedded
        // ISBN/series ID shared with a folder's archives beats any amount of
        // name fuzziness.
        if record.file_type == FileType::Volume {
            let record_ids = match collaborators.archive.metadata(&record.path) {
                Ok(metadata) => metadata.identifiers,
                Err(err) => {
                    debug!("No metadata from {:?}: {}", record.path, err);
                    Vec::new()
                }
            };
            if !record_ids.is_empty() {
                for candidate in &candidates {
                    let folder_ids = ctx.folder_identifiers(
                        candidate,
                        collaborators,
                        &settings.archive_extensions,
                    );
                    if record_ids.iter().any(|id| folder_ids.contains(id)) {
                        info!(
                            "Identifier match for {:?}: {:?}",
                            record.series_name, candidate
                        );
                        ctx.path_cache.promote(candidate);
                        return Ok(MatchOutcome::IdentifierHit(candidate.clone()));
                    }
                }
            }
        }

        // Tier 3: folder-name similarity, first folder over the threshold
        // wins. Folders sharing the query's two-word prefix are examined
        // before the rest, so the likely hit is found early and the scan
        // stops there instead of scoring the whole library.
        let mut ordered: Vec<&PathBuf> = Vec::new();
        let mut remaining: Vec<&PathBuf> = Vec::new();
        for candidate in &candidates {
            if shares_word_prefix(candidate, &query_words) {
                ordered.push(candidate);
            } else {
                remaining.push(candidate);
            }
        }
        ordered.extend(remaining);

        for candidate in ordered {
            let Some(name) = candidate.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !ctx
                .folder_profile(candidate, &settings.archive_extensions, parser)
                .accepts(record)
            {
                debug!(
                    "Skipping {:?} for {:?}: contents are a different format",
                    candidate, record.name
                );
                continue;
            }
            let score = self.name_score(name, record);
            if score >= settings.required_similarity {
                debug!(
                    "Name match for {:?}: {:?} (score {:.3})",
                    record.series_name, candidate, score
                );
                ctx.path_cache.promote(candidate);
                return Ok(MatchOutcome::NameSimilarityHit(candidate.clone()));
            }
        }

        // Tier 4: cover-image comparison, volumes only, and only against
        // folders where a fallback heuristic says the names could plausibly
        // be the same series. Brute-forcing covers against the whole library
        // would be slow AND a false-positive factory.
        if record.file_type == FileType::Volume {
            if let Some(outcome) =
                self.image_tier(record, ctx, settings, collaborators, parser, &candidates)?
            {
                return Ok(outcome);
            }
        }

        debug!("No folder matched {:?}", record.series_name);
        ctx.mark_unmatched(record);
        Ok(MatchOutcome::NoMatch)
    }

    /// Similarity of a folder name against both the full and the shortened
    /// series name, whichever is higher.
    fn name_score(&mut self, folder_name: &str, record: &ReleaseRecord) -> f64 {
        let full = self.engine.clean_similarity(folder_name, &record.series_name);
        if record.shortened_series_name == record.series_name {
            return full;
        }
        let short = self
            .engine
            .clean_similarity(folder_name, &record.shortened_series_name);
        full.max(short)
    }

    fn image_tier(
        &mut self,
        record: &ReleaseRecord,
        ctx: &mut MatchContext,
        settings: &Settings,
        collaborators: &Collaborators,
        parser: &mut ReleaseParser,
        candidates: &[PathBuf],
    ) -> Result<Option<MatchOutcome>> {
        let record_cover = match collaborators.covers.extract_cover(&record.path) {
            Ok(Some(cover)) => cover,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!("Could not extract cover from {:?}: {}", record.path, err);
                return Ok(None);
            }
        };

        for candidate in candidates {
            let Some(name) = candidate.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.engine.alternative_match_allowed(
                name,
                record,
                settings.word_keep_fraction,
                settings.required_similarity,
                &ctx.word_frequency,
                settings.distinctive_word_max_frequency,
            ) {
                continue;
            }

            let folder_ctx = FolderContext {
                parent_name: Some(name.to_string()),
                parent_is_root: false,
                files_in_folder: None,
                in_download_root: false,
            };

            // Only covers of the SAME volume are comparable; volume 1 and
            // volume 7 of one series look nothing alike.
            for file in archive_files(candidate, &settings.archive_extensions) {
                let Some(file_record) = FileRecord::from_path(&file) else {
                    continue;
                };
                let parsed = parser.parse(&file_record, &folder_ctx, None);
                if !parsed.index_equal(record) {
                    continue;
                }
                let candidate_cover = match collaborators.covers.extract_cover(&file) {
                    Ok(Some(cover)) => cover,
                    Ok(None) => continue,
                    Err(err) => {
                        debug!("Could not extract cover from {:?}: {}", file, err);
                        continue;
                    }
                };
                if cover_match(
                    collaborators.images.as_ref(),
                    &record_cover,
                    &candidate_cover,
                    settings.image_match_threshold,
                ) {
                    info!("Cover match for {:?}: {:?}", record.series_name, candidate);
                    ctx.path_cache.promote(candidate);
                    return Ok(Some(MatchOutcome::ImageSimilarityHit(candidate.clone())));
                }
            }
        }

        Ok(None)
    }
}

/// Immediate subdirectories of the library roots, one per series. Sorted for
/// deterministic scan order.
pub fn candidate_folders(library_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut folders = Vec::new();
    for root in library_dirs {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Could not read library root {:?}: {}", root, err);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                folders.push(path);
            }
        }
    }
    folders.sort();
    folders
}

/// Archive files directly inside a folder, by configured extension.
pub fn archive_files(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Could not read folder {:?}: {}", folder, err);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_archive_extension(path, extensions))
        .collect();
    files.sort();
    files
}

fn has_archive_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let dotted = format!(".{}", e.to_lowercase());
            extensions.iter().any(|known| known == &dotted)
        })
        .unwrap_or(false)
}
