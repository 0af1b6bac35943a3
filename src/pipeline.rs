use crate::collaborators::{Collaborators, EventKind, NotificationEvent};
use crate::config::{load_name_list, Settings};
use crate::matcher::{archive_files, candidate_folders, MatchContext, SeriesMatcher};
use crate::parser::{FolderContext, ReleaseParser};
use crate::path_cache::PathCache;
use crate::ranking::KeywordRule;
use crate::record::FileRecord;
use crate::resolver::{self, ApplyPolicy};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

const COLOR_NEW: u32 = 0x4caf50;
const COLOR_UPGRADE: u32 = 0x2196f3;
const COLOR_TIE: u32 = 0xff9800;

/// Everything one batch run did (or, in dry-run, would do). Vectors are
/// sorted before the report is returned so output is deterministic.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Files parsed into release records.
    pub processed: usize,
    /// New files moved into their series folder: (from, to).
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Upgrades placed over an existing release: (from, to).
    pub upgrades: Vec<(PathBuf, PathBuf)>,
    /// Files deleted (upgrade losers, absorbed volumes, duplicates).
    pub removed: Vec<PathBuf>,
    /// Equal-score ties left for a manual decision: (incoming, existing).
    pub unresolved: Vec<(PathBuf, PathBuf)>,
    /// Files whose series matched no library folder; left where they are.
    pub unmatched: Vec<PathBuf>,
    /// Per-file failures that were skipped over, human-readable.
    pub errors: Vec<String>,
}

impl RunReport {
    fn sort(&mut self) {
        self.moved.sort();
        self.upgrades.sort();
        self.removed.sort();
        self.unresolved.sort();
        self.unmatched.sort();
        self.errors.sort();
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.unresolved.is_empty() && self.unmatched.is_empty()
    }
}

/// The batch driver: walks download folders, parses each archive, finds its
/// series folder, resolves upgrades and places the file. One run at a time;
/// overlapping invocations serialize on an internal lock.
pub struct Organizer {
    settings: Settings,
    collaborators: Collaborators,
    rules: Vec<KeywordRule>,
    run_lock: Mutex<()>,
}

impl Organizer {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Result<Self> {
        let rules = KeywordRule::compile(&settings.keyword_rules)?;
        Ok(Organizer {
            settings,
            collaborators,
            rules,
            run_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process every configured download folder: parse, match, resolve,
    /// move. A failure on one file or folder is recorded and skipped; the
    /// run continues.
    pub fn process_downloads(&self, policy: ApplyPolicy) -> Result<RunReport> {
        let _guard = self
            .run_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut parser = self.build_parser();
        let mut matcher = SeriesMatcher::default();
        let mut ctx = MatchContext::new(PathCache::load(&self.settings.cache_file));
        ctx.build_word_frequency(&self.settings.library_dirs, &mut matcher.engine);

        let mut report = RunReport::default();
        let mut affected_roots: HashSet<PathBuf> = HashSet::new();

        for folder in &self.settings.download_dirs {
            let files = match self.collect_downloads(folder) {
                Ok(files) => files,
                Err(err) => {
                    warn!("Skipping download folder {:?}: {:#}", folder, err);
                    report.errors.push(format!("{}: {:#}", folder.display(), err));
                    continue;
                }
            };

            let mut per_dir_counts: HashMap<PathBuf, usize> = HashMap::new();
            for file in &files {
                if let Some(parent) = file.parent() {
                    *per_dir_counts.entry(parent.to_path_buf()).or_insert(0) += 1;
                }
            }

            for file in files {
                let result = self.process_file(
                    &file,
                    folder,
                    &per_dir_counts,
                    &mut parser,
                    &mut matcher,
                    &mut ctx,
                    &mut report,
                    &mut affected_roots,
                    policy,
                );
                if let Err(err) = result {
                    warn!("Skipping {:?}: {:#}", file, err);
                    report.errors.push(format!("{}: {:#}", file.display(), err));
                }
            }
        }

        for root in &affected_roots {
            if let Err(err) = self.collaborators.scanner.request_scan(root) {
                warn!("Scan request for {:?} failed: {}", root, err);
            }
        }

        if let Err(err) = ctx.path_cache.save() {
            warn!("Could not save path cache: {:#}", err);
        }

        report.sort();
        info!(
            "Run complete: {} processed, {} moved, {} upgraded, {} removed, {} unresolved, {} unmatched, {} errors",
            report.processed,
            report.moved.len(),
            report.upgrades.len(),
            report.removed.len(),
            report.unresolved.len(),
            report.unmatched.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Deduplicate every series folder in the configured libraries, using
    /// the same ranking and tie policy as download processing.
    pub fn check_duplicates(&self, policy: ApplyPolicy) -> Result<RunReport> {
        let _guard = self
            .run_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut parser = self.build_parser();
        let mut report = RunReport::default();

        for folder in candidate_folders(&self.settings.library_dirs) {
            let records = self.parse_folder(&folder, &mut parser);
            report.processed += records.len();
            match resolver::resolve_within(records, &self.rules, policy) {
                Ok(resolved) => {
                    report.removed.extend(resolved.removed);
                    for pair in resolved.unresolved {
                        self.notify_tie(&pair);
                        report.unresolved.push(pair);
                    }
                }
                Err(err) => {
                    warn!("Duplicate check failed in {:?}: {:#}", folder, err);
                    report.errors.push(format!("{}: {:#}", folder.display(), err));
                }
            }
        }

        report.sort();
        info!(
            "Duplicate check complete: {} processed, {} removed, {} unresolved, {} errors",
            report.processed,
            report.removed.len(),
            report.unresolved.len(),
            report.errors.len()
        );
        Ok(report)
    }

    fn build_parser(&self) -> ReleaseParser {
        let publishers = load_name_list(&self.settings.publishers_file);
        let groups = load_name_list(&self.settings.release_groups_file);
        ReleaseParser::new(&self.settings, publishers, groups)
    }

    /// Archive files under one download folder, at any depth.
    fn collect_downloads(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(folder) {
            let entry = entry.with_context(|| format!("walking {:?}", folder))?;
            let path = entry.path();
            if entry.file_type().is_file() && self.is_archive(path) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    fn is_archive(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let dotted = format!(".{}", e.to_lowercase());
                self.settings
                    .archive_extensions
                    .iter()
                    .any(|known| known == &dotted)
            })
            .unwrap_or(false)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_file(
        &self,
        path: &Path,
        download_root: &Path,
        per_dir_counts: &HashMap<PathBuf, usize>,
        parser: &mut ReleaseParser,
        matcher: &mut SeriesMatcher,
        ctx: &mut MatchContext,
        report: &mut RunReport,
        affected_roots: &mut HashSet<PathBuf>,
        policy: ApplyPolicy,
    ) -> Result<()> {
        let Some(file_record) = FileRecord::from_path(path) else {
            debug!("Skipping non-UTF8 file name {:?}", path);
            return Ok(());
        };

        let parent = path.parent().unwrap_or(download_root);
        let folder_ctx = FolderContext {
            parent_name: parent
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_string()),
            parent_is_root: self.settings.is_configured_root(parent),
            files_in_folder: per_dir_counts.get(parent).copied(),
            in_download_root: parent == download_root,
        };

        let metadata = match self.collaborators.archive.metadata(path) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                debug!("No embedded metadata for {:?}: {}", path, err);
                None
            }
        };

        let record = parser.parse(&file_record, &folder_ctx, metadata.as_ref());
        report.processed += 1;
        debug!(
            "Parsed {:?}: series {:?}, {:?} {:?}",
            record.name, record.series_name, record.file_type, record.volume_number
        );

        let outcome =
            matcher.find_series_folder(&record, ctx, &self.settings, &self.collaborators, parser)?;
        let Some(target) = outcome.folder().map(|p| p.to_path_buf()) else {
            info!("No series folder for {:?}; leaving in place", record.name);
            report.unmatched.push(path.to_path_buf());
            return Ok(());
        };
        debug!("Matched {:?} to {:?} via {:?}", record.name, target, outcome);

        let existing = self.parse_folder(&target, parser);
        let resolved = resolver::resolve(existing, vec![record.clone()], &self.rules, policy)?;

        report.removed.extend(resolved.removed);
        for pair in resolved.unresolved {
            self.notify_tie(&pair);
            report.unresolved.push(pair);
        }

        for placed in resolved.upgraded {
            self.notify(
                EventKind::Upgrade,
                format!("Upgraded {}", placed.name),
                vec![
                    ("series".to_string(), placed.series_name.clone()),
                    ("folder".to_string(), target.display().to_string()),
                ],
                COLOR_UPGRADE,
            );
            report.upgrades.push((path.to_path_buf(), placed.path));
            self.mark_affected(&target, affected_roots);
        }

        for survivor in resolved.surviving_incoming {
            let dest = target.join(&survivor.name);
            if dest.exists() {
                // A same-named file that did not register as the same
                // release; placing on top of it would destroy data.
                warn!("Destination {:?} already exists; leaving {:?}", dest, path);
                report
                    .unresolved
                    .push((survivor.path.clone(), dest.clone()));
                continue;
            }
            if policy.moves {
                fs::rename(&survivor.path, &dest)
                    .with_context(|| format!("moving {:?} to {:?}", survivor.path, dest))?;
            }
            info!("Moved {:?} -> {:?}", survivor.path, dest);
            self.notify(
                EventKind::NewFile,
                format!("Added {}", survivor.name),
                vec![
                    ("series".to_string(), survivor.series_name.clone()),
                    ("folder".to_string(), target.display().to_string()),
                ],
                COLOR_NEW,
            );
            report.moved.push((survivor.path, dest));
            self.mark_affected(&target, affected_roots);
        }

        Ok(())
    }

    /// Parse every archive directly inside a series folder.
    fn parse_folder(&self, folder: &Path, parser: &mut ReleaseParser) -> Vec<crate::record::ReleaseRecord> {
        let folder_ctx = FolderContext {
            parent_name: folder
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_string()),
            parent_is_root: false,
            files_in_folder: None,
            in_download_root: false,
        };

        archive_files(folder, &self.settings.archive_extensions)
            .iter()
            .filter_map(|path| FileRecord::from_path(path))
            .map(|file| {
                let metadata = self.collaborators.archive.metadata(&file.path).ok();
                parser.parse(&file, &folder_ctx, metadata.as_ref())
            })
            .collect()
    }

    /// The library root containing `folder`, registered for a rescan at the
    /// end of the run.
    fn mark_affected(&self, folder: &Path, affected_roots: &mut HashSet<PathBuf>) {
        for root in &self.settings.library_dirs {
            if folder.starts_with(root) {
                affected_roots.insert(root.clone());
                return;
            }
        }
    }

    fn notify_tie(&self, pair: &(PathBuf, PathBuf)) {
        if self.settings.unattended {
            debug!("Unattended: skipping tie {:?} / {:?}", pair.0, pair.1);
            return;
        }
        self.notify(
            EventKind::Tie,
            "Manual decision needed".to_string(),
            vec![
                ("incoming".to_string(), pair.0.display().to_string()),
                ("existing".to_string(), pair.1.display().to_string()),
            ],
            COLOR_TIE,
        );
    }

    fn notify(&self, kind: EventKind, title: String, fields: Vec<(String, String)>, color: u32) {
        // Fire-and-forget: the notifier never gets to fail a run.
        self.collaborators.notifier.notify(&NotificationEvent {
            kind,
            title,
            fields,
            color,
        });
    }
}
