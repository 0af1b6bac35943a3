use anyhow::Result;
use std::fmt;
use std::path::Path;

/// Metadata embedded inside an archive (ComicInfo.xml / EPUB OPF). Filled
/// in by whatever archive backend is wired up; the core only consumes it.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedMetadata {
    pub publisher: Option<String>,
    /// ISBN / series-ID style identifiers; matched by exact containment.
    pub identifiers: Vec<String>,
}

/// Read-only access to an archive's contents. The core never touches zip or
/// rar internals; it asks this collaborator.
pub trait ArchiveReader {
    fn list_files(&self, archive: &Path) -> Result<Vec<String>>;
    fn read_entry(&self, archive: &Path, entry: &str) -> Result<Vec<u8>>;
    fn read_comment(&self, archive: &Path) -> Result<String>;
    fn metadata(&self, archive: &Path) -> Result<EmbeddedMetadata>;
}

/// Pulls a cover image out of an archive, or `None` when it has none the
/// extractor recognizes.
pub trait CoverExtractor {
    fn extract_cover(&self, archive: &Path) -> Result<Option<Vec<u8>>>;
}

/// Numeric image comparison (resize, grayscale, histogram-equalize,
/// structural similarity). Score in [0, 1]; the CALLING policy around it
/// lives in [`crate::similarity::cover_match`].
pub trait ImageComparator {
    fn similarity(&self, a: &[u8], b: &[u8]) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NewFile,
    Upgrade,
    Tie,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::NewFile => write!(f, "new-file"),
            EventKind::Upgrade => write!(f, "upgrade"),
            EventKind::Tie => write!(f, "tie"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub title: String,
    pub fields: Vec<(String, String)>,
    pub color: u32,
}

/// Fire-and-forget notification sink. The core never blocks on delivery and
/// never treats a failure here as fatal.
pub trait Notifier {
    fn notify(&self, event: &NotificationEvent);
}

/// Asks the media server (or whatever sits downstream) to rescan a library
/// root after a batch of moves.
pub trait ScanTrigger {
    fn request_scan(&self, library_root: &Path) -> Result<()>;
}

/// Everything the pipeline needs from the outside world, bundled so tests
/// can swap in fakes wholesale.
pub struct Collaborators {
    pub archive: Box<dyn ArchiveReader>,
    pub covers: Box<dyn CoverExtractor>,
    pub images: Box<dyn ImageComparator>,
    pub notifier: Box<dyn Notifier>,
    pub scanner: Box<dyn ScanTrigger>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Collaborators { .. }")
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            archive: Box::new(NoopArchiveReader),
            covers: Box::new(NoopCoverExtractor),
            images: Box::new(NoopImageComparator),
            notifier: Box::new(LogNotifier),
            scanner: Box::new(NoopScanTrigger),
        }
    }
}

/// Default stand-ins: no archive backend wired up means no identifier or
/// image tiers, which the matcher treats as "tier unavailable", not an
/// error.
pub struct NoopArchiveReader;

impl ArchiveReader for NoopArchiveReader {
    fn list_files(&self, _archive: &Path) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn read_entry(&self, _archive: &Path, _entry: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn read_comment(&self, _archive: &Path) -> Result<String> {
        Ok(String::new())
    }

    fn metadata(&self, _archive: &Path) -> Result<EmbeddedMetadata> {
        Ok(EmbeddedMetadata::default())
    }
}

pub struct NoopCoverExtractor;

impl CoverExtractor for NoopCoverExtractor {
    fn extract_cover(&self, _archive: &Path) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

pub struct NoopImageComparator;

impl ImageComparator for NoopImageComparator {
    fn similarity(&self, _a: &[u8], _b: &[u8]) -> f64 {
        0.0
    }
}

/// Logs events instead of delivering them anywhere.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &NotificationEvent) {
        log::info!("[{}] {}", event.kind, event.title);
        for (name, value) in &event.fields {
            log::debug!("  {}: {}", name, value);
        }
    }
}

pub struct NoopScanTrigger;

impl ScanTrigger for NoopScanTrigger {
    fn request_scan(&self, library_root: &Path) -> Result<()> {
        log::debug!("Scan requested for {:?} (no backend wired)", library_root);
        Ok(())
    }
}
