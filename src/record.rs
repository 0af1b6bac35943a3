use std::fmt;
use std::path::{Path, PathBuf};

/// Whether a release is a full volume or a serialized chapter. The two kinds
/// never match each other: a chapter's index is meaningless against a
/// volume's and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Volume,
    Chapter,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Volume => write!(f, "volume"),
            FileType::Chapter => write!(f, "chapter"),
        }
    }
}

/// The parsed volume/chapter number. `Absent` is an explicit state, never a
/// zero default: downstream logic must check for it and skip, not assume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeNumber {
    Absent,
    Whole(i64),
    Decimal(f64),
    /// Inclusive on both ends. A comma/hyphen-separated list collapses to
    /// its endpoints (interior values discarded).
    Range { low: f64, high: f64 },
}

impl VolumeNumber {
    /// Coerce a raw float: whole values become `Whole`, the rest `Decimal`.
    pub fn from_f64(value: f64) -> Self {
        if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            VolumeNumber::Whole(value as i64)
        } else {
            VolumeNumber::Decimal(value)
        }
    }

    /// Collapse a list of numbers to an endpoint range. A single number is a
    /// scalar, not a degenerate range.
    pub fn from_numbers(numbers: &[f64]) -> Self {
        match numbers {
            [] => VolumeNumber::Absent,
            [single] => VolumeNumber::from_f64(*single),
            _ => {
                let low = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
                let high = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                if low == high {
                    VolumeNumber::from_f64(low)
                } else {
                    VolumeNumber::Range { low, high }
                }
            }
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, VolumeNumber::Absent)
    }

    pub fn is_range(&self) -> bool {
        matches!(self, VolumeNumber::Range { .. })
    }

    pub fn low(&self) -> Option<f64> {
        match self {
            VolumeNumber::Absent => None,
            VolumeNumber::Whole(n) => Some(*n as f64),
            VolumeNumber::Decimal(n) => Some(*n),
            VolumeNumber::Range { low, .. } => Some(*low),
        }
    }

    pub fn high(&self) -> Option<f64> {
        match self {
            VolumeNumber::Absent => None,
            VolumeNumber::Whole(n) => Some(*n as f64),
            VolumeNumber::Decimal(n) => Some(*n),
            VolumeNumber::Range { high, .. } => Some(*high),
        }
    }

    /// True if `value` falls inside this number (equality for scalars,
    /// inclusive containment for ranges).
    pub fn contains(&self, value: f64) -> bool {
        match self {
            VolumeNumber::Absent => false,
            VolumeNumber::Whole(n) => (*n as f64) == value,
            VolumeNumber::Decimal(n) => *n == value,
            VolumeNumber::Range { low, high } => value >= *low && value <= *high,
        }
    }

    /// The "allow array match" rule: a scalar equals a range when it falls
    /// inside it; two ranges match when they overlap. Absent never matches
    /// anything, including another Absent.
    pub fn overlaps(&self, other: &VolumeNumber) -> bool {
        match (self.low(), self.high(), other.low(), other.high()) {
            (Some(a_lo), Some(a_hi), Some(b_lo), Some(b_hi)) => {
                a_lo <= b_hi && b_lo <= a_hi
            }
            _ => false,
        }
    }
}

impl fmt::Display for VolumeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeNumber::Absent => write!(f, "-"),
            VolumeNumber::Whole(n) => write!(f, "{}", n),
            VolumeNumber::Decimal(n) => write!(f, "{}", n),
            VolumeNumber::Range { low, high } => write!(f, "{}-{}", low, high),
        }
    }
}

/// Publisher can come from the filename brackets or from embedded archive
/// metadata (ComicInfo.xml / OPF); metadata wins when both are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publisher {
    pub from_metadata: Option<String>,
    pub from_filename: Option<String>,
}

impl Publisher {
    pub fn effective(&self) -> Option<&str> {
        self.from_metadata
            .as_deref()
            .or(self.from_filename.as_deref())
    }
}

/// Raw filesystem identity of a file before parsing. The builder
/// [`crate::parser::ReleaseParser::parse`] upgrades this into a
/// [`ReleaseRecord`]; the upgrade produces a new value, never a mutation.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub root: PathBuf,
    pub name: String,
    pub extension: String,
}

impl FileRecord {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        let root = path.parent().unwrap_or(Path::new("")).to_path_buf();
        Some(FileRecord {
            path: path.to_path_buf(),
            root,
            name,
            extension,
        })
    }

    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        if !self.extension.is_empty() && self.name.to_lowercase().ends_with(&self.extension) {
            &self.name[..self.name.len() - self.extension.len()]
        } else {
            &self.name
        }
    }
}

/// One fully parsed release. Immutable once built: a rename or move produces
/// a NEW record via [`ReleaseRecord::with_path`], which is what keeps stale
/// paths from leaking into later comparisons.
#[derive(Debug, Clone)]
pub struct ReleaseRecord {
    pub file_type: FileType,
    pub series_name: String,
    /// Portion of the series name before a title-subtitle separator.
    pub shortened_series_name: String,
    pub volume_number: VolumeNumber,
    /// Sub-unit of a single volume ("Part 2" of volume 8).
    pub volume_part: Option<f64>,
    pub year: Option<u16>,
    pub subtitle: Option<String>,
    pub publisher: Publisher,
    pub release_group: Option<String>,
    /// Leftover bracketed tokens in original order, kept for filename
    /// reconstruction.
    pub extras: Vec<String>,
    pub is_premium: bool,
    pub is_one_shot: bool,
    pub is_multi_volume: bool,
    // Filesystem identity.
    pub path: PathBuf,
    pub root: PathBuf,
    pub name: String,
    pub extension: String,
}

impl ReleaseRecord {
    /// Canonical sort/match key. For ranges this is the whole range: a
    /// scalar that falls anywhere inside it is index-equal.
    pub fn index_number(&self) -> &VolumeNumber {
        &self.volume_number
    }

    /// Two records describe the same logical unit iff their file type
    /// matches, their index numbers overlap, and their extension matches.
    pub fn index_equal(&self, other: &ReleaseRecord) -> bool {
        self.file_type == other.file_type
            && self.extension == other.extension
            && self.volume_number.overlaps(&other.volume_number)
    }

    /// Rebuild the record for a moved/renamed file. Everything derived from
    /// the name carries over; only the filesystem identity changes.
    pub fn with_path(&self, new_path: &Path) -> ReleaseRecord {
        let mut record = self.clone();
        record.name = new_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.name)
            .to_string();
        record.extension = new_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_else(|| self.extension.clone());
        record.root = new_path
            .parent()
            .unwrap_or(Path::new(""))
            .to_path_buf();
        record.path = new_path.to_path_buf();
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(
        file_type: FileType,
        number: VolumeNumber,
        extension: &str,
    ) -> ReleaseRecord {
        ReleaseRecord {
            file_type,
            series_name: "Test Series".to_string(),
            shortened_series_name: "Test Series".to_string(),
            volume_number: number,
            volume_part: None,
            year: None,
            subtitle: None,
            publisher: Publisher::default(),
            release_group: None,
            extras: Vec::new(),
            is_premium: false,
            is_one_shot: false,
            is_multi_volume: number.is_range(),
            path: PathBuf::from("/downloads/test.cbz"),
            root: PathBuf::from("/downloads"),
            name: "test.cbz".to_string(),
            extension: extension.to_string(),
        }
    }

    #[test]
    fn test_from_f64_coercion() {
        assert_eq!(VolumeNumber::from_f64(5.0), VolumeNumber::Whole(5));
        assert_eq!(VolumeNumber::from_f64(5.5), VolumeNumber::Decimal(5.5));
    }

    #[test]
    fn test_from_numbers_collapses_to_endpoints() {
        let n = VolumeNumber::from_numbers(&[1.0, 2.0, 3.0, 5.0]);
        assert_eq!(n, VolumeNumber::Range { low: 1.0, high: 5.0 });
    }

    #[test]
    fn test_from_numbers_single_is_scalar() {
        assert_eq!(VolumeNumber::from_numbers(&[7.0]), VolumeNumber::Whole(7));
    }

    #[test]
    fn test_from_numbers_equal_endpoints_is_scalar() {
        assert_eq!(
            VolumeNumber::from_numbers(&[4.0, 4.0]),
            VolumeNumber::Whole(4)
        );
    }

    #[test]
    fn test_scalar_inside_range_overlaps() {
        let range = VolumeNumber::Range { low: 1.0, high: 12.0 };
        assert!(range.overlaps(&VolumeNumber::Whole(3)));
        assert!(VolumeNumber::Whole(3).overlaps(&range));
        assert!(!range.overlaps(&VolumeNumber::Whole(13)));
    }

    #[test]
    fn test_absent_never_overlaps() {
        assert!(!VolumeNumber::Absent.overlaps(&VolumeNumber::Absent));
        assert!(!VolumeNumber::Absent.overlaps(&VolumeNumber::Whole(1)));
        assert!(!VolumeNumber::Whole(1).overlaps(&VolumeNumber::Absent));
    }

    #[test]
    fn test_index_equal_requires_same_file_type() {
        let volume = record_with(FileType::Volume, VolumeNumber::Whole(5), ".cbz");
        let chapter = record_with(FileType::Chapter, VolumeNumber::Whole(5), ".cbz");
        assert!(!volume.index_equal(&chapter));
    }

    #[test]
    fn test_index_equal_requires_same_extension() {
        let cbz = record_with(FileType::Volume, VolumeNumber::Whole(5), ".cbz");
        let epub = record_with(FileType::Volume, VolumeNumber::Whole(5), ".epub");
        assert!(!cbz.index_equal(&epub));
    }

    #[test]
    fn test_index_equal_with_range_overlap() {
        let omnibus = record_with(
            FileType::Volume,
            VolumeNumber::Range { low: 4.0, high: 6.0 },
            ".cbz",
        );
        let single = record_with(FileType::Volume, VolumeNumber::Whole(5), ".cbz");
        assert!(omnibus.index_equal(&single));
    }

    #[test]
    fn test_with_path_produces_new_record() {
        let record = record_with(FileType::Volume, VolumeNumber::Whole(1), ".cbz");
        let moved = record.with_path(Path::new("/library/Test Series/test.cbz"));
        assert_eq!(moved.root, PathBuf::from("/library/Test Series"));
        assert_eq!(moved.series_name, record.series_name);
        // Original untouched.
        assert_eq!(record.root, PathBuf::from("/downloads"));
    }

    #[test]
    fn test_publisher_metadata_wins() {
        let publisher = Publisher {
            from_metadata: Some("Kodansha".to_string()),
            from_filename: Some("Viz".to_string()),
        };
        assert_eq!(publisher.effective(), Some("Kodansha"));
    }

    #[test]
    fn test_file_record_stem() {
        let record = FileRecord::from_path(Path::new("/d/Series v01.CBZ")).unwrap();
        assert_eq!(record.extension, ".cbz");
        assert_eq!(record.stem(), "Series v01");
    }
}
