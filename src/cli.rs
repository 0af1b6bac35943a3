use crate::config::Settings;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "comic-organizer",
    about = "Sort downloaded comic and novel archives into a series-per-folder library",
    version = "0.1.0"
)]
pub struct Args {
    /// Download folders to process
    #[arg(
        value_name = "DOWNLOAD_DIR",
        help = "Download folders to process (adds to any configured in the settings file)"
    )]
    pub downloads: Vec<PathBuf>,

    /// Library roots, one series folder per series
    #[arg(
        long,
        short = 'l',
        value_name = "DIR",
        help = "Library root containing one folder per series (repeatable; adds to configured roots)"
    )]
    pub library: Vec<PathBuf>,

    /// Settings file
    #[arg(
        long,
        short = 'c',
        value_name = "FILE",
        help = "JSON settings file (thresholds, keyword rules, directories). Defaults apply when omitted"
    )]
    pub config: Option<PathBuf>,

    /// Only show what would be done, don't make changes
    #[arg(
        long,
        short = 'd',
        help = "Perform dry run: report moves, upgrades and deletions without applying them (Note: the path cache is still updated, even in dry-run mode)"
    )]
    pub dry_run: bool,

    /// Never delete files
    #[arg(
        long,
        help = "Report upgrade losers and duplicates without deleting them; moves and upgrades still happen"
    )]
    pub no_delete: bool,

    /// Deduplicate the library instead of processing downloads
    #[arg(
        long,
        help = "Scan every series folder for duplicate releases of the same volume/chapter and keep the best-ranked one"
    )]
    pub check_duplicates: bool,

    /// Path cache file
    #[arg(
        long,
        value_name = "FILE",
        help = "File persisting previously matched series folders between runs (default: matched_paths.txt)"
    )]
    pub cache_file: Option<PathBuf>,

    /// Known publisher names
    #[arg(
        long,
        value_name = "FILE",
        help = "Known publisher names, one per line, '#' comments allowed (default: publishers.txt)"
    )]
    pub publishers_file: Option<PathBuf>,

    /// Known release group names
    #[arg(
        long,
        value_name = "FILE",
        help = "Known release group names, one per line, '#' comments allowed (default: release_groups.txt)"
    )]
    pub release_groups_file: Option<PathBuf>,

    /// Skip equal-score ties instead of surfacing them
    #[arg(
        long,
        help = "Unattended mode: equal-score duplicates with different content are skipped quietly instead of being surfaced for a manual decision"
    )]
    pub unattended: bool,

    /// Output results in JSON format
    #[arg(
        long,
        help = "Output the run report in JSON format instead of human-readable text"
    )]
    pub json: bool,

    /// Verbose output
    #[arg(long, short = 'v', help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Args {
    /// Layer command-line values over loaded settings. Directories add to
    /// the configured ones; file paths and flags override.
    pub fn apply_to(&self, settings: &mut Settings) {
        for dir in &self.downloads {
            if !settings.download_dirs.contains(dir) {
                settings.download_dirs.push(dir.clone());
            }
        }
        for dir in &self.library {
            if !settings.library_dirs.contains(dir) {
                settings.library_dirs.push(dir.clone());
            }
        }
        if let Some(ref cache_file) = self.cache_file {
            settings.cache_file = cache_file.clone();
        }
        if let Some(ref publishers_file) = self.publishers_file {
            settings.publishers_file = publishers_file.clone();
        }
        if let Some(ref release_groups_file) = self.release_groups_file {
            settings.release_groups_file = release_groups_file.clone();
        }
        if self.unattended {
            settings.unattended = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_to_adds_directories() {
        let args = Args::parse_from([
            "comic-organizer",
            "/downloads",
            "--library",
            "/library",
        ]);

        let mut settings = Settings::default();
        settings.download_dirs = vec![PathBuf::from("/configured")];
        args.apply_to(&mut settings);

        assert_eq!(
            settings.download_dirs,
            vec![PathBuf::from("/configured"), PathBuf::from("/downloads")]
        );
        assert_eq!(settings.library_dirs, vec![PathBuf::from("/library")]);
    }

    #[test]
    fn test_apply_to_does_not_duplicate_directories() {
        let args = Args::parse_from(["comic-organizer", "/downloads"]);

        let mut settings = Settings::default();
        settings.download_dirs = vec![PathBuf::from("/downloads")];
        args.apply_to(&mut settings);

        assert_eq!(settings.download_dirs.len(), 1);
    }

    #[test]
    fn test_apply_to_overrides_files_and_flags() {
        let args = Args::parse_from([
            "comic-organizer",
            "--cache-file",
            "/tmp/cache.txt",
            "--unattended",
        ]);

        let mut settings = Settings::default();
        args.apply_to(&mut settings);

        assert_eq!(settings.cache_file, PathBuf::from("/tmp/cache.txt"));
        assert!(settings.unattended);
    }

    #[test]
    fn test_flags_default_off() {
        let args = Args::parse_from(["comic-organizer", "/downloads"]);
        assert!(!args.dry_run);
        assert!(!args.no_delete);
        assert!(!args.check_duplicates);
        assert!(!args.json);
        assert!(!args.unattended);
    }

    #[test]
    fn test_no_delete_flag_parses() {
        let args = Args::parse_from(["comic-organizer", "/downloads", "--no-delete"]);
        assert!(args.no_delete);
        assert!(!args.dry_run);
    }
}
