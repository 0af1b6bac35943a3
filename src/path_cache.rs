use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Ordered list of previously matched library folders, most recent first.
/// Checking these before walking every library root is what keeps a large
/// library fast: active series get matched again and again, so their
/// folders stay at the front.
///
/// Persistence is an append-only text file (one absolute path per line,
/// oldest first): `promote` appends, so the LAST occurrence of a path is
/// its most recent promotion. `load` dedupes accordingly and `save`
/// compacts the log back to that order at the end of a batch run.
#[derive(Debug)]
pub struct PathCache {
    entries: Vec<PathBuf>,
    file: PathBuf,
}

impl PathCache {
    /// Load the cache file. The log is read newest-line-first so a path's
    /// LAST occurrence (its most recent promotion) decides its position;
    /// lines pointing at directories that no longer exist are dropped. A
    /// missing file is an empty cache.
    pub fn load(file: &Path) -> Self {
        let mut entries: Vec<PathBuf> = Vec::new();

        match fs::read_to_string(file) {
            Ok(raw) => {
                for line in raw.lines().rev() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let path = PathBuf::from(line);
                    if !path.is_dir() {
                        debug!("Dropping stale cache entry {:?}", path);
                        continue;
                    }
                    if !entries.contains(&path) {
                        entries.push(path);
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Could not read path cache {:?}: {}", file, err),
        }

        debug!("Loaded {} cached paths from {:?}", entries.len(), file);
        PathCache {
            entries,
            file: file.to_path_buf(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry == path)
    }

    /// Record a successful match: the path moves to the front of the
    /// in-memory order and is appended to the persistence log. Next run's
    /// load dedupes, keeping the last-appended occurrence, so the new
    /// position survives even if the run dies before `save` compacts.
    pub fn promote(&mut self, path: &Path) {
        if let Some(pos) = self.entries.iter().position(|entry| entry == path) {
            let entry = self.entries.remove(pos);
            self.entries.insert(0, entry);
        } else {
            self.entries.insert(0, path.to_path_buf());
        }

        if let Err(err) = self.append_to_log(path) {
            // Persistence failure must not abort a run; the in-memory order
            // is still correct for the rest of this batch.
            warn!("Could not append to path cache {:?}: {}", self.file, err);
        }
    }

    fn append_to_log(&self, path: &Path) -> Result<()> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)
            .with_context(|| format!("opening path cache {:?}", self.file))?;
        writeln!(log, "{}", path.display())?;
        Ok(())
    }

    /// Compact the log to the current in-memory order, written oldest
    /// first so later `promote` appends stay the newest lines. Called once
    /// at the end of a batch run.
    pub fn save(&self) -> Result<()> {
        let mut body = String::new();
        for entry in self.entries.iter().rev() {
            body.push_str(&entry.display().to_string());
            body.push('\n');
        }
        fs::write(&self.file, body)
            .with_context(|| format!("writing path cache {:?}", self.file))?;
        debug!("Saved {} cached paths to {:?}", self.entries.len(), self.file);
        Ok(())
    }

    /// Iterate entries reordered for one query: paths whose folder name
    /// shares a multi-word prefix with the query come first, everything
    /// else keeps its recency order behind them.
    pub fn reordered_for(&self, query_words: &[&str]) -> Vec<&PathBuf> {
        let mut preferred: Vec<&PathBuf> = Vec::new();
        let mut rest: Vec<&PathBuf> = Vec::new();

        for entry in &self.entries {
            if shares_word_prefix(entry, query_words) {
                preferred.push(entry);
            } else {
                rest.push(entry);
            }
        }

        preferred.extend(rest);
        preferred
    }

    /// Plain recency order.
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter()
    }
}

/// A folder is "likely" for a query when the first two words of its name
/// match the query's first two words (case-insensitive). One shared word
/// is too weak ("The ...", "One ..."), two is a strong prior. Shared with
/// the matcher, which uses the same heuristic to order its library scan.
pub(crate) fn shares_word_prefix(path: &Path, query_words: &[&str]) -> bool {
    if query_words.len() < 2 {
        return false;
    }
    let basename = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_lowercase(),
        None => return false,
    };
    let folder_words: Vec<&str> = basename.split_whitespace().collect();
    if folder_words.len() < 2 {
        return false;
    }
    folder_words[0] == query_words[0].to_lowercase()
        && folder_words[1] == query_words[1].to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_dirs(tmp: &TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let dir = tmp.path().join(name);
                fs::create_dir_all(&dir).unwrap();
                dir
            })
            .collect()
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = PathCache::load(&tmp.path().join("cache.txt"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_dedupes_and_drops_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let dirs = make_dirs(&tmp, &["One Piece", "Berserk"]);
        let cache_file = tmp.path().join("cache.txt");
        let gone = tmp.path().join("Deleted Series");
        fs::write(
            &cache_file,
            format!(
                "{}\n{}\n{}\n{}\n",
                dirs[0].display(),
                gone.display(),
                dirs[1].display(),
                dirs[0].display()
            ),
        )
        .unwrap();

        let cache = PathCache::load(&cache_file);
        assert_eq!(cache.len(), 2);
        let order: Vec<&PathBuf> = cache.iter().collect();
        assert_eq!(order[0], &dirs[0]);
        assert_eq!(order[1], &dirs[1]);
    }

    #[test]
    fn test_promote_moves_to_front_and_persists() {
        let tmp = TempDir::new().unwrap();
        let dirs = make_dirs(&tmp, &["One Piece", "Berserk", "Naruto"]);
        let cache_file = tmp.path().join("cache.txt");
        let mut cache = PathCache::load(&cache_file);
        for dir in &dirs {
            cache.promote(dir);
        }
        // Most recent promotion first.
        let order: Vec<&PathBuf> = cache.iter().collect();
        assert_eq!(order[0], &dirs[2]);

        cache.promote(&dirs[0]);
        let order: Vec<&PathBuf> = cache.iter().collect();
        assert_eq!(order[0], &dirs[0]);
        assert_eq!(cache.len(), 3);

        // Reload sees the same order after save() compacts the log.
        cache.save().unwrap();
        let reloaded = PathCache::load(&cache_file);
        let order: Vec<&PathBuf> = reloaded.iter().collect();
        assert_eq!(order[0], &dirs[0]);
        assert_eq!(reloaded.len(), 3);
    }

    #[test]
    fn test_uncompacted_log_keeps_latest_promotion_order() {
        let tmp = TempDir::new().unwrap();
        let dirs = make_dirs(&tmp, &["Akira", "Berserk"]);
        let cache_file = tmp.path().join("cache.txt");

        // The appended-only shape promote() leaves behind when a run never
        // reaches save(): Berserk's second promotion is the newest line.
        fs::write(
            &cache_file,
            format!(
                "{}\n{}\n{}\n",
                dirs[0].display(),
                dirs[1].display(),
                dirs[1].display()
            ),
        )
        .unwrap();

        let mut cache = PathCache::load(&cache_file);
        assert_eq!(cache.len(), 2);
        let order: Vec<&PathBuf> = cache.iter().collect();
        assert_eq!(order[0], &dirs[1], "most recent append must win the dedupe");
        assert_eq!(order[1], &dirs[0]);

        // A further promote, still without save(), round-trips the same way.
        cache.promote(&dirs[0]);
        let reloaded = PathCache::load(&cache_file);
        assert_eq!(reloaded.iter().next(), Some(&dirs[0]));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_reordered_for_prefers_shared_prefix() {
        let tmp = TempDir::new().unwrap();
        let dirs = make_dirs(&tmp, &["Berserk Deluxe", "One Piece", "Naruto Shippuden"]);
        let cache_file = tmp.path().join("cache.txt");
        let mut cache = PathCache::load(&cache_file);
        for dir in &dirs {
            cache.promote(dir);
        }

        let reordered = cache.reordered_for(&["one", "piece"]);
        assert_eq!(reordered[0], &dirs[1]);
        assert_eq!(reordered.len(), 3);
    }

    #[test]
    fn test_reordered_single_word_query_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let dirs = make_dirs(&tmp, &["One Piece", "Berserk Deluxe"]);
        let cache_file = tmp.path().join("cache.txt");
        let mut cache = PathCache::load(&cache_file);
        cache.promote(&dirs[0]);
        cache.promote(&dirs[1]);

        let reordered = cache.reordered_for(&["berserk"]);
        // Single-word prefix is too weak to reorder on.
        assert_eq!(reordered[0], &dirs[1]);
    }
}
