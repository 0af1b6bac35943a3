use crate::ranking::{decide_upgrade, KeywordRule, TieBreak};
use crate::record::ReleaseRecord;
use anyhow::Result;
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;

/// What the resolver did (or, in dry-run, would do) to a folder's releases.
#[derive(Debug, Default)]
pub struct ResolveReport {
    /// Existing records still present after resolution.
    pub surviving_existing: Vec<ReleaseRecord>,
    /// Incoming records with no existing counterpart; the caller still has
    /// to move these into the folder.
    pub surviving_incoming: Vec<ReleaseRecord>,
    /// Incoming records that won an upgrade and were already moved into the
    /// existing folder's location.
    pub upgraded: Vec<ReleaseRecord>,
    /// Files deleted (losers, absorbed volumes, content duplicates).
    pub removed: Vec<PathBuf>,
    /// Equal-score, different-content pairs left for a manual decision:
    /// (incoming path, existing path). Both files are still present.
    pub unresolved: Vec<(PathBuf, PathBuf)>,
}

/// Which filesystem effects a run may perform. Dry-run disables both;
/// no-delete keeps moves but only reports deletions. The report always
/// describes the full plan regardless of what was actually applied.
#[derive(Debug, Clone, Copy)]
pub struct ApplyPolicy {
    pub moves: bool,
    pub deletes: bool,
}

impl ApplyPolicy {
    pub const ALL: ApplyPolicy = ApplyPolicy {
        moves: true,
        deletes: true,
    };
    pub const NONE: ApplyPolicy = ApplyPolicy {
        moves: false,
        deletes: false,
    };

    pub fn new(dry_run: bool, no_delete: bool) -> Self {
        ApplyPolicy {
            moves: !dry_run,
            deletes: !dry_run && !no_delete,
        }
    }
}

/// Apply the upgrade decider across all same-index pairs between a folder's
/// existing releases and a batch of incoming ones. An incoming file fights
/// EVERY index-equal existing record, not just the first: a folder already
/// holding two copies of v05 loses both to a better v05.
///
/// Invariants: a winner always keeps the EXISTING folder's location (the
/// library layout is authoritative, the download location is not); a tie
/// with differing content never deletes anything.
pub fn resolve(
    existing: Vec<ReleaseRecord>,
    incoming: Vec<ReleaseRecord>,
    rules: &[KeywordRule],
    policy: ApplyPolicy,
) -> Result<ResolveReport> {
    let mut report = ResolveReport::default();
    let mut existing: Vec<Option<ReleaseRecord>> = existing.into_iter().map(Some).collect();

    for candidate in incoming {
        let opponent_idxs: Vec<usize> = existing
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.as_ref()
                    .map(|record| record.index_equal(&candidate))
                    .unwrap_or(false)
            })
            .map(|(idx, _)| idx)
            .collect();

        if opponent_idxs.is_empty() {
            // Nothing to compete with; the caller moves it in.
            report.surviving_incoming.push(candidate);
            continue;
        }

        let mut current = candidate;
        let mut placed = false;
        let mut alive = true;
        // Where the winner lands. Tracked separately from `current` so a
        // dry run keeps hashing the file where it actually still is.
        let mut planned_target: Option<PathBuf> = None;

        for idx in opponent_idxs {
            let Some(opponent) = existing[idx].clone() else {
                continue;
            };
            let decision = decide_upgrade(&current, &opponent, rules)?;

            if decision.is_upgrade {
                info!(
                    "Upgrade: {:?} ({:.1}) replaces {:?} ({:.1})",
                    current.name, decision.winner_score, opponent.name, decision.loser_score
                );
                if policy.deletes {
                    fs::remove_file(&opponent.path)?;
                }
                report.removed.push(opponent.path.clone());
                existing[idx] = None;

                if !placed {
                    let target = opponent.root.join(&current.name);
                    if policy.moves {
                        fs::rename(&current.path, &target)?;
                        current = current.with_path(&target);
                    }
                    planned_target = Some(target);
                    placed = true;
                }
                continue;
            }

            match decision.tie {
                Some(TieBreak::ContentDuplicate) => {
                    // Bit-identical: keeping either loses nothing, so the
                    // copy already in the library stays.
                    debug!(
                        "Content duplicate: dropping {:?} (identical to {:?})",
                        current.name, opponent.name
                    );
                    if policy.deletes {
                        fs::remove_file(&current.path)?;
                    }
                    report.removed.push(current.path.clone());
                    alive = false;
                    break;
                }
                Some(TieBreak::Unresolved) => {
                    // Equal score, different bytes: guessing wrong deletes
                    // content irreversibly, so don't guess. The remaining
                    // opponents still get their turn.
                    warn!(
                        "Unresolved tie between {:?} and {:?}; leaving both",
                        current.path, opponent.path
                    );
                    report
                        .unresolved
                        .push((current.path.clone(), opponent.path.clone()));
                }
                None => {
                    // Existing copy is strictly better; the download loses.
                    debug!(
                        "Keeping {:?} ({:.1}) over {:?} ({:.1})",
                        opponent.name, decision.winner_score, current.name, decision.loser_score
                    );
                    if policy.deletes {
                        fs::remove_file(&current.path)?;
                    }
                    report.removed.push(current.path.clone());
                    alive = false;
                    break;
                }
            }
        }

        if !(alive && placed) {
            // Either the candidate lost, or every pairing was an unresolved
            // tie; in both cases it stays out of the folder.
            continue;
        }

        // A multi-volume winner absorbs every existing single volume it
        // now covers (same part): a 3-in-1 omnibus supersedes its
        // neighbors, not just the ones it was compared against.
        if current.is_multi_volume {
            for slot in existing.iter_mut() {
                let absorb = slot
                    .as_ref()
                    .map(|record| {
                        record.index_equal(&current) && record.volume_part == current.volume_part
                    })
                    .unwrap_or(false);
                if absorb {
                    let absorbed = slot.take().unwrap();
                    info!(
                        "Absorbed {:?} into multi-volume {:?}",
                        absorbed.name, current.name
                    );
                    if policy.deletes {
                        fs::remove_file(&absorbed.path)?;
                    }
                    report.removed.push(absorbed.path);
                }
            }
        }

        // In a dry run the record is reported at its planned destination.
        let placed_record = match planned_target {
            Some(target) if !policy.moves => current.with_path(&target),
            _ => current,
        };
        report.upgraded.push(placed_record);
    }

    report.surviving_existing = existing.into_iter().flatten().collect();
    Ok(report)
}

/// Deduplicate releases already living together in one folder: every
/// index-equal pair fights, losers are removed, ties follow the same
/// never-guess policy as [`resolve`].
pub fn resolve_within(
    records: Vec<ReleaseRecord>,
    rules: &[KeywordRule],
    policy: ApplyPolicy,
) -> Result<ResolveReport> {
    let mut report = ResolveReport::default();
    let mut slots: Vec<Option<ReleaseRecord>> = records.into_iter().map(Some).collect();

    for i in 0..slots.len() {
        for j in (i + 1)..slots.len() {
            let (Some(a), Some(b)) = (slots[i].as_ref(), slots[j].as_ref()) else {
                continue;
            };
            if !a.index_equal(b) {
                continue;
            }

            let decision = decide_upgrade(b, a, rules)?;
            if decision.is_upgrade {
                let loser = slots[i].take().unwrap();
                info!("Duplicate check: {:?} loses to {:?}", loser.name, decision.winner.name);
                if policy.deletes {
                    fs::remove_file(&loser.path)?;
                }
                report.removed.push(loser.path);
            } else {
                match decision.tie {
                    Some(TieBreak::ContentDuplicate) => {
                        let loser = slots[j].take().unwrap();
                        debug!("Duplicate check: {:?} is content-identical", loser.name);
                        if policy.deletes {
                            fs::remove_file(&loser.path)?;
                        }
                        report.removed.push(loser.path);
                    }
                    Some(TieBreak::Unresolved) => {
                        report.unresolved.push((
                            slots[j].as_ref().unwrap().path.clone(),
                            slots[i].as_ref().unwrap().path.clone(),
                        ));
                    }
                    None => {
                        let loser = slots[j].take().unwrap();
                        info!(
                            "Duplicate check: {:?} loses to {:?}",
                            loser.name, decision.winner.name
                        );
                        if policy.deletes {
                            fs::remove_file(&loser.path)?;
                        }
                        report.removed.push(loser.path);
                    }
                }
            }
        }
    }

    report.surviving_existing = slots.into_iter().flatten().collect();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeywordRuleConfig;
    use crate::record::{FileType, Publisher, VolumeNumber};
    use std::path::Path;
    use tempfile::TempDir;

    fn rules() -> Vec<KeywordRule> {
        KeywordRule::compile(&[
            KeywordRuleConfig {
                pattern: r"(?i)\bpremium\b".to_string(),
                weight: 3.0,
                applies_to: None,
            },
            KeywordRuleConfig {
                pattern: r"(?i)\bgroupa\b".to_string(),
                weight: 2.0,
                applies_to: None,
            },
            KeywordRuleConfig {
                pattern: r"(?i)\bgroupb\b".to_string(),
                weight: 2.0,
                applies_to: None,
            },
        ])
        .unwrap()
    }

    fn record(path: &Path, number: VolumeNumber) -> ReleaseRecord {
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        ReleaseRecord {
            file_type: FileType::Volume,
            series_name: "Series".to_string(),
            shortened_series_name: "Series".to_string(),
            volume_number: number,
            volume_part: None,
            year: None,
            subtitle: None,
            publisher: Publisher::default(),
            release_group: None,
            extras: Vec::new(),
            is_premium: name.to_lowercase().contains("premium"),
            is_one_shot: false,
            is_multi_volume: number.is_range(),
            root: path.parent().unwrap().to_path_buf(),
            path: path.to_path_buf(),
            name,
            extension: ".cbz".to_string(),
        }
    }

    #[test]
    fn test_upgrade_replaces_loser_at_existing_location() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        let old_path = library.join("Series v05 [GroupB].cbz");
        let new_path = downloads.join("Series v05 [Premium][GroupA].cbz");
        fs::write(&old_path, "old bytes").unwrap();
        fs::write(&new_path, "new better bytes").unwrap();

        let existing = vec![record(&old_path, VolumeNumber::Whole(5))];
        let incoming = vec![record(&new_path, VolumeNumber::Whole(5))];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::ALL).unwrap();

        assert!(!old_path.exists(), "loser must be deleted");
        let placed = library.join("Series v05 [Premium][GroupA].cbz");
        assert!(placed.exists(), "winner must land in the existing folder");
        assert!(!new_path.exists());
        assert_eq!(report.removed, vec![old_path]);
        assert_eq!(report.upgraded.len(), 1);
        assert_eq!(report.upgraded[0].path, placed);
        assert!(report.surviving_incoming.is_empty());
    }

    #[test]
    fn test_losing_incoming_is_removed() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        let old_path = library.join("Series v05 [Premium][GroupA].cbz");
        let new_path = downloads.join("Series v05 [GroupB].cbz");
        fs::write(&old_path, "good bytes").unwrap();
        fs::write(&new_path, "worse bytes").unwrap();

        let existing = vec![record(&old_path, VolumeNumber::Whole(5))];
        let incoming = vec![record(&new_path, VolumeNumber::Whole(5))];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::ALL).unwrap();

        assert!(old_path.exists());
        assert!(!new_path.exists());
        assert_eq!(report.removed, vec![new_path]);
        assert_eq!(report.surviving_existing.len(), 1);
    }

    #[test]
    fn test_tie_with_different_content_leaves_both() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        let old_path = library.join("Series v05 [GroupA].cbz");
        let new_path = downloads.join("Series v05 [GroupB].cbz");
        fs::write(&old_path, "content alpha").unwrap();
        fs::write(&new_path, "content beta").unwrap();

        let existing = vec![record(&old_path, VolumeNumber::Whole(5))];
        let incoming = vec![record(&new_path, VolumeNumber::Whole(5))];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::ALL).unwrap();

        // No silent deletion on tie.
        assert!(old_path.exists());
        assert!(new_path.exists());
        assert!(report.removed.is_empty());
        assert_eq!(report.unresolved.len(), 1);
    }

    #[test]
    fn test_tie_with_identical_content_keeps_existing() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        let old_path = library.join("Series v05 [GroupA].cbz");
        let new_path = downloads.join("Series v05 [GroupB].cbz");
        fs::write(&old_path, "same bytes").unwrap();
        fs::write(&new_path, "same bytes").unwrap();

        let existing = vec![record(&old_path, VolumeNumber::Whole(5))];
        let incoming = vec![record(&new_path, VolumeNumber::Whole(5))];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::ALL).unwrap();

        assert!(old_path.exists());
        assert!(!new_path.exists());
        assert_eq!(report.removed, vec![new_path]);
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn test_multi_volume_winner_absorbs_covered_singles() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        let v1 = library.join("Series v01 [GroupB].cbz");
        let v2 = library.join("Series v02 [GroupB].cbz");
        let v3 = library.join("Series v03 [GroupB].cbz");
        let v9 = library.join("Series v09 [GroupB].cbz");
        let omnibus = downloads.join("Series v01-03 [Premium][GroupA].cbz");
        for path in [&v1, &v2, &v3, &v9] {
            fs::write(path, "single").unwrap();
        }
        fs::write(&omnibus, "omnibus").unwrap();

        let existing = vec![
            record(&v1, VolumeNumber::Whole(1)),
            record(&v2, VolumeNumber::Whole(2)),
            record(&v3, VolumeNumber::Whole(3)),
            record(&v9, VolumeNumber::Whole(9)),
        ];
        let incoming = vec![record(
            &omnibus,
            VolumeNumber::Range { low: 1.0, high: 3.0 },
        )];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::ALL).unwrap();

        assert!(!v1.exists());
        assert!(!v2.exists());
        assert!(!v3.exists());
        assert!(v9.exists(), "volume outside the range must survive");
        assert!(library.join("Series v01-03 [Premium][GroupA].cbz").exists());
        assert_eq!(report.removed.len(), 3);
        assert_eq!(report.surviving_existing.len(), 1);
    }

    #[test]
    fn test_incoming_beats_every_duplicate_of_its_index() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        // The folder already holds two copies of v05; both must lose.
        let dup_a = library.join("Series v05 [GroupA].cbz");
        let dup_b = library.join("Series v05 [GroupB].cbz");
        let new_path = downloads.join("Series v05 [Premium][GroupA].cbz");
        fs::write(&dup_a, "copy a").unwrap();
        fs::write(&dup_b, "copy b").unwrap();
        fs::write(&new_path, "better").unwrap();

        let existing = vec![
            record(&dup_a, VolumeNumber::Whole(5)),
            record(&dup_b, VolumeNumber::Whole(5)),
        ];
        let incoming = vec![record(&new_path, VolumeNumber::Whole(5))];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::ALL).unwrap();

        assert!(!dup_a.exists());
        assert!(!dup_b.exists());
        assert!(library.join("Series v05 [Premium][GroupA].cbz").exists());
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.upgraded.len(), 1);
        assert!(report.surviving_existing.is_empty());
    }

    #[test]
    fn test_no_delete_policy_reports_without_removing() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        let old_path = library.join("Series v05 [GroupB].cbz");
        let new_path = downloads.join("Series v05 [Premium][GroupA].cbz");
        fs::write(&old_path, "old").unwrap();
        fs::write(&new_path, "new").unwrap();

        let existing = vec![record(&old_path, VolumeNumber::Whole(5))];
        let incoming = vec![record(&new_path, VolumeNumber::Whole(5))];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::new(false, true)).unwrap();

        // The winner still moves in; the loser is reported but kept.
        assert!(old_path.exists());
        assert!(library.join("Series v05 [Premium][GroupA].cbz").exists());
        assert!(!new_path.exists());
        assert_eq!(report.removed, vec![old_path]);
        assert_eq!(report.upgraded.len(), 1);
    }

    #[test]
    fn test_incoming_without_counterpart_survives_unmoved() {
        let tmp = TempDir::new().unwrap();
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        let new_path = downloads.join("Series v07 [GroupA].cbz");
        fs::write(&new_path, "fresh").unwrap();

        let incoming = vec![record(&new_path, VolumeNumber::Whole(7))];
        let report = resolve(Vec::new(), incoming, &rules(), ApplyPolicy::ALL).unwrap();

        assert!(new_path.exists());
        assert_eq!(report.surviving_incoming.len(), 1);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&downloads).unwrap();

        let old_path = library.join("Series v05 [GroupB].cbz");
        let new_path = downloads.join("Series v05 [Premium][GroupA].cbz");
        fs::write(&old_path, "old").unwrap();
        fs::write(&new_path, "new").unwrap();

        let existing = vec![record(&old_path, VolumeNumber::Whole(5))];
        let incoming = vec![record(&new_path, VolumeNumber::Whole(5))];

        let report = resolve(existing, incoming, &rules(), ApplyPolicy::NONE).unwrap();

        assert!(old_path.exists());
        assert!(new_path.exists());
        // The report still describes the planned operations.
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.upgraded.len(), 1);
    }

    #[test]
    fn test_resolve_within_folder() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("Series");
        fs::create_dir_all(&library).unwrap();

        let good = library.join("Series v05 [Premium][GroupA].cbz");
        let bad = library.join("Series v05 [GroupB].cbz");
        let other = library.join("Series v06 [GroupB].cbz");
        fs::write(&good, "good").unwrap();
        fs::write(&bad, "bad").unwrap();
        fs::write(&other, "other").unwrap();

        let records = vec![
            record(&bad, VolumeNumber::Whole(5)),
            record(&good, VolumeNumber::Whole(5)),
            record(&other, VolumeNumber::Whole(6)),
        ];

        let report = resolve_within(records, &rules(), ApplyPolicy::ALL).unwrap();

        assert!(good.exists());
        assert!(!bad.exists());
        assert!(other.exists());
        assert_eq!(report.removed, vec![bad]);
        assert_eq!(report.surviving_existing.len(), 2);
    }
}
