use crate::pipeline::RunReport;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveOperation {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnresolvedPair {
    pub incoming: String,
    pub existing: String,
}

/// Machine-readable run report. Every list is sorted so output is
/// deterministic and diffable across runs.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunOutput {
    pub processed: usize,
    pub moved: Vec<MoveOperation>,
    pub upgrades: Vec<MoveOperation>,
    pub removed: Vec<String>,
    pub unresolved: Vec<UnresolvedPair>,
    pub unmatched: Vec<String>,
    pub errors: Vec<String>,
}

impl RunOutput {
    pub fn from_report(report: &RunReport) -> Self {
        let to_moves = |pairs: &[(PathBuf, PathBuf)]| {
            let mut moves: Vec<MoveOperation> = pairs
                .iter()
                .map(|(from, to)| MoveOperation {
                    from: from.display().to_string(),
                    to: to.display().to_string(),
                })
                .collect();
            moves.sort_by(|a, b| a.from.cmp(&b.from));
            moves
        };

        let mut removed: Vec<String> = report
            .removed
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        removed.sort();

        let mut unresolved: Vec<UnresolvedPair> = report
            .unresolved
            .iter()
            .map(|(incoming, existing)| UnresolvedPair {
                incoming: incoming.display().to_string(),
                existing: existing.display().to_string(),
            })
            .collect();
        unresolved.sort_by(|a, b| a.incoming.cmp(&b.incoming));

        let mut unmatched: Vec<String> = report
            .unmatched
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        unmatched.sort();

        let mut errors = report.errors.clone();
        errors.sort();

        RunOutput {
            processed: report.processed,
            moved: to_moves(&report.moved),
            upgrades: to_moves(&report.upgrades),
            removed,
            unresolved,
            unmatched,
            errors,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
