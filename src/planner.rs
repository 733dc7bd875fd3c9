/*!
 * Planner (§4.3): composes the manifest reader, sequence detector, and
 * state store into an ordered, deduplicated job list.
 */

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::manifest::{self, ManifestScan};
use crate::model::{FileJob, Plan, PlanSummary};
use crate::sequence;
use crate::state::StateStore;

/// Build a plan from a pre-scanned manifest (either a delimited file or a
/// directory walk — the caller picks which via [`manifest::read_manifest`]
/// or [`manifest::walk_directory`]) plus the already-loaded completed-keys
/// set from the state store.
pub fn build_plan(scan: ManifestScan, config: &Config, completed: &HashSet<String>) -> Plan {
    let (archive_candidates, absorbed) = sequence::detect_sequences(&scan.by_directory, config);
    let absorbed: HashSet<PathBuf> = absorbed.into_iter().collect();

    let mut copy_jobs: Vec<FileJob> = Vec::new();
    for (dir, entries) in &scan.by_directory {
        for (filename, size) in entries {
            let abs = dir.join(filename);
            if absorbed.contains(&abs) {
                continue;
            }
            copy_jobs.push(FileJob { key: abs, size: *size });
        }
    }

    let mut resumed_skipped = 0usize;

    copy_jobs.retain(|job| {
        let keep = !completed.contains(&job.key.to_string_lossy().to_string());
        if !keep {
            resumed_skipped += 1;
        }
        keep
    });

    let mut archive_jobs = archive_candidates;
    archive_jobs.retain(|job| {
        let keep = !completed.contains(&job.key.to_string_lossy().to_string());
        if !keep {
            resumed_skipped += 1;
        }
        keep
    });

    copy_jobs.sort_by(|a, b| b.size.cmp(&a.size));
    archive_jobs.sort_by(|a, b| b.size.cmp(&a.size));

    let copy_size: u64 = copy_jobs.iter().map(|j| j.size).sum();
    let archive_size: u64 = archive_jobs.iter().map(|j| j.size).sum();

    let summary = PlanSummary {
        total_lines: scan.total_lines,
        ignored_dirs: scan.ignored_dirs,
        malformed_count: scan.malformed.len(),
        found_files: scan.found_files(),
        copy_count: copy_jobs.len(),
        copy_size,
        archive_count: archive_jobs.len(),
        archive_size,
        resumed_skipped,
    };

    Plan { copy_jobs, archive_jobs, summary }
}

/// Read a manifest or walk a source directory and produce a plan, loading
/// completed keys from the configured state file along the way.
pub fn plan_from_manifest(
    manifest_path: &Path,
    config: &Config,
    state: &StateStore,
) -> crate::error::Result<Plan> {
    let scan = manifest::read_manifest(manifest_path, config.source_root.as_deref(), ';')?;
    let completed = state.load_completed_keys()?;
    Ok(build_plan(scan, config, &completed))
}

pub fn plan_from_directory(
    source_dir: &Path,
    config: &Config,
    state: &StateStore,
) -> crate::error::Result<Plan> {
    let scan = manifest::walk_directory(source_dir)?;
    let completed = state.load_completed_keys()?;
    Ok(build_plan(scan, config, &completed))
}
