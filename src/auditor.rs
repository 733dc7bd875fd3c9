/*!
 * Auditor (§4.9): five independent post-hoc operations on existing logs.
 */

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{CopeerError, Result};
use crate::manifest::normalize_path;
use crate::state::StateStore;

/// §6: normalized directory key used for cross-machine comparison. If the
/// path begins with `/mnt/<vol>/…`, drop the first three components and
/// keep the next four; otherwise keep the last four components.
pub fn normalize_directory_path(path: &Path) -> PathBuf {
    let parts: Vec<String> = path.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();

    if parts.len() > 3 && parts[0] == "/" && parts.get(1).map(|s| s.as_str()) == Some("mnt") {
        let relevant: Vec<&String> = parts.iter().skip(3).take(4).collect();
        return relevant.iter().collect();
    }

    let tail_start = parts.len().saturating_sub(4);
    parts[tail_start..].iter().collect()
}

/// Exact rule from the original tool: index manifest relative paths by
/// basename; for each state-file absolute path, if its basename matches an
/// indexed relative path and the absolute path ends with that relative
/// path (after stripping a leading `./`), the root is the absolute path
/// with that suffix and any trailing separator removed.
pub fn find_source_root(state_paths: &HashSet<String>, manifest_rel_paths: &[String]) -> Option<String> {
    if state_paths.is_empty() || manifest_rel_paths.is_empty() {
        return None;
    }

    let mut by_basename: HashMap<String, &String> = HashMap::new();
    for rel in manifest_rel_paths {
        if let Some(name) = Path::new(rel).file_name() {
            by_basename.insert(name.to_string_lossy().to_string(), rel);
        }
    }

    for abs_path in state_paths {
        let basename = Path::new(abs_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some(rel) = by_basename.get(&basename) {
            let rel_clean = rel.trim_start_matches("./");
            if abs_path.ends_with(rel_clean) {
                let end_index = abs_path.len() - rel_clean.len();
                let root = &abs_path[..end_index];
                return Some(root.trim_end_matches('/').to_string());
            }
        }
    }
    None
}

/// Operation 1: union the rows of many mapping files into a master file;
/// returns per-input row counts and the merged row set.
pub struct MergeReport {
    pub per_file_counts: Vec<(PathBuf, usize)>,
    pub merged: Vec<(String, String)>,
}

pub fn merge_mappings(paths: &[PathBuf]) -> Result<MergeReport> {
    let mut all: HashSet<(String, String)> = HashSet::new();
    let mut per_file_counts = Vec::new();

    for path in paths {
        let rows = StateStore::read_mapping(path)?;
        per_file_counts.push((path.clone(), rows.len()));
        all.extend(rows);
    }

    let mut merged: Vec<(String, String)> = all.into_iter().collect();
    merged.sort();

    Ok(MergeReport { per_file_counts, merged })
}

/// Operation 2: auto-detect `source_root`, compute `intended - processed`,
/// and describe which manifest rows are missing.
pub struct AnalyzeReport {
    pub detected_source_root: Option<String>,
    pub total_intended: usize,
    pub missing: Vec<PathBuf>,
}

pub fn analyze(
    manifest_rel_paths: &[String],
    processed_abs: &HashSet<String>,
) -> AnalyzeReport {
    let detected_source_root = find_source_root(processed_abs, manifest_rel_paths);
    let root = detected_source_root.clone().unwrap_or_default();

    let intended: HashSet<PathBuf> = manifest_rel_paths
        .iter()
        .map(|p| {
            let rel = p.trim_start_matches("./");
            normalize_path(&PathBuf::from(&root).join(rel))
        })
        .collect();

    let mut missing: Vec<PathBuf> = intended
        .into_iter()
        .filter(|p| !processed_abs.contains(&p.to_string_lossy().to_string()))
        .collect();
    missing.sort();

    AnalyzeReport {
        total_intended: manifest_rel_paths.len(),
        missing,
        detected_source_root,
    }
}

/// Operation 3: verify destinations exist on disk.
pub struct VerifyReport {
    pub total: usize,
    pub missing: Vec<String>,
}

pub fn verify(mapping_path: &Path) -> Result<VerifyReport> {
    let rows = StateStore::read_mapping(mapping_path)?;
    let dests: HashSet<String> = rows.into_iter().map(|(_, dest)| dest).collect();
    let total = dests.len();
    let mut missing: Vec<String> = dests.into_iter().filter(|d| !Path::new(d).exists()).collect();
    missing.sort();
    Ok(VerifyReport { total, missing })
}

/// Operation 4: group a mapping file by normalized directory key.
pub struct DirStats {
    pub in_source: bool,
    pub destinations: HashMap<String, Vec<String>>,
}

pub fn stats(mapping_path: &Path) -> Result<HashMap<String, DirStats>> {
    let rows = StateStore::read_mapping(mapping_path)?;
    let mut out: HashMap<String, DirStats> = HashMap::new();

    for (source, _) in &rows {
        let dir = Path::new(source).parent().unwrap_or_else(|| Path::new(""));
        let key = normalize_directory_path(dir).to_string_lossy().to_string();
        out.entry(key).or_insert_with(|| DirStats { in_source: false, destinations: HashMap::new() }).in_source = true;
    }

    for (_, dest) in &rows {
        let dir = Path::new(dest).parent().unwrap_or_else(|| Path::new(""));
        let key = normalize_directory_path(dir).to_string_lossy().to_string();
        let parts: Vec<String> = Path::new(dest).components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
        let disk = if parts.len() > 2 && parts[1] == "mnt" {
            format!("/{}/{}", parts[1], parts[2])
        } else {
            "unknown".to_string()
        };
        let entry = out.entry(key).or_insert_with(|| DirStats { in_source: false, destinations: HashMap::new() });
        entry.destinations.entry(disk).or_default().push(dest.clone());
    }

    Ok(out)
}

/// Normalize a mapping-file source path for plan comparison: strip to the
/// path components after `/mnt/<vol>/` (the generalized, `/mnt`-based rule;
/// see §6).
pub fn normalize_source_path_for_comparison(source_path: &str) -> String {
    let parts: Vec<String> = Path::new(source_path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.len() > 2 && parts[0] == "/" && parts[1] == "mnt" {
        let rel: Vec<&String> = parts.iter().skip(3).collect();
        if !rel.is_empty() {
            return rel.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("/");
        }
    }
    source_path.to_string()
}

/// Operation 5: intersect a mapping file with a plan manifest, comparing
/// normalized source paths.
pub struct FilterReport {
    pub total_in_plan: usize,
    pub matched: Vec<String>,
    pub missing_from_mapping: Vec<String>,
}

pub fn filter_plan_against_mapping(plan_keys: &[String], mapping_path: &Path) -> Result<FilterReport> {
    let rows = StateStore::read_mapping(mapping_path)?;
    let normalized_mapped: HashSet<String> = rows
        .into_iter()
        .map(|(source, _)| normalize_source_path_for_comparison(&source))
        .collect();

    let plan_set: HashSet<&String> = plan_keys.iter().collect();
    let mut matched: Vec<String> = plan_set.iter().filter(|k| normalized_mapped.contains(k.as_str())).map(|s| s.to_string()).collect();
    let mut missing_from_mapping: Vec<String> = plan_set.iter().filter(|k| !normalized_mapped.contains(k.as_str())).map(|s| s.to_string()).collect();
    matched.sort();
    missing_from_mapping.sort();

    Ok(FilterReport { total_in_plan: plan_keys.len(), matched, missing_from_mapping })
}

pub fn load_processed_keys(state_file: &Path) -> Result<HashSet<String>> {
    if !state_file.exists() {
        return Err(CopeerError::Input(format!("state file not found: {}", state_file.display())));
    }
    StateStore::new(state_file.to_path_buf(), PathBuf::new(), PathBuf::new(), false).load_completed_keys()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_directory_path_handles_mnt_root() {
        let p = Path::new("/mnt/cifs/raidix/project/shot/seq/v1");
        assert_eq!(
            normalize_directory_path(p).to_string_lossy(),
            "raidix/project/shot/seq"
        );
    }

    #[test]
    fn normalize_directory_path_falls_back_to_last_four() {
        let p = Path::new("/home/user/a/b/c/d");
        assert_eq!(normalize_directory_path(p).to_string_lossy(), "a/b/c/d");
    }

    #[test]
    fn find_source_root_matches_basename_suffix() {
        let mut state = HashSet::new();
        state.insert("/src/project/shot/a.mov".to_string());
        let manifest = vec!["shot/a.mov".to_string()];
        assert_eq!(find_source_root(&state, &manifest), Some("/src/project".to_string()));
    }

    #[test]
    fn find_source_root_returns_none_without_match() {
        let mut state = HashSet::new();
        state.insert("/src/a.mov".to_string());
        let manifest = vec!["b.mov".to_string()];
        assert_eq!(find_source_root(&state, &manifest), None);
    }

    #[test]
    fn merge_mappings_deduplicates_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = dir.path().join("m1.csv");
        let f2 = dir.path().join("m2.csv");
        std::fs::write(&f1, "a,da\nb,db\n").unwrap();
        std::fs::write(&f2, "a,da\nc,dc\n").unwrap();

        let report = merge_mappings(&[f1, f2]).unwrap();
        assert_eq!(report.merged.len(), 3);
    }

    #[test]
    fn verify_reports_missing_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.mov");
        std::fs::write(&present, b"x").unwrap();
        let mapping = dir.path().join("mapping.csv");
        std::fs::write(
            &mapping,
            format!("a,{}\nb,{}\n", present.display(), dir.path().join("gone.mov").display()),
        )
        .unwrap();

        let report = verify(&mapping).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.missing.len(), 1);
    }

    #[test]
    fn normalize_source_path_strips_mnt_prefix() {
        assert_eq!(
            normalize_source_path_for_comparison("/mnt/cifs/raidix/project/path/to/file"),
            "raidix/project/path/to/file"
        );
        assert_eq!(normalize_source_path_for_comparison("relative/path"), "relative/path");
    }

    #[test]
    fn filter_matches_plan_against_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("mapping.csv");
        std::fs::write(&mapping, "/mnt/cifs/a.mov,dest_a\n").unwrap();

        let plan_keys = vec!["a.mov".to_string(), "b.mov".to_string()];
        let report = filter_plan_against_mapping(&plan_keys, &mapping).unwrap();
        assert_eq!(report.matched, vec!["a.mov".to_string()]);
        assert_eq!(report.missing_from_mapping, vec!["b.mov".to_string()]);
    }
}
