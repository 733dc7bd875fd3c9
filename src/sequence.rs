/*!
 * Sequence detector (§4.2): groups frame-numbered files into archive jobs.
 */

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::Config;
use crate::model::SequenceJob;

fn sequence_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.*?)[._]*(\d+)\.([A-Za-z0-9]+)$").unwrap())
}

fn safe_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// One candidate group within a directory: same prefix, same (lowercased)
/// extension.
struct Candidate {
    members: Vec<(u64, PathBuf, u64)>, // (frame, path, size)
}

/// Detect sequences across a scanned directory tree. `files_by_dir` maps an
/// absolute directory to its `(filename, size)` entries, the shape produced
/// by the manifest reader and the directory walker alike.
///
/// Returns the archive jobs plus the set of member paths that were absorbed
/// into a sequence, so the caller can exclude them from standalone copy jobs.
pub fn detect_sequences(
    files_by_dir: &BTreeMap<PathBuf, Vec<(PathBuf, u64)>>,
    config: &Config,
) -> (Vec<SequenceJob>, Vec<PathBuf>) {
    let image_exts: std::collections::HashSet<String> = config
        .image_extensions
        .iter()
        .map(|e| e.to_lowercase())
        .collect();

    let mut jobs = Vec::new();
    let mut absorbed = Vec::new();

    for (dir, entries) in files_by_dir {
        let mut candidates: HashMap<(String, String), Candidate> = HashMap::new();

        for (filename, size) in entries {
            let name = match filename.to_str() {
                Some(n) => n,
                None => continue,
            };
            let caps = match sequence_re().captures(name) {
                Some(c) => c,
                None => continue,
            };
            let prefix = caps.get(1).unwrap().as_str().to_string();
            let frame_str = caps.get(2).unwrap().as_str();
            let ext = caps.get(3).unwrap().as_str().to_lowercase();

            if !image_exts.contains(&ext) {
                continue;
            }
            let frame: u64 = match frame_str.parse() {
                Ok(f) => f,
                Err(_) => continue,
            };

            let entry = candidates
                .entry((prefix, ext))
                .or_insert_with(|| Candidate { members: Vec::new() });
            entry.members.push((frame, dir.join(filename), *size));
        }

        for ((prefix, ext), mut candidate) in candidates {
            if candidate.members.len() < config.min_files_for_sequence {
                continue;
            }
            candidate.members.sort_by_key(|(frame, _, _)| *frame);

            let min_frame = candidate.members.first().unwrap().0;
            let max_frame = candidate.members.last().unwrap().0;
            let expected = max_frame - min_frame + 1;
            let actual = candidate.members.len() as u64;
            let max_allowed_gaps = std::cmp::max(1, (expected as f64 * 0.05) as u64);
            let missing = expected.saturating_sub(actual);

            if missing > max_allowed_gaps {
                continue;
            }

            let clean_prefix = safe_prefix(&prefix);
            let tar_name = format!("{}.{:04}-{:04}.{}.tar", clean_prefix, min_frame, max_frame, ext);

            let total_size: u64 = candidate.members.iter().map(|(_, _, s)| s).sum();
            let members: Vec<PathBuf> = candidate.members.iter().map(|(_, p, _)| p.clone()).collect();

            absorbed.extend(members.iter().cloned());
            jobs.push(SequenceJob {
                key: dir.join(&tar_name),
                dir: dir.clone(),
                tar_name,
                members,
                size: total_size,
                frame_range: (min_frame, max_frame),
            });
        }
    }

    (jobs, absorbed)
}

/// Derive the tar archive's on-disk filename from a sequence job's directory
/// component, for display/logging purposes (the job already carries it).
pub fn tar_path_for(dir: &Path, tar_name: &str) -> PathBuf {
    dir.join(tar_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config {
            min_files_for_sequence: 3,
            image_extensions: vec!["exr".to_string(), "dpx".to_string()],
            ..Config::default()
        }
    }

    fn dirmap(dir: &str, files: &[(&str, u64)]) -> BTreeMap<PathBuf, Vec<(PathBuf, u64)>> {
        let mut m = BTreeMap::new();
        m.insert(
            PathBuf::from(dir),
            files.iter().map(|(n, s)| (PathBuf::from(n), *s)).collect(),
        );
        m
    }

    #[test]
    fn detects_contiguous_sequence() {
        let files = [
            ("shot.0001.exr", 100u64),
            ("shot.0002.exr", 100),
            ("shot.0003.exr", 100),
            ("shot.0004.exr", 100),
        ];
        let (jobs, absorbed) = detect_sequences(&dirmap("/src/shot", &files), &cfg());
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].frame_range, (1, 4));
        assert_eq!(jobs[0].members.len(), 4);
        assert_eq!(absorbed.len(), 4);
        assert_eq!(jobs[0].size, 400);
    }

    #[test]
    fn below_minimum_stays_standalone() {
        let files = [("shot.0001.exr", 10u64), ("shot.0002.exr", 10)];
        let (jobs, absorbed) = detect_sequences(&dirmap("/src/shot", &files), &cfg());
        assert!(jobs.is_empty());
        assert!(absorbed.is_empty());
    }

    #[test]
    fn tolerates_small_gap() {
        // 21 frames expected (1..=21), 20 present: 1 missing, allowed = max(1, floor(21*0.05)) = 1
        let mut files: Vec<(String, u64)> = (1..=21)
            .filter(|f| *f != 10)
            .map(|f| (format!("shot.{f:04}.exr"), 10u64))
            .collect();
        files.truncate(20);
        let refs: Vec<(&str, u64)> = files.iter().map(|(n, s)| (n.as_str(), *s)).collect();
        let mut cfg = cfg();
        cfg.min_files_for_sequence = 3;
        let (jobs, _) = detect_sequences(&dirmap("/src/shot", &refs), &cfg);
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn rejects_too_many_gaps() {
        let files: Vec<(String, u64)> = vec![1, 2, 3, 4, 5, 50]
            .into_iter()
            .map(|f| (format!("shot.{f:04}.exr"), 10u64))
            .collect();
        let refs: Vec<(&str, u64)> = files.iter().map(|(n, s)| (n.as_str(), *s)).collect();
        let (jobs, _) = detect_sequences(&dirmap("/src/shot", &refs), &cfg());
        assert!(jobs.is_empty());
    }

    #[test]
    fn ignores_non_image_extensions() {
        let files = [
            ("clip.0001.mov", 10u64),
            ("clip.0002.mov", 10),
            ("clip.0003.mov", 10),
        ];
        let (jobs, absorbed) = detect_sequences(&dirmap("/src/clip", &files), &cfg());
        assert!(jobs.is_empty());
        assert!(absorbed.is_empty());
    }

    #[test]
    fn safe_prefix_replaces_unsafe_characters() {
        assert_eq!(safe_prefix("shot one/"), "shot_one_");
        assert_eq!(safe_prefix("shot-02_v1."), "shot-02_v1.");
    }
}
