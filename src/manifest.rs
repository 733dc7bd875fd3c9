/*!
 * Manifest reader (§4.1): parses delimited manifests and classifies rows.
 *
 * Also provides the secondary filesystem-walk input mode, which emits the
 * same record shape from real `stat` sizes.
 */

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::error::{CopeerError, Result};
use crate::model::MalformedRow;

/// Result of reading a manifest or walking a directory: source records
/// grouped by containing directory (the shape the sequence detector wants),
/// plus bookkeeping for the planner's summary.
#[derive(Debug, Default)]
pub struct ManifestScan {
    pub by_directory: BTreeMap<PathBuf, Vec<(PathBuf, u64)>>,
    pub total_lines: usize,
    pub ignored_dirs: usize,
    pub malformed: Vec<MalformedRow>,
}

impl ManifestScan {
    pub fn found_files(&self) -> usize {
        self.by_directory.values().map(|v| v.len()).sum()
    }
}

/// Parse a size field per §4.1: strip whitespace, `,` → `.`, scientific
/// notation via a float parse then truncation, else plain integer; on
/// failure, 0. Mirrors `parse_scientific_notation` in the original engine.
pub fn parse_size(raw: &str) -> u64 {
    let cleaned = raw.trim().replace(',', ".");
    if cleaned.is_empty() {
        return 0;
    }
    if cleaned.to_uppercase().contains('E') {
        cleaned.parse::<f64>().map(|f| f.max(0.0) as u64).unwrap_or(0)
    } else {
        cleaned
            .parse::<i64>()
            .map(|n| n.max(0) as u64)
            .or_else(|_| cleaned.parse::<f64>().map(|f| f.max(0.0) as u64))
            .unwrap_or(0)
    }
}

/// Unescape a manifest path field: strip surrounding quotes, `""` → `"`.
fn unquote_path(field: &str) -> String {
    let trimmed = field.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_string()
    }
}

fn fallback_quoted_path_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^"([^"]+\.\w{2,5})",.*"#).unwrap())
}

fn to_absolute(source_root: Option<&Path>, rel: &str) -> PathBuf {
    let rel_trimmed = rel.trim_start_matches("./");
    let joined = match source_root {
        Some(root) => root.join(rel_trimmed),
        None => PathBuf::from(rel_trimmed),
    };
    normalize_path(&joined)
}

/// Lexical path normalization (no filesystem access): collapses `.`/`..`
/// components the way `os.path.normpath` does.
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match out.last() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    _ => out.push(component),
                }
            }
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Read a `;`-delimited manifest (§6). Never holds the whole file in
/// memory; each line is classified and streamed into the directory map.
pub fn read_manifest(path: &Path, source_root: Option<&Path>, delimiter: char) -> Result<ManifestScan> {
    let file = File::open(path)
        .map_err(|e| CopeerError::Input(format!("cannot open manifest {}: {e}", path.display())))?;
    let reader = BufReader::new(file);

    let mut scan = ManifestScan::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = match line {
            Ok(l) => l,
            Err(_) => {
                scan.malformed.push(MalformedRow {
                    line_number,
                    reason: "unreadable line (invalid UTF-8 or I/O error)".to_string(),
                });
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        scan.total_lines += 1;

        let columns: Vec<&str> = line.split(delimiter).collect();
        if columns.len() >= 5 {
            let raw_path = columns[0];
            let type_field = columns[1].to_lowercase();
            let size_field = columns[4];

            if type_field.contains("directory") {
                scan.ignored_dirs += 1;
                continue;
            }
            if type_field.contains("file") {
                let rel = unquote_path(raw_path);
                let abs = to_absolute(source_root, &rel);
                let size = parse_size(size_field);
                push_record(&mut scan, abs, size);
                continue;
            }
            scan.malformed.push(MalformedRow {
                line_number,
                reason: format!("unrecognized type '{}'", columns[1]),
            });
            continue;
        }

        // Fewer than five columns: retry with the permissive fallback parser.
        if let Some(caps) = fallback_quoted_path_re().captures(&line) {
            let rel = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let abs = to_absolute(source_root, rel);
            push_record(&mut scan, abs, 0);
            continue;
        }

        scan.malformed.push(MalformedRow {
            line_number,
            reason: format!("fewer than 5 columns ({})", columns.len()),
        });
    }

    Ok(scan)
}

fn push_record(scan: &mut ManifestScan, abs: PathBuf, size: u64) {
    let dir = abs
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let filename = abs
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| abs.clone());
    scan.by_directory.entry(dir).or_default().push((filename, size));
    // Store records keyed by filename only within the directory; callers
    // reconstruct the absolute path as `dir.join(filename)`.
    let _ = abs;
}

/// Walk a directory tree on the filesystem, emitting the same record shape
/// using real `stat` sizes (§4.1 secondary input mode).
pub fn walk_directory(root: &Path) -> Result<ManifestScan> {
    if !root.exists() {
        return Err(CopeerError::Input(format!(
            "source directory does not exist: {}",
            root.display()
        )));
    }

    let mut scan = ManifestScan::default();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            if entry.path() != root {
                scan.ignored_dirs += 1;
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        scan.total_lines += 1;
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        push_record(&mut scan, entry.path().to_path_buf(), size);
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn manifest(lines: &[&str]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f
    }

    #[test]
    fn parses_scientific_notation_sizes() {
        assert_eq!(parse_size("1,23E+07"), 12_300_000);
        assert_eq!(parse_size("1000"), 1000);
        assert_eq!(parse_size("  42 "), 42);
        assert_eq!(parse_size("garbage"), 0);
        assert_eq!(parse_size(""), 0);
    }

    #[test]
    fn empty_manifest_yields_empty_scan() {
        let f = manifest(&[r#""a/","directory",,,0"#]);
        let scan = read_manifest(f.path(), None, ';').unwrap();
        assert_eq!(scan.found_files(), 0);
        assert_eq!(scan.ignored_dirs, 1);
        assert_eq!(scan.malformed.len(), 0);
    }

    #[test]
    fn classifies_file_rows() {
        let f = manifest(&[
            r#""x.mov","file",,,1000"#,
            r#""y.mov","regular file",,,2000"#,
        ]);
        let scan = read_manifest(f.path(), None, ';').unwrap();
        assert_eq!(scan.found_files(), 2);
        assert_eq!(scan.malformed.len(), 0);
    }

    #[test]
    fn malformed_rows_are_recorded_with_line_number() {
        let f = manifest(&["short;row", r#""a","bogus",,,0"#]);
        let scan = read_manifest(f.path(), None, ';').unwrap();
        assert_eq!(scan.malformed.len(), 2);
        assert_eq!(scan.malformed[0].line_number, 1);
        assert_eq!(scan.malformed[1].line_number, 2);
    }

    #[test]
    fn source_root_joins_relative_paths() {
        let f = manifest(&[r#""sub/x.mov","file",,,10"#]);
        let scan = read_manifest(f.path(), Some(Path::new("/src")), ';').unwrap();
        let dir = PathBuf::from("/src/sub");
        assert!(scan.by_directory.contains_key(&dir));
    }

    #[test]
    fn unescapes_doubled_quotes() {
        let f = manifest(&[r#""weird""name.mov","file",,,10"#]);
        let scan = read_manifest(f.path(), None, ';').unwrap();
        assert_eq!(scan.found_files(), 1);
    }
}
