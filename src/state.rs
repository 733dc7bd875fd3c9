/*!
 * State store (§4.4): append-only state/mapping/error logs.
 *
 * A single process-wide mutex serializes appends so concurrent workers
 * never interleave partial lines. Readers tolerate a crash mid-line by
 * discarding the affected (final, incomplete) row.
 */

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CopeerError, Result};

/// CSV-escape a single field: wrap in quotes and double any internal quote
/// whenever the field contains the delimiter, a quote, or a newline.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn parse_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == ',' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

/// Append-only logs for a single run: state (completed job keys), mapping
/// (key → destination), and errors (free-text diagnostics).
pub struct StateStore {
    state_file: PathBuf,
    mapping_file: PathBuf,
    error_file: PathBuf,
    dry_run: bool,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(state_file: PathBuf, mapping_file: PathBuf, error_file: PathBuf, dry_run: bool) -> Self {
        Self {
            state_file,
            mapping_file,
            error_file,
            dry_run,
            lock: Mutex::new(()),
        }
    }

    /// Load previously-completed job keys from the state file, tolerating a
    /// truncated final line and blank/empty-first-cell rows.
    pub fn load_completed_keys(&self) -> Result<HashSet<String>> {
        load_first_column(&self.state_file)
    }

    /// Record a successful job: one state row per source key, plus one
    /// mapping row `(job_key, dest_path)`. In dry-run mode the state file is
    /// skipped but the mapping row is still written (to the dry-run mapping
    /// file, selected by the caller via `mapping_file`). The mapping file
    /// gets a header row the first time it is created.
    pub fn record_success(&self, source_keys: &[PathBuf], job_key: &Path, dest_path: &Path) -> Result<()> {
        let _guard = self.lock.lock().unwrap();

        if !self.dry_run {
            let mut state = open_append(&self.state_file)?;
            for key in source_keys {
                writeln!(state, "{}", escape_field(&key.to_string_lossy()))
                    .map_err(CopeerError::Io)?;
            }
        }

        let is_new = !self.mapping_file.exists();
        let mut mapping = open_append(&self.mapping_file)?;
        if is_new && self.dry_run {
            writeln!(mapping, "source_path,destination_path").map_err(CopeerError::Io)?;
        }
        writeln!(
            mapping,
            "{},{}",
            escape_field(&job_key.to_string_lossy()),
            escape_field(&dest_path.to_string_lossy())
        )
        .map_err(CopeerError::Io)?;

        Ok(())
    }

    /// Record a per-job failure to the error log; never fails the caller.
    /// Three semicolon-delimited fields: local timestamp, source key,
    /// free-form message (internal newlines collapsed to spaces).
    pub fn record_error(&self, job_key: &Path, message: &str) {
        let _guard = self.lock.lock().unwrap();
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let flat_message = message.replace('\n', " ").replace('\r', " ");
        if let Ok(mut file) = open_append(&self.error_file) {
            let _ = writeln!(file, "{timestamp};{};{flat_message}", job_key.display());
        }
    }

    /// Read the mapping file into `(key, dest_path)` pairs (used by the
    /// auditor).
    pub fn read_mapping(path: &Path) -> Result<Vec<(String, String)>> {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CopeerError::Io(e)),
        };
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => continue,
            };
            if line.trim().is_empty() {
                continue;
            }
            let fields = parse_csv_row(&line);
            if fields.len() < 2 || fields[0].is_empty() {
                continue;
            }
            out.push((fields[0].clone(), fields[1].clone()));
        }
        Ok(out)
    }
}

fn open_append(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(CopeerError::Io)
}

fn load_first_column(path: &Path) -> Result<HashSet<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(CopeerError::Io(e)),
    };

    // split('\n') always yields a trailing "" when the file ends in a
    // newline, and a crash-truncated row when it doesn't; either way the
    // last element is dropped.
    let mut lines: Vec<&str> = content.split('\n').collect();
    lines.pop();

    let mut keys = HashSet::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_row(line);
        if fields.is_empty() || fields[0].is_empty() {
            continue;
        }
        keys.insert(fields[0].clone());
    }
    Ok(keys)
}
