/*!
 * Copier (§4.7): invokes an external byte-copy tool and reports progress.
 */

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use regex::Regex;

use crate::error::{CopeerError, Result};

fn progress_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+(\d+)%").unwrap())
}

/// Abstracts the external copy tool so tests can substitute canned
/// progress/exit behavior without spawning a real subprocess.
pub trait CopyExecutor: Send + Sync {
    fn copy(&self, source: &Path, dest: &Path, on_progress: &mut dyn FnMut(u8)) -> Result<()>;
}

/// Shells out to an external archival copy tool (`rsync -a --no-i-r
/// --progress` by default), parsing its stdout character-by-character so
/// that `\r`-terminated progress lines are observed as well as `\n`.
pub struct RsyncExecutor {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for RsyncExecutor {
    fn default() -> Self {
        Self {
            program: "rsync".to_string(),
            args: vec!["-a".to_string(), "--no-i-r".to_string(), "--progress".to_string()],
        }
    }
}

impl CopyExecutor for RsyncExecutor {
    fn copy(&self, source: &Path, dest: &Path, on_progress: &mut dyn FnMut(u8)) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(CopeerError::Io)?;
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(source)
            .arg(dest)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| CopeerError::CopyFailed(format!("failed to spawn {}: {e}", self.program)))?;

        let mut stdout = child.stdout.take();
        if let Some(out) = stdout.as_mut() {
            let mut line_buffer = String::new();
            let mut byte = [0u8; 1];
            while let Ok(n) = out.read(&mut byte) {
                if n == 0 {
                    break;
                }
                let c = byte[0] as char;
                if c == '\r' || c == '\n' {
                    if let Some(caps) = progress_re().captures(&line_buffer) {
                        if let Ok(pct) = caps[1].parse::<u8>() {
                            on_progress(pct.min(100));
                        }
                    }
                    line_buffer.clear();
                } else {
                    line_buffer.push(c);
                }
            }
        }

        let mut stderr_output = String::new();
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr_output);
        }

        let status = child
            .wait()
            .map_err(|e| CopeerError::CopyFailed(format!("failed waiting on {}: {e}", self.program)))?;

        if !status.success() {
            let cancelled = status.code() == Some(130) || status.signal() == Some(2);
            if cancelled {
                return Err(CopeerError::Cancelled);
            }
            return Err(CopeerError::CopyFailed(format!(
                "{} exited with {:?}: {stderr_output}",
                self.program,
                status.code()
            )));
        }

        Ok(())
    }
}

#[cfg(unix)]
trait ExitStatusExt2 {
    fn signal(&self) -> Option<i32>;
}

#[cfg(unix)]
impl ExitStatusExt2 for std::process::ExitStatus {
    fn signal(&self) -> Option<i32> {
        std::os::unix::process::ExitStatusExt::signal(self)
    }
}

#[cfg(not(unix))]
trait ExitStatusExt2 {
    fn signal(&self) -> Option<i32>;
}

#[cfg(not(unix))]
impl ExitStatusExt2 for std::process::ExitStatus {
    fn signal(&self) -> Option<i32> {
        None
    }
}

use self::ExitStatusExt2 as _;

/// Simulates a copy with synthetic progress, for dry-run mode (§4.7).
pub struct DryRunExecutor {
    pub steps: u32,
    pub delay: Duration,
}

impl Default for DryRunExecutor {
    fn default() -> Self {
        Self {
            steps: 3,
            delay: Duration::from_millis(5),
        }
    }
}

impl CopyExecutor for DryRunExecutor {
    fn copy(&self, _source: &Path, _dest: &Path, on_progress: &mut dyn FnMut(u8)) -> Result<()> {
        for i in 0..self.steps {
            std::thread::sleep(self.delay);
            let pct = (((i + 1) as f64 / self.steps as f64) * 100.0) as u8;
            on_progress(pct.min(100));
        }
        Ok(())
    }
}

/// Copy a single file job using the configured executor, returning the
/// resolved absolute destination path.
pub fn copy_file(
    executor: &dyn CopyExecutor,
    source: &Path,
    dest: &Path,
    on_progress: &mut dyn FnMut(u8),
) -> Result<PathBuf> {
    if !source.exists() {
        return Err(CopeerError::SourceMissing(source.to_path_buf()));
    }
    executor.copy(source, dest, on_progress)?;
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FakeExecutor {
        progress_sequence: Vec<u8>,
        fail: bool,
    }

    impl CopyExecutor for FakeExecutor {
        fn copy(&self, _source: &Path, _dest: &Path, on_progress: &mut dyn FnMut(u8)) -> Result<()> {
            for p in &self.progress_sequence {
                on_progress(*p);
            }
            if self.fail {
                Err(CopeerError::CopyFailed("synthetic failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn missing_source_fails_before_invoking_executor() {
        let executor = FakeExecutor { progress_sequence: vec![], fail: false };
        let mut calls = 0;
        let result = copy_file(
            &executor,
            Path::new("/nonexistent/source"),
            Path::new("/tmp/dest"),
            &mut |_| calls += 1,
        );
        assert!(matches!(result, Err(CopeerError::SourceMissing(_))));
        assert_eq!(calls, 0);
    }

    #[test]
    fn successful_copy_reports_progress_in_order() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.mov");
        std::fs::write(&source, b"data").unwrap();
        let dest = dir.path().join("dst.mov");

        let executor = FakeExecutor { progress_sequence: vec![25, 50, 100], fail: false };
        let seen = Mutex::new(Vec::new());
        let result = copy_file(&executor, &source, &dest, &mut |p| seen.lock().unwrap().push(p));

        assert!(result.is_ok());
        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 100]);
    }

    #[test]
    fn executor_failure_propagates() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.mov");
        std::fs::write(&source, b"data").unwrap();

        let executor = FakeExecutor { progress_sequence: vec![], fail: true };
        let result = copy_file(&executor, &source, &dir.path().join("dst.mov"), &mut |_| {});
        assert!(matches!(result, Err(CopeerError::CopyFailed(_))));
    }

    #[test]
    fn progress_regex_extracts_trailing_percentage() {
        let caps = progress_re().captures("  1,234,567  42%  100.00kB/s").unwrap();
        assert_eq!(&caps[1], "42");
    }

    #[test]
    fn dry_run_executor_emits_monotonic_progress() {
        let executor = DryRunExecutor { steps: 4, delay: Duration::from_millis(0) };
        let mut seen = Vec::new();
        executor.copy(Path::new("/a"), Path::new("/b"), &mut |p| seen.push(p)).unwrap();
        assert_eq!(seen, vec![25, 50, 75, 100]);
    }
}
