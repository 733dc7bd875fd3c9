/*!
 * Archiver (§4.6): streams a SequenceJob's members into a tar file.
 */

use std::fs::File;
use std::path::Path;

use tar::Builder;
use tracing::warn;

use crate::error::{CopeerError, Result};
use crate::model::SequenceJob;

/// Archive result for a completed sequence job.
pub struct ArchiveOutcome {
    pub dest_path: std::path::PathBuf,
    pub bytes_written: u64,
    pub missing_members: usize,
}

/// Write `job`'s members into a new tar file at `dest_path`. Missing members
/// are logged and skipped; any I/O error deletes the partial tar and fails
/// the job.
pub fn archive_sequence(job: &SequenceJob, dest_path: &Path) -> Result<ArchiveOutcome> {
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent).map_err(CopeerError::Io)?;
    }

    let result = write_tar(job, dest_path);

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let _ = std::fs::remove_file(dest_path);
            Err(CopeerError::ArchiveFailed(format!(
                "{}: {e}",
                dest_path.display()
            )))
        }
    }
}

fn write_tar(job: &SequenceJob, dest_path: &Path) -> std::io::Result<ArchiveOutcome> {
    let file = File::create(dest_path)?;
    let mut builder = Builder::new(file);
    let mut missing_members = 0usize;

    for member in &job.members {
        if !member.exists() {
            warn!(path = %member.display(), "sequence member missing during archive");
            missing_members += 1;
            continue;
        }
        let arcname = member
            .file_name()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| member.clone());
        builder.append_path_with_name(member, arcname)?;
    }

    builder.finish()?;
    let bytes_written = dest_path.metadata().map(|m| m.len()).unwrap_or(0);

    Ok(ArchiveOutcome {
        dest_path: dest_path.to_path_buf(),
        bytes_written,
        missing_members,
    })
}
