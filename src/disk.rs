/*!
 * Disk manager (§4.5): destination volume selection under `fill` and
 * `round_robin` placement strategies.
 */

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sysinfo::Disks;

use crate::config::DiskStrategy;
use crate::error::{CopeerError, Result};
use crate::model::Volume;

/// Live disk-space sampling, swappable in tests and dry-run mode.
pub trait DiskProbe: Send + Sync {
    fn sample(&self, mount_point: &Path) -> Volume;
}

/// Samples real mount-point usage via `sysinfo`. A mount point missing from
/// the OS's disk list is reported as 100% used (unsuitable), matching the
/// original's "can't determine disk → treat as unsafe" posture.
pub struct SystemDiskProbe;

impl DiskProbe for SystemDiskProbe {
    fn sample(&self, mount_point: &Path) -> Volume {
        let disks = Disks::new_with_refreshed_list();
        let matched = disks.iter().find(|d| mount_point.starts_with(d.mount_point()));

        match matched {
            Some(disk) => {
                let total = disk.total_space();
                let free = disk.available_space();
                let used_pct = if total == 0 {
                    100.0
                } else {
                    ((total - free) as f64 / total as f64) * 100.0
                };
                Volume {
                    path: mount_point.to_path_buf(),
                    used_pct,
                    free_bytes: free,
                }
            }
            None => Volume {
                path: mount_point.to_path_buf(),
                used_pct: 100.0,
                free_bytes: 0,
            },
        }
    }
}

/// Reports every mount point as 100% free, for dry-run mode (§4.5).
pub struct DryRunDiskProbe;

impl DiskProbe for DryRunDiskProbe {
    fn sample(&self, mount_point: &Path) -> Volume {
        Volume {
            path: mount_point.to_path_buf(),
            used_pct: 0.0,
            free_bytes: u64::MAX,
        }
    }
}

struct RoundRobinState {
    next_index: usize,
}

/// Chooses a destination mount point for each job. All queries serialize
/// through one mutex; see §4.5 and §5.
pub struct DiskManager {
    mount_points: Vec<PathBuf>,
    threshold: f64,
    strategy: DiskStrategy,
    max_concurrent_disks: usize,
    probe: Box<dyn DiskProbe>,
    active_disk: Mutex<Option<usize>>,
    round_robin: Mutex<RoundRobinState>,
}

impl DiskManager {
    pub fn new(
        mount_points: Vec<PathBuf>,
        threshold: f64,
        strategy: DiskStrategy,
        max_concurrent_disks: usize,
        probe: Box<dyn DiskProbe>,
    ) -> Self {
        Self {
            mount_points,
            threshold,
            strategy,
            max_concurrent_disks: max_concurrent_disks.max(1),
            probe,
            active_disk: Mutex::new(None),
            round_robin: Mutex::new(RoundRobinState { next_index: 0 }),
        }
    }

    fn suitable(&self, index: usize, job_size: u64) -> Option<Volume> {
        let mount = self.mount_points.get(index)?;
        if !mount.exists() {
            return None;
        }
        let volume = self.probe.sample(mount);
        if volume.used_pct < self.threshold && volume.free_bytes > job_size {
            Some(volume)
        } else {
            None
        }
    }

    /// Resolve a destination mount point able to hold `job_size` bytes.
    pub fn choose_destination(&self, job_size: u64) -> Result<PathBuf> {
        match self.strategy {
            DiskStrategy::Fill => self.choose_fill(job_size),
            DiskStrategy::RoundRobin => self.choose_round_robin(job_size),
        }
    }

    fn choose_fill(&self, job_size: u64) -> Result<PathBuf> {
        let mut active = self.active_disk.lock().unwrap();

        if let Some(idx) = *active {
            if self.suitable(idx, job_size).is_some() {
                return Ok(self.mount_points[idx].clone());
            }
        }

        for (idx, _) in self.mount_points.iter().enumerate() {
            if self.suitable(idx, job_size).is_some() {
                *active = Some(idx);
                return Ok(self.mount_points[idx].clone());
            }
        }

        Err(CopeerError::NoSpace { required: job_size })
    }

    fn choose_round_robin(&self, job_size: u64) -> Result<PathBuf> {
        let preferred_len = self.max_concurrent_disks.min(self.mount_points.len());
        let mut rr = self.round_robin.lock().unwrap();

        if preferred_len > 0 {
            let start = rr.next_index % preferred_len;
            for offset in 0..preferred_len {
                let idx = (start + offset) % preferred_len;
                if self.suitable(idx, job_size).is_some() {
                    rr.next_index = (idx + 1) % preferred_len;
                    return Ok(self.mount_points[idx].clone());
                }
            }
        }

        for idx in preferred_len..self.mount_points.len() {
            if self.suitable(idx, job_size).is_some() {
                return Ok(self.mount_points[idx].clone());
            }
        }

        Err(CopeerError::NoSpace { required: job_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct FakeProbe {
        usage: StdMutex<HashMap<PathBuf, (f64, u64)>>,
    }

    impl FakeProbe {
        fn new(entries: &[(&Path, f64, u64)]) -> Self {
            let mut usage = HashMap::new();
            for (p, pct, free) in entries {
                usage.insert(p.to_path_buf(), (*pct, *free));
            }
            Self { usage: StdMutex::new(usage) }
        }
    }

    impl DiskProbe for FakeProbe {
        fn sample(&self, mount_point: &Path) -> Volume {
            let usage = self.usage.lock().unwrap();
            let (pct, free) = usage.get(mount_point).copied().unwrap_or((100.0, 0));
            Volume { path: mount_point.to_path_buf(), used_pct: pct, free_bytes: free }
        }
    }

    fn mounts(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                std::fs::create_dir_all(&p).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn fill_stays_on_active_disk_while_suitable() {
        let dir = tempdir().unwrap();
        let mounts = mounts(dir.path(), &["a", "b"]);
        let probe = FakeProbe::new(&[
            (&mounts[0], 10.0, 1_000_000),
            (&mounts[1], 10.0, 1_000_000),
        ]);
        let mgr = DiskManager::new(mounts.clone(), 90.0, DiskStrategy::Fill, 1, Box::new(probe));

        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[0]);
        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[0]);
    }

    #[test]
    fn fill_advances_when_active_disk_becomes_unsuitable() {
        let dir = tempdir().unwrap();
        let mounts = mounts(dir.path(), &["a", "b"]);
        let probe = FakeProbe::new(&[
            (&mounts[0], 99.0, 10),
            (&mounts[1], 10.0, 1_000_000),
        ]);
        let mgr = DiskManager::new(mounts.clone(), 90.0, DiskStrategy::Fill, 1, Box::new(probe));
        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[1]);
    }

    #[test]
    fn fill_fails_when_nothing_suitable() {
        let dir = tempdir().unwrap();
        let mounts = mounts(dir.path(), &["a"]);
        let probe = FakeProbe::new(&[(&mounts[0], 99.0, 0)]);
        let mgr = DiskManager::new(mounts, 90.0, DiskStrategy::Fill, 1, Box::new(probe));
        assert!(matches!(mgr.choose_destination(100), Err(CopeerError::NoSpace { .. })));
    }

    #[test]
    fn round_robin_cycles_preferred_pool() {
        let dir = tempdir().unwrap();
        let mounts = mounts(dir.path(), &["a", "b", "c"]);
        let probe = FakeProbe::new(&[
            (&mounts[0], 10.0, 1_000_000),
            (&mounts[1], 10.0, 1_000_000),
            (&mounts[2], 10.0, 1_000_000),
        ]);
        let mgr = DiskManager::new(mounts.clone(), 90.0, DiskStrategy::RoundRobin, 2, Box::new(probe));

        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[0]);
        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[1]);
        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[0]);
    }

    #[test]
    fn round_robin_falls_back_without_advancing_index() {
        let dir = tempdir().unwrap();
        let mounts = mounts(dir.path(), &["a", "b", "c"]);
        let probe = FakeProbe::new(&[
            (&mounts[0], 99.0, 0),
            (&mounts[1], 99.0, 0),
            (&mounts[2], 10.0, 1_000_000),
        ]);
        let mgr = DiskManager::new(mounts.clone(), 90.0, DiskStrategy::RoundRobin, 2, Box::new(probe));

        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[2]);
        // next_index untouched by the fallback phase, so a subsequent call
        // re-scans the (still unsuitable) preferred pool before falling
        // back again.
        assert_eq!(mgr.choose_destination(100).unwrap(), mounts[2]);
    }

    #[test]
    fn dry_run_probe_reports_synthetic_suitability() {
        let dir = tempdir().unwrap();
        let mounts = mounts(dir.path(), &["a"]);
        let mgr = DiskManager::new(mounts.clone(), 90.0, DiskStrategy::Fill, 1, Box::new(DryRunDiskProbe));
        assert_eq!(mgr.choose_destination(u64::MAX / 2).unwrap(), mounts[0]);
    }
}
