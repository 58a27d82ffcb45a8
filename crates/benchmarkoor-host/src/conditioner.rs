//! Scoped CPU-frequency conditioning with crash-safe restore
//!
//! Before the first mutation the current per-CPU governor and frequency
//! bounds plus the platform turbo setting are captured to an in-memory
//! [`OriginalSettings`] and mirrored to a timestamped state file. Restore
//! runs on every exit path; leftover state files from crashed runs are
//! replayed on startup.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use benchmarkoor_config::{CpuFreqConfig, Frequency, NamedFrequency};

use crate::error::{HostError, Result};
use crate::sysfs;

const STATE_FILE_PREFIX: &str = "benchmarkoor-cpufreq-";

// Sysfs mutation is process-wide; concurrent instances must not interleave.
static SYSFS_MUTEX: Mutex<()> = Mutex::new(());

/// Captured pre-mutation state, sufficient for a full restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalSettings {
    pub cpus: Vec<CpuState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turbo: Option<TurboState>,
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuState {
    pub id: usize,
    pub governor: String,
    pub min_khz: u64,
    pub max_khz: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurboState {
    pub path: PathBuf,
    pub value: String,
}

pub struct Conditioner {
    sysfs_root: PathBuf,
    cache_dir: PathBuf,
}

impl Conditioner {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            cache_dir: cache_dir.into(),
        }
    }

    /// Conditioner over an alternate sysfs root, for tests.
    pub fn with_sysfs_root(sysfs_root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Apply the requested settings, returning the captured originals.
    ///
    /// Returns `Ok(None)` when the config requests no change at all.
    /// Validation failures surface before any mutation; individual CPU
    /// mutation failures are logged and skipped.
    pub fn apply(&self, config: &CpuFreqConfig) -> Result<Option<OriginalSettings>> {
        if config.frequency.is_none() && config.turbo.is_none() && config.governor.is_none() {
            return Ok(None);
        }

        let _guard = SYSFS_MUTEX.lock();
        let root = &self.sysfs_root;

        let cpus = if config.cpus.is_empty() {
            sysfs::online_cpus(root)?
        } else {
            config.cpus.clone()
        };

        self.preflight(config, &cpus)?;
        let original = self.capture(config, &cpus)?;

        for &cpu in &cpus {
            if let Err(error) = self.apply_cpu(config, cpu) {
                warn!(cpu, %error, "failed to condition cpu, continuing");
            }
        }

        if let Some(turbo_on) = config.turbo {
            if let Err(error) = self.write_turbo(turbo_on) {
                warn!(%error, "failed to set turbo state, continuing");
            }
        }

        info!(cpus = cpus.len(), state_file = %original.state_file.display(), "host conditioning applied");
        Ok(Some(original))
    }

    /// Restore everything captured in `original`, then delete its state
    /// file. Best-effort: per-CPU failures are logged.
    pub fn restore(&self, original: &OriginalSettings) {
        let _guard = SYSFS_MUTEX.lock();
        let root = &self.sysfs_root;

        for cpu in &original.cpus {
            // Governor first, then max before min so max >= min holds
            // throughout the restore.
            if let Err(error) =
                sysfs::write_value(&sysfs::governor_path(root, cpu.id), &cpu.governor)
            {
                warn!(cpu = cpu.id, %error, "failed to restore governor");
            }
            if let Err(error) = sysfs::write_value(
                &sysfs::max_freq_path(root, cpu.id),
                &cpu.max_khz.to_string(),
            ) {
                warn!(cpu = cpu.id, %error, "failed to restore max frequency");
            }
            if let Err(error) = sysfs::write_value(
                &sysfs::min_freq_path(root, cpu.id),
                &cpu.min_khz.to_string(),
            ) {
                warn!(cpu = cpu.id, %error, "failed to restore min frequency");
            }
        }

        if let Some(turbo) = &original.turbo {
            if let Err(error) = sysfs::write_value(&turbo.path, &turbo.value) {
                warn!(%error, "failed to restore turbo setting");
            }
        }

        if let Err(error) = std::fs::remove_file(&original.state_file) {
            if original.state_file.exists() {
                warn!(%error, "failed to delete conditioner state file");
            }
        }
        info!("host conditioning restored");
    }

    /// Replay and delete stale state files left behind by crashed runs.
    pub fn recover_stale(&self) -> Result<usize> {
        if !self.cache_dir.is_dir() {
            return Ok(0);
        }

        let mut recovered = 0;
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !name.starts_with(STATE_FILE_PREFIX) || !name.ends_with(".json") {
                continue;
            }

            let bytes = std::fs::read(&path)?;
            let mut original: OriginalSettings =
                serde_json::from_slice(&bytes).map_err(|source| HostError::BadStateFile {
                    path: path.display().to_string(),
                    source,
                })?;
            // The file may have been moved since it was written.
            original.state_file = path.clone();

            warn!(state_file = %path.display(), "recovering host settings from stale state file");
            self.restore(&original);
            recovered += 1;
        }
        Ok(recovered)
    }

    fn preflight(&self, config: &CpuFreqConfig, cpus: &[usize]) -> Result<()> {
        let root = &self.sysfs_root;
        for &cpu in cpus {
            sysfs::check_writable(&sysfs::governor_path(root, cpu))?;

            if let Some(governor) = &config.governor {
                let available = sysfs::read_value(
                    &sysfs::cpu_dir(root, cpu).join("scaling_available_governors"),
                )?;
                if !available.split_whitespace().any(|g| g == governor) {
                    return Err(HostError::UnknownGovernor {
                        governor: governor.clone(),
                        cpu,
                        available,
                    });
                }
            }

            if let Some(Frequency::KHz(requested)) = config.frequency {
                let min = sysfs::read_khz(&sysfs::cpu_dir(root, cpu).join("cpuinfo_min_freq"))?;
                let max = sysfs::read_khz(&sysfs::cpu_dir(root, cpu).join("cpuinfo_max_freq"))?;
                if requested < min || requested > max {
                    return Err(HostError::FrequencyOutOfRange {
                        requested,
                        min,
                        max,
                        cpu,
                    });
                }
            }
        }
        Ok(())
    }

    fn capture(&self, config: &CpuFreqConfig, cpus: &[usize]) -> Result<OriginalSettings> {
        let root = &self.sysfs_root;
        let mut states = Vec::with_capacity(cpus.len());
        for &cpu in cpus {
            states.push(CpuState {
                id: cpu,
                governor: sysfs::read_value(&sysfs::governor_path(root, cpu))?,
                min_khz: sysfs::read_khz(&sysfs::min_freq_path(root, cpu))?,
                max_khz: sysfs::read_khz(&sysfs::max_freq_path(root, cpu))?,
            });
        }

        let turbo = if config.turbo.is_some() {
            let path = self.turbo_path();
            Some(TurboState {
                value: sysfs::read_value(&path)?,
                path,
            })
        } else {
            None
        };

        std::fs::create_dir_all(&self.cache_dir)?;
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let state_file = self
            .cache_dir
            .join(format!("{STATE_FILE_PREFIX}{timestamp}.json"));
        let original = OriginalSettings {
            cpus: states,
            turbo,
            state_file: state_file.clone(),
        };
        std::fs::write(&state_file, serde_json::to_vec_pretty(&original)?.as_slice())?;
        debug!(state_file = %state_file.display(), "captured original host settings");
        Ok(original)
    }

    fn apply_cpu(&self, config: &CpuFreqConfig, cpu: usize) -> Result<()> {
        let root = &self.sysfs_root;

        if let Some(governor) = &config.governor {
            sysfs::write_value(&sysfs::governor_path(root, cpu), governor)?;
        }

        if let Some(frequency) = config.frequency {
            let target = match frequency {
                Frequency::KHz(khz) => khz,
                Frequency::Named(NamedFrequency::Max) => {
                    sysfs::read_khz(&sysfs::cpu_dir(root, cpu).join("cpuinfo_max_freq"))?
                }
            };
            // Max before min keeps max >= min at every intermediate step.
            sysfs::write_value(&sysfs::max_freq_path(root, cpu), &target.to_string())?;
            sysfs::write_value(&sysfs::min_freq_path(root, cpu), &target.to_string())?;
        }

        Ok(())
    }

    fn turbo_path(&self) -> PathBuf {
        let intel = sysfs::intel_no_turbo_path(&self.sysfs_root);
        if intel.exists() {
            intel
        } else {
            sysfs::boost_path(&self.sysfs_root)
        }
    }

    fn write_turbo(&self, turbo_on: bool) -> Result<()> {
        let path = self.turbo_path();
        // intel_pstate exposes an inverted knob (`no_turbo`).
        let value = if path.ends_with("no_turbo") {
            if turbo_on {
                "0"
            } else {
                "1"
            }
        } else if turbo_on {
            "1"
        } else {
            "0"
        };
        sysfs::write_value(&path, value)
    }
}
