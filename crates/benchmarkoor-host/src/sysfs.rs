//! Thin sysfs accessors for cpufreq and turbo-boost knobs
//!
//! All paths hang off an injectable root so the conditioner can be
//! exercised against a synthetic tree.

use std::path::{Path, PathBuf};

use crate::error::{HostError, Result};

pub(crate) fn cpu_dir(root: &Path, cpu: usize) -> PathBuf {
    root.join(format!("devices/system/cpu/cpu{cpu}/cpufreq"))
}

pub(crate) fn governor_path(root: &Path, cpu: usize) -> PathBuf {
    cpu_dir(root, cpu).join("scaling_governor")
}

pub(crate) fn min_freq_path(root: &Path, cpu: usize) -> PathBuf {
    cpu_dir(root, cpu).join("scaling_min_freq")
}

pub(crate) fn max_freq_path(root: &Path, cpu: usize) -> PathBuf {
    cpu_dir(root, cpu).join("scaling_max_freq")
}

pub(crate) fn intel_no_turbo_path(root: &Path) -> PathBuf {
    root.join("devices/system/cpu/intel_pstate/no_turbo")
}

pub(crate) fn boost_path(root: &Path) -> PathBuf {
    root.join("devices/system/cpu/cpufreq/boost")
}

pub(crate) fn read_value(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

pub(crate) fn read_khz(path: &Path) -> Result<u64> {
    read_value(path)?
        .parse()
        .map_err(|_| HostError::Io(std::io::Error::other(format!("non-numeric sysfs value in {}", path.display()))))
}

pub(crate) fn write_value(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value)?;
    Ok(())
}

/// Require write access without mutating anything.
pub(crate) fn check_writable(path: &Path) -> Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map(|_| ())
        .map_err(|_| HostError::SysfsNotWritable {
            path: path.display().to_string(),
        })
}

/// Parse the kernel's online-CPU list, e.g. `0-3,5,7-8`.
pub(crate) fn online_cpus(root: &Path) -> Result<Vec<usize>> {
    let raw = read_value(&root.join("devices/system/cpu/online"))?;
    let mut cpus = Vec::new();
    for part in raw.split(',').filter(|part| !part.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().map_err(|_| HostError::NoOnlineCpus)?;
                let end: usize = end.trim().parse().map_err(|_| HostError::NoOnlineCpus)?;
                cpus.extend(start..=end);
            }
            None => cpus.push(part.trim().parse().map_err(|_| HostError::NoOnlineCpus)?),
        }
    }
    if cpus.is_empty() {
        return Err(HostError::NoOnlineCpus);
    }
    Ok(cpus)
}
