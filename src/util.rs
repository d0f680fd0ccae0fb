//! Small helpers for the CLI runner: output directory checks and Unix
//! resource limits.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::warn;

/// Ensure the output directory exists and is writable, warning on unsafe
/// permissions.
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(anyhow!(
                "output path is not a directory: {}",
                path.display()
            ));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }
    let metadata = std::fs::metadata(path)?;

    let probe_path = path.join(".casepipe_write_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
        }
        Err(err) => {
            return Err(anyhow!(
                "output directory is not writable: {} ({})",
                path.display(),
                err
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("output directory is world-writable: {}", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// Apply optional resource limits for this process. Long analysis runs over
/// large data sources can otherwise exhaust the machine.
pub fn apply_resource_limits(
    max_memory_mib: Option<u64>,
    max_open_files: Option<u64>,
) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(mem_mib) = max_memory_mib {
            let bytes = mem_mib.saturating_mul(1024 * 1024);
            set_limit(libc::RLIMIT_AS, bytes, "address space")?;
        }
        if let Some(open_files) = max_open_files {
            set_limit(libc::RLIMIT_NOFILE, open_files, "open file descriptors")?;
        }
    }
    #[cfg(not(unix))]
    {
        if max_memory_mib.is_some() || max_open_files.is_some() {
            warn!("resource limits are only supported on Unix platforms");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_limit(resource: libc::__rlimit_resource_t, requested: u64, label: &str) -> Result<()> {
    unsafe {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(resource, &mut limit) != 0 {
            return Err(anyhow!(
                "getrlimit failed for {}: {}",
                label,
                std::io::Error::last_os_error()
            ));
        }

        let requested = requested as libc::rlim_t;
        let mut new_cur = requested;
        if requested > limit.rlim_max {
            warn!(
                "requested {} limit {} exceeds hard limit {}; using {}",
                label, requested, limit.rlim_max, limit.rlim_max
            );
            new_cur = limit.rlim_max;
        }
        limit.rlim_cur = new_cur;
        if libc::setrlimit(resource, &limit) != 0 {
            return Err(anyhow!(
                "setrlimit failed for {}: {}",
                label,
                std::io::Error::last_os_error()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_output_dir_creates_missing_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("nested/out");
        ensure_output_dir(&target).expect("create");
        assert!(target.is_dir());
    }

    #[test]
    fn ensure_output_dir_rejects_file_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("file");
        std::fs::write(&target, b"x").expect("write");
        assert!(ensure_output_dir(&target).is_err());
    }
}
