use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf, StripPrefixError},
    time::Duration,
};

use nix::{errno::Errno, unistd::Pid};
use oci_spec::runtime::LinuxResources;

use crate::controller_type::ControllerType;
use crate::hierarchy::{CgroupIdentity, HierarchyRoots, ResolveError};
use crate::manager::Manager;

pub const CGROUP_PROCS: &str = "cgroup.procs";
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// ControllerOpt is everything a controller needs for one apply cycle.
#[derive(Clone, Debug)]
pub struct ControllerOpt<'a> {
    /// Desired limits. Unset fields leave the kernel's current value alone.
    pub resources: &'a LinuxResources,
    /// Process that joins the cgroup once its limits are in place.
    pub pid: Pid,
}

#[derive(thiserror::Error, Debug)]
pub enum WrappedIoError {
    #[error("failed to open {path}: {err}")]
    Open { err: std::io::Error, path: PathBuf },
    #[error("failed to write {data} to {path}: {err}")]
    Write {
        err: std::io::Error,
        path: PathBuf,
        data: String,
    },
    #[error("failed to read {path}: {err}")]
    Read { err: std::io::Error, path: PathBuf },
    #[error("failed to create dir {path}: {err}")]
    CreateDir { err: std::io::Error, path: PathBuf },
    #[error("at {path}: {err}")]
    Other { err: std::io::Error, path: PathBuf },
}

impl WrappedIoError {
    pub fn inner(&self) -> &std::io::Error {
        match self {
            WrappedIoError::Open { err, .. } => err,
            WrappedIoError::Write { err, .. } => err,
            WrappedIoError::Read { err, .. } => err,
            WrappedIoError::CreateDir { err, .. } => err,
            WrappedIoError::Other { err, .. } => err,
        }
    }

    /// True if the failure was caused by a file or directory that does not exist.
    pub fn is_not_found(&self) -> bool {
        self.inner().kind() == ErrorKind::NotFound
    }
}

/// Writes `data` into an existing cgroup control file. Control files are
/// provided by the kernel, so the file is never created.
#[inline]
pub fn write_cgroup_file_str<P: AsRef<Path>>(path: P, data: &str) -> Result<(), WrappedIoError> {
    let path = path.as_ref();

    fs::OpenOptions::new()
        .create(false)
        .write(true)
        .truncate(false)
        .open(path)
        .wrap_open(path)?
        .write_all(data.as_bytes())
        .wrap_write(path, data)?;

    tracing::trace!(?path, data, "wrote cgroup file");
    Ok(())
}

#[inline]
pub fn write_cgroup_file<P: AsRef<Path>, T: ToString>(
    path: P,
    data: T,
) -> Result<(), WrappedIoError> {
    write_cgroup_file_str(path, &data.to_string())
}

#[inline]
pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String, WrappedIoError> {
    let path = path.as_ref();
    fs::read_to_string(path).wrap_read(path)
}

/// Removes a cgroup directory together with any child cgroups. A directory
/// that is already gone counts as removed.
pub fn remove_cgroup_dir<P: AsRef<Path>>(path: P) -> Result<(), WrappedIoError> {
    let path = path.as_ref();
    match fs::remove_dir(path) {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(_) => {}
    }

    // child cgroups have to go before their parent
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).wrap_read(path),
    };
    for entry in entries {
        let entry = entry.wrap_read(path)?;
        let entry_path = entry.path();
        if entry.file_type().wrap_other(&entry_path)?.is_dir() {
            remove_cgroup_dir(&entry_path)?;
        }
    }

    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        // control files disappear with rmdir on cgroupfs, so leftovers are regular files
        Err(err) if err.raw_os_error() == Some(Errno::ENOTEMPTY as i32) => {
            fs::remove_dir_all(path).wrap_other(path)
        }
        Err(err) => Err(err).wrap_other(path),
    }
}

/// Attempts to delete the cgroup directory the requested number of times.
/// Exiting processes can keep a cgroup busy for a short while.
pub(crate) fn delete_with_retry<P: AsRef<Path>, L: Into<Option<Duration>>>(
    path: P,
    retries: u32,
    limit_backoff: L,
) -> Result<(), WrappedIoError> {
    let mut attempts = 0;
    let mut delay = Duration::from_millis(10);
    let path = path.as_ref();
    let limit = limit_backoff.into().unwrap_or(Duration::MAX);

    loop {
        match remove_cgroup_dir(path) {
            Ok(()) => return Ok(()),
            Err(err) if attempts + 1 >= retries => return Err(err),
            Err(err) => tracing::debug!(?path, attempts, "retrying cgroup removal: {err}"),
        }

        std::thread::sleep(delay);
        attempts += 1;
        delay *= attempts;
        if delay > limit {
            delay = limit;
        }
    }
}

pub(crate) trait PathBufExt {
    fn join_safely<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf, JoinSafelyError>;
}

#[derive(thiserror::Error, Debug)]
pub enum JoinSafelyError {
    #[error("failed to strip prefix from {path}: {err}")]
    StripPrefix {
        err: StripPrefixError,
        path: PathBuf,
    },
}

impl PathBufExt for PathBuf {
    fn join_safely<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf, JoinSafelyError> {
        let path = path.as_ref();
        if path.is_relative() {
            return Ok(self.join(path));
        }

        let stripped = path
            .strip_prefix("/")
            .map_err(|err| JoinSafelyError::StripPrefix {
                err,
                path: path.to_path_buf(),
            })?;
        Ok(self.join(stripped))
    }
}

pub(crate) trait WrapIoResult {
    type Target;

    fn wrap_create_dir<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_open<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_write<P: Into<PathBuf>, D: Into<String>>(
        self,
        path: P,
        data: D,
    ) -> Result<Self::Target, WrappedIoError>;
    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
}

impl<T> WrapIoResult for Result<T, std::io::Error> {
    type Target = T;

    fn wrap_create_dir<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::CreateDir {
            err,
            path: path.into(),
        })
    }

    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Read {
            err,
            path: path.into(),
        })
    }

    fn wrap_open<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Open {
            err,
            path: path.into(),
        })
    }

    fn wrap_write<P: Into<PathBuf>, D: Into<String>>(
        self,
        path: P,
        data: D,
    ) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Write {
            err,
            path: path.into(),
            data: data.into(),
        })
    }

    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Other {
            err,
            path: path.into(),
        })
    }
}

/// Describes the cgroup a manager should operate on.
#[derive(Clone, Debug)]
pub struct CgroupConfig {
    /// Path of the cgroup relative to the hierarchy roots. Absolute paths are
    /// re-rooted under each hierarchy.
    pub cgroup_path: PathBuf,
    /// Mount point of a unified hierarchy to use instead of the mounts found
    /// in /proc/self/mountinfo.
    pub root: Option<PathBuf>,
    /// Controllers in application order. Defaults to memory, pids, cpu, blkio.
    pub controllers: Option<Vec<ControllerType>>,
}

impl CgroupConfig {
    pub fn new<P: Into<PathBuf>>(cgroup_path: P) -> Self {
        Self {
            cgroup_path: cgroup_path.into(),
            root: None,
            controllers: None,
        }
    }
}

pub fn create_cgroup_manager_with_root(
    root_path: Option<&Path>,
    config: CgroupConfig,
) -> Result<Manager, ResolveError> {
    let roots = match root_path {
        Some(root) => {
            tracing::info!(?root, "using unified hierarchy at explicit root");
            HierarchyRoots::default().with_unified(root)
        }
        None => HierarchyRoots::discover()?,
    };

    let identity = CgroupIdentity::new(config.cgroup_path, roots);
    let manager = match config.controllers {
        Some(controllers) => Manager::with_controllers(identity, controllers),
        None => Manager::new(identity),
    };

    Ok(manager)
}

pub fn create_cgroup_manager(config: CgroupConfig) -> Result<Manager, ResolveError> {
    let root = config.root.clone();
    create_cgroup_manager_with_root(root.as_deref(), config)
}
