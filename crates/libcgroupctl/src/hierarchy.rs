//! Resolution of the directory that holds a controller's files for a cgroup.
//!
//! A controller either has its own legacy (v1) hierarchy, or it is available
//! on the unified (v2) hierarchy, where files carry different names. The
//! resolved [`ControllerPath`] is tagged with the hierarchy so that each
//! controller can pick its file names with a single match.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use procfs::{process::Process, ProcError};

use crate::common::{
    self, JoinSafelyError, PathBufExt, WrapIoResult, WrappedIoError, CGROUP_PROCS,
};
use crate::controller_type::{ControllerType, CONTROLLERS};

pub const CGROUP_CONTROLLERS: &str = "cgroup.controllers";
pub const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// One mount per controller (cgroup v1)
    Legacy,
    /// Single mount for all controllers (cgroup v2)
    Unified,
}

/// Directory that holds the files of one controller for one cgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerPath {
    path: PathBuf,
    mount: PathBuf,
    hierarchy: Hierarchy,
}

impl ControllerPath {
    pub fn new<P: Into<PathBuf>, M: Into<PathBuf>>(
        path: P,
        mount: M,
        hierarchy: Hierarchy,
    ) -> Self {
        Self {
            path: path.into(),
            mount: mount.into(),
            hierarchy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mount point of the hierarchy the path lives in.
    pub fn mount(&self) -> &Path {
        &self.mount
    }

    pub fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    pub fn is_unified(&self) -> bool {
        self.hierarchy == Hierarchy::Unified
    }

    /// Path of a control file inside the cgroup directory.
    pub fn join<P: AsRef<Path>>(&self, file: P) -> PathBuf {
        self.path.join(file)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("{controller} controller is not mounted")]
    NotMounted { controller: ControllerType },
    #[error("failed to read process info from /proc/self: {0}")]
    ReadSelf(ProcError),
    #[error("failed to get mountinfo: {0}")]
    MountInfo(ProcError),
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("invalid cgroup path: {0}")]
    JoinPath(#[from] JoinSafelyError),
}

impl ResolveError {
    /// The controller is not available on this host. Callers treat this as
    /// "feature unavailable" and skip the controller.
    pub fn is_not_mounted(&self) -> bool {
        matches!(self, ResolveError::NotMounted { .. })
    }
}

/// Mount points of the cgroup hierarchies on this host.
#[derive(Debug, Clone, Default)]
pub struct HierarchyRoots {
    legacy: HashMap<ControllerType, PathBuf>,
    unified: Option<PathBuf>,
}

impl HierarchyRoots {
    /// Reads `/proc/self/mountinfo` to find the legacy mount of every supported
    /// controller and the unified mount, if any.
    pub fn discover() -> Result<Self, ResolveError> {
        let mut roots = Self::default();
        let mounts = Process::myself()
            .map_err(ResolveError::ReadSelf)?
            .mountinfo()
            .map_err(ResolveError::MountInfo)?;

        for mount in mounts.into_iter() {
            match mount.fs_type.as_str() {
                "cgroup2" if roots.unified.is_none() => {
                    roots.unified = Some(mount.mount_point);
                }
                "cgroup" => {
                    for controller in CONTROLLERS {
                        let name = controller.legacy_name();
                        // co-mounted hierarchies such as cpu,cpuacct list every
                        // controller in their mount options and directory name
                        let mounted = mount.super_options.contains_key(name)
                            || mount
                                .mount_point
                                .file_name()
                                .and_then(|n| n.to_str())
                                .map(|n| n.split(',').any(|c| c == name))
                                .unwrap_or(false);
                        if mounted {
                            roots
                                .legacy
                                .entry(*controller)
                                .or_insert_with(|| mount.mount_point.clone());
                        }
                    }
                }
                _ => continue,
            }
        }

        tracing::debug!(?roots, "discovered cgroup hierarchies");
        Ok(roots)
    }

    pub fn with_legacy<P: Into<PathBuf>>(mut self, controller: ControllerType, mount: P) -> Self {
        self.legacy.insert(controller, mount.into());
        self
    }

    pub fn with_unified<P: Into<PathBuf>>(mut self, mount: P) -> Self {
        self.unified = Some(mount.into());
        self
    }

    pub fn legacy(&self, controller: ControllerType) -> Option<&Path> {
        self.legacy.get(&controller).map(PathBuf::as_path)
    }

    pub fn unified(&self) -> Option<&Path> {
        self.unified.as_deref()
    }
}

/// Logical cgroup plus the hierarchies it lives in.
#[derive(Debug, Clone)]
pub struct CgroupIdentity {
    cgroup_path: PathBuf,
    roots: HierarchyRoots,
}

impl CgroupIdentity {
    pub fn new<P: Into<PathBuf>>(cgroup_path: P, roots: HierarchyRoots) -> Self {
        Self {
            cgroup_path: cgroup_path.into(),
            roots,
        }
    }

    pub fn cgroup_path(&self) -> &Path {
        &self.cgroup_path
    }

    pub fn roots(&self) -> &HierarchyRoots {
        &self.roots
    }
}

/// Computes the directory for `controller`. The legacy hierarchy of the
/// controller wins; otherwise the unified hierarchy is used if it offers the
/// controller.
pub fn resolve(
    controller: ControllerType,
    identity: &CgroupIdentity,
) -> Result<ControllerPath, ResolveError> {
    let roots = identity.roots();
    if let Some(mount) = roots.legacy(controller) {
        let path = mount.to_path_buf().join_safely(identity.cgroup_path())?;
        return Ok(ControllerPath::new(path, mount, Hierarchy::Legacy));
    }

    if let Some(mount) = roots.unified() {
        let available = available_controllers(mount)?;
        if available.iter().any(|c| c == controller.unified_name()) {
            let path = mount.to_path_buf().join_safely(identity.cgroup_path())?;
            tracing::debug!(%controller, ?path, "using unified hierarchy");
            return Ok(ControllerPath::new(path, mount, Hierarchy::Unified));
        }
    }

    Err(ResolveError::NotMounted { controller })
}

/// Reads `{root_path}/cgroup.controllers` to get the controllers that are
/// available in this cgroup
pub fn available_controllers<P: AsRef<Path>>(root_path: P) -> Result<Vec<String>, WrappedIoError> {
    let controllers_path = root_path.as_ref().join(CGROUP_CONTROLLERS);
    Ok(common::read_cgroup_file(controllers_path)?
        .split_whitespace()
        .map(str::to_owned)
        .collect())
}

/// Creates the cgroup directory. On the unified hierarchy the controller is
/// also enabled in `cgroup.subtree_control` of the mount and every
/// intermediate cgroup.
///
/// Returns the topmost directory this call created, or None if the cgroup
/// already existed. Directories created before a failure are removed again.
pub(crate) fn create_cgroup_dir(
    controller: ControllerType,
    path: &ControllerPath,
) -> Result<Option<PathBuf>, WrappedIoError> {
    let created = path
        .path()
        .ancestors()
        .take_while(|dir| !dir.exists())
        .last()
        .map(Path::to_path_buf);

    let result = if path.is_unified() {
        create_unified_cgroup(controller, path)
    } else {
        fs::create_dir_all(path.path()).wrap_create_dir(path.path())
    };

    if let Err(err) = result {
        remove_created_dir(created.as_deref());
        return Err(err);
    }

    Ok(created)
}

fn create_unified_cgroup(
    controller: ControllerType,
    path: &ControllerPath,
) -> Result<(), WrappedIoError> {
    let relative = path
        .path()
        .strip_prefix(path.mount())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
        .wrap_other(path.path())?;
    let enable = format!("+{}", controller.unified_name());

    let mut current = path.mount().to_path_buf();
    let mut components = relative.components().peekable();
    if components.peek().is_some() {
        common::write_cgroup_file_str(current.join(CGROUP_SUBTREE_CONTROL), &enable)?;
    }

    while let Some(component) = components.next() {
        current.push(component);
        if !current.exists() {
            fs::create_dir(&current).wrap_create_dir(&current)?;
        }

        // the leaf cannot delegate controllers, joining it would fail with EBUSY
        if components.peek().is_some() {
            common::write_cgroup_file_str(current.join(CGROUP_SUBTREE_CONTROL), &enable)?;
        }
    }

    Ok(())
}

/// Removes a directory returned by [`create_cgroup_dir`]. Cgroups that
/// existed before are left alone, they may hold other controllers' limits.
pub(crate) fn remove_created_dir(created: Option<&Path>) {
    let Some(dir) = created else {
        return;
    };

    if let Err(err) = common::remove_cgroup_dir(dir) {
        tracing::warn!(path = ?dir, "failed to remove cgroup: {err}");
    }
}

/// Attaches `pid` to the cgroup.
pub(crate) fn join(path: &ControllerPath, pid: Pid) -> Result<(), WrappedIoError> {
    common::write_cgroup_file(path.join(CGROUP_PROCS), pid)
}
