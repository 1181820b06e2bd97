use std::time::Duration;

use nix::unistd::Pid;
use oci_spec::runtime::LinuxResources;

use crate::common::{self, ControllerOpt, WrappedIoError};
use crate::controller_type::ControllerType;
use crate::hierarchy::{self, CgroupIdentity, ControllerPath, ResolveError};

/// Operations every resource controller supports.
pub trait Controller {
    type Error: From<WrappedIoError> + From<ResolveError>;

    const CONTROLLER: ControllerType;

    fn name() -> ControllerType {
        Self::CONTROLLER
    }

    /// Resolves the cgroup directory of this controller, or None if the
    /// controller is not mounted.
    fn path(identity: &CgroupIdentity) -> Result<Option<ControllerPath>, ResolveError> {
        match hierarchy::resolve(Self::CONTROLLER, identity) {
            Ok(path) => Ok(Some(path)),
            Err(err) if err.is_not_mounted() => {
                tracing::debug!(controller = %Self::CONTROLLER, "controller not mounted, skipping");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Applies the resource restrictions to the cgroup and attaches the
    /// process to it
    fn apply(controller_opt: &ControllerOpt, identity: &CgroupIdentity) -> Result<(), Self::Error>;

    /// Writes the configured limits into an existing cgroup. Unset fields
    /// are not written.
    fn set(path: &ControllerPath, resources: &LinuxResources) -> Result<(), Self::Error>;

    /// Adds a new task specified by its pid to the cgroup
    fn add_task(pid: Pid, path: &ControllerPath) -> Result<(), Self::Error> {
        hierarchy::create_cgroup_dir(Self::CONTROLLER, path)?;
        hierarchy::join(path, pid)?;
        Ok(())
    }

    /// Removes the cgroup directory. Succeeds if it is already gone or the
    /// controller is not mounted.
    fn remove(identity: &CgroupIdentity) -> Result<(), Self::Error> {
        let Some(path) = Self::path(identity)? else {
            return Ok(());
        };

        tracing::debug!(controller = %Self::CONTROLLER, path = ?path.path(), "removing cgroup");
        common::delete_with_retry(path.path(), 4, Duration::from_millis(100))?;
        Ok(())
    }
}
