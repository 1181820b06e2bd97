use nix::unistd::Pid;
use oci_spec::runtime::LinuxResources;
use tracing::Dispatch;

use crate::blkio::{Blkio, BlkioControllerError, BlkioStatsError};
use crate::common::ControllerOpt;
use crate::controller::Controller;
use crate::controller_type::{ControllerType, CONTROLLERS};
use crate::cpu::{Cpu, CpuControllerError, CpuStatsError};
use crate::hierarchy::{CgroupIdentity, ResolveError};
use crate::memory::{Memory, MemoryControllerError, MemoryStatsError};
use crate::pids::{PidStatsError, Pids, PidsControllerError};
use crate::stats::{Stats, StatsProvider};

#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("memory controller: {0}")]
    Memory(#[from] MemoryControllerError),
    #[error("pids controller: {0}")]
    Pids(#[from] PidsControllerError),
    #[error("cpu controller: {0}")]
    Cpu(#[from] CpuControllerError),
    #[error("blkio controller: {0}")]
    Blkio(#[from] BlkioControllerError),
}

impl ManagerError {
    /// Controller that produced the error.
    pub fn controller(&self) -> ControllerType {
        match self {
            Self::Memory(_) => ControllerType::Memory,
            Self::Pids(_) => ControllerType::Pids,
            Self::Cpu(_) => ControllerType::Cpu,
            Self::Blkio(_) => ControllerType::Blkio,
        }
    }
}

/// Every removal failure of one [`Manager::remove`] call.
#[derive(thiserror::Error, Debug)]
#[error("failed to remove cgroup: {}", join_errors(.failures))]
pub struct RemoveError {
    pub failures: Vec<ManagerError>,
}

fn join_errors(errors: &[ManagerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(thiserror::Error, Debug)]
pub enum StatsError {
    #[error("failed to resolve cgroup: {0}")]
    Resolve(#[from] ResolveError),
    #[error("memory stats: {0}")]
    Memory(#[from] MemoryStatsError),
    #[error("pids stats: {0}")]
    Pids(#[from] PidStatsError),
    #[error("cpu stats: {0}")]
    Cpu(#[from] CpuStatsError),
    #[error("blkio stats: {0}")]
    Blkio(#[from] BlkioStatsError),
}

#[derive(Debug)]
pub struct ControllerFailure {
    pub controller: ControllerType,
    pub error: StatsError,
}

/// Statistics of every mounted controller, plus the controllers whose
/// statistics could not be read.
#[derive(Debug, Default)]
pub struct CollectedStats {
    pub stats: Stats,
    pub failures: Vec<ControllerFailure>,
}

/// Applies resource limits through an ordered list of controllers.
#[derive(Debug, Clone)]
pub struct Manager {
    identity: CgroupIdentity,
    controllers: Vec<ControllerType>,
    dispatch: Option<Dispatch>,
}

impl Manager {
    /// Manages all supported controllers in the default order.
    pub fn new(identity: CgroupIdentity) -> Self {
        Self::with_controllers(identity, CONTROLLERS.to_vec())
    }

    pub fn with_controllers(identity: CgroupIdentity, controllers: Vec<ControllerType>) -> Self {
        Self {
            identity,
            controllers,
            dispatch: None,
        }
    }

    /// Sends every event the manager and its controllers emit to `dispatch`
    /// instead of the default subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn identity(&self) -> &CgroupIdentity {
        &self.identity
    }

    pub fn controllers(&self) -> &[ControllerType] {
        &self.controllers
    }

    fn observe<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    /// Applies the limits of every controller in order and attaches the
    /// process. Stops at the first failure; controllers that were already
    /// applied are left in place.
    pub fn apply(&self, controller_opt: &ControllerOpt) -> Result<(), ManagerError> {
        self.observe(|| self.apply_controllers(controller_opt))
    }

    /// Writes new limits into the existing cgroups without attaching any
    /// process.
    pub fn update(&self, resources: &LinuxResources) -> Result<(), ManagerError> {
        self.observe(|| self.update_controllers(resources))
    }

    /// Attaches `pid` to the cgroup of every mounted controller.
    pub fn add_task(&self, pid: Pid) -> Result<(), ManagerError> {
        self.observe(|| self.add_task_to_controllers(pid))
    }

    /// Removes the cgroup from every controller. A failure does not stop the
    /// remaining removals.
    pub fn remove(&self) -> Result<(), RemoveError> {
        self.observe(|| self.remove_controllers())
    }

    /// Reads the statistics of every mounted controller.
    pub fn stats(&self) -> CollectedStats {
        self.observe(|| self.collect_stats())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(cgroup = ?self.identity.cgroup_path(), pid = %controller_opt.pid))]
    fn apply_controllers(&self, controller_opt: &ControllerOpt) -> Result<(), ManagerError> {
        for controller in &self.controllers {
            tracing::debug!(%controller, "applying controller");
            match controller {
                ControllerType::Memory => Memory::apply(controller_opt, &self.identity)?,
                ControllerType::Pids => Pids::apply(controller_opt, &self.identity)?,
                ControllerType::Cpu => Cpu::apply(controller_opt, &self.identity)?,
                ControllerType::Blkio => Blkio::apply(controller_opt, &self.identity)?,
            }
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(cgroup = ?self.identity.cgroup_path()))]
    fn update_controllers(&self, resources: &LinuxResources) -> Result<(), ManagerError> {
        for controller in &self.controllers {
            match controller {
                ControllerType::Memory => update::<Memory>(&self.identity, resources)?,
                ControllerType::Pids => update::<Pids>(&self.identity, resources)?,
                ControllerType::Cpu => update::<Cpu>(&self.identity, resources)?,
                ControllerType::Blkio => update::<Blkio>(&self.identity, resources)?,
            }
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(cgroup = ?self.identity.cgroup_path(), pid = %pid))]
    fn add_task_to_controllers(&self, pid: Pid) -> Result<(), ManagerError> {
        for controller in &self.controllers {
            match controller {
                ControllerType::Memory => add_task::<Memory>(&self.identity, pid)?,
                ControllerType::Pids => add_task::<Pids>(&self.identity, pid)?,
                ControllerType::Cpu => add_task::<Cpu>(&self.identity, pid)?,
                ControllerType::Blkio => add_task::<Blkio>(&self.identity, pid)?,
            }
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(cgroup = ?self.identity.cgroup_path()))]
    fn remove_controllers(&self) -> Result<(), RemoveError> {
        let mut failures = Vec::new();
        for controller in &self.controllers {
            let result = match controller {
                ControllerType::Memory => Memory::remove(&self.identity).map_err(ManagerError::from),
                ControllerType::Pids => Pids::remove(&self.identity).map_err(ManagerError::from),
                ControllerType::Cpu => Cpu::remove(&self.identity).map_err(ManagerError::from),
                ControllerType::Blkio => Blkio::remove(&self.identity).map_err(ManagerError::from),
            };

            if let Err(err) = result {
                tracing::warn!(%controller, "failed to remove cgroup: {err}");
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RemoveError { failures })
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(cgroup = ?self.identity.cgroup_path()))]
    fn collect_stats(&self) -> CollectedStats {
        let mut collected = CollectedStats::default();
        for controller in &self.controllers {
            let controller = *controller;
            let result = match controller {
                ControllerType::Memory => {
                    stats::<Memory>(&self.identity).map(|s| collected.stats.memory = s)
                }
                ControllerType::Pids => {
                    stats::<Pids>(&self.identity).map(|s| collected.stats.pids = s)
                }
                ControllerType::Cpu => stats::<Cpu>(&self.identity).map(|s| collected.stats.cpu = s),
                ControllerType::Blkio => {
                    stats::<Blkio>(&self.identity).map(|s| collected.stats.blkio = s)
                }
            };

            if let Err(error) = result {
                tracing::warn!(%controller, "failed to read stats: {error}");
                collected.failures.push(ControllerFailure { controller, error });
            }
        }

        collected
    }
}

fn update<C: Controller>(identity: &CgroupIdentity, resources: &LinuxResources) -> Result<(), C::Error> {
    if let Some(path) = C::path(identity)? {
        C::set(&path, resources)?;
    }

    Ok(())
}

fn add_task<C: Controller>(identity: &CgroupIdentity, pid: Pid) -> Result<(), C::Error> {
    if let Some(path) = C::path(identity)? {
        C::add_task(pid, &path)?;
    }

    Ok(())
}

fn stats<C>(identity: &CgroupIdentity) -> Result<Option<C::Stats>, StatsError>
where
    C: Controller + StatsProvider,
    StatsError: From<<C as StatsProvider>::Error>,
{
    let Some(path) = C::path(identity)? else {
        return Ok(None);
    };

    Ok(Some(C::stats(&path)?))
}
