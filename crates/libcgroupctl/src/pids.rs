use std::num::ParseIntError;

use oci_spec::runtime::{LinuxPids, LinuxResources};

use crate::common::{self, ControllerOpt, WrappedIoError};
use crate::controller::Controller;
use crate::controller_type::ControllerType;
use crate::hierarchy::{self, CgroupIdentity, ControllerPath, ResolveError};
use crate::stats::{PidStats, StatsProvider};

// Contains the maximum allowed number of active pids
const CGROUP_PIDS_MAX: &str = "pids.max";
// Contains the current number of active pids
const CGROUP_PIDS_CURRENT: &str = "pids.current";

#[derive(thiserror::Error, Debug)]
pub enum PidsControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("failed to resolve pids cgroup: {0}")]
    Resolve(#[from] ResolveError),
}

pub struct Pids {}

impl Controller for Pids {
    type Error = PidsControllerError;

    const CONTROLLER: ControllerType = ControllerType::Pids;

    fn apply(controller_opt: &ControllerOpt, identity: &CgroupIdentity) -> Result<(), Self::Error> {
        let Some(path) = Self::path(identity)? else {
            return Ok(());
        };

        tracing::debug!("apply pids cgroup config");
        if Self::needs_to_handle(controller_opt.resources).is_some() {
            hierarchy::create_cgroup_dir(Self::CONTROLLER, &path)?;
            Self::set(&path, controller_opt.resources)?;
        }

        Self::add_task(controller_opt.pid, &path)
    }

    fn set(path: &ControllerPath, resources: &LinuxResources) -> Result<(), Self::Error> {
        if let Some(pids) = Self::needs_to_handle(resources) {
            Self::set_limit(path, pids)?;
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PidStatsError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("failed to parse current pids: {0}")]
    ParseCurrent(ParseIntError),
    #[error("failed to parse pids limit: {0}")]
    ParseLimit(ParseIntError),
}

impl StatsProvider for Pids {
    type Error = PidStatsError;
    type Stats = PidStats;

    fn stats(path: &ControllerPath) -> Result<Self::Stats, Self::Error> {
        let mut stats = PidStats::default();

        let current = common::read_cgroup_file(path.join(CGROUP_PIDS_CURRENT))?;
        stats.current = current
            .trim()
            .parse()
            .map_err(PidStatsError::ParseCurrent)?;

        let limit =
            common::read_cgroup_file(path.join(CGROUP_PIDS_MAX)).map(|l| l.trim().to_owned())?;
        if limit != "max" {
            stats.limit = limit.parse().map_err(PidStatsError::ParseLimit)?;
        }

        Ok(stats)
    }
}

impl Pids {
    fn needs_to_handle(resources: &LinuxResources) -> Option<&LinuxPids> {
        resources.pids().as_ref().filter(|pids| pids.limit() != 0)
    }

    fn set_limit(path: &ControllerPath, pids: &LinuxPids) -> Result<(), WrappedIoError> {
        // a negative limit lifts the restriction
        let limit = if pids.limit() > 0 {
            pids.limit().to_string()
        } else {
            "max".to_string()
        };

        common::write_cgroup_file_str(path.join(CGROUP_PIDS_MAX), &limit)
    }
}
