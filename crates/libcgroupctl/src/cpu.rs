use std::borrow::Cow;
use std::path::{Path, PathBuf};

use oci_spec::runtime::{LinuxCpu, LinuxResources};

use crate::common::{self, ControllerOpt, WrappedIoError};
use crate::controller::Controller;
use crate::controller_type::ControllerType;
use crate::hierarchy::{self, CgroupIdentity, ControllerPath, Hierarchy, ResolveError};
use crate::stats::{self, CpuStats, ParseFlatKeyedDataError, StatsProvider};

const CGROUP_CPU_SHARES: &str = "cpu.shares";
const CGROUP_CPU_QUOTA: &str = "cpu.cfs_quota_us";
const CGROUP_CPU_PERIOD: &str = "cpu.cfs_period_us";
// present when cpuacct is co-mounted with cpu
const CGROUP_CPUACCT_USAGE: &str = "cpuacct.usage";

const CGROUP_CPU_WEIGHT: &str = "cpu.weight";
const CGROUP_CPU_MAX: &str = "cpu.max";
const UNRESTRICTED_QUOTA: &str = "max";
const MAX_CPU_WEIGHT: u64 = 10000;
const MAX_CPU_SHARES: u64 = 262144;

const CPU_STAT: &str = "cpu.stat";

#[derive(thiserror::Error, Debug)]
pub enum CpuControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("failed to resolve cpu cgroup: {0}")]
    Resolve(#[from] ResolveError),
}

pub struct Cpu {}

impl Controller for Cpu {
    type Error = CpuControllerError;

    const CONTROLLER: ControllerType = ControllerType::Cpu;

    fn apply(controller_opt: &ControllerOpt, identity: &CgroupIdentity) -> Result<(), Self::Error> {
        let Some(path) = Self::path(identity)? else {
            return Ok(());
        };

        tracing::debug!("apply cpu cgroup config");
        if Self::needs_to_handle(controller_opt.resources).is_some() {
            hierarchy::create_cgroup_dir(Self::CONTROLLER, &path)?;
            Self::set(&path, controller_opt.resources)?;
        }

        Self::add_task(controller_opt.pid, &path)
    }

    fn set(path: &ControllerPath, resources: &LinuxResources) -> Result<(), Self::Error> {
        let Some(cpu) = Self::needs_to_handle(resources) else {
            return Ok(());
        };

        match path.hierarchy() {
            Hierarchy::Legacy => Self::set_legacy(path.path(), cpu)?,
            Hierarchy::Unified => Self::set_unified(path.path(), cpu)?,
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CpuStatsError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("while parsing stat table: {0}")]
    ParseFlatKeyedData(#[from] ParseFlatKeyedDataError),
    #[error("missing field {field} from {path}")]
    MissingField { field: &'static str, path: PathBuf },
}

impl StatsProvider for Cpu {
    type Error = CpuStatsError;
    type Stats = CpuStats;

    fn stats(path: &ControllerPath) -> Result<Self::Stats, Self::Error> {
        let mut stats = CpuStats::default();
        let stats_path = path.join(CPU_STAT);

        let stats_table = match stats::parse_flat_keyed_data(&stats_path) {
            Ok(table) => table,
            Err(err) if err.is_not_found() => return Ok(stats),
            Err(err) => return Err(err.into()),
        };

        macro_rules! get {
            ($name: expr => $field1:ident.$field2:ident) => {
                stats.$field1.$field2 =
                    *stats_table
                        .get($name)
                        .ok_or_else(|| CpuStatsError::MissingField {
                            field: $name,
                            path: stats_path.clone(),
                        })?;
            };
        }

        get!("nr_periods" => throttling.periods);
        get!("nr_throttled" => throttling.throttled_periods);

        match path.hierarchy() {
            Hierarchy::Unified => {
                get!("usage_usec" => usage.usage_total);
                get!("user_usec" => usage.usage_user);
                get!("system_usec" => usage.usage_kernel);
                get!("throttled_usec" => throttling.throttled_time);
            }
            Hierarchy::Legacy => {
                get!("throttled_time" => throttling.throttled_time);
                stats.usage.usage_total =
                    stats::parse_optional_value(&path.join(CGROUP_CPUACCT_USAGE))?;
            }
        }

        Ok(stats)
    }
}

impl Cpu {
    fn needs_to_handle(resources: &LinuxResources) -> Option<&LinuxCpu> {
        resources
            .cpu()
            .as_ref()
            .filter(|cpu| {
                cpu.shares().unwrap_or(0) != 0
                    || cpu.quota().unwrap_or(0) != 0
                    || cpu.period().unwrap_or(0) != 0
            })
    }

    fn set_legacy(root_path: &Path, cpu: &LinuxCpu) -> Result<(), WrappedIoError> {
        if let Some(cpu_shares) = cpu.shares().filter(|s| *s != 0) {
            common::write_cgroup_file(root_path.join(CGROUP_CPU_SHARES), cpu_shares)?;
        }

        if let Some(cpu_period) = cpu.period().filter(|p| *p != 0) {
            common::write_cgroup_file(root_path.join(CGROUP_CPU_PERIOD), cpu_period)?;
        }

        if let Some(cpu_quota) = cpu.quota().filter(|q| *q != 0) {
            common::write_cgroup_file(root_path.join(CGROUP_CPU_QUOTA), cpu_quota)?;
        }

        Ok(())
    }

    fn set_unified(path: &Path, cpu: &LinuxCpu) -> Result<(), WrappedIoError> {
        if let Some(shares) = cpu.shares() {
            let weight = Self::convert_shares_to_cgroup2(shares);
            if weight != 0 {
                common::write_cgroup_file(path.join(CGROUP_CPU_WEIGHT), weight)?;
            }
        }

        // format is 'quota period', the kernel default is 'max 100000'
        let cpu_max_file = path.join(CGROUP_CPU_MAX);
        let quota = cpu.quota().filter(|q| *q != 0);
        let period = cpu.period().filter(|p| *p != 0);
        let new_cpu_max: Option<Cow<str>> = match (quota, period) {
            (None, Some(period)) => Self::create_period_only_value(&cpu_max_file, period)?,
            (Some(quota), None) if quota > 0 => Some(quota.to_string().into()),
            (Some(_), None) => Some(UNRESTRICTED_QUOTA.into()),
            (Some(quota), Some(period)) if quota > 0 => Some(format!("{quota} {period}").into()),
            (Some(_), Some(period)) => Some(format!("{UNRESTRICTED_QUOTA} {period}").into()),
            (None, None) => None,
        };

        if let Some(cpu_max) = new_cpu_max {
            common::write_cgroup_file_str(&cpu_max_file, &cpu_max)?;
        }

        Ok(())
    }

    /// Maps cpu shares in [2, 262144] onto cpu weight in [1, 10000].
    fn convert_shares_to_cgroup2(shares: u64) -> u64 {
        if shares == 0 {
            return 0;
        }

        let shares = shares.min(MAX_CPU_SHARES);
        let weight = 1 + ((shares.saturating_sub(2)) * 9999) / 262142;
        weight.min(MAX_CPU_WEIGHT)
    }

    fn create_period_only_value(
        cpu_max_file: &Path,
        period: u64,
    ) -> Result<Option<Cow<'static, str>>, WrappedIoError> {
        let old_cpu_max = common::read_cgroup_file(cpu_max_file)?;
        if let Some(old_quota) = old_cpu_max.split_whitespace().next() {
            return Ok(Some(format!("{old_quota} {period}").into()));
        }
        Ok(None)
    }
}
