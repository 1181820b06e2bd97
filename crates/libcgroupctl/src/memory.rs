use std::path::Path;

use nix::errno::Errno;
use oci_spec::runtime::{LinuxMemory, LinuxResources};

use crate::common::{self, ControllerOpt, WrappedIoError};
use crate::controller::Controller;
use crate::controller_type::ControllerType;
use crate::hierarchy::{self, CgroupIdentity, ControllerPath, Hierarchy, ResolveError};
use crate::stats::{self, MemoryStats, ParseFlatKeyedDataError, StatsProvider};

// legacy hierarchy
const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const CGROUP_MEMORY_RESERVATION: &str = "memory.soft_limit_in_bytes";
const CGROUP_MEMORY_SWAP_LIMIT: &str = "memory.memsw.limit_in_bytes";
const CGROUP_KERNEL_MEMORY_LIMIT: &str = "memory.kmem.limit_in_bytes";
const CGROUP_MEMORY_SWAPPINESS: &str = "memory.swappiness";
const CGROUP_MEMORY_OOM_CONTROL: &str = "memory.oom_control";
const CGROUP_MEMORY_USAGE: &str = "memory.usage_in_bytes";
const CGROUP_MEMORY_SWAP_USAGE: &str = "memory.memsw.usage_in_bytes";

// unified hierarchy
const CGROUP_MEMORY_MAX: &str = "memory.max";
const CGROUP_MEMORY_LOW: &str = "memory.low";
const CGROUP_MEMORY_SWAP: &str = "memory.swap.max";
const CGROUP_MEMORY_CURRENT: &str = "memory.current";
const CGROUP_MEMORY_SWAP_CURRENT: &str = "memory.swap.current";

// Shows various memory statistics
const MEMORY_STAT: &str = "memory.stat";

#[derive(thiserror::Error, Debug)]
pub enum MemoryControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("failed to resolve memory cgroup: {0}")]
    Resolve(#[from] ResolveError),
    #[error("invalid memory value {0}")]
    MemoryValue(i64),
    #[error("invalid swap value {0}")]
    SwapValue(i64),
    #[error("invalid swappiness value: {supplied}. valid range is 0-100")]
    SwappinessOutOfRange { supplied: u64 },
    #[error("unable to set memory limit to {target} (current usage: {current})")]
    UnableToSet { target: i64, current: u64 },
}

pub struct Memory {}

impl Controller for Memory {
    type Error = MemoryControllerError;

    const CONTROLLER: ControllerType = ControllerType::Memory;

    #[tracing::instrument(level = "debug", skip_all, fields(pid = %controller_opt.pid))]
    fn apply(controller_opt: &ControllerOpt, identity: &CgroupIdentity) -> Result<(), Self::Error> {
        let Some(path) = Self::path(identity)? else {
            return Ok(());
        };

        // limits go in before the process joins, kmem can only be set on an empty cgroup
        let mut created = None;
        if Self::needs_to_handle(controller_opt.resources).is_some() {
            created = hierarchy::create_cgroup_dir(Self::CONTROLLER, &path)?;
            if let Err(err) = Self::set(&path, controller_opt.resources) {
                hierarchy::remove_created_dir(created.as_deref());
                return Err(err);
            }
        }

        let joined = hierarchy::create_cgroup_dir(Self::CONTROLLER, &path).and_then(|dir| {
            created = created.take().or(dir);
            hierarchy::join(&path, controller_opt.pid)
        });
        if let Err(err) = joined {
            hierarchy::remove_created_dir(created.as_deref());
            return Err(err.into());
        }

        Ok(())
    }

    fn set(path: &ControllerPath, resources: &LinuxResources) -> Result<(), Self::Error> {
        let Some(memory) = Self::needs_to_handle(resources) else {
            return Ok(());
        };

        tracing::debug!(path = ?path.path(), "set memory cgroup config");
        match path.hierarchy() {
            Hierarchy::Legacy => Self::set_legacy(path.path(), memory),
            Hierarchy::Unified => Self::set_unified(path.path(), memory),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MemoryStatsError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("error parsing stat data: {0}")]
    Parse(#[from] ParseFlatKeyedDataError),
}

impl StatsProvider for Memory {
    type Error = MemoryStatsError;
    type Stats = MemoryStats;

    fn stats(path: &ControllerPath) -> Result<Self::Stats, Self::Error> {
        let stats = match stats::parse_flat_keyed_data(&path.join(MEMORY_STAT)) {
            Ok(stats) => stats,
            Err(err) if err.is_not_found() => return Ok(MemoryStats::default()),
            Err(err) => return Err(err.into()),
        };

        let memory_stats = match path.hierarchy() {
            Hierarchy::Unified => MemoryStats {
                usage: stats::parse_single_value(&path.join(CGROUP_MEMORY_CURRENT))?,
                swap_usage: stats::parse_optional_value(&path.join(CGROUP_MEMORY_SWAP_CURRENT))?,
                cache: stats.get("file").copied().unwrap_or_default(),
                stats,
            },
            Hierarchy::Legacy => {
                let usage = stats::parse_single_value(&path.join(CGROUP_MEMORY_USAGE))?;
                // memsw accounts memory and swap together
                let memsw = stats::parse_optional_value(&path.join(CGROUP_MEMORY_SWAP_USAGE))?;
                MemoryStats {
                    usage,
                    swap_usage: memsw.saturating_sub(usage),
                    cache: stats.get("cache").copied().unwrap_or_default(),
                    stats,
                }
            }
        };

        Ok(memory_stats)
    }
}

impl Memory {
    /// Returns the memory configuration if any of its fields asks for a write.
    fn needs_to_handle(resources: &LinuxResources) -> Option<&LinuxMemory> {
        resources.memory().as_ref().filter(|memory| {
            let set = |value: Option<i64>| value.map(|v| v != 0).unwrap_or(false);
            set(memory.limit())
                || set(memory.reservation())
                || set(memory.swap())
                || set(memory.kernel())
                || memory.swappiness().is_some()
                || memory.disable_oom_killer() == Some(true)
        })
    }

    fn set_legacy(path: &Path, memory: &LinuxMemory) -> Result<(), MemoryControllerError> {
        let limit = memory.limit().filter(|v| *v != 0);
        let swap = memory.swap().filter(|v| *v != 0);

        match (limit, swap) {
            (Some(limit), Some(swap)) => {
                // the kernel rejects a limit above memsw and a memsw below the limit,
                // so raising both has to start with swap
                let current = stats::parse_single_value(&path.join(CGROUP_MEMORY_LIMIT))?;
                if swap == -1 || swap as u64 > current {
                    Self::set_swap(path, swap)?;
                    Self::set_limit(path, limit)?;
                } else {
                    Self::set_limit(path, limit)?;
                    Self::set_swap(path, swap)?;
                }
            }
            (Some(limit), None) => Self::set_limit(path, limit)?,
            (None, Some(swap)) => Self::set_swap(path, swap)?,
            (None, None) => {}
        }

        if let Some(reservation) = memory.reservation().filter(|v| *v != 0) {
            common::write_cgroup_file(path.join(CGROUP_MEMORY_RESERVATION), reservation)?;
        }

        if let Some(kmem) = memory.kernel().filter(|v| *v != 0) {
            common::write_cgroup_file(path.join(CGROUP_KERNEL_MEMORY_LIMIT), kmem)?;
        }

        if let Some(swappiness) = memory.swappiness() {
            if swappiness > 100 {
                return Err(MemoryControllerError::SwappinessOutOfRange {
                    supplied: swappiness,
                });
            }
            common::write_cgroup_file(path.join(CGROUP_MEMORY_SWAPPINESS), swappiness)?;
        }

        if memory.disable_oom_killer() == Some(true) {
            common::write_cgroup_file_str(path.join(CGROUP_MEMORY_OOM_CONTROL), "1")?;
        }

        Ok(())
    }

    fn set_limit(path: &Path, limit: i64) -> Result<(), MemoryControllerError> {
        if limit < -1 {
            return Err(MemoryControllerError::MemoryValue(limit));
        }

        match common::write_cgroup_file(path.join(CGROUP_MEMORY_LIMIT), limit) {
            Ok(()) => Ok(()),
            // the kernel refuses a limit below the current usage with EBUSY
            Err(err) if err.inner().raw_os_error() == Some(Errno::EBUSY as i32) => {
                let current = stats::parse_single_value(&path.join(CGROUP_MEMORY_USAGE))?;
                Err(MemoryControllerError::UnableToSet {
                    target: limit,
                    current,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_swap(path: &Path, swap: i64) -> Result<(), MemoryControllerError> {
        if swap < -1 {
            return Err(MemoryControllerError::SwapValue(swap));
        }

        common::write_cgroup_file(path.join(CGROUP_MEMORY_SWAP_LIMIT), swap)?;
        Ok(())
    }

    fn write_unified<P: AsRef<Path>>(path: P, val: i64) -> Result<(), WrappedIoError> {
        if val == 0 {
            Ok(())
        } else if val == -1 {
            common::write_cgroup_file_str(path, "max")
        } else {
            common::write_cgroup_file(path, val)
        }
    }

    fn set_unified(path: &Path, memory: &LinuxMemory) -> Result<(), MemoryControllerError> {
        let limit = memory.limit().unwrap_or(0);
        let swap = memory.swap().unwrap_or(0);
        if limit < -1 {
            return Err(MemoryControllerError::MemoryValue(limit));
        }
        if swap < -1 {
            return Err(MemoryControllerError::SwapValue(swap));
        }

        Self::write_unified(path.join(CGROUP_MEMORY_MAX), limit)?;

        if let Some(reservation) = memory.reservation() {
            if reservation < -1 {
                return Err(MemoryControllerError::MemoryValue(reservation));
            }
            Self::write_unified(path.join(CGROUP_MEMORY_LOW), reservation)?;
        }

        // memory.swap.max takes the swap limit alone, not memory and swap combined
        Self::write_unified(path.join(CGROUP_MEMORY_SWAP), swap)?;

        if memory.kernel().filter(|v| *v != 0).is_some() {
            tracing::warn!("kernel memory limit is not supported on the unified hierarchy, skipping");
        }
        if memory.swappiness().is_some() {
            tracing::warn!("swappiness is not supported on the unified hierarchy, skipping");
        }
        if memory.disable_oom_killer() == Some(true) {
            tracing::warn!("disabling the oom killer is not supported on the unified hierarchy, skipping");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, read_to_string};

    use nix::unistd::Pid;
    use oci_spec::runtime::{LinuxMemoryBuilder, LinuxResourcesBuilder};

    use super::*;
    use crate::common::CGROUP_PROCS;
    use crate::hierarchy::{HierarchyRoots, CGROUP_CONTROLLERS, CGROUP_SUBTREE_CONTROL};
    use crate::test::{set_fixture, set_fixtures};

    const LEGACY_FILES: &[&str] = &[
        CGROUP_MEMORY_LIMIT,
        CGROUP_MEMORY_RESERVATION,
        CGROUP_MEMORY_SWAP_LIMIT,
        CGROUP_KERNEL_MEMORY_LIMIT,
        CGROUP_MEMORY_SWAPPINESS,
        CGROUP_MEMORY_OOM_CONTROL,
    ];

    const UNIFIED_FILES: &[&str] = &[CGROUP_MEMORY_MAX, CGROUP_MEMORY_LOW, CGROUP_MEMORY_SWAP];

    fn resources(memory: LinuxMemory) -> LinuxResources {
        LinuxResourcesBuilder::default()
            .memory(memory)
            .build()
            .unwrap()
    }

    fn legacy_path(dir: &Path) -> ControllerPath {
        ControllerPath::new(dir, dir, Hierarchy::Legacy)
    }

    fn unified_path(dir: &Path) -> ControllerPath {
        ControllerPath::new(dir, dir, Hierarchy::Unified)
    }

    #[test]
    fn test_set_legacy_limit() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), LEGACY_FILES).unwrap();
        let memory = LinuxMemoryBuilder::default().limit(1024).build().unwrap();

        Memory::set(&legacy_path(tmp.path()), &resources(memory)).expect("set memory");

        let content = read_to_string(tmp.path().join(CGROUP_MEMORY_LIMIT)).unwrap();
        assert_eq!(content, "1024");
        let swap = read_to_string(tmp.path().join(CGROUP_MEMORY_SWAP_LIMIT)).unwrap();
        assert_eq!(swap, "");
    }

    #[test]
    fn test_set_legacy_memory_and_swap() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), LEGACY_FILES).unwrap();
        set_fixture(tmp.path(), CGROUP_MEMORY_LIMIT, "0").unwrap();
        let memory = LinuxMemoryBuilder::default()
            .limit(1024)
            .swap(2048)
            .build()
            .unwrap();

        Memory::set(&legacy_path(tmp.path()), &resources(memory)).expect("set memory");

        let limit = read_to_string(tmp.path().join(CGROUP_MEMORY_LIMIT)).unwrap();
        assert_eq!(limit, "1024");
        let swap = read_to_string(tmp.path().join(CGROUP_MEMORY_SWAP_LIMIT)).unwrap();
        assert_eq!(swap, "2048");
    }

    #[test]
    fn test_set_legacy_knobs() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), LEGACY_FILES).unwrap();
        let memory = LinuxMemoryBuilder::default()
            .reservation(512)
            .kernel(4096)
            .swappiness(0u64)
            .disable_oom_killer(true)
            .build()
            .unwrap();

        Memory::set(&legacy_path(tmp.path()), &resources(memory)).expect("set memory");

        let read = |file: &str| read_to_string(tmp.path().join(file)).unwrap();
        assert_eq!(read(CGROUP_MEMORY_RESERVATION), "512");
        assert_eq!(read(CGROUP_KERNEL_MEMORY_LIMIT), "4096");
        assert_eq!(read(CGROUP_MEMORY_SWAPPINESS), "0");
        assert_eq!(read(CGROUP_MEMORY_OOM_CONTROL), "1");
        assert_eq!(read(CGROUP_MEMORY_LIMIT), "");
    }

    #[test]
    fn test_set_legacy_swappiness_out_of_range() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), LEGACY_FILES).unwrap();
        let memory = LinuxMemoryBuilder::default()
            .swappiness(101u64)
            .build()
            .unwrap();

        let err = Memory::set(&legacy_path(tmp.path()), &resources(memory)).unwrap_err();
        assert!(matches!(
            err,
            MemoryControllerError::SwappinessOutOfRange { supplied: 101 }
        ));
    }

    #[test]
    fn test_set_unified() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), UNIFIED_FILES).unwrap();
        let memory = LinuxMemoryBuilder::default()
            .limit(1024)
            .swap(3072)
            .reservation(512)
            .build()
            .unwrap();

        Memory::set(&unified_path(tmp.path()), &resources(memory)).expect("set memory");

        let read = |file: &str| read_to_string(tmp.path().join(file)).unwrap();
        assert_eq!(read(CGROUP_MEMORY_MAX), "1024");
        assert_eq!(read(CGROUP_MEMORY_SWAP), "3072");
        assert_eq!(read(CGROUP_MEMORY_LOW), "512");
    }

    #[test]
    fn test_set_unified_unlimited() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), UNIFIED_FILES).unwrap();
        let memory = LinuxMemoryBuilder::default().limit(-1).build().unwrap();

        Memory::set(&unified_path(tmp.path()), &resources(memory)).expect("set memory");

        let content = read_to_string(tmp.path().join(CGROUP_MEMORY_MAX)).unwrap();
        assert_eq!(content, "max");
    }

    #[test]
    fn test_set_unified_swap_below_limit() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), UNIFIED_FILES).unwrap();
        let memory = LinuxMemoryBuilder::default()
            .limit(2048)
            .swap(1024)
            .build()
            .unwrap();

        Memory::set(&unified_path(tmp.path()), &resources(memory)).expect("set memory");

        let read = |file: &str| read_to_string(tmp.path().join(file)).unwrap();
        assert_eq!(read(CGROUP_MEMORY_MAX), "2048");
        assert_eq!(read(CGROUP_MEMORY_SWAP), "1024");
    }

    #[test]
    fn test_set_unified_swap_only() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), UNIFIED_FILES).unwrap();
        set_fixture(tmp.path(), CGROUP_MEMORY_MAX, "4096").unwrap();
        let memory = LinuxMemoryBuilder::default().limit(0).swap(-1).build().unwrap();

        Memory::set(&unified_path(tmp.path()), &resources(memory)).expect("set memory");

        let read = |file: &str| read_to_string(tmp.path().join(file)).unwrap();
        assert_eq!(read(CGROUP_MEMORY_MAX), "4096");
        assert_eq!(read(CGROUP_MEMORY_SWAP), "max");
    }

    #[test]
    fn test_set_unified_skips_legacy_knobs() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixtures(tmp.path(), UNIFIED_FILES).unwrap();
        let memory = LinuxMemoryBuilder::default()
            .swappiness(60u64)
            .kernel(4096)
            .build()
            .unwrap();

        Memory::set(&unified_path(tmp.path()), &resources(memory)).expect("set memory");
        assert!(!tmp.path().join(CGROUP_MEMORY_SWAPPINESS).exists());
    }

    quickcheck! {
        fn property_test_unset_config_writes_nothing(unified: bool, zero_values: bool) -> bool {
            let tmp = tempfile::tempdir().unwrap();
            set_fixtures(tmp.path(), LEGACY_FILES).unwrap();
            set_fixtures(tmp.path(), UNIFIED_FILES).unwrap();

            let memory = if zero_values {
                LinuxMemoryBuilder::default()
                    .limit(0)
                    .reservation(0)
                    .swap(0)
                    .kernel(0)
                    .disable_oom_killer(false)
                    .build()
                    .unwrap()
            } else {
                LinuxMemory::default()
            };
            let path = if unified {
                unified_path(tmp.path())
            } else {
                legacy_path(tmp.path())
            };

            if Memory::set(&path, &resources(memory)).is_err() {
                return false;
            }

            LEGACY_FILES
                .iter()
                .chain(UNIFIED_FILES)
                .all(|file| read_to_string(tmp.path().join(file)).unwrap().is_empty())
        }
    }

    #[test]
    fn test_apply_writes_limit_before_join() {
        let tmp = tempfile::tempdir().unwrap();
        let cgroup = tmp.path().join("container");
        fs::create_dir(&cgroup).unwrap();
        set_fixtures(&cgroup, LEGACY_FILES).unwrap();
        set_fixture(&cgroup, CGROUP_PROCS, "").unwrap();

        let roots = HierarchyRoots::default().with_legacy(ControllerType::Memory, tmp.path());
        let identity = CgroupIdentity::new("container", roots);
        let resources = resources(LinuxMemoryBuilder::default().limit(1024).build().unwrap());
        let opt = ControllerOpt {
            resources: &resources,
            pid: Pid::from_raw(1000),
        };

        Memory::apply(&opt, &identity).expect("apply memory");

        for file in LEGACY_FILES {
            let expected = if *file == CGROUP_MEMORY_LIMIT { "1024" } else { "" };
            assert_eq!(read_to_string(cgroup.join(file)).unwrap(), expected);
        }
        assert_eq!(read_to_string(cgroup.join(CGROUP_PROCS)).unwrap(), "1000");
    }

    #[test]
    fn test_apply_removes_cgroup_when_join_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = HierarchyRoots::default().with_legacy(ControllerType::Memory, tmp.path());
        let identity = CgroupIdentity::new("container", roots);
        let resources = resources(LinuxMemory::default());
        let opt = ControllerOpt {
            resources: &resources,
            pid: Pid::from_raw(1000),
        };

        let err = Memory::apply(&opt, &identity).expect_err("cgroup.procs is missing");
        match err {
            MemoryControllerError::WrappedIo(err) => assert!(err.is_not_found()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!tmp.path().join("container").exists());
    }

    #[test]
    fn test_apply_removes_created_cgroup_when_set_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = HierarchyRoots::default().with_legacy(ControllerType::Memory, tmp.path());
        let identity = CgroupIdentity::new("runtime/container", roots);
        let resources = resources(LinuxMemoryBuilder::default().limit(1024).build().unwrap());
        let opt = ControllerOpt {
            resources: &resources,
            pid: Pid::from_raw(1000),
        };

        Memory::apply(&opt, &identity).expect_err("memory.limit_in_bytes is missing");
        assert!(!tmp.path().join("runtime").exists());
    }

    #[test]
    fn test_apply_does_not_join_when_set_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cgroup = tmp.path().join("container");
        fs::create_dir(&cgroup).unwrap();
        set_fixture(&cgroup, CGROUP_PROCS, "").unwrap();

        let roots = HierarchyRoots::default().with_legacy(ControllerType::Memory, tmp.path());
        let identity = CgroupIdentity::new("container", roots);
        let resources = resources(LinuxMemoryBuilder::default().limit(1024).build().unwrap());
        let opt = ControllerOpt {
            resources: &resources,
            pid: Pid::from_raw(1000),
        };

        Memory::apply(&opt, &identity).expect_err("memory.limit_in_bytes is missing");
        assert_eq!(read_to_string(cgroup.join(CGROUP_PROCS)).unwrap(), "");
    }

    #[test]
    fn test_apply_keeps_shared_unified_cgroup_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_CONTROLLERS, "memory pids").unwrap();
        set_fixture(tmp.path(), CGROUP_SUBTREE_CONTROL, "+pids").unwrap();
        // configured by the pids controller earlier in the same apply
        let cgroup = tmp.path().join("container");
        fs::create_dir(&cgroup).unwrap();
        set_fixture(&cgroup, "pids.max", "64").unwrap();
        set_fixture(&cgroup, CGROUP_PROCS, "1000").unwrap();

        let identity = CgroupIdentity::new("container", HierarchyRoots::default().with_unified(tmp.path()));
        let resources = resources(LinuxMemoryBuilder::default().limit(1024).build().unwrap());
        let opt = ControllerOpt {
            resources: &resources,
            pid: Pid::from_raw(1000),
        };

        Memory::apply(&opt, &identity).expect_err("memory.max is missing");
        assert_eq!(read_to_string(cgroup.join("pids.max")).unwrap(), "64");
    }

    #[test]
    fn test_apply_not_mounted_is_skipped() {
        let identity = CgroupIdentity::new("container", HierarchyRoots::default());
        let resources = resources(LinuxMemoryBuilder::default().limit(1024).build().unwrap());
        let opt = ControllerOpt {
            resources: &resources,
            pid: Pid::from_raw(1000),
        };

        Memory::apply(&opt, &identity).expect("memory is not mounted");
    }

    #[test]
    fn test_apply_unified_enables_controller() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_CONTROLLERS, "memory pids").unwrap();
        set_fixture(tmp.path(), CGROUP_SUBTREE_CONTROL, "").unwrap();
        let cgroup = tmp.path().join("container");
        fs::create_dir(&cgroup).unwrap();
        set_fixtures(&cgroup, UNIFIED_FILES).unwrap();
        set_fixture(&cgroup, CGROUP_PROCS, "").unwrap();

        let identity = CgroupIdentity::new("container", HierarchyRoots::default().with_unified(tmp.path()));
        let resources = resources(LinuxMemoryBuilder::default().limit(-1).build().unwrap());
        let opt = ControllerOpt {
            resources: &resources,
            pid: Pid::from_raw(1000),
        };

        Memory::apply(&opt, &identity).expect("apply memory");

        assert_eq!(read_to_string(cgroup.join(CGROUP_MEMORY_MAX)).unwrap(), "max");
        assert_eq!(
            read_to_string(tmp.path().join(CGROUP_SUBTREE_CONTROL)).unwrap(),
            "+memory"
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cgroup = tmp.path().join("container");
        fs::create_dir(&cgroup).unwrap();
        let roots = HierarchyRoots::default().with_legacy(ControllerType::Memory, tmp.path());
        let identity = CgroupIdentity::new("container", roots);

        Memory::remove(&identity).expect("remove cgroup");
        assert!(!cgroup.exists());
        Memory::remove(&identity).expect("remove absent cgroup");
    }

    #[test]
    fn test_stat_unified() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), MEMORY_STAT, "file 1000\nanon 500\n").unwrap();
        set_fixture(tmp.path(), CGROUP_MEMORY_CURRENT, "4096\n").unwrap();

        let stats = Memory::stats(&unified_path(tmp.path())).expect("get memory stats");

        assert_eq!(stats.cache, 1000);
        assert_eq!(stats.usage, 4096);
        assert_eq!(stats.swap_usage, 0);
        assert_eq!(stats.stats.get("file"), Some(&1000));
        assert_eq!(stats.stats.get("anon"), Some(&500));
    }

    #[test]
    fn test_stat_unified_requires_current_usage() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), MEMORY_STAT, "file 1000\n").unwrap();

        let result = Memory::stats(&unified_path(tmp.path()));
        assert!(matches!(result, Err(MemoryStatsError::WrappedIo(_))));
    }

    #[test]
    fn test_stat_legacy() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), MEMORY_STAT, "cache 2048\nrss 1024\n").unwrap();
        set_fixture(tmp.path(), CGROUP_MEMORY_USAGE, "3072\n").unwrap();
        set_fixture(tmp.path(), CGROUP_MEMORY_SWAP_USAGE, "4096\n").unwrap();

        let stats = Memory::stats(&legacy_path(tmp.path())).expect("get memory stats");

        assert_eq!(stats.cache, 2048);
        assert_eq!(stats.usage, 3072);
        assert_eq!(stats.swap_usage, 1024);
    }

    #[test]
    fn test_stat_missing_file() {
        let tmp = tempfile::tempdir().unwrap();

        let stats = Memory::stats(&unified_path(tmp.path())).expect("missing stat file");
        assert_eq!(stats, MemoryStats::default());
    }
}
