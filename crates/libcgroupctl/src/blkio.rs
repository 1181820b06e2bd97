use std::num::ParseIntError;
use std::path::Path;

use oci_spec::runtime::{LinuxBlockIo, LinuxResources};

use crate::common::{self, ControllerOpt, WrappedIoError};
use crate::controller::Controller;
use crate::controller_type::ControllerType;
use crate::device::{self, DeviceRule, ThrottleOp};
use crate::hierarchy::{self, CgroupIdentity, ControllerPath, Hierarchy, ResolveError};
use crate::stats::{
    self, BlkioDeviceStat, BlkioStats, ParseBlkioStatError, ParseDeviceNumberError,
    ParseNestedKeyedDataError, StatsProvider,
};

// Specifies the relative proportion of block I/O access available to the cgroup
// Format: weight (weight can range from 10 to 1000)
const BLKIO_WEIGHT: &str = "blkio.weight";
// Overrides blkio.weight for the specified device
// Format: Major:Minor weight
const BLKIO_WEIGHT_DEVICE: &str = "blkio.weight_device";
// Number of bytes transferred to/from a device by the cgroup
// Format: Major:Minor Type Bytes
const BLKIO_IO_SERVICE_BYTES: &str = "blkio.io_service_bytes";
// Number of I/O operations performed on a device by the cgroup
// Format: Major:Minor Type Ops
const BLKIO_IO_SERVICED: &str = "blkio.io_serviced";

const CGROUP_IO_WEIGHT: &str = "io.weight";
const CGROUP_IO_MAX: &str = "io.max";
const CGROUP_IO_STAT: &str = "io.stat";

#[derive(thiserror::Error, Debug)]
pub enum BlkioControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("failed to resolve blkio cgroup: {0}")]
    Resolve(#[from] ResolveError),
}

pub struct Blkio {}

impl Controller for Blkio {
    type Error = BlkioControllerError;

    const CONTROLLER: ControllerType = ControllerType::Blkio;

    #[tracing::instrument(level = "debug", skip_all, fields(pid = %controller_opt.pid))]
    fn apply(controller_opt: &ControllerOpt, identity: &CgroupIdentity) -> Result<(), Self::Error> {
        let Some(path) = Self::path(identity)? else {
            return Ok(());
        };

        let created = hierarchy::create_cgroup_dir(Self::CONTROLLER, &path)?;
        if let Err(err) = hierarchy::join(&path, controller_opt.pid) {
            hierarchy::remove_created_dir(created.as_deref());
            return Err(err.into());
        }

        // the process is attached at this point, so the cgroup is left in place
        // when a limit cannot be written
        Self::set(&path, controller_opt.resources)
    }

    fn set(path: &ControllerPath, resources: &LinuxResources) -> Result<(), Self::Error> {
        let Some(blkio) = resources.block_io() else {
            return Ok(());
        };

        tracing::debug!(path = ?path.path(), "set blkio cgroup config");
        match path.hierarchy() {
            Hierarchy::Legacy => Self::set_legacy(path.path(), blkio)?,
            Hierarchy::Unified => Self::set_unified(path.path(), blkio)?,
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BlkioStatsError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("while parsing blkio stats: {0}")]
    ParseBlkioStat(#[from] ParseBlkioStatError),
    #[error("while parsing stat table: {0}")]
    ParseNestedKeyedData(#[from] ParseNestedKeyedDataError),
    #[error("while parsing device number: {0}")]
    ParseDeviceNumber(#[from] ParseDeviceNumberError),
    #[error("while parsing table value: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl StatsProvider for Blkio {
    type Error = BlkioStatsError;
    type Stats = BlkioStats;

    fn stats(path: &ControllerPath) -> Result<Self::Stats, Self::Error> {
        match path.hierarchy() {
            Hierarchy::Legacy => Ok(BlkioStats {
                service_bytes: stats::parse_blkio_stat(&path.join(BLKIO_IO_SERVICE_BYTES))?,
                serviced: stats::parse_blkio_stat(&path.join(BLKIO_IO_SERVICED))?,
            }),
            Hierarchy::Unified => Self::unified_stats(path.path()),
        }
    }
}

impl Blkio {
    fn set_legacy(root_path: &Path, blkio: &LinuxBlockIo) -> Result<(), WrappedIoError> {
        if let Some(weight) = blkio.weight().filter(|w| *w != 0) {
            common::write_cgroup_file(root_path.join(BLKIO_WEIGHT), weight)?;
        }

        if let Some(weight_device) = blkio.weight_device() {
            for wd in weight_device {
                if let Some(line) = wd.legacy_line() {
                    common::write_cgroup_file(root_path.join(BLKIO_WEIGHT_DEVICE), line)?;
                }
            }
        }

        for op in ThrottleOp::ALL {
            for td in op.devices(blkio) {
                if let Some(line) = td.legacy_line() {
                    common::write_cgroup_file(root_path.join(op.legacy_file()), line)?;
                }
            }
        }

        Ok(())
    }

    fn set_unified(root_path: &Path, blkio: &LinuxBlockIo) -> Result<(), WrappedIoError> {
        if let Some(weight) = blkio.weight().filter(|w| *w != 0) {
            common::write_cgroup_file(root_path.join(CGROUP_IO_WEIGHT), format!("default {weight}"))?;
        }

        if let Some(weight_device) = blkio.weight_device() {
            for wd in weight_device {
                if let Some(line) = device::weight_line(wd) {
                    common::write_cgroup_file(root_path.join(CGROUP_IO_WEIGHT), line)?;
                }
            }
        }

        for op in ThrottleOp::ALL {
            for td in op.devices(blkio) {
                common::write_cgroup_file(
                    root_path.join(CGROUP_IO_MAX),
                    device::throttle_line(op, td),
                )?;
            }
        }

        Ok(())
    }

    fn unified_stats(cgroup_path: &Path) -> Result<BlkioStats, BlkioStatsError> {
        let keyed_data = match stats::parse_nested_keyed_data(&cgroup_path.join(CGROUP_IO_STAT)) {
            Ok(data) => data,
            Err(ParseNestedKeyedDataError::WrappedIo(err)) if err.is_not_found() => {
                return Ok(BlkioStats::default())
            }
            Err(err) => return Err(err.into()),
        };

        let mut service_bytes = Vec::with_capacity(keyed_data.len());
        let mut serviced = Vec::with_capacity(keyed_data.len());
        for (device_number, values) in keyed_data {
            let (major, minor) = stats::parse_device_number(&device_number)?;
            for value in values {
                let Some((key, value)) = value.split_once('=') else {
                    continue;
                };
                let (target, op_type) = match key {
                    "rbytes" => (&mut service_bytes, "read"),
                    "wbytes" => (&mut service_bytes, "write"),
                    "rios" => (&mut serviced, "read"),
                    "wios" => (&mut serviced, "write"),
                    _ => continue,
                };
                target.push(BlkioDeviceStat {
                    major,
                    minor,
                    op_type: Some(op_type.to_owned()),
                    value: stats::parse_value(value)?,
                });
            }
        }

        service_bytes.sort();
        serviced.sort();
        Ok(BlkioStats {
            service_bytes,
            serviced,
        })
    }
}
