use std::collections::HashMap;
use std::fmt::Display;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::{self, WrapIoResult, WrappedIoError};
use crate::hierarchy::ControllerPath;

pub trait StatsProvider {
    type Error;
    type Stats;

    /// Reads the statistics of the cgroup at `path`
    fn stats(path: &ControllerPath) -> Result<Self::Stats, Self::Error>;
}

/// Reports the statistics for a cgroup. A controller that is not mounted, or
/// whose statistics could not be read, is left empty.
#[derive(Debug, Default, Serialize)]
pub struct Stats {
    /// Memory statistics for the cgroup
    pub memory: Option<MemoryStats>,
    /// Blkio statistics for the cgroup
    pub blkio: Option<BlkioStats>,
    /// Pid statistics for the cgroup
    pub pids: Option<PidStats>,
    /// Cpu statistics for the cgroup
    pub cpu: Option<CpuStats>,
}

/// Reports memory stats for a cgroup
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Memory usage in bytes
    pub usage: u64,
    /// Swap usage in bytes
    pub swap_usage: u64,
    /// Page cache in bytes
    pub cache: u64,
    /// Raw content of memory.stat
    pub stats: HashMap<String, u64>,
}

/// Reports block io stats for a cgroup
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlkioStats {
    // Number of bytes transferred to/from a device by the cgroup
    pub service_bytes: Vec<BlkioDeviceStat>,
    // Number of I/O operations performed on a device by the cgroup
    pub serviced: Vec<BlkioDeviceStat>,
}

/// Reports single stat value for a specific device
#[derive(Debug, PartialEq, Eq, Clone, Serialize, PartialOrd, Ord)]
pub struct BlkioDeviceStat {
    /// Major device number
    pub major: u64,
    /// Minor device number
    pub minor: u64,
    /// Operation type
    pub op_type: Option<String>,
    /// Stat value
    pub value: u64,
}

impl Display for BlkioDeviceStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(op_type) = &self.op_type {
            write!(
                f,
                "{}:{} {} {}",
                self.major, self.minor, op_type, self.value
            )
        } else {
            write!(f, "{}:{} {}", self.major, self.minor, self.value)
        }
    }
}

/// Reports pid stats for a cgroup
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct PidStats {
    /// Current number of active pids
    pub current: u64,
    /// Allowed number of active pids (0 means no limit)
    pub limit: u64,
}

/// Reports the cpu statistics for a cgroup
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuStats {
    /// Cpu usage statistics for the cgroup
    pub usage: CpuUsage,
    /// Cpu Throttling statistics for the cgroup
    pub throttling: CpuThrottling,
}

/// Reports the cpu usage for a cgroup
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuUsage {
    /// Cpu time consumed by tasks in total
    pub usage_total: u64,
    /// Cpu time consumed by tasks in user mode
    pub usage_user: u64,
    /// Cpu time consumed by tasks in kernel mode
    pub usage_kernel: u64,
}

/// Reports the cpu throttling for a cgroup
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuThrottling {
    /// Number of period intervals that have elapsed
    pub periods: u64,
    /// Number of period intervals where tasks have been throttled because they exhausted their quota
    pub throttled_periods: u64,
    /// Total time duration for which tasks have been throttled
    pub throttled_time: u64,
}

/// Parses this string slice into an u64
/// # Example
/// ```
/// use libcgroupctl::stats::parse_value;
///
/// let value = parse_value("32").unwrap();
/// assert_eq!(value, 32);
/// ```
pub fn parse_value(value: &str) -> Result<u64, ParseIntError> {
    value.parse()
}

/// Parses a single valued file to an u64. `max` is reported as `u64::MAX`.
/// # Example
/// ```no_run
/// use std::path::Path;
/// use libcgroupctl::stats::parse_single_value;
///
/// let value = parse_single_value(&Path::new("memory.current")).unwrap();
/// assert_eq!(value, 32);
/// ```
pub fn parse_single_value(file_path: &Path) -> Result<u64, WrappedIoError> {
    let value = common::read_cgroup_file(file_path)?;
    let value = value.trim();
    if value == "max" {
        return Ok(u64::MAX);
    }

    value
        .parse::<u64>()
        .map_err(|err| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid value {value:?}: {err}"),
            )
        })
        .wrap_other(file_path)
}

/// Like [`parse_single_value`], but a file that does not exist reads as 0.
pub fn parse_optional_value(file_path: &Path) -> Result<u64, WrappedIoError> {
    match parse_single_value(file_path) {
        Err(err) if err.is_not_found() => Ok(0),
        result => result,
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseFlatKeyedDataError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("flat keyed data at {path} contains entries that do not conform to 'key value'")]
    DoesNotConform { path: PathBuf },
    #[error("failed to parse value {value} from {path}")]
    FailedToParse {
        value: String,
        path: PathBuf,
        err: ParseIntError,
    },
}

impl ParseFlatKeyedDataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WrappedIo(err) if err.is_not_found())
    }
}

/// Parses a file that is structured according to the flat keyed format.
/// Later occurrences of a key overwrite earlier ones.
pub fn parse_flat_keyed_data(
    file_path: &Path,
) -> Result<HashMap<String, u64>, ParseFlatKeyedDataError> {
    let mut stats = HashMap::new();
    let keyed_data = common::read_cgroup_file(file_path)?;
    for entry in keyed_data.lines() {
        let entry_fields: Vec<&str> = entry.split_ascii_whitespace().collect();
        if entry_fields.is_empty() {
            continue;
        }
        if entry_fields.len() != 2 {
            return Err(ParseFlatKeyedDataError::DoesNotConform {
                path: file_path.to_path_buf(),
            });
        }

        stats.insert(
            entry_fields[0].to_owned(),
            entry_fields[1]
                .parse()
                .map_err(|err| ParseFlatKeyedDataError::FailedToParse {
                    value: entry_fields[1].into(),
                    path: file_path.to_path_buf(),
                    err,
                })?,
        );
    }

    Ok(stats)
}

#[derive(thiserror::Error, Debug)]
pub enum ParseBlkioStatError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("invalid line {line:?} in {path}")]
    InvalidLine { line: String, path: PathBuf },
    #[error("failed to parse {value} in {path}: {err}")]
    FailedToParse {
        value: String,
        path: PathBuf,
        err: ParseIntError,
    },
}

/// Parses a legacy blkio statistics file. Every line is either
/// `<major>:<minor> <value>` or `<major>:<minor> <op> <value>`; the summary
/// line `Total <value>` is skipped. A file that does not exist yields no
/// entries.
pub fn parse_blkio_stat(file_path: &Path) -> Result<Vec<BlkioDeviceStat>, ParseBlkioStatError> {
    let data = match common::read_cgroup_file(file_path) {
        Ok(data) => data,
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    parse_blkio_stat_data(&data, file_path)
}

pub(crate) fn parse_blkio_stat_data(
    data: &str,
    file_path: &Path,
) -> Result<Vec<BlkioDeviceStat>, ParseBlkioStatError> {
    let parse = |value: &str| {
        value
            .parse::<u64>()
            .map_err(|err| ParseBlkioStatError::FailedToParse {
                value: value.into(),
                path: file_path.to_path_buf(),
                err,
            })
    };

    let mut stats = Vec::new();
    for line in data.lines() {
        let fields: Vec<&str> = line
            .split(|c: char| c == ' ' || c == ':')
            .filter(|f| !f.is_empty())
            .collect();
        match fields.as_slice() {
            [] | ["Total", _] => continue,
            [major, minor, value] => stats.push(BlkioDeviceStat {
                major: parse(*major)?,
                minor: parse(*minor)?,
                op_type: None,
                value: parse(*value)?,
            }),
            [major, minor, op, value] => stats.push(BlkioDeviceStat {
                major: parse(*major)?,
                minor: parse(*minor)?,
                op_type: Some((*op).to_owned()),
                value: parse(*value)?,
            }),
            _ => {
                return Err(ParseBlkioStatError::InvalidLine {
                    line: line.into(),
                    path: file_path.to_path_buf(),
                })
            }
        }
    }

    Ok(stats)
}

#[derive(thiserror::Error, Debug)]
pub enum ParseNestedKeyedDataError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("nested keyed data at {path} contains entries that do not conform to key format")]
    DoesNotConform { path: PathBuf },
}

/// Parses a file that is structured according to the nested keyed format
pub fn parse_nested_keyed_data(
    file_path: &Path,
) -> Result<HashMap<String, Vec<String>>, ParseNestedKeyedDataError> {
    let mut stats: HashMap<String, Vec<String>> = HashMap::new();
    let keyed_data = common::read_cgroup_file(file_path)?;
    for entry in keyed_data.lines() {
        let entry_fields: Vec<&str> = entry.split_ascii_whitespace().collect();
        if entry_fields.len() < 2 || !entry_fields[1..].iter().all(|p| p.contains('=')) {
            return Err(ParseNestedKeyedDataError::DoesNotConform {
                path: file_path.to_path_buf(),
            });
        }

        stats.insert(
            entry_fields[0].to_owned(),
            entry_fields[1..]
                .iter()
                .copied()
                .map(|p| p.to_owned())
                .collect(),
        );
    }

    Ok(stats)
}

#[derive(thiserror::Error, Debug)]
pub enum ParseDeviceNumberError {
    #[error("failed to parse device number from {device}: expected 2 parts, found {numbers}")]
    TooManyNumbers { device: String, numbers: usize },
    #[error("failed to parse device number from {device}: {err}")]
    MalformedNumber { device: String, err: ParseIntError },
}

pub(crate) fn parse_device_number(device: &str) -> Result<(u64, u64), ParseDeviceNumberError> {
    let numbers: Vec<&str> = device.split_terminator(':').collect();
    if numbers.len() != 2 {
        return Err(ParseDeviceNumberError::TooManyNumbers {
            device: device.into(),
            numbers: numbers.len(),
        });
    }

    let parse = |number: &str| {
        number
            .parse()
            .map_err(|err| ParseDeviceNumberError::MalformedNumber {
                device: device.into(),
                err,
            })
    };

    Ok((parse(numbers[0])?, parse(numbers[1])?))
}
