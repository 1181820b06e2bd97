use std::fmt::Display;

use oci_spec::runtime::{LinuxBlockIo, LinuxThrottleDevice, LinuxWeightDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Bytes per second
    Bps,
    /// IO operations per second
    Iops,
}

/// Kind of an IO throttle rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleOp {
    ReadBps,
    WriteBps,
    ReadIops,
    WriteIops,
}

impl ThrottleOp {
    /// Order in which throttle rules are written.
    pub const ALL: [ThrottleOp; 4] = [
        ThrottleOp::new(Direction::Read, Unit::Bps),
        ThrottleOp::new(Direction::Write, Unit::Bps),
        ThrottleOp::new(Direction::Read, Unit::Iops),
        ThrottleOp::new(Direction::Write, Unit::Iops),
    ];

    pub const fn new(direction: Direction, unit: Unit) -> Self {
        match (direction, unit) {
            (Direction::Read, Unit::Bps) => Self::ReadBps,
            (Direction::Write, Unit::Bps) => Self::WriteBps,
            (Direction::Read, Unit::Iops) => Self::ReadIops,
            (Direction::Write, Unit::Iops) => Self::WriteIops,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadBps => "rbps",
            Self::WriteBps => "wbps",
            Self::ReadIops => "riops",
            Self::WriteIops => "wiops",
        }
    }

    /// Per-device file of the legacy hierarchy that holds rules of this kind.
    pub fn legacy_file(&self) -> &'static str {
        match self {
            Self::ReadBps => "blkio.throttle.read_bps_device",
            Self::WriteBps => "blkio.throttle.write_bps_device",
            Self::ReadIops => "blkio.throttle.read_iops_device",
            Self::WriteIops => "blkio.throttle.write_iops_device",
        }
    }

    /// Throttle devices of this kind configured in `blkio`.
    pub fn devices<'a>(&self, blkio: &'a LinuxBlockIo) -> &'a [LinuxThrottleDevice] {
        let devices = match self {
            Self::ReadBps => blkio.throttle_read_bps_device(),
            Self::WriteBps => blkio.throttle_write_bps_device(),
            Self::ReadIops => blkio.throttle_read_iops_device(),
            Self::WriteIops => blkio.throttle_write_iops_device(),
        };

        devices.as_deref().unwrap_or_default()
    }
}

impl Display for ThrottleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-device block IO rule.
pub trait DeviceRule {
    /// `<major>:<minor>` of the device
    fn device_number(&self) -> String;

    /// Value of the rule, if it carries one
    fn value(&self) -> Option<u64>;

    /// Line understood by the per-device files of the legacy hierarchy,
    /// `<major>:<minor> <value>`.
    fn legacy_line(&self) -> Option<String> {
        self.value()
            .map(|value| format!("{} {}", self.device_number(), value))
    }
}

impl DeviceRule for LinuxWeightDevice {
    fn device_number(&self) -> String {
        format!("{}:{}", self.major(), self.minor())
    }

    fn value(&self) -> Option<u64> {
        self.weight().map(u64::from)
    }
}

impl DeviceRule for LinuxThrottleDevice {
    fn device_number(&self) -> String {
        format!("{}:{}", self.major(), self.minor())
    }

    fn value(&self) -> Option<u64> {
        Some(self.rate())
    }
}

/// `<weight> <major>:<minor>`, or None if the device has no weight.
pub fn weight_line(device: &LinuxWeightDevice) -> Option<String> {
    device
        .weight()
        .map(|weight| format!("{} {}", weight, device.device_number()))
}

/// `<op> <major>:<minor> <value>`
pub fn throttle_line(op: ThrottleOp, device: &LinuxThrottleDevice) -> String {
    format!("{} {} {}", op, device.device_number(), device.rate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::{LinuxThrottleDeviceBuilder, LinuxWeightDeviceBuilder};

    #[test]
    fn test_throttle_op_from_direction_and_unit() {
        assert_eq!(ThrottleOp::new(Direction::Read, Unit::Bps), ThrottleOp::ReadBps);
        assert_eq!(ThrottleOp::new(Direction::Write, Unit::Iops), ThrottleOp::WriteIops);
        assert_eq!(ThrottleOp::new(Direction::Write, Unit::Bps).as_str(), "wbps");
        assert_eq!(ThrottleOp::new(Direction::Read, Unit::Iops).as_str(), "riops");
    }

    #[test]
    fn test_throttle_op_write_order() {
        let order: Vec<&str> = ThrottleOp::ALL.iter().map(ThrottleOp::as_str).collect();
        assert_eq!(order, ["rbps", "wbps", "riops", "wiops"]);
    }

    #[test]
    fn test_weight_line() {
        let device = LinuxWeightDeviceBuilder::default()
            .major(8)
            .minor(16)
            .weight(500u16)
            .build()
            .unwrap();

        assert_eq!(weight_line(&device).as_deref(), Some("500 8:16"));
        assert_eq!(device.legacy_line().as_deref(), Some("8:16 500"));
    }

    #[test]
    fn test_weight_line_without_weight() {
        let device = LinuxWeightDeviceBuilder::default()
            .major(8)
            .minor(16)
            .build()
            .unwrap();

        assert_eq!(weight_line(&device), None);
        assert_eq!(device.legacy_line(), None);
    }

    #[test]
    fn test_devices_by_op() {
        let read = LinuxThrottleDeviceBuilder::default()
            .major(8)
            .minor(0)
            .rate(100u64)
            .build()
            .unwrap();
        let blkio = oci_spec::runtime::LinuxBlockIoBuilder::default()
            .throttle_read_bps_device(vec![read])
            .build()
            .unwrap();

        assert_eq!(ThrottleOp::ReadBps.devices(&blkio).len(), 1);
        assert!(ThrottleOp::WriteIops.devices(&blkio).is_empty());
    }

    quickcheck! {
        fn property_test_throttle_line(op: u8, major: u32, minor: u32, rate: u64) -> bool {
            let op = ThrottleOp::ALL[op as usize % ThrottleOp::ALL.len()];
            let device = LinuxThrottleDeviceBuilder::default()
                .major(major as i64)
                .minor(minor as i64)
                .rate(rate)
                .build()
                .unwrap();

            let line = throttle_line(op, &device);
            let fields: Vec<&str> = line.split(' ').collect();

            line == format!("{} {}:{} {}", op.as_str(), major, minor, rate)
                && fields.len() == 3
                && device.legacy_line() == Some(format!("{}:{} {}", major, minor, rate))
        }
    }
}
