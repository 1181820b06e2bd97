use std::fmt::Display;

use serde::Serialize;

#[derive(Hash, PartialEq, Eq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    Memory,
    Pids,
    Cpu,
    Blkio,
}

impl ControllerType {
    /// Name of the controller on a legacy hierarchy, as found in the mount
    /// point of its hierarchy (e.g. `/sys/fs/cgroup/blkio`).
    pub fn legacy_name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Pids => "pids",
            Self::Cpu => "cpu",
            Self::Blkio => "blkio",
        }
    }

    /// Name of the controller in `cgroup.controllers` and
    /// `cgroup.subtree_control` of the unified hierarchy.
    pub fn unified_name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Pids => "pids",
            Self::Cpu => "cpu",
            Self::Blkio => "io",
        }
    }
}

impl Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.legacy_name())
    }
}

impl AsRef<str> for ControllerType {
    fn as_ref(&self) -> &str {
        self.legacy_name()
    }
}

/// Default application order. Memory comes first so its limits are in place
/// before the process is attached anywhere else.
pub const CONTROLLERS: &[ControllerType] = &[
    ControllerType::Memory,
    ControllerType::Pids,
    ControllerType::Cpu,
    ControllerType::Blkio,
];
