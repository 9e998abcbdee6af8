//! Device identity attached to every tensor.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

/// Identifies where a tensor's storage lives. Two tensors are co-located iff their devices are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: usize,
}

impl Device {
    pub const fn cpu(index: usize) -> Self {
        Device {
            kind: DeviceKind::Cpu,
            index,
        }
    }

    pub const fn cuda(index: usize) -> Self {
        Device {
            kind: DeviceKind::Cuda,
            index,
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::cpu(0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu:{}", self.index),
            DeviceKind::Cuda => write!(f, "cuda:{}", self.index),
        }
    }
}
