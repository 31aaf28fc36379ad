//! Resource vectors and per-task resource requests

use serde::{Deserialize, Serialize};

/// Resource quantities tracked per node and per task
///
/// GPUs are counted in whole devices; fractional GPU requests are expressed
/// separately through [`ResReq::gpu_memory_mib`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVector {
    /// CPU in millicores
    pub cpu_millis: u64,
    /// Memory in MiB
    pub memory_mib: u64,
    /// Whole GPU devices
    pub gpus: u32,
}

impl ResourceVector {
    /// Create a new resource vector
    pub fn new(cpu_millis: u64, memory_mib: u64, gpus: u32) -> Self {
        Self {
            cpu_millis,
            memory_mib,
            gpus,
        }
    }

    /// Whether every dimension of `self` fits into `other`
    pub fn fits_in(&self, other: &ResourceVector) -> bool {
        self.cpu_millis <= other.cpu_millis
            && self.memory_mib <= other.memory_mib
            && self.gpus <= other.gpus
    }

    /// Element-wise sum
    pub fn plus(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu_millis: self.cpu_millis + other.cpu_millis,
            memory_mib: self.memory_mib + other.memory_mib,
            gpus: self.gpus + other.gpus,
        }
    }

    /// Element-wise saturating subtraction
    pub fn minus(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_mib: self.memory_mib.saturating_sub(other.memory_mib),
            gpus: self.gpus.saturating_sub(other.gpus),
        }
    }

    /// Add `other` in place
    pub fn add(&mut self, other: &ResourceVector) {
        *self = self.plus(other);
    }

    /// Subtract `other` in place, saturating at zero
    pub fn sub(&mut self, other: &ResourceVector) {
        *self = self.minus(other);
    }

    /// Whether all dimensions are zero
    pub fn is_empty(&self) -> bool {
        self.cpu_millis == 0 && self.memory_mib == 0 && self.gpus == 0
    }
}

impl std::fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu={}m, memory={}Mi, gpus={}",
            self.cpu_millis, self.memory_mib, self.gpus
        )
    }
}

/// Resource request of a single task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResReq {
    /// Whole-dimension request (CPU, memory, whole GPU devices)
    pub vector: ResourceVector,
    /// Requested VRAM per shared GPU device, in MiB; zero means no fractional
    /// GPU request
    pub gpu_memory_mib: u64,
    /// Number of shared GPU devices the fractional request spans
    pub num_gpu_devices: u32,
}

impl ResReq {
    /// Create a whole-resource request with no fractional GPU component
    pub fn whole(cpu_millis: u64, memory_mib: u64, gpus: u32) -> Self {
        Self {
            vector: ResourceVector::new(cpu_millis, memory_mib, gpus),
            gpu_memory_mib: 0,
            num_gpu_devices: 0,
        }
    }

    /// Create a fractional GPU request spanning `devices` shared devices
    pub fn fractional(cpu_millis: u64, memory_mib: u64, gpu_memory_mib: u64, devices: u32) -> Self {
        Self {
            vector: ResourceVector::new(cpu_millis, memory_mib, 0),
            gpu_memory_mib,
            num_gpu_devices: devices.max(1),
        }
    }

    /// Whether this task requests a slice of VRAM on shared GPUs
    ///
    /// Zero-memory GPU requests are whole-GPU requests.
    pub fn is_fractional(&self) -> bool {
        self.gpu_memory_mib > 0
    }

    /// Requested VRAM per shared device, in MiB
    pub fn gpu_memory(&self) -> u64 {
        self.gpu_memory_mib
    }

    /// Number of shared GPU devices requested (at least one for fractional
    /// requests)
    pub fn gpu_device_count(&self) -> u32 {
        if self.is_fractional() {
            self.num_gpu_devices.max(1)
        } else {
            0
        }
    }

    /// Whether the task touches GPU resources in any form
    pub fn requests_gpus(&self) -> bool {
        self.vector.gpus > 0 || self.is_fractional()
    }
}

impl std::fmt::Display for ResReq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_fractional() {
            write!(
                f,
                "{}, gpu-memory={}Mi x{}",
                self.vector,
                self.gpu_memory_mib,
                self.gpu_device_count()
            )
        } else {
            write!(f, "{}", self.vector)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_in() {
        let small = ResourceVector::new(500, 1024, 1);
        let large = ResourceVector::new(1000, 2048, 2);
        assert!(small.fits_in(&large));
        assert!(!large.fits_in(&small));
        assert!(small.fits_in(&small));
    }

    #[test]
    fn test_minus_saturates() {
        let a = ResourceVector::new(100, 100, 1);
        let b = ResourceVector::new(200, 50, 2);
        let diff = a.minus(&b);
        assert_eq!(diff, ResourceVector::new(0, 50, 0));
    }

    #[test]
    fn test_fractional_request() {
        let req = ResReq::fractional(250, 512, 8000, 2);
        assert!(req.is_fractional());
        assert_eq!(req.gpu_memory(), 8000);
        assert_eq!(req.gpu_device_count(), 2);
        assert_eq!(req.vector.gpus, 0);
    }

    #[test]
    fn test_zero_memory_is_whole() {
        let req = ResReq::whole(250, 512, 1);
        assert!(!req.is_fractional());
        assert_eq!(req.gpu_device_count(), 0);
        assert!(req.requests_gpus());
    }
}
