//! Capability probing for the fused attention kernel.
//!
//! The probe reports which fused kernel interface, if any, was compiled into
//! this build. Factories evaluate it once at configuration time and fix the
//! strategy for the lifetime of the attention module; nothing here is hidden
//! in mutable global state.

use std::fmt;

/// Interface version of the fused attention kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    major: u32,
    minor: u32,
}

impl KernelVersion {
    /// Creates a version tag.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Minimum fused kernel interface version the fused strategy supports.
pub const MIN_FUSED_KERNEL_VERSION: KernelVersion = KernelVersion::new(2, 0);

/// Kernel interface version compiled into this build.
#[cfg(feature = "fused")]
const BUILT_KERNEL_VERSION: KernelVersion = KernelVersion::new(2, 1);

/// Fused-kernel support reported by the numeric backend of this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapability {
    kernel_version: Option<KernelVersion>,
}

impl BackendCapability {
    /// Probes the fused-kernel support compiled into this build.
    pub fn detect() -> Self {
        #[cfg(feature = "fused")]
        {
            Self {
                kernel_version: Some(BUILT_KERNEL_VERSION),
            }
        }
        #[cfg(not(feature = "fused"))]
        {
            Self {
                kernel_version: None,
            }
        }
    }

    /// A capability reporting the given kernel version.
    pub fn with_kernel_version(version: KernelVersion) -> Self {
        Self {
            kernel_version: Some(version),
        }
    }

    /// A capability without any fused kernel.
    pub fn without_fused_kernel() -> Self {
        Self {
            kernel_version: None,
        }
    }

    /// The reported kernel interface version, if a kernel is present.
    pub fn kernel_version(&self) -> Option<KernelVersion> {
        self.kernel_version
    }

    /// Whether the fused strategy can be constructed against this backend.
    pub fn supports_fused(&self) -> bool {
        self.kernel_version
            .map_or(false, |version| version >= MIN_FUSED_KERNEL_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_lexicographically() {
        assert!(KernelVersion::new(2, 0) > KernelVersion::new(1, 13));
        assert!(KernelVersion::new(2, 1) > KernelVersion::new(2, 0));
    }

    #[test]
    fn capability_gates_on_the_minimum_version() {
        assert!(BackendCapability::with_kernel_version(KernelVersion::new(2, 0)).supports_fused());
        assert!(!BackendCapability::with_kernel_version(KernelVersion::new(1, 13)).supports_fused());
        assert!(!BackendCapability::without_fused_kernel().supports_fused());
    }

    #[cfg(feature = "fused")]
    #[test]
    fn this_build_reports_a_supported_kernel() {
        assert!(BackendCapability::detect().supports_fused());
    }
}
