// Licensed under the Apache-2.0 license

use drv_se_services_api::{Timeout, DEFAULT_TIMEOUT};
use lib_addr_xlate::MemoryMap;

#[cfg(all(feature = "m55-he", feature = "m55-hp"))]
compile_error!("features `m55-he` and `m55-hp` are mutually exclusive");

/// Memory map of the core this driver is built for.
#[cfg(feature = "m55-he")]
pub const DEFAULT_MEMORY_MAP: MemoryMap = MemoryMap::m55_he();
#[cfg(all(feature = "m55-hp", not(feature = "m55-he")))]
pub const DEFAULT_MEMORY_MAP: MemoryMap = MemoryMap::m55_hp();
#[cfg(not(any(feature = "m55-he", feature = "m55-hp")))]
pub const DEFAULT_MEMORY_MAP: MemoryMap = MemoryMap::identity();

/// Per-instance settings for [`Services`](crate::Services).
#[derive(Copy, Clone, Debug)]
pub struct ServicesConfig {
    pub memory_map: MemoryMap,
    /// Applied to every wrapper call.
    pub default_timeout: Timeout,
}

impl ServicesConfig {
    pub const fn new(memory_map: MemoryMap) -> Self {
        Self {
            memory_map,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub const fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_MAP)
    }
}
