// Licensed under the Apache-2.0 license

#![cfg_attr(not(test), no_std)]

//! Local/global address translation.
//!
//! Each application core sees its tightly-coupled memories (ITCM/DTCM) at
//! core-private addresses. Any other bus master, the secure enclave
//! included, reaches the same memory through an alias in the global
//! address map. Pointers handed to another master must therefore be
//! rewritten into their global form first.
//!
//! A [`MemoryMap`] describes the core-private windows. Addresses inside a
//! window are rebased onto the window's global alias; everything else is
//! already global and passes through untouched.
//!
//! # Memory map presets
//!
//! | core   | window | local base    | size    | global base   |
//! |--------|--------|---------------|---------|---------------|
//! | M55-HE | ITCM   | `0x0000_0000` | 256 KiB | `0x5800_0000` |
//! | M55-HE | DTCM   | `0x2000_0000` | 256 KiB | `0x5880_0000` |
//! | M55-HP | ITCM   | `0x0000_0000` | 256 KiB | `0x5000_0000` |
//! | M55-HP | DTCM   | `0x2000_0000` | 1 MiB   | `0x5080_0000` |

use core::fmt;

/// Maximum number of core-private windows in one map.
pub const MAX_WINDOWS: usize = 4;

/// An address as the issuing core sees it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalAddr(u32);

impl LocalAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Takes the address of `ptr`.
    ///
    /// Only available where pointers are 32 bits wide, which is the case
    /// for every core that shares a packet buffer with the enclave.
    #[cfg(target_pointer_width = "32")]
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Self {
        Self(ptr.cast::<u8>() as usize as u32)
    }
}

impl From<u32> for LocalAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

/// An address valid for every bus master.
///
/// This is the only address type that may be stored in a packet read by
/// another master, so it carries the zerocopy layout traits. It can be
/// produced from a [`LocalAddr`] only through [`MemoryMap::to_global`].
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::KnownLayout,
    zerocopy::Immutable,
)]
#[repr(transparent)]
pub struct GlobalAddr(u32);

impl GlobalAddr {
    pub const NULL: Self = Self(0);

    pub const fn get(self) -> u32 {
        self.0
    }
}

/// One core-private memory region and its global alias.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window {
    pub local_base: u32,
    pub global_base: u32,
    pub size: u32,
}

impl Window {
    const EMPTY: Self = Self::new(0, 0, 0);

    pub const fn new(local_base: u32, global_base: u32, size: u32) -> Self {
        Self {
            local_base,
            global_base,
            size,
        }
    }

    fn contains_local(&self, addr: u32) -> bool {
        addr >= self.local_base && addr - self.local_base < self.size
    }

    fn contains_global(&self, addr: u32) -> bool {
        addr >= self.global_base && addr - self.global_base < self.size
    }
}

/// Reasons a set of windows cannot form a [`MemoryMap`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MapError {
    /// More than [`MAX_WINDOWS`] windows were supplied.
    TooManyWindows,
    /// A window has zero size.
    EmptyWindow,
    /// `base + size` runs past the end of the 32-bit address space.
    Overflow,
    /// Two windows share local addresses.
    LocalOverlap,
    /// Two windows share global addresses.
    GlobalOverlap,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MapError::TooManyWindows => "too many memory windows",
            MapError::EmptyWindow => "memory window has zero size",
            MapError::Overflow => "memory window exceeds the address space",
            MapError::LocalOverlap => "memory windows overlap locally",
            MapError::GlobalOverlap => "memory windows overlap globally",
        };
        f.write_str(msg)
    }
}

fn end(base: u32, size: u32) -> u64 {
    u64::from(base) + u64::from(size)
}

fn overlaps(a_base: u32, b_base: u32, size_a: u32, size_b: u32) -> bool {
    u64::from(a_base) < end(b_base, size_b)
        && u64::from(b_base) < end(a_base, size_a)
}

/// The set of core-private windows for one core.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryMap {
    windows: [Window; MAX_WINDOWS],
    len: usize,
}

impl MemoryMap {
    /// A map with no private windows: every address is already global.
    pub const fn identity() -> Self {
        Self {
            windows: [Window::EMPTY; MAX_WINDOWS],
            len: 0,
        }
    }

    /// Ensemble M55 high-efficiency core.
    pub const fn m55_he() -> Self {
        Self::from_pair(
            Window::new(0x0000_0000, 0x5800_0000, 256 * 1024),
            Window::new(0x2000_0000, 0x5880_0000, 256 * 1024),
        )
    }

    /// Ensemble M55 high-performance core.
    pub const fn m55_hp() -> Self {
        Self::from_pair(
            Window::new(0x0000_0000, 0x5000_0000, 256 * 1024),
            Window::new(0x2000_0000, 0x5080_0000, 1024 * 1024),
        )
    }

    const fn from_pair(itcm: Window, dtcm: Window) -> Self {
        let mut windows = [Window::EMPTY; MAX_WINDOWS];
        windows[0] = itcm;
        windows[1] = dtcm;
        Self { windows, len: 2 }
    }

    /// Builds a map from arbitrary windows.
    ///
    /// Windows must be non-empty and pairwise disjoint in both address
    /// spaces, otherwise the local/global round trip would be ambiguous.
    pub fn new(windows: &[Window]) -> Result<Self, MapError> {
        if windows.len() > MAX_WINDOWS {
            return Err(MapError::TooManyWindows);
        }

        for (i, w) in windows.iter().enumerate() {
            if w.size == 0 {
                return Err(MapError::EmptyWindow);
            }
            let limit = 1u64 << 32;
            if end(w.local_base, w.size) > limit
                || end(w.global_base, w.size) > limit
            {
                return Err(MapError::Overflow);
            }
            for other in &windows[..i] {
                if overlaps(w.local_base, other.local_base, w.size, other.size)
                {
                    return Err(MapError::LocalOverlap);
                }
                if overlaps(
                    w.global_base,
                    other.global_base,
                    w.size,
                    other.size,
                ) {
                    return Err(MapError::GlobalOverlap);
                }
            }
        }

        let mut map = Self::identity();
        map.windows[..windows.len()].copy_from_slice(windows);
        map.len = windows.len();
        Ok(map)
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows[..self.len]
    }

    /// Returns true if `addr` lies in one of the core-private windows.
    pub fn is_local(&self, addr: LocalAddr) -> bool {
        self.windows().iter().any(|w| w.contains_local(addr.0))
    }

    /// Converts a core-local address into the form other masters use.
    pub fn to_global(&self, addr: LocalAddr) -> GlobalAddr {
        let a = addr.0;
        match self.windows().iter().find(|w| w.contains_local(a)) {
            Some(w) => GlobalAddr(w.global_base.wrapping_add(a - w.local_base)),
            None => GlobalAddr(a),
        }
    }

    /// Converts a global address back into this core's view.
    pub fn to_local(&self, addr: GlobalAddr) -> LocalAddr {
        let a = addr.0;
        match self.windows().iter().find(|w| w.contains_global(a)) {
            Some(w) => LocalAddr(w.local_base.wrapping_add(a - w.global_base)),
            None => LocalAddr(a),
        }
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::identity()
    }
}
