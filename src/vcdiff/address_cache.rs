// VCDIFF address cache (RFC 3284, Section 5.3).
//
// Decodes COPY addresses from a window's address section using the NEAR
// and SAME caches.  Every decoded address feeds both caches in decode
// order, so the decoder must see addresses in exactly the order the
// encoder produced them.

use super::varint;

// ---------------------------------------------------------------------------
// Address modes (RFC 3284 Section 5.3)
// ---------------------------------------------------------------------------

/// Absolute address.
pub const VCD_SELF: u8 = 0;
/// Address relative to "here" (current position in address space).
pub const VCD_HERE: u8 = 1;

/// Default NEAR cache size.
pub const DEFAULT_NEAR_SIZE: usize = 4;
/// Default SAME cache size (in groups of 256 slots).
pub const DEFAULT_SAME_SIZE: usize = 3;

// ---------------------------------------------------------------------------
// Address cache
// ---------------------------------------------------------------------------

/// NEAR/SAME address cache together with the current window's address
/// section.
///
/// Default configuration (near=4, same=3) gives 9 address modes:
///   0      VCD_SELF  - absolute
///   1      VCD_HERE  - here - value
///   2..5   NEAR      - near\[mode-2\] + value
///   6..8   SAME      - same\[(mode-6)*256 + byte\]
#[derive(Clone, Debug)]
pub struct AddressCache {
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
    addresses: Vec<u8>,
    cursor: usize,
}

impl AddressCache {
    /// Create a cache with `near_size` NEAR slots and `same_size` groups
    /// of 256 SAME slots.
    pub fn new(near_size: usize, same_size: usize) -> Self {
        Self {
            near: vec![0; near_size],
            same: vec![0; same_size * 256],
            next_slot: 0,
            addresses: Vec::new(),
            cursor: 0,
        }
    }

    /// Install the address section of a new window.
    ///
    /// Both caches return to all-zero and the NEAR slot pointer to 0, as
    /// required at the start of each window.
    pub fn reset(&mut self, addresses: &[u8]) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
        self.addresses.clear();
        self.addresses.extend_from_slice(addresses);
        self.cursor = 0;
    }

    /// Number of NEAR cache slots.
    #[inline]
    pub fn near_size(&self) -> usize {
        self.near.len()
    }

    /// Number of SAME cache groups.
    #[inline]
    pub fn same_size(&self) -> usize {
        self.same.len() / 256
    }

    /// Total number of address modes (2 + near + same).
    #[inline]
    pub fn mode_count(&self) -> usize {
        2 + self.near_size() + self.same_size()
    }

    /// Address-section bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.addresses.len() - self.cursor
    }

    /// Record a decoded address in both caches.
    #[inline]
    fn update(&mut self, addr: u64) {
        if !self.near.is_empty() {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % self.near.len();
        }
        if !self.same.is_empty() {
            let idx = (addr % self.same.len() as u64) as usize;
            self.same[idx] = addr;
        }
    }

    fn read_varint(&mut self) -> Result<u64, AddressCacheError> {
        let (value, consumed) = varint::read_u64(&self.addresses[self.cursor..])
            .map_err(|_| AddressCacheError::AddrUnderflow)?;
        self.cursor += consumed;
        Ok(value)
    }

    fn read_byte(&mut self) -> Result<u8, AddressCacheError> {
        let byte = *self
            .addresses
            .get(self.cursor)
            .ok_or(AddressCacheError::AddrUnderflow)?;
        self.cursor += 1;
        Ok(byte)
    }

    /// Decode the next COPY address.
    ///
    /// `here` is the position in the combined source+target address space
    /// of the byte about to be produced.  The result is always `< here`.
    pub fn decode_address(&mut self, here: u64, mode: u8) -> Result<u64, AddressCacheError> {
        let m = mode as usize;
        let same_start = 2 + self.near_size();

        let addr = if m == VCD_SELF as usize {
            self.read_varint()?
        } else if m == VCD_HERE as usize {
            let d = self.read_varint()?;
            here.checked_sub(d).ok_or(AddressCacheError::InvalidAddr)?
        } else if m < same_start {
            let d = self.read_varint()?;
            self.near[m - 2]
                .checked_add(d)
                .ok_or(AddressCacheError::InvalidAddr)?
        } else if m < self.mode_count() {
            let b = self.read_byte()? as usize;
            self.same[(m - same_start) * 256 + b]
        } else {
            return Err(AddressCacheError::InvalidMode(mode));
        };

        if addr >= here {
            return Err(AddressCacheError::InvalidAddr);
        }

        self.update(addr);
        Ok(addr)
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_SIZE, DEFAULT_SAME_SIZE)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressCacheError {
    /// Not enough bytes in the address section.
    #[error("address section underflow")]
    AddrUnderflow,
    /// Decoded address does not precede the current position.
    #[error("invalid COPY address")]
    InvalidAddr,
    /// Mode outside `[0, 2 + near + same)`.
    #[error("invalid address mode {0}")]
    InvalidMode(u8),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
