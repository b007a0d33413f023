// VCDIFF code tables (RFC 3284, Sections 5.4 and 7).
//
// A code table maps each of the 256 opcodes to a pair of instructions.
// The default table is built once per process; custom tables arrive in
// the patch header as a delta against the default table's serialization.

use std::sync::LazyLock;

/// Number of opcodes in a code table.
pub const TABLE_ENTRIES: usize = 256;

/// Size of a serialized code table: six arrays of 256 bytes each
/// (`type1`, `type2`, `size1`, `size2`, `mode1`, `mode2`).
pub const TABLE_BYTES: usize = 6 * TABLE_ENTRIES;

/// Minimum match length for COPY instructions in the default table.
pub const MIN_MATCH: u8 = 4;

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Instruction type codes as they appear in a serialized table.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InstructionType {
    #[default]
    Noop = 0,
    Add = 1,
    Run = 2,
    Copy = 3,
}

impl TryFrom<u8> for InstructionType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::Noop),
            1 => Ok(Self::Add),
            2 => Ok(Self::Run),
            3 => Ok(Self::Copy),
            other => Err(other),
        }
    }
}

/// One half of a code table entry.
///
/// A `size` of zero on anything but a NOOP means the real size follows
/// in the instruction section as a varint. `mode` is only meaningful
/// for COPY.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub itype: InstructionType,
    pub size: u8,
    pub mode: u8,
}

impl Instruction {
    pub const NOOP: Self = Self {
        itype: InstructionType::Noop,
        size: 0,
        mode: 0,
    };

    #[inline]
    pub const fn add(size: u8) -> Self {
        Self {
            itype: InstructionType::Add,
            size,
            mode: 0,
        }
    }

    #[inline]
    pub const fn run(size: u8) -> Self {
        Self {
            itype: InstructionType::Run,
            size,
            mode: 0,
        }
    }

    #[inline]
    pub const fn copy(size: u8, mode: u8) -> Self {
        Self {
            itype: InstructionType::Copy,
            size,
            mode,
        }
    }

    #[inline]
    pub fn is_noop(&self) -> bool {
        self.itype == InstructionType::Noop
    }

    /// Whether the size must be read from the instruction section.
    #[inline]
    pub fn size_follows(&self) -> bool {
        self.size == 0 && !self.is_noop()
    }
}

// ---------------------------------------------------------------------------
// Code table
// ---------------------------------------------------------------------------

/// A full 256-opcode code table. Slot 0 is always present; slot 1 is
/// NOOP for single-instruction opcodes.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeTable {
    entries: [[Instruction; 2]; TABLE_ENTRIES],
}

static DEFAULT_TABLE: LazyLock<CodeTable> = LazyLock::new(CodeTable::build_default);

impl CodeTable {
    /// The RFC 3284 default code table.
    pub fn default_table() -> &'static CodeTable {
        &DEFAULT_TABLE
    }

    /// Build the default table (RFC 3284, Section 5.6).
    fn build_default() -> Self {
        const ADD_SIZES: u8 = 17;
        const NEAR_MODES: u8 = 4;
        const SAME_MODES: u8 = 3;
        const CPY_SIZES: u8 = 15;
        const ADDCOPY_ADD_MAX: u8 = 4;
        const ADDCOPY_NEAR_CPY_MAX: u8 = 6;
        const ADDCOPY_SAME_CPY_MAX: u8 = 4;
        const COPYADD_CPY_SIZE: u8 = 4;
        const COPYADD_ADD_SIZE: u8 = 1;
        const CPY_MODES: u8 = 2 + NEAR_MODES + SAME_MODES; // 9

        let mut entries = [[Instruction::NOOP; 2]; TABLE_ENTRIES];
        let mut idx = 0usize;
        let mut push = |first: Instruction, second: Instruction| {
            entries[idx] = [first, second];
            idx += 1;
        };

        // 0: RUN, size follows.
        push(Instruction::run(0), Instruction::NOOP);

        // 1..=18: ADD, size follows, then sizes 1..=17.
        for size in 0..=ADD_SIZES {
            push(Instruction::add(size), Instruction::NOOP);
        }

        // 19..=162: COPY per mode, size follows, then sizes 4..=18.
        for mode in 0..CPY_MODES {
            push(Instruction::copy(0, mode), Instruction::NOOP);
            for size in MIN_MATCH..MIN_MATCH + CPY_SIZES {
                push(Instruction::copy(size, mode), Instruction::NOOP);
            }
        }

        // 163..=246: ADD + COPY. NEAR-class modes take COPY sizes 4..=6,
        // SAME modes only size 4.
        for mode in 0..CPY_MODES {
            let cpy_max = if mode < 2 + NEAR_MODES {
                ADDCOPY_NEAR_CPY_MAX
            } else {
                ADDCOPY_SAME_CPY_MAX
            };
            for add_size in 1..=ADDCOPY_ADD_MAX {
                for cpy_size in MIN_MATCH..=cpy_max {
                    push(
                        Instruction::add(add_size),
                        Instruction::copy(cpy_size, mode),
                    );
                }
            }
        }

        // 247..=255: COPY(4) + ADD(1).
        for mode in 0..CPY_MODES {
            push(
                Instruction::copy(COPYADD_CPY_SIZE, mode),
                Instruction::add(COPYADD_ADD_SIZE),
            );
        }

        debug_assert_eq!(idx, TABLE_ENTRIES, "code table must have exactly 256 entries");
        Self { entries }
    }

    /// Parse a serialized table.
    ///
    /// Every type byte must name a known instruction type.
    pub fn from_bytes(bytes: &[u8; TABLE_BYTES]) -> Result<Self, InvalidInstructionType> {
        let mut entries = [[Instruction::NOOP; 2]; TABLE_ENTRIES];
        for (opcode, entry) in entries.iter_mut().enumerate() {
            for (slot, inst) in entry.iter_mut().enumerate() {
                let raw = bytes[slot * TABLE_ENTRIES + opcode];
                let itype = InstructionType::try_from(raw).map_err(|itype| {
                    InvalidInstructionType {
                        opcode: opcode as u8,
                        itype,
                    }
                })?;
                *inst = Instruction {
                    itype,
                    size: bytes[(2 + slot) * TABLE_ENTRIES + opcode],
                    mode: bytes[(4 + slot) * TABLE_ENTRIES + opcode],
                };
            }
        }
        Ok(Self { entries })
    }

    /// Serialize to the 1536-byte layout read by [`CodeTable::from_bytes`].
    pub fn to_bytes(&self) -> [u8; TABLE_BYTES] {
        let mut out = [0u8; TABLE_BYTES];
        for (opcode, entry) in self.entries.iter().enumerate() {
            for (slot, inst) in entry.iter().enumerate() {
                out[slot * TABLE_ENTRIES + opcode] = inst.itype as u8;
                out[(2 + slot) * TABLE_ENTRIES + opcode] = inst.size;
                out[(4 + slot) * TABLE_ENTRIES + opcode] = inst.mode;
            }
        }
        out
    }

    /// Instruction in `slot` (0 or 1) of `opcode`.
    #[inline]
    pub fn get(&self, opcode: u8, slot: usize) -> Instruction {
        self.entries[opcode as usize][slot]
    }

    /// Both slots of `opcode`.
    #[inline]
    pub fn entry(&self, opcode: u8) -> &[Instruction; 2] {
        &self.entries[opcode as usize]
    }
}

impl Default for CodeTable {
    fn default() -> Self {
        Self::default_table().clone()
    }
}

impl std::fmt::Debug for CodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let custom = self != Self::default_table();
        f.debug_struct("CodeTable")
            .field("custom", &custom)
            .finish_non_exhaustive()
    }
}

/// A serialized table named an instruction type outside `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid instruction type {itype} at opcode {opcode}")]
pub struct InvalidInstructionType {
    pub opcode: u8,
    pub itype: u8,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
