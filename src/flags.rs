//! Packed control word shared by the orchestrator and the buffer operations.
//!
//! Layout of a `Flag` (32 bits):
//!
//! ```text
//!  31    30    29 .. 28   27 ............... 3   2 .. 0
//! WRITE READ   (free)     buffer identities      sub-step flags
//! ```
//!
//! Sub-step flags grow from the bottom, the two double-buffer selectors take
//! the two highest bits, and buffer identities start right above the last
//! sub-step flag. Masks from different ranges are combined with `|`.

/// The control word type
pub type Flag = u32;

/// Reserved "no flags" value
pub const NO_FLAGS: Flag = 0;

// Simulation sub-steps, growing from the bottom.
pub const INITIALIZATION_STEP: Flag = 1;
pub const INTEGRATOR_STEP_1: Flag = INITIALIZATION_STEP << 1;
pub const INTEGRATOR_STEP_2: Flag = INTEGRATOR_STEP_1 << 1;
/// Must be updated when a new sub-step flag is added after `INTEGRATOR_STEP_2`
pub const LAST_DEFINED_STEP: Flag = INTEGRATOR_STEP_2;

// Double-buffer slot selectors, growing from the top.
pub const DBLBUFFER_WRITE: Flag = 1 << (Flag::BITS - 1);
pub const DBLBUFFER_READ: Flag = DBLBUFFER_WRITE >> 1;

/// First bit available to buffer identities
pub const FIRST_DEFINED_BUFFER: Flag = LAST_DEFINED_STEP << 1;

pub const BUFFER_POS: Flag = FIRST_DEFINED_BUFFER;
pub const BUFFER_POS_GLOBAL: Flag = BUFFER_POS << 1;
pub const BUFFER_HASH: Flag = BUFFER_POS_GLOBAL << 1;
pub const BUFFER_PARTINDEX: Flag = BUFFER_HASH << 1;
pub const BUFFER_CELLSTART: Flag = BUFFER_PARTINDEX << 1;
pub const BUFFER_CELLEND: Flag = BUFFER_CELLSTART << 1;
pub const BUFFER_COMPACT_DEV_MAP: Flag = BUFFER_CELLEND << 1;
pub const BUFFER_NEIBSLIST: Flag = BUFFER_COMPACT_DEV_MAP << 1;
pub const BUFFER_FORCES: Flag = BUFFER_NEIBSLIST << 1;
pub const BUFFER_XSPH: Flag = BUFFER_FORCES << 1;
pub const BUFFER_TAU: Flag = BUFFER_XSPH << 1;
pub const BUFFER_VORTICITY: Flag = BUFFER_TAU << 1;
pub const BUFFER_NORMALS: Flag = BUFFER_VORTICITY << 1;
pub const BUFFER_BOUNDELEMENTS: Flag = BUFFER_NORMALS << 1;
pub const BUFFER_GRADGAMMA: Flag = BUFFER_BOUNDELEMENTS << 1;
pub const BUFFER_VERTICES: Flag = BUFFER_GRADGAMMA << 1;
pub const BUFFER_PRESSURE: Flag = BUFFER_VERTICES << 1;
pub const BUFFER_TKE: Flag = BUFFER_PRESSURE << 1;
pub const BUFFER_EPSILON: Flag = BUFFER_TKE << 1;
pub const BUFFER_TURBVISC: Flag = BUFFER_EPSILON << 1;
pub const BUFFER_DKDE: Flag = BUFFER_TURBVISC << 1;
pub const BUFFER_STRAIN_RATE: Flag = BUFFER_DKDE << 1;
pub const BUFFER_CFL: Flag = BUFFER_STRAIN_RATE << 1;
pub const BUFFER_INFO: Flag = BUFFER_CFL << 1;
pub const BUFFER_VEL: Flag = BUFFER_INFO << 1;
pub const LAST_DEFINED_BUFFER: Flag = BUFFER_VEL;

/// Common shortcut
pub const BUFFERS_POS_VEL_INFO: Flag = BUFFER_POS | BUFFER_VEL | BUFFER_INFO;

/// All double-buffered families
pub const BUFFERS_ALL_DBL: Flag = BUFFER_POS
    | BUFFER_VEL
    | BUFFER_INFO
    | BUFFER_BOUNDELEMENTS
    | BUFFER_GRADGAMMA
    | BUFFER_VERTICES
    | BUFFER_PRESSURE
    | BUFFER_TKE
    | BUFFER_EPSILON
    | BUFFER_TURBVISC
    | BUFFER_STRAIN_RATE;

/// Every buffer identity bit
pub const ALL_BUFFERS: Flag = (LAST_DEFINED_BUFFER << 1) - FIRST_DEFINED_BUFFER;

const STEP_MASK: Flag = (LAST_DEFINED_STEP << 1) - 1;
const SLOT_MASK: Flag = DBLBUFFER_WRITE | DBLBUFFER_READ;

// Buffer identities must never reach the slot selector bits.
const _: () = assert!(LAST_DEFINED_BUFFER < DBLBUFFER_READ);
const _: () = assert!(ALL_BUFFERS & STEP_MASK == 0);

/// Sub-step part of a control word
#[inline]
pub fn step_flags(flags: Flag) -> Flag {
    flags & STEP_MASK
}

/// Buffer-identity part of a control word
#[inline]
pub fn buffer_flags(flags: Flag) -> Flag {
    flags & ALL_BUFFERS
}

/// Slot-selector part of a control word
#[inline]
pub fn slot_flags(flags: Flag) -> Flag {
    flags & SLOT_MASK
}

/// Whether `key` names exactly one buffer identity
#[inline]
pub fn is_buffer_key(key: Flag) -> bool {
    key.is_power_of_two() && key & ALL_BUFFERS != 0
}

/// Iterate the single-bit buffer keys contained in `mask`, lowest bit first
pub fn iter_buffers(mask: Flag) -> impl Iterator<Item = Flag> {
    let mut remaining = buffer_flags(mask);
    std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let key = remaining & remaining.wrapping_neg();
        remaining &= !key;
        Some(key)
    })
}
