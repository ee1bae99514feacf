//! Buffer identity registry
//!
//! Binds every buffer key to its element type, slot count and display name.
//! The binding exists twice: as a zero-sized marker type implementing
//! `BufferTrait` (compile-time, used for typed access) and as a static
//! `BufferInfo` table (runtime, used when only the key is known).

use std::any::TypeId;

use crate::buffers::buffer::{AbstractBuffer, GenericBuffer};
use crate::flags::{self, Flag};

pub type Float3 = [f32; 3];
pub type Float4 = [f32; 4];
pub type Double4 = [f64; 4];
/// Particle type, object, id (low and high halves)
pub type ParticleInfo = [u16; 4];
/// Indices of the three vertices of a boundary element
pub type VertexInfo = [u32; 4];
pub type HashKey = u32;
pub type NeibData = u16;
/// Symmetric 3x3 tensor, upper triangle row-major
pub type SymTensor3 = [f32; 6];

/// Compile-time facts about one buffer family
pub trait BufferTrait: 'static {
    type Element: bytemuck::Pod + Send + Sync + std::fmt::Debug;
    const KEY: Flag;
    const NAME: &'static str;
    const SLOTS: usize;

    /// Unallocated buffer for this family, filled with `init` on allocation
    fn buffer(init: i32) -> Buffer<Self>
    where
        Self: Sized,
    {
        GenericBuffer::new(Self::KEY, Self::NAME, Self::SLOTS, init)
    }
}

/// Concrete buffer type for the family `K`
pub type Buffer<K> = GenericBuffer<<K as BufferTrait>::Element>;

/// Runtime facts about one buffer family
#[derive(Clone, Copy)]
pub struct BufferInfo {
    pub key: Flag,
    pub name: &'static str,
    pub element_size: usize,
    pub slot_count: usize,
    factory: fn(i32) -> Box<dyn AbstractBuffer>,
    storage: fn() -> TypeId,
}

impl BufferInfo {
    /// Create an unallocated buffer for this family
    pub fn create(&self, init: i32) -> Box<dyn AbstractBuffer> {
        (self.factory)(init)
    }

    pub fn is_double_buffered(&self) -> bool {
        self.slot_count == 2
    }

    /// Whether `buffer` has the storage type and slot count of this family
    pub fn matches(&self, buffer: &dyn AbstractBuffer) -> bool {
        buffer.key() == self.key
            && buffer.as_any().type_id() == (self.storage)()
            && buffer.array_count() == self.slot_count
    }
}

impl std::fmt::Debug for BufferInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferInfo")
            .field("key", &format_args!("{:#010x}", self.key))
            .field("name", &self.name)
            .field("element_size", &self.element_size)
            .field("slot_count", &self.slot_count)
            .finish()
    }
}

fn make_buffer<K: BufferTrait>(init: i32) -> Box<dyn AbstractBuffer> {
    Box::new(K::buffer(init))
}

fn storage_of<K: BufferTrait>() -> TypeId {
    TypeId::of::<Buffer<K>>()
}

/// Declare buffer families: marker type, key, element type, slots, name
macro_rules! define_buffers {
    ($($marker:ident => $key:path, $elem:ty, $slots:literal, $name:literal;)+) => {
        $(
            #[derive(Debug, Clone, Copy)]
            pub struct $marker;

            impl BufferTrait for $marker {
                type Element = $elem;
                const KEY: Flag = $key;
                const NAME: &'static str = $name;
                const SLOTS: usize = $slots;
            }
        )+

        static REGISTRY: &[BufferInfo] = &[
            $(
                BufferInfo {
                    key: $key,
                    name: $name,
                    element_size: std::mem::size_of::<$elem>(),
                    slot_count: $slots,
                    factory: make_buffer::<$marker>,
                    storage: storage_of::<$marker>,
                },
            )+
        ];
    };
}

define_buffers! {
    Pos => flags::BUFFER_POS, Float4, 2, "Position";
    PosGlobal => flags::BUFFER_POS_GLOBAL, Double4, 1, "Position (double precision)";
    Hash => flags::BUFFER_HASH, HashKey, 1, "Hash";
    PartIndex => flags::BUFFER_PARTINDEX, u32, 1, "Particle Index";
    CellStart => flags::BUFFER_CELLSTART, u32, 1, "Cell Start";
    CellEnd => flags::BUFFER_CELLEND, u32, 1, "Cell End";
    CompactDevMap => flags::BUFFER_COMPACT_DEV_MAP, u32, 1, "Compact Device Map";
    NeibsList => flags::BUFFER_NEIBSLIST, NeibData, 1, "Neighbor List";
    Forces => flags::BUFFER_FORCES, Float4, 1, "Force";
    Xsph => flags::BUFFER_XSPH, Float4, 1, "XSPH";
    Tau => flags::BUFFER_TAU, SymTensor3, 1, "Tau";
    Vorticity => flags::BUFFER_VORTICITY, Float3, 1, "Vorticity";
    Normals => flags::BUFFER_NORMALS, Float4, 1, "Normals";
    BoundElements => flags::BUFFER_BOUNDELEMENTS, Float4, 2, "Boundary Elements";
    GradGamma => flags::BUFFER_GRADGAMMA, Float4, 2, "Gamma Gradient";
    Vertices => flags::BUFFER_VERTICES, VertexInfo, 2, "Vertices";
    Pressure => flags::BUFFER_PRESSURE, f32, 2, "Pressure";
    Tke => flags::BUFFER_TKE, f32, 2, "Turbulent Kinetic Energy";
    Epsilon => flags::BUFFER_EPSILON, f32, 2, "Turbulent Dissipation Rate";
    TurbVisc => flags::BUFFER_TURBVISC, f32, 2, "Eddy Viscosity";
    Dkde => flags::BUFFER_DKDE, Float3, 1, "dk/dt, de/dt";
    StrainRate => flags::BUFFER_STRAIN_RATE, f32, 2, "Strain Rate";
    Cfl => flags::BUFFER_CFL, f32, 1, "CFL";
    Info => flags::BUFFER_INFO, ParticleInfo, 2, "Info";
    Vel => flags::BUFFER_VEL, Float4, 2, "Velocity";
}

/// Every registered buffer family, in key order
pub fn registry() -> &'static [BufferInfo] {
    REGISTRY
}

/// Look up the registry entry of a single key
pub fn buffer_info(key: Flag) -> Option<&'static BufferInfo> {
    if !flags::is_buffer_key(key) {
        return None;
    }
    REGISTRY.iter().find(|info| info.key == key)
}

/// Names of every family contained in `mask`
pub fn names_of(mask: Flag) -> Vec<&'static str> {
    flags::iter_buffers(mask)
        .filter_map(buffer_info)
        .map(|info| info.name)
        .collect()
}
