//! Particle buffers
//!
//! Typed storage for every per-particle array, the identity registry that
//! binds control-word keys to element types, and the keyed collection that
//! owns the buffers of one device.

pub mod buffer;
pub mod list;
pub mod traits;

pub use buffer::{AbstractBuffer, GenericBuffer};
pub use list::BufferList;
pub use traits::{buffer_info, names_of, registry, Buffer, BufferInfo, BufferTrait};
