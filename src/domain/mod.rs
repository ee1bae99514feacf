//! Domain decomposition
//!
//! Grid geometry, device addressing, the cell to device map, particle
//! accounting and the diagnostic dumps built on them.

pub mod counts;
pub mod device_id;
pub mod device_map;
pub mod dump;
pub mod geometry;

pub use counts::ParticleCounts;
pub use device_id::{GlobalDeviceId, DEVICE_BITS, DEVICE_BITS_MASK, MAX_DEVICES_PER_NODE, MAX_NODES_PER_CLUSTER};
pub use device_map::{cell_histogram, AxisSplitter, DeviceLayout, DeviceMap, DomainSplitter};
pub use dump::{save_compact_device_map, save_device_map, DumpNaming, DumpOrigin};
pub use geometry::GridGeometry;
