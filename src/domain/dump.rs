//! Device map diagnostic dumps
//!
//! One CSV row per cell, x varying fastest, then y, then z.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::device_map::DeviceMap;
use crate::domain::geometry::GridGeometry;
use crate::error::{SimError, SimResult};
use crate::util::rank_string;

pub const CSV_HEADER: &str = "X,Y,Z,LINEARIZED,VALUE";

/// Cell type bits kept by the compact device map dump
pub const COMPACT_CELL_TYPE_SHIFT: u32 = 30;

/// Which process or device produced a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpOrigin {
    Process,
    Rank { rank: usize, nodes: usize, host: String },
    Device { device: usize, devices: usize },
}

/// File naming for diagnostic dumps
#[derive(Debug, Clone)]
pub struct DumpNaming {
    pub output_dir: PathBuf,
    pub prefix: Option<String>,
    pub problem_name: String,
    pub deltap: f64,
    pub origin: DumpOrigin,
}

impl DumpNaming {
    /// `<dir>/[<prefix>_]<problem>_dp<deltap>[_rank<r>.<nodes>.<host>|_dev<d>.<devices>].csv`
    pub fn path(&self) -> PathBuf {
        let mut name = String::new();
        if let Some(prefix) = self.prefix.as_deref().filter(|p| !p.is_empty()) {
            name.push_str(prefix);
            name.push('_');
        }
        name.push_str(&self.problem_name);
        name.push_str(&format!("_dp{}", self.deltap));
        match &self.origin {
            DumpOrigin::Process => {}
            DumpOrigin::Rank { rank, nodes, host } => {
                name.push_str(&format!("_rank{}.{}", rank_string(*rank, *nodes), host));
            }
            DumpOrigin::Device { device, devices } => {
                name.push_str(&format!("_dev{}.{}", device, devices));
            }
        }
        name.push_str(".csv");
        self.output_dir.join(name)
    }
}

/// Write the owning device of every cell
pub fn save_device_map(
    naming: &DumpNaming,
    geometry: &GridGeometry,
    map: &DeviceMap,
) -> SimResult<PathBuf> {
    if map.len() != geometry.total_cells() as usize {
        return Err(SimError::InvalidDeviceMap {
            message: format!("{} entries for {} cells", map.len(), geometry.total_cells()),
        });
    }
    let path = naming.path();
    write_cells(&path, geometry, |cell| map.owner(cell).raw() as u32)?;
    log::info!("[Dump] Saved device map to {}", path.display());
    Ok(path)
}

/// Write the cell type bits of a device's compact map
pub fn save_compact_device_map(
    naming: &DumpNaming,
    geometry: &GridGeometry,
    compact: &[u32],
) -> SimResult<PathBuf> {
    if compact.len() < geometry.total_cells() as usize {
        return Err(SimError::InvalidDeviceMap {
            message: format!(
                "compact map has {} entries for {} cells",
                compact.len(),
                geometry.total_cells()
            ),
        });
    }
    let path = naming.path();
    write_cells(&path, geometry, |cell| compact[cell as usize] >> COMPACT_CELL_TYPE_SHIFT)?;
    log::info!("[Dump] Saved compact device map to {}", path.display());
    Ok(path)
}

fn write_cells(path: &Path, geometry: &GridGeometry, value: impl Fn(u32) -> u32) -> SimResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", CSV_HEADER)?;
    for (index, coord) in geometry.cells().enumerate() {
        let index = index as u32;
        writeln!(
            out,
            "{},{},{},{},{}",
            coord.x,
            coord.y,
            coord.z,
            index,
            value(index)
        )?;
    }
    out.flush()?;
    Ok(())
}
