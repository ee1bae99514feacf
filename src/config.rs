//! Run configuration
//!
//! Loaded from TOML. Every field has a default so a config file only needs
//! to name what it changes.

use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::domain::{DeviceLayout, DumpNaming, DumpOrigin, GridGeometry, MAX_DEVICES_PER_NODE};
use crate::error::{SimError, SimErrorContext, SimResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Device workers started on this node
    pub devices_per_node: usize,
    pub problem_name: String,
    /// Inter-particle spacing, also used to tag output files
    pub deltap: f64,
    pub output_dir: PathBuf,
    /// Write the cell to device map after decomposition
    pub dump_device_map: bool,
    pub max_iterations: u64,
    pub nosave: bool,
    pub world_origin: Vec3,
    pub world_size: Vec3,
    /// Smallest allowed cell edge
    pub cell_size: f32,
    /// Particles seeded by the host reference run
    pub particles: u32,
    /// Time step proposed by the host reference executor
    pub dt: f32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            devices_per_node: 1,
            problem_name: "Problem".to_string(),
            deltap: 0.02,
            output_dir: PathBuf::from("output"),
            dump_device_map: false,
            max_iterations: 100,
            nosave: false,
            world_origin: Vec3::ZERO,
            world_size: Vec3::ONE,
            cell_size: 0.1,
            particles: 1000,
            dt: 1e-4,
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(raw: &str) -> SimResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .sim_context(&format!("reading {}", path.display()))?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.devices_per_node == 0 || self.devices_per_node > MAX_DEVICES_PER_NODE {
            return Err(SimError::Config {
                message: format!(
                    "devices_per_node = {}, must be between 1 and {}",
                    self.devices_per_node, MAX_DEVICES_PER_NODE
                ),
            });
        }
        if !(self.cell_size > 0.0) {
            return Err(SimError::Config {
                message: format!("cell_size = {} must be positive", self.cell_size),
            });
        }
        if !self.world_size.cmpgt(Vec3::ZERO).all() {
            return Err(SimError::Config {
                message: format!("world_size = {} must be positive on every axis", self.world_size),
            });
        }
        if !(self.dt > 0.0) || !(self.deltap > 0.0) {
            return Err(SimError::Config {
                message: format!("dt = {} and deltap = {} must be positive", self.dt, self.deltap),
            });
        }
        if self.problem_name.is_empty() {
            return Err(SimError::Config {
                message: "problem_name is empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn geometry(&self) -> SimResult<GridGeometry> {
        GridGeometry::from_extent(self.world_origin, self.world_size, self.cell_size)
    }

    pub fn layout(&self, nodes: usize) -> SimResult<DeviceLayout> {
        DeviceLayout::new(self.devices_per_node, nodes)
    }

    pub fn dump_naming(&self, prefix: Option<&str>, origin: DumpOrigin) -> DumpNaming {
        DumpNaming {
            output_dir: self.output_dir.clone(),
            prefix: prefix.map(str::to_string),
            problem_name: self.problem_name.clone(),
            deltap: self.deltap,
            origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
            devices_per_node = 2
            problem_name = "DamBreak"
            world_size = [2.0, 1.0, 1.0]
            cell_size = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.devices_per_node, 2);
        assert_eq!(config.world_size, Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(config.max_iterations, RunConfig::default().max_iterations);
        assert_eq!(config.geometry().unwrap().grid_size(), glam::UVec3::new(8, 4, 4));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(RunConfig::from_toml_str("devices_per_node = 0").is_err());
        assert!(RunConfig::from_toml_str("devices_per_node = 9").is_err());
        assert!(RunConfig::from_toml_str("cell_size = -1.0").is_err());
        assert!(RunConfig::from_toml_str("world_size = [1.0, 0.0, 1.0]").is_err());
        assert!(matches!(
            RunConfig::from_toml_str("devices_per_node = \"two\""),
            Err(SimError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations = 7\nnosave = true").unwrap();
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.max_iterations, 7);
        assert!(config.nosave);

        assert!(RunConfig::load("/definitely/not/here.toml").is_err());
    }
}
