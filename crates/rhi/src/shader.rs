//! Shader module management.
//!
//! - [`ShaderStage`] names the pipeline stage a module runs in and can be
//!   derived from a source file suffix (`.vert`, `.geom`, `.frag`, `.comp`)
//! - [`Specialization`] holds specialization constant data for a stage
//! - [`Shader`] wraps a `VkShaderModule` together with its stage, entry point
//!   and optional specialization
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use framegraph_rhi::device::Device;
//! use framegraph_rhi::shader::{Shader, ShaderStage, Specialization};
//!
//! # fn example(device: Arc<Device>) -> Result<(), framegraph_rhi::RhiError> {
//! let vertex_shader = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/forward.vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?
//! .with_specialization(Specialization::from_u32_constants(&[4, 2, 16]));
//!
//! let spec = vertex_shader.specialization_info();
//! let _stage_info = vertex_shader.stage_create_info(spec.as_ref());
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Derives the stage from the last extension of a shader file name.
    ///
    /// Returns `None` for any suffix other than `vert`, `geom`, `frag` or
    /// `comp`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, suffix) = name.rsplit_once('.')?;
        match suffix {
            "vert" => Some(ShaderStage::Vertex),
            "geom" => Some(ShaderStage::Geometry),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Specialization constant values for one shader stage.
#[derive(Clone, Debug, Default)]
pub struct Specialization {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl Specialization {
    /// Maps `values[i]` to constant id `i`, each as a 4-byte unsigned int.
    pub fn from_u32_constants(values: &[u32]) -> Self {
        let size = std::mem::size_of::<u32>();
        let entries = (0..values.len())
            .map(|i| {
                vk::SpecializationMapEntry::default()
                    .constant_id(i as u32)
                    .offset((i * size) as u32)
                    .size(size)
            })
            .collect();

        Self {
            entries,
            data: bytemuck::cast_slice(values).to_vec(),
        }
    }

    pub fn entries(&self) -> &[vk::SpecializationMapEntry] {
        &self.entries
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Vulkan shader module wrapper.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
    specialization: Option<Specialization>,
}

impl Shader {
    /// Loads a shader from a compiled SPIR-V file.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;

        Self::from_spirv_bytes(device, &bytes, stage, entry_point)
    }

    /// Creates a shader module from raw SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the byte length is not a multiple
    /// of four or the entry point contains a NUL byte.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let code = spirv_words(bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        let entry_point_cstring = match CString::new(entry_point) {
            Ok(name) => name,
            Err(e) => {
                unsafe { device.handle().destroy_shader_module(module, None) };
                return Err(RhiError::ShaderError(format!(
                    "Invalid entry point name: {}",
                    e
                )));
            }
        };

        info!(
            "Created {} shader module with entry point '{}'",
            stage, entry_point
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point: entry_point_cstring,
            specialization: None,
        })
    }

    /// Attaches specialization constants; an empty set is ignored.
    pub fn with_specialization(mut self, specialization: Specialization) -> Self {
        self.specialization = (!specialization.is_empty()).then_some(specialization);
        self
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &std::ffi::CStr {
        &self.entry_point
    }

    /// Returns the specialization info borrowing this shader's constant data.
    pub fn specialization_info(&self) -> Option<vk::SpecializationInfo<'_>> {
        self.specialization.as_ref().map(|spec| {
            vk::SpecializationInfo::default()
                .map_entries(spec.entries())
                .data(spec.data())
        })
    }

    /// Builds the pipeline stage description.
    ///
    /// `specialization` is normally the value returned by
    /// [`Shader::specialization_info`], kept alive by the caller until the
    /// pipeline has been created.
    pub fn stage_create_info<'a>(
        &'a self,
        specialization: Option<&'a vk::SpecializationInfo<'a>>,
    ) -> vk::PipelineShaderStageCreateInfo<'a> {
        let info = vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point);

        match specialization {
            Some(spec) => info.specialization_info(spec),
            None => info,
        }
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be 4-byte aligned, got {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_file_name() {
        assert_eq!(
            ShaderStage::from_file_name("forward.vert"),
            Some(ShaderStage::Vertex)
        );
        assert_eq!(
            ShaderStage::from_file_name("outline.geom"),
            Some(ShaderStage::Geometry)
        );
        assert_eq!(
            ShaderStage::from_file_name("deferred/shading.frag"),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(
            ShaderStage::from_file_name("particles.comp"),
            Some(ShaderStage::Compute)
        );
    }

    #[test]
    fn test_stage_from_unknown_suffix() {
        assert_eq!(ShaderStage::from_file_name("forward.glsl"), None);
        assert_eq!(ShaderStage::from_file_name("forward.vert.spv"), None);
        assert_eq!(ShaderStage::from_file_name("forward"), None);
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Geometry.to_vk_stage(),
            vk::ShaderStageFlags::GEOMETRY
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Geometry), "geometry");
    }

    #[test]
    fn test_specialization_layout() {
        let spec = Specialization::from_u32_constants(&[3, 1, 7]);
        assert_eq!(spec.entries().len(), 3);
        assert_eq!(spec.entries()[2].constant_id, 2);
        assert_eq!(spec.entries()[2].offset, 8);
        assert_eq!(spec.entries()[2].size, 4);
        assert_eq!(spec.data().len(), 12);
        assert_eq!(&spec.data()[4..8], &1u32.to_ne_bytes());
    }

    #[test]
    fn test_empty_specialization() {
        assert!(Specialization::from_u32_constants(&[]).is_empty());
    }

    #[test]
    fn test_misaligned_spirv_rejected() {
        assert!(matches!(
            spirv_words(&[0u8; 5]),
            Err(RhiError::ShaderError(_))
        ));
        assert_eq!(spirv_words(&[1, 0, 0, 0]).unwrap(), vec![1]);
    }
}
