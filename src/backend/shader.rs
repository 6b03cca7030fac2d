// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The pipeline stage of each file is taken
// from its name: `triangle.vert.spv` is a vertex shader, `triangle.frag.spv`
// a fragment shader.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::device::Device;
use crate::error::SetupError;

pub const ENTRY_POINT: &CStr = c"main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Stage named by what follows the first `.` of the file name: `.vert` or
/// `.frag`, possibly followed by more characters
pub fn classify(path: &Path) -> Option<ShaderStage> {
    let name = path.file_name()?.to_str()?;
    let suffix = &name[name.find('.')?..];

    if suffix.starts_with(".vert") {
        Some(ShaderStage::Vertex)
    } else if suffix.starts_with(".frag") {
        Some(ShaderStage::Fragment)
    } else {
        None
    }
}

/// Read SPIR-V words from disk
pub fn read_spirv(path: &Path) -> Result<Vec<u32>, SetupError> {
    let to_error = |source| SetupError::ShaderRead {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(to_error)?;
    ash::util::read_spv(&mut file).map_err(to_error)
}

/// Shader module destroyed on drop
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,
    pub path: PathBuf,
    device: Arc<Device>,
}

impl ShaderModule {
    pub fn new(device: Arc<Device>, stage: ShaderStage, path: &Path, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .with_context(|| format!("Failed to create shader module from {:?}", path))?;
        log::info!("Created Shader Module {:?}", path);

        Ok(Self {
            module,
            stage,
            path: path.to_path_buf(),
            device,
        })
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.flags())
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Load every vertex/fragment shader in `paths`.
///
/// Files whose name names neither stage are skipped with a warning; a file
/// that cannot be read fails the whole load.
pub fn load_stages<P: AsRef<Path>>(device: &Arc<Device>, paths: &[P]) -> Result<Vec<ShaderModule>> {
    let mut modules = Vec::with_capacity(paths.len());

    for path in paths {
        let path = path.as_ref();
        let Some(stage) = classify(path) else {
            log::warn!("Unsupported shader file type {:?}, skipping", path);
            continue;
        };

        let code = read_spirv(path)?;
        modules.push(ShaderModule::new(device.clone(), stage, path, &code)?);
    }

    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stage_from_compiled_name() {
        assert_eq!(classify(Path::new("shaders/triangle.vert.spv")), Some(ShaderStage::Vertex));
        assert_eq!(classify(Path::new("shaders/triangle.frag.spv")), Some(ShaderStage::Fragment));
        assert_eq!(classify(Path::new("triangle.frag")), Some(ShaderStage::Fragment));
    }

    #[test]
    fn directories_with_dots_do_not_confuse_classification() {
        assert_eq!(classify(Path::new("./assets.v2/cube.vert.spv")), Some(ShaderStage::Vertex));
        assert_eq!(classify(Path::new("./shaders.frag/cube.spv")), None);
    }

    #[test]
    fn other_stages_are_unsupported() {
        assert_eq!(classify(Path::new("blur.comp.spv")), None);
        assert_eq!(classify(Path::new("vert")), None);
    }

    #[test]
    fn only_the_token_after_the_first_dot_counts() {
        assert_eq!(classify(Path::new("triangle.vertex.spv")), Some(ShaderStage::Vertex));
        assert_eq!(classify(Path::new("post.fragment")), Some(ShaderStage::Fragment));
        assert_eq!(classify(Path::new("a.b.vert")), None);
        assert_eq!(classify(Path::new("lit.v2.frag.spv")), None);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = read_spirv(Path::new("definitely/not/here.vert.spv"));
        assert!(matches!(result, Err(SetupError::ShaderRead { .. })));
    }

    #[test]
    fn reads_spirv_words() {
        let path = std::env::temp_dir().join(format!("vk-init-{}.vert.spv", std::process::id()));
        {
            let mut file = File::create(&path).unwrap();
            // SPIR-V magic number followed by one more word
            file.write_all(&0x0723_0203u32.to_le_bytes()).unwrap();
            file.write_all(&1u32.to_le_bytes()).unwrap();
        }

        let words = read_spirv(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(words, vec![0x0723_0203, 1]);
    }
}
