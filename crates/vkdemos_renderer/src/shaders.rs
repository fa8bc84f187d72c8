//! Locating and loading the demo shaders
//!
//! Without the `shaderc` feature every shader is loaded as prebuilt `<name>.spv`. With it, the
//! GLSL source `<name>` is compiled when the demo starts.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;

use crate::vulkan::{Device, ShaderModule};

/// Whether shaders are compiled from GLSL at runtime.
pub const USING_SHADERC: bool = cfg!(feature = "shaderc");

/// Finds shader files in an ordered list of directories.
#[derive(Debug, Clone)]
pub struct ShaderLocator {
    dirs: Vec<PathBuf>,
}

impl ShaderLocator {
    /// Searches `shader_dir` first, then the directories around the executable, the crate's
    /// `shaders/` directory and the working directory.
    pub fn new(shader_dir: Option<&Path>) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let cwd = std::env::current_dir().ok();
        Self::from_dirs(search_dirs(
            shader_dir,
            exe_dir.as_deref(),
            Path::new(env!("CARGO_MANIFEST_DIR")),
            cwd.as_deref(),
        ))
    }

    /// Searches exactly `dirs`, in order.
    pub fn from_dirs(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Returns the directories searched, in order.
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Returns the first existing `file_name` in the search directories.
    pub fn find(&self, file_name: &str) -> anyhow::Result<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|path| path.is_file())
            .with_context(|| format!("Shader {file_name} not found in {:?}", self.dirs))
    }

    /// Loads the SPIR-V of shader `name`, e.g. `triangle.vert`.
    pub fn load(&self, name: &str) -> anyhow::Result<Vec<u32>> {
        if USING_SHADERC {
            compile_glsl(&self.find(name)?)
        } else {
            load_spirv(&self.find(&format!("{name}.spv"))?)
        }
    }

    /// Loads shader `name` and creates a module from it.
    pub fn module(&self, device: &Device, name: &str) -> anyhow::Result<ShaderModule> {
        let code = self.load(name)?;
        ShaderModule::from_spirv(device, &code)
            .with_context(|| format!("Failed to create shader module {name}"))
    }
}

/// The shader search order. Missing directories are skipped.
pub fn search_dirs(
    shader_dir: Option<&Path>,
    exe_dir: Option<&Path>,
    manifest_dir: &Path,
    cwd: Option<&Path>,
) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    dirs.extend(shader_dir.map(Path::to_path_buf));
    if let Some(exe_dir) = exe_dir {
        dirs.push(exe_dir.to_path_buf());
        dirs.push(exe_dir.join("shaders"));
    }
    dirs.push(manifest_dir.join("shaders"));
    dirs.extend(cwd.map(Path::to_path_buf));
    dirs
}

/// Reads a SPIR-V binary.
pub fn load_spirv(path: &Path) -> anyhow::Result<Vec<u32>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let code = decode_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {}", path.display()))?;
    debug!("Loaded {} ({} words)", path.display(), code.len());
    Ok(code)
}

/// Decodes SPIR-V words from their byte representation.
pub fn decode_spirv(bytes: &[u8]) -> anyhow::Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("SPIR-V file is not a multiple of 4 bytes");
    }
    if bytes.is_empty() {
        anyhow::bail!("SPIR-V file is empty");
    }
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Failed to decode SPIR-V words")
}

/// The pipeline stage of a GLSL file, from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Maps `.vert`, `.frag` and `.comp` to their stage.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("vert") => Ok(Self::Vertex),
            Some("frag") => Ok(Self::Fragment),
            Some("comp") => Ok(Self::Compute),
            _ => anyhow::bail!("Unknown shader stage for {}", path.display()),
        }
    }
}

#[cfg(feature = "shaderc")]
fn compile_glsl(path: &Path) -> anyhow::Result<Vec<u32>> {
    let kind = match ShaderStage::from_path(path)? {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        ShaderStage::Compute => shaderc::ShaderKind::Compute,
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let compiler = shaderc::Compiler::new().context("shaderc is not available")?;
    let mut options = shaderc::CompileOptions::new().context("Failed to create shaderc options")?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_1 as u32,
    );

    let file_name = path.to_string_lossy();
    let artifact = compiler
        .compile_into_spirv(&source, kind, &file_name, "main", Some(&options))
        .with_context(|| format!("Failed to compile {}", path.display()))?;
    if artifact.get_num_warnings() > 0 {
        log::warn!("{}: {}", path.display(), artifact.get_warning_messages());
    }

    debug!("Compiled {} ({} words)", path.display(), artifact.len() / 4);
    Ok(artifact.as_binary().to_vec())
}

#[cfg(not(feature = "shaderc"))]
fn compile_glsl(path: &Path) -> anyhow::Result<Vec<u32>> {
    ShaderStage::from_path(path)?;
    anyhow::bail!(
        "Cannot compile {}: built without the shaderc feature",
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_order() {
        let dirs = search_dirs(
            Some(Path::new("/env")),
            Some(Path::new("/bin")),
            Path::new("/src/crate"),
            Some(Path::new("/work")),
        );
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/env"),
                PathBuf::from("/bin"),
                PathBuf::from("/bin/shaders"),
                PathBuf::from("/src/crate/shaders"),
                PathBuf::from("/work"),
            ]
        );
    }

    #[test]
    fn search_order_without_optional_dirs() {
        let dirs = search_dirs(None, None, Path::new("/src/crate"), None);
        assert_eq!(dirs, vec![PathBuf::from("/src/crate/shaders")]);
    }

    #[test]
    fn rejects_truncated_spirv() {
        let err = decode_spirv(&[0x03, 0x02, 0x23, 0x07, 0x00]).unwrap_err();
        assert!(err.to_string().contains("multiple of 4"));
        assert!(decode_spirv(&[]).is_err());
    }

    #[test]
    fn decodes_words() {
        let mut bytes = 0x0723_0203_u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000_u32.to_le_bytes());
        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn stage_from_extension() {
        assert_eq!(
            ShaderStage::from_path(Path::new("a/triangle.vert")).unwrap(),
            ShaderStage::Vertex
        );
        assert_eq!(
            ShaderStage::from_path(Path::new("compute.comp")).unwrap(),
            ShaderStage::Compute
        );
        assert!(ShaderStage::from_path(Path::new("shader.glsl")).is_err());
    }

    #[test]
    fn find_reports_missing_shader() {
        let dir = std::env::temp_dir().join("vkdemos_missing_shaders");
        let locator = ShaderLocator::from_dirs(vec![dir]);
        let err = locator.find("nothing.vert.spv").unwrap_err();
        assert!(err.to_string().contains("nothing.vert.spv"));
    }

    #[test]
    fn finds_first_match() {
        let base = std::env::temp_dir().join(format!("vkdemos_shaders_{}", std::process::id()));
        let first = base.join("first");
        let second = base.join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("x.spv"), [0u8; 4]).unwrap();

        let locator = ShaderLocator::from_dirs(vec![first.clone(), second.clone()]);
        assert_eq!(locator.find("x.spv").unwrap(), second.join("x.spv"));

        std::fs::write(first.join("x.spv"), [0u8; 4]).unwrap();
        assert_eq!(locator.find("x.spv").unwrap(), first.join("x.spv"));

        std::fs::remove_dir_all(&base).unwrap();
    }
}
