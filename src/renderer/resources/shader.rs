use std::fs::File;
use std::path::Path;
use ash::vk;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

/// Reads a SPIR-V binary into properly aligned words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path)
        .wrap_err_with(|| format!("Failed to open shader {}", path.display()))?;
    ash::util::read_spv(&mut file)
        .wrap_err_with(|| format!("{} is not a valid SPIR-V binary", path.display()))
}

pub fn load_shader_module(
    device: &ash::Device,
    shader_dir: &Path,
    file_name: &str,
) -> Result<vk::ShaderModule> {
    let code = read_spirv(&shader_dir.join(file_name))?;

    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(&code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)?
    };

    log::debug!("Loaded shader module {file_name}");
    Ok(shader_module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn reads_little_endian_words() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let words = [SPIRV_MAGIC, 0x0001_0500, 42];
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }

        assert_eq!(read_spirv(file.path()).unwrap(), words);
    }

    #[test]
    fn rejects_truncated_binary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x03, 0x02, 0x23, 0x07, 0x00]).unwrap();

        assert!(read_spirv(file.path()).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_spirv(Path::new("does-not-exist/missing.spv")).unwrap_err();
        assert!(format!("{err:?}").contains("missing.spv"));
    }

    #[test]
    fn build_script_compiles_every_shader() {
        let built = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders-built");
        for name in ["mesh.vert.spv", "mesh.frag.spv", "gradient_color.comp.spv", "sky.comp.spv"] {
            let words = read_spirv(&built.join(name)).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC, "{name}");
        }
    }
}
