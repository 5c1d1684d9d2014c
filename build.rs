use color_eyre::Result;
use color_eyre::eyre::{OptionExt, WrapErr};
use shaderc::{CompileOptions, Compiler, EnvVersion, ResolvedInclude, ShaderKind, TargetEnv};
use std::{env, fs, path::Path};

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=shaders");

    compile_shaders()?;

    Ok(())
}

fn compile_shaders() -> Result<()> {
    let cargo_manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let shaders_in_dir = Path::new(&cargo_manifest_dir).join("shaders");
    let shaders_out_dir = Path::new(&cargo_manifest_dir).join("shaders-built");
    fs::create_dir_all(&shaders_out_dir)?;

    let compiler = Compiler::new().ok_or_eyre("Failed to create the shaderc compiler")?;
    let mut options = CompileOptions::new().ok_or_eyre("Failed to create shaderc options")?;
    options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_3 as u32);
    let include_dir = shaders_in_dir.clone();
    options.set_include_callback(move |requested, _include_type, _requesting, _depth| {
        let path = include_dir.join(requested);
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Cannot include {}: {e}", path.display()))?;
        Ok(ResolvedInclude {
            resolved_name: path.to_string_lossy().into_owned(),
            content,
        })
    });

    for entry in fs::read_dir(&shaders_in_dir)? {
        let entry = entry?;
        let path = entry.path();

        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_eyre(format!("Shader file has no extension: {:?}", path))?;
        let shader_kind = match ext {
            "vert" => ShaderKind::Vertex,
            "frag" => ShaderKind::Fragment,
            "comp" => ShaderKind::Compute,
            // Pulled in through #include
            "glsl" => continue,
            _ => {
                log::warn!("Skipping non-GLSL file: {:?}", path);
                continue;
            }
        };

        let file_name = path
            .file_name()
            .ok_or_eyre("Shader file has no name")?
            .to_str()
            .ok_or_eyre("Shader file name is not valid UTF-8")?;
        println!("cargo:rerun-if-changed={}", path.display());

        let source = fs::read_to_string(&path)?;
        let artifact = compiler
            .compile_into_spirv(&source, shader_kind, file_name, "main", Some(&options))
            .wrap_err_with(|| format!("Failed to compile {file_name}"))?;
        if artifact.get_num_warnings() > 0 {
            log::warn!("{file_name}: {}", artifact.get_warning_messages());
        }

        // mesh.vert -> mesh.vert.spv, matching the names the renderer loads
        let output_filepath = shaders_out_dir.join(format!("{file_name}.spv"));
        fs::write(output_filepath, artifact.as_binary_u8())?;
    }

    Ok(())
}
