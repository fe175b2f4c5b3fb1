// SPDX-License-Identifier: CEPL-1.0
// With `embed-shaders`, compiles shaders/*.{vert,frag} to SPIR-V in OUT_DIR so
// the crate can `include_bytes!` them. Otherwise SPIR-V is read at runtime.

const SHADERS: &[&str] = &["mesh.vert", "color.frag", "textured.frag"];

fn main() {
    for name in SHADERS {
        println!("cargo:rerun-if-changed=shaders/{name}");
    }
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "embed-shaders")]
    embed::compile_all();
}

#[cfg(feature = "embed-shaders")]
mod embed {
    use super::SHADERS;
    use std::{env, fs, path::PathBuf};

    pub fn compile_all() {
        let out = PathBuf::from(env::var("OUT_DIR").unwrap());
        let dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

        let comp = shaderc::Compiler::new().unwrap();
        let mut opts = shaderc::CompileOptions::new().unwrap();
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for name in SHADERS {
            let kind = if name.ends_with(".vert") {
                shaderc::ShaderKind::Vertex
            } else {
                shaderc::ShaderKind::Fragment
            };
            let src = fs::read_to_string(dir.join(name))
                .unwrap_or_else(|e| panic!("reading shaders/{name}: {e}"));
            let spv = comp
                .compile_into_spirv(&src, kind, name, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
            fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
        }
    }
}
