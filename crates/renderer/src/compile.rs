//! GLSL front end and interface reflection.
//!
//! Sources are parsed and validated with the `naga` bundled in `wgpu` before
//! any GPU object is created, so compile and link diagnostics come back as
//! text the caller can show. Reflection then reports where the vertex
//! attributes, uniform block members and texture bindings ended up.

use std::collections::HashMap;

use wgpu::naga::{self, front::glsl, valid, AddressSpace, Binding, TypeInner};

use crate::error::{RenderError, Result, ShaderStage};
use crate::uniforms::{BlockLayout, BlockMember, UniformType};

/// Bind group holding the uniform block.
pub const UNIFORM_GROUP: u32 = 0;
/// Bind group holding textures and samplers.
pub const TEXTURE_GROUP: u32 = 1;

/// A vertex shader `in` variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexInput {
    pub name: String,
    pub location: u32,
    pub components: u32,
}

/// A texture or sampler binding in [`TEXTURE_GROUP`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSlot {
    pub name: String,
    pub binding: u32,
}

/// Everything the pipeline needs to know about a compiled program.
#[derive(Clone, Debug, Default)]
pub struct ProgramInterface {
    pub vertex_inputs: Vec<VertexInput>,
    pub uniforms: BlockLayout,
    pub textures: Vec<ResourceSlot>,
    pub samplers: Vec<ResourceSlot>,
}

/// Compiles both stages and checks that the fragment inputs are fed.
pub fn compile_program(vertex_source: &str, fragment_source: &str) -> Result<ProgramInterface> {
    let vertex = compile_stage(vertex_source, ShaderStage::Vertex)?;
    let fragment = compile_stage(fragment_source, ShaderStage::Fragment)?;
    link(&vertex, &fragment)?;

    let mut uniforms = uniform_block(&vertex);
    let fragment_block = uniform_block(&fragment);
    uniforms.span = uniforms.span.max(fragment_block.span);
    for (name, member) in fragment_block.members {
        uniforms.members.entry(name).or_insert(member);
    }

    let mut textures = Vec::new();
    let mut samplers = Vec::new();
    for module in [&vertex, &fragment] {
        collect_resources(module, &mut textures, &mut samplers);
    }

    Ok(ProgramInterface {
        vertex_inputs: vertex_inputs(&vertex),
        uniforms,
        textures,
        samplers,
    })
}

fn compile_stage(source: &str, stage: ShaderStage) -> Result<naga::Module> {
    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };

    let mut frontend = glsl::Frontend::default();
    let module = frontend
        .parse(&glsl::Options::from(naga_stage), source)
        .map_err(|errors| RenderError::ShaderCompilation {
            stage,
            log: errors.emit_to_string(source),
        })?;

    let mut validator =
        valid::Validator::new(valid::ValidationFlags::all(), valid::Capabilities::all());
    validator
        .validate(&module)
        .map_err(|err| RenderError::ShaderCompilation {
            stage,
            log: err.emit_to_string(source),
        })?;

    tracing::trace!(%stage, "shader stage validated");
    Ok(module)
}

fn link(vertex: &naga::Module, fragment: &naga::Module) -> Result<()> {
    let outputs = vertex_outputs(vertex);
    let mut problems = Vec::new();

    for (location, name, inner) in fragment_inputs(fragment) {
        match outputs.get(&location) {
            None => problems.push(format!(
                "fragment input `{name}` at location {location} has no matching vertex output"
            )),
            Some(output) if *output != inner => problems.push(format!(
                "fragment input `{name}` at location {location} is {inner:?} but the vertex stage writes {output:?}"
            )),
            Some(_) => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(RenderError::ProgramLink {
            log: problems.join("\n"),
        })
    }
}

fn entry_point(module: &naga::Module) -> Option<&naga::EntryPoint> {
    module
        .entry_points
        .iter()
        .find(|entry| entry.name == "main")
        .or_else(|| module.entry_points.first())
}

fn vertex_inputs(module: &naga::Module) -> Vec<VertexInput> {
    let Some(entry) = entry_point(module) else {
        return Vec::new();
    };
    entry
        .function
        .arguments
        .iter()
        .filter_map(|argument| match argument.binding {
            Some(Binding::Location { location, .. }) => Some(VertexInput {
                name: argument.name.clone().unwrap_or_default(),
                location,
                components: component_count(&module.types[argument.ty].inner),
            }),
            _ => None,
        })
        .collect()
}

fn vertex_outputs(module: &naga::Module) -> HashMap<u32, TypeInner> {
    let mut outputs = HashMap::new();
    let Some(result) = entry_point(module).and_then(|entry| entry.function.result.as_ref()) else {
        return outputs;
    };

    if let Some(Binding::Location { location, .. }) = result.binding {
        outputs.insert(location, module.types[result.ty].inner.clone());
        return outputs;
    }
    if let TypeInner::Struct { members, .. } = &module.types[result.ty].inner {
        for member in members {
            if let Some(Binding::Location { location, .. }) = member.binding {
                outputs.insert(location, module.types[member.ty].inner.clone());
            }
        }
    }
    outputs
}

fn fragment_inputs(module: &naga::Module) -> Vec<(u32, String, TypeInner)> {
    let Some(entry) = entry_point(module) else {
        return Vec::new();
    };
    entry
        .function
        .arguments
        .iter()
        .filter_map(|argument| match argument.binding {
            Some(Binding::Location { location, .. }) => Some((
                location,
                argument.name.clone().unwrap_or_default(),
                module.types[argument.ty].inner.clone(),
            )),
            _ => None,
        })
        .collect()
}

fn uniform_block(module: &naga::Module) -> BlockLayout {
    let mut layout = BlockLayout::default();
    for (_, global) in module.global_variables.iter() {
        if global.space != AddressSpace::Uniform {
            continue;
        }
        let Some(binding) = &global.binding else {
            continue;
        };
        if binding.group != UNIFORM_GROUP || binding.binding != 0 {
            continue;
        }
        if let TypeInner::Struct { members, span } = &module.types[global.ty].inner {
            layout.span = *span;
            for member in members {
                let Some(name) = &member.name else {
                    continue;
                };
                layout.members.insert(
                    name.clone(),
                    BlockMember {
                        offset: member.offset,
                        ty: UniformType::from_naga(&module.types[member.ty].inner),
                    },
                );
            }
        }
    }
    layout
}

fn collect_resources(
    module: &naga::Module,
    textures: &mut Vec<ResourceSlot>,
    samplers: &mut Vec<ResourceSlot>,
) {
    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        if binding.group != TEXTURE_GROUP {
            continue;
        }
        let slot = ResourceSlot {
            name: global.name.clone().unwrap_or_default(),
            binding: binding.binding,
        };
        let target = match module.types[global.ty].inner {
            TypeInner::Image { .. } => &mut *textures,
            TypeInner::Sampler { .. } => &mut *samplers,
            _ => continue,
        };
        if !target.iter().any(|existing| existing.binding == slot.binding) {
            target.push(slot);
        }
    }
    textures.sort_by_key(|slot| slot.binding);
    samplers.sort_by_key(|slot| slot.binding);
}

fn component_count(inner: &TypeInner) -> u32 {
    match *inner {
        TypeInner::Scalar(_) => 1,
        TypeInner::Vector { size, .. } => size as u32,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r"#version 450
layout(location = 0) in vec2 aPosition;
layout(location = 1) in vec2 aTexCoord;
layout(location = 0) out vec2 vTexCoord;

layout(std140, set = 0, binding = 0) uniform Params {
    vec2 uOffset;
    float uScale;
    int uMode;
} params;

void main() {
    vTexCoord = aTexCoord;
    gl_Position = vec4(aPosition * params.uScale + params.uOffset, 0.0, 1.0);
}
";

    const FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform Params {
    vec2 uOffset;
    float uScale;
    int uMode;
} params;

layout(set = 1, binding = 0) uniform texture2D uImage;
layout(set = 1, binding = 1) uniform sampler uImageSampler;

void main() {
    outColor = texture(sampler2D(uImage, uImageSampler), vTexCoord);
}
";

    #[test]
    fn reflects_attributes_block_and_resources() {
        let interface = compile_program(VERTEX, FRAGMENT).unwrap();

        let inputs: Vec<(&str, u32, u32)> = interface
            .vertex_inputs
            .iter()
            .map(|input| (input.name.as_str(), input.location, input.components))
            .collect();
        assert!(inputs.contains(&("aPosition", 0, 2)));
        assert!(inputs.contains(&("aTexCoord", 1, 2)));

        let scale = &interface.uniforms.members["uScale"];
        assert_eq!(scale.offset, 8);
        assert_eq!(scale.ty, Some(UniformType::Float));
        assert_eq!(interface.uniforms.members["uMode"].ty, Some(UniformType::Int));
        assert_eq!(interface.uniforms.members["uOffset"].offset, 0);

        assert_eq!(interface.textures.len(), 1);
        assert_eq!(interface.textures[0].binding, 0);
        assert_eq!(interface.samplers.len(), 1);
        assert_eq!(interface.samplers[0].binding, 1);
    }

    #[test]
    fn syntax_errors_surface_the_compiler_log() {
        let broken = FRAGMENT.replace("outColor = texture", "outColor = textur");
        match compile_program(VERTEX, &broken) {
            Err(RenderError::ShaderCompilation { stage, log }) => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("expected compilation error, got {other:?}"),
        }
    }

    #[test]
    fn vertex_errors_are_tagged_with_their_stage() {
        let broken = VERTEX.replace("void main() {", "void main() { undefined_call();");
        assert!(matches!(
            compile_program(&broken, FRAGMENT),
            Err(RenderError::ShaderCompilation {
                stage: ShaderStage::Vertex,
                ..
            })
        ));
    }

    #[test]
    fn unmatched_varyings_fail_to_link() {
        let fragment = FRAGMENT
            .replace(
                "layout(location = 0) in vec2 vTexCoord;",
                "layout(location = 0) in vec2 vTexCoord;\nlayout(location = 3) in float vFade;",
            )
            .replace("vTexCoord);", "vTexCoord) * vFade;");
        assert!(matches!(
            compile_program(VERTEX, &fragment),
            Err(RenderError::ProgramLink { .. })
        ));
    }

    #[test]
    fn varying_type_disagreement_fails_to_link() {
        let fragment = FRAGMENT
            .replace("in vec2 vTexCoord;", "in vec3 vTexCoord;")
            .replace("vTexCoord);", "vTexCoord.xy);");
        assert!(matches!(
            compile_program(VERTEX, &fragment),
            Err(RenderError::ProgramLink { .. })
        ));
    }
}
