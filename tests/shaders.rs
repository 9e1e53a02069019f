//! WGSL interface checks for the built-in programs.
//!
//! The wgpu backend builds bind group and vertex layouts from the static
//! program table, so every shader must agree with it: uniform member offsets,
//! texture units, fragment outputs and vertex inputs.
//!
//! ```bash
//! cargo test --test shaders
//! ```

use naga::{
    AddressSpace, Binding, BuiltIn, Handle, ImageClass, ImageDimension, Module, ShaderStage, Type,
    TypeInner,
};
use rstest::rstest;

use shading_pipeline::shaders::{
    self, names, ProgramInfo, TextureSlot, UniformLayout, VertexInput, PROGRAMS,
};

fn program(name: &str) -> &'static ProgramInfo {
    shaders::program_info(name).unwrap_or_else(|| panic!("no program {name}"))
}

/// IO bindings of a value, looking through one level of struct
fn io_bindings<'a>(module: &'a Module, ty: Handle<Type>, binding: Option<&'a Binding>) -> Vec<&'a Binding> {
    if let Some(binding) = binding {
        return vec![binding];
    }
    match &module.types[ty].inner {
        TypeInner::Struct { members, .. } => members.iter().filter_map(|m| m.binding.as_ref()).collect(),
        _ => Vec::new(),
    }
}

fn entry<'a>(module: &'a Module, stage: ShaderStage) -> (usize, &'a naga::EntryPoint) {
    module
        .entry_points
        .iter()
        .enumerate()
        .find(|(_, ep)| ep.stage == stage)
        .expect("entry point")
}

// ============================================================================
// Whole table
// ============================================================================

#[test]
fn test_every_program_compiles() {
    for info in PROGRAMS {
        if let Err(e) = shaders::compile(info) {
            panic!("{e}");
        }
    }
}

#[test]
fn test_uniform_blocks_match_layouts() {
    for info in PROGRAMS {
        let (module, _) = shaders::compile(info).expect("compile");
        let layout: UniformLayout = info.uniform_layout();

        let params = module
            .global_variables
            .iter()
            .map(|(_, gv)| gv)
            .find(|gv| gv.space == AddressSpace::Uniform)
            .unwrap_or_else(|| panic!("{}: no uniform block", info.name));
        let binding = params.binding.as_ref().expect("uniform binding");
        assert_eq!((binding.group, binding.binding), (0, 0), "{}", info.name);

        let TypeInner::Struct { members, span } = &module.types[params.ty].inner else {
            panic!("{}: uniform block is not a struct", info.name);
        };
        assert_eq!(*span, layout.size, "{}: block size", info.name);
        for member in members {
            let name = member.name.as_deref().expect("member name");
            let field = layout
                .field(name)
                .unwrap_or_else(|| panic!("{}: '{name}' missing from layout", info.name));
            assert_eq!(member.offset, field.offset, "{}: offset of '{name}'", info.name);
        }
        assert_eq!(members.len(), layout.fields.len(), "{}: field count", info.name);
    }
}

#[test]
fn test_used_textures_are_declared_units() {
    for info in PROGRAMS {
        let (module, module_info) = shaders::compile(info).expect("compile");

        for (index, _) in module.entry_points.iter().enumerate() {
            let function = module_info.get_entry_point(index);
            for (handle, gv) in module.global_variables.iter() {
                if function[handle].is_empty() {
                    continue;
                }
                let Some(binding) = gv.binding.as_ref().filter(|b| b.group == 1) else {
                    continue;
                };
                let unit = binding.binding / 2;
                let slot = info
                    .textures
                    .iter()
                    .find(|(u, _)| *u == unit)
                    .map(|(_, slot)| *slot)
                    .unwrap_or_else(|| panic!("{}: binding {} has no texture unit", info.name, binding.binding));

                match &module.types[gv.ty].inner {
                    TypeInner::Image { dim, class, arrayed } => {
                        assert_eq!(binding.binding % 2, 0, "{}: texture at odd binding", info.name);
                        assert!(!arrayed);
                        let expected_dim = match slot {
                            TextureSlot::Float2d | TextureSlot::Depth2d => ImageDimension::D2,
                            TextureSlot::FloatCube | TextureSlot::DepthCube => ImageDimension::Cube,
                        };
                        assert_eq!(*dim, expected_dim, "{}: unit {unit} dimension", info.name);
                        let depth = matches!(class, ImageClass::Depth { .. });
                        assert_eq!(
                            depth,
                            matches!(slot, TextureSlot::Depth2d | TextureSlot::DepthCube),
                            "{}: unit {unit} class",
                            info.name
                        );
                    }
                    TypeInner::Sampler { comparison } => {
                        assert_eq!(binding.binding % 2, 1, "{}: sampler at even binding", info.name);
                        assert!(!comparison, "{}: comparison samplers are not bound", info.name);
                    }
                    other => panic!("{}: unexpected group 1 resource {other:?}", info.name),
                }
            }
        }
    }
}

#[test]
fn test_fragment_outputs_match_table() {
    for info in PROGRAMS {
        let (module, _) = shaders::compile(info).expect("compile");
        let (_, fragment) = entry(&module, ShaderStage::Fragment);

        let outputs = fragment
            .function
            .result
            .as_ref()
            .map(|r| io_bindings(&module, r.ty, r.binding.as_ref()))
            .unwrap_or_default();
        let locations = outputs.iter().filter(|b| matches!(b, Binding::Location { .. })).count();
        let depth = outputs
            .iter()
            .any(|b| matches!(b, Binding::BuiltIn(BuiltIn::FragDepth)));

        assert_eq!(locations, info.color_outputs, "{}: color outputs", info.name);
        assert_eq!(depth, info.writes_depth, "{}: frag_depth", info.name);
    }
}

#[test]
fn test_vertex_inputs_match_source() {
    for info in PROGRAMS {
        let (module, _) = shaders::compile(info).expect("compile");
        let (_, vertex) = entry(&module, ShaderStage::Vertex);

        let locations = vertex
            .function
            .arguments
            .iter()
            .flat_map(|arg| io_bindings(&module, arg.ty, arg.binding.as_ref()))
            .filter(|b| matches!(b, Binding::Location { .. }))
            .count();
        match info.vertex {
            VertexInput::Mesh => assert!(locations > 0, "{}: no vertex attributes", info.name),
            VertexInput::Fullscreen => assert_eq!(locations, 0, "{}: unexpected attributes", info.name),
        }
    }
}

// ============================================================================
// Individual programs
// ============================================================================

#[rstest]
#[case::gbuffer(names::GBUFFER, 3)]
#[case::deferred_point(names::DEFERRED_POINT, 1)]
#[case::stencil(names::STENCIL_PASS, 1)]
#[case::shadow_depth(names::SHADOW_DEPTH, 0)]
fn test_color_output_counts(#[case] name: &str, #[case] expected: usize) {
    assert_eq!(program(name).color_outputs, expected);
}

#[test]
fn test_cube_shadows_write_linear_depth() {
    assert!(program(names::SHADOW_CUBE).writes_depth);
    assert!(!program(names::SHADOW_DEPTH).writes_depth);
}

#[test]
fn test_postprocess_lists_its_subroutines() {
    let post = program(names::POSTPROCESS);
    for subroutine in [
        names::EXTRACT_BRIGHTNESS,
        names::BLUR_GAUSSIAN_HORIZONTAL,
        names::BLUR_GAUSSIAN_VERTICAL,
    ] {
        assert!(post.subroutines.contains(&subroutine), "missing {subroutine}");
    }
}
