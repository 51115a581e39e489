//! Shader assembly and per-stage compilation.
//!
//! User code is a ShaderToy-style `mainImage` function. [`FragmentSource`]
//! prepends [`PREAMBLE`], which declares the standard inputs and a `main` that
//! forwards to `mainImage`. Each stage is then parsed and validated with naga,
//! which gives us stage-tagged diagnostics and the static usage information
//! needed to decide which uniforms a program actually declares.

use std::fs;
use std::ops::Range;
use std::path::Path;

use wgpu::naga;

use crate::error::{ShaderError, ShaderStage, SourceReadError};
use crate::uniforms::{UniformName, UNIFORM_COUNT};

/// Binding of the viewport block read by the vertex stage.
pub const VIEWPORT_BINDING: u32 = UNIFORM_COUNT as u32;

/// Passthrough of the unit quad into clip space. Forwards the viewport height
/// so the fragment stage can flip `gl_FragCoord` to a bottom-left origin.
pub const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 a_position;
layout(location = 0) flat out float v_viewport_height;

layout(set = 0, binding = 6) uniform ShaderunViewport {
    vec2 size;
} shaderun_viewport;

void main() {
    v_viewport_height = shaderun_viewport.size.y;
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

/// Declarations prepended to every user fragment shader.
///
/// Every standard input lives in its own block so a shader that never touches
/// one leaves that binding unused. Block bindings must match
/// [`UniformName::binding`].
pub const PREAMBLE: &str = r"#version 450
layout(location = 0) flat in float v_viewport_height;
layout(location = 0) out vec4 shaderun_frag_color;

layout(set = 0, binding = 0) uniform ShaderunResolution { vec3 value; } shaderun_resolution;
layout(set = 0, binding = 1) uniform ShaderunTime { float value; } shaderun_time;
layout(set = 0, binding = 2) uniform ShaderunTimeDelta { float value; } shaderun_time_delta;
layout(set = 0, binding = 3) uniform ShaderunFrame { float value; } shaderun_frame;
layout(set = 0, binding = 4) uniform ShaderunMouse { vec4 value; } shaderun_mouse;
layout(set = 0, binding = 5) uniform ShaderunKeyInput { vec4 value; } shaderun_key_input;

#define iResolution shaderun_resolution.value
#define iTime shaderun_time.value
#define iTimeDelta shaderun_time_delta.value
#define iFrame shaderun_frame.value
#define iMouse shaderun_mouse.value
#define iKeyInput shaderun_key_input.value

void mainImage(out vec4 fragColor, in vec2 fragCoord);

void main() {
    vec2 fragCoord = vec2(gl_FragCoord.x, v_viewport_height - gl_FragCoord.y);
    vec4 color = vec4(0.0);
    mainImage(color, fragCoord);
    shaderun_frag_color = color;
}

";

/// Preamble followed by the verbatim user source, owned for one compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSource {
    text: String,
}

impl FragmentSource {
    /// Reads the whole file at `path` and assembles it behind the preamble.
    pub fn read(path: &Path) -> Result<Self, SourceReadError> {
        let user = fs::read_to_string(path).map_err(|source| SourceReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::assemble(&user))
    }

    /// Assembles already loaded user code. No validation happens here.
    pub fn assemble(user: &str) -> Self {
        let mut text = String::with_capacity(PREAMBLE.len() + user.len());
        text.push_str(PREAMBLE);
        text.push_str(user);
        Self { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The user's part of the assembled text.
    pub fn user_source(&self) -> &str {
        &self.text[PREAMBLE.len()..]
    }
}

/// One parsed and validated shader stage.
pub struct CompiledStage {
    stage: ShaderStage,
    module: naga::Module,
    info: naga::valid::ModuleInfo,
}

impl CompiledStage {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn entry_point(&self) -> Option<(usize, &naga::EntryPoint)> {
        self.module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.name == "main")
    }

    /// Bindings of group 0 uniform blocks the entry point statically uses.
    fn used_uniform_bindings(&self) -> Vec<u32> {
        let Some((index, _)) = self.entry_point() else {
            return Vec::new();
        };
        let usage = self.info.get_entry_point(index);
        self.module
            .global_variables
            .iter()
            .filter(|(_, global)| global.space == naga::AddressSpace::Uniform)
            .filter(|(handle, _)| !usage[*handle].is_empty())
            .filter_map(|(_, global)| global.binding.as_ref())
            .filter(|binding| binding.group == 0)
            .map(|binding| binding.binding)
            .collect()
    }

    fn output_locations(&self) -> Vec<u32> {
        let Some((_, entry)) = self.entry_point() else {
            return Vec::new();
        };
        let Some(result) = entry.function.result.as_ref() else {
            return Vec::new();
        };
        let mut locations = Vec::new();
        collect_locations(
            &self.module,
            result.ty,
            result.binding.as_ref(),
            &mut locations,
        );
        locations
    }

    fn input_locations(&self) -> Vec<u32> {
        let Some((_, entry)) = self.entry_point() else {
            return Vec::new();
        };
        let mut locations = Vec::new();
        for argument in &entry.function.arguments {
            collect_locations(
                &self.module,
                argument.ty,
                argument.binding.as_ref(),
                &mut locations,
            );
        }
        locations
    }
}

fn collect_locations(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    out: &mut Vec<u32>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(*location),
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

/// A vertex/fragment pair that compiled and whose interfaces line up.
pub struct CompiledProgram {
    vertex: CompiledStage,
    fragment: CompiledStage,
    active: [bool; UNIFORM_COUNT],
}

impl CompiledProgram {
    /// Hands over the validated vertex and fragment modules so they can be
    /// turned into pipeline stages without parsing the GLSL again.
    pub fn into_modules(self) -> (naga::Module, naga::Module) {
        (self.vertex.module, self.fragment.module)
    }

    /// Whether the fragment stage reads `name`.
    pub fn uses(&self, name: UniformName) -> bool {
        self.active[name.binding() as usize]
    }

    pub fn active_uniforms(&self) -> Vec<UniformName> {
        UniformName::ALL
            .into_iter()
            .filter(|name| self.uses(*name))
            .collect()
    }
}

/// Compiles both stages independently, then checks that every fragment input
/// is written by the vertex stage.
pub fn compile_program(
    vertex_source: &str,
    fragment_source: &str,
) -> Result<CompiledProgram, ShaderError> {
    let vertex = compile_stage(ShaderStage::Vertex, vertex_source)?;
    let fragment = compile_stage(ShaderStage::Fragment, fragment_source)?;

    let produced = vertex.output_locations();
    let mut missing: Vec<u32> = fragment
        .input_locations()
        .into_iter()
        .filter(|location| !produced.contains(location))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        missing.dedup();
        let log = missing
            .iter()
            .map(|location| {
                format!("fragment input at location {location} is not written by the vertex stage")
            })
            .collect::<Vec<_>>()
            .join("\n");
        return Err(ShaderError::Link { log });
    }

    let mut active = [false; UNIFORM_COUNT];
    for binding in fragment.used_uniform_bindings() {
        if let Some(name) = UniformName::from_binding(binding) {
            active[name.binding() as usize] = true;
        }
    }

    Ok(CompiledProgram {
        vertex,
        fragment,
        active,
    })
}

/// Parses and validates a single GLSL stage.
pub fn compile_stage(stage: ShaderStage, source: &str) -> Result<CompiledStage, ShaderError> {
    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };

    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(naga_stage);
    let module = frontend.parse(&options, source).map_err(|errors| {
        let log = errors
            .errors
            .iter()
            .map(|error| {
                format!(
                    "{}: {}",
                    describe_location(source, error.meta.to_range()),
                    error.kind
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        ShaderError::Compile { stage, log }
    })?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|error| {
        let mut lines = vec![error.to_string()];
        let mut cause = std::error::Error::source(&error);
        while let Some(inner) = cause {
            lines.push(format!("  caused by: {inner}"));
            cause = inner.source();
        }
        for (span, label) in error.spans() {
            lines.push(format!(
                "  {}: {label}",
                describe_location(source, span.to_range())
            ));
        }
        ShaderError::Compile {
            stage,
            log: lines.join("\n"),
        }
    })?;

    Ok(CompiledStage {
        stage,
        module,
        info,
    })
}

/// Byte offset where user code starts inside an assembled fragment source.
fn user_offset(source: &str) -> usize {
    if source.starts_with(PREAMBLE) {
        PREAMBLE.len()
    } else {
        0
    }
}

/// Renders a span as `line N` relative to the user's file when possible.
fn describe_location(source: &str, range: Option<Range<usize>>) -> String {
    let Some(range) = range else {
        return "unknown location".to_string();
    };
    let start = range.start.min(source.len());
    let offset = user_offset(source);
    if start < offset {
        return "preamble".to_string();
    }
    let Some(before) = source.get(offset..start) else {
        return "unknown location".to_string();
    };
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map(|tail| tail.len()).unwrap_or(0) + 1;
    format!("{line}:{column}")
}
