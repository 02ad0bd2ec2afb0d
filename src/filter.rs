//! The engine's data model: filters, passes, bindings.
//!
//! Re-architected per the DESIGN NOTES "duck-typed filter/pass objects →
//! tagged variants": `Filter` is a sum type over its GPU pipeline kind and
//! `Binding` is a sum type over its encoded value, so the byte-layout
//! invariants in `buffer_manager.rs` become type-level instead of
//! stringly-typed.
use std::collections::HashMap;

/// Interned name of a texture slot, e.g. `"textureTemp"` or a filter's
/// declared output. Cheap to clone and usable as a `HashMap` key, mirroring
/// the teacher's newtype-over-index convention (`pool.rs::PoolKey` et al.)
/// rather than passing bare `String`s around.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureName(pub String);

impl TextureName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TextureName {
    fn from(s: &str) -> Self {
        TextureName(s.to_string())
    }
}

impl std::fmt::Display for TextureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The reserved scratch texture name used to break read-after-write
/// aliasing (§4.8).
pub const SCRATCH_TEXTURE: &str = "textureTemp";
/// The multisampled colour attachment every render pass targets (§4.8).
pub const MSAA_TEXTURE: &str = "textureMASS";

/// A filter's output target: a named texture, or `None` meaning "the
/// swap-chain surface" (§3 Pass, resolved per the Open Question in
/// `SPEC_FULL.md` §9.1: the terminal pass and "renders to the surface"
/// are the same pass).
pub type Output = Option<TextureName>;

/// A named processing unit: an ordered list of passes sharing one
/// optional parameter buffer.
#[derive(Clone, Debug)]
pub enum Filter {
    Render {
        passes: Vec<Pass>,
        attachment: Option<BufferAttachment>,
        flags: FilterFlags,
    },
    Compute {
        passes: Vec<Pass>,
        attachment: Option<BufferAttachment>,
        flags: FilterFlags,
    },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FilterFlags {
    pub active: bool,
    pub needs_render: bool,
}

impl Filter {
    pub fn passes(&self) -> &[Pass] {
        match self {
            Filter::Render { passes, .. } | Filter::Compute { passes, .. } => passes,
        }
    }

    pub fn passes_mut(&mut self) -> &mut [Pass] {
        match self {
            Filter::Render { passes, .. } | Filter::Compute { passes, .. } => passes,
        }
    }

    pub fn attachment(&self) -> Option<&BufferAttachment> {
        match self {
            Filter::Render { attachment, .. } | Filter::Compute { attachment, .. } => attachment.as_ref(),
        }
    }

    pub fn attachment_mut(&mut self) -> Option<&mut BufferAttachment> {
        match self {
            Filter::Render { attachment, .. } | Filter::Compute { attachment, .. } => attachment.as_mut(),
        }
    }

    pub fn flags(&self) -> FilterFlags {
        match self {
            Filter::Render { flags, .. } | Filter::Compute { flags, .. } => *flags,
        }
    }

    pub fn flags_mut(&mut self) -> &mut FilterFlags {
        match self {
            Filter::Render { flags, .. } | Filter::Compute { flags, .. } => flags,
        }
    }

    pub fn is_compute(&self) -> bool {
        matches!(self, Filter::Compute { .. })
    }

    /// The semantic signature used for cache keying (§3 "Filter").
    /// Two filters with identical pass shader refs, input arity and
    /// buffer-attachment shape resolve to the same pipeline cache keys.
    pub fn semantic_signature(&self) -> String {
        let mut sig = String::new();
        sig.push_str(if self.is_compute() { "compute:" } else { "render:" });
        for pass in self.passes() {
            sig.push_str(&pass.shader_ref);
            sig.push(':');
            sig.push_str(&pass.inputs.len().to_string());
            sig.push(';');
        }
        sig
    }
}

/// A single shader invocation.
#[derive(Clone, Debug)]
pub struct Pass {
    pub label: String,
    pub inputs: Vec<TextureName>,
    pub output: Output,
    pub shader_ref: String,
    /// Lazily built by the Pipeline Manager (C5); `None` until built or
    /// after a device loss invalidates it.
    pub pipeline: Option<crate::cache::PipelineHandle>,
    /// One bind group per group index; group 0 always present once built.
    pub bind_groups: Vec<Option<wgpu::BindGroup>>,
    pub active: bool,
}

impl Pass {
    pub fn new(label: impl Into<String>, inputs: Vec<TextureName>, output: Output, shader_ref: impl Into<String>) -> Self {
        Pass {
            label: label.into(),
            inputs,
            output,
            shader_ref: shader_ref.into(),
            pipeline: None,
            bind_groups: Vec::new(),
            active: true,
        }
    }

    /// §3 invariant: a pass with `output ∈ inputs` MUST go through the
    /// scratch texture.
    pub fn aliases_output(&self) -> bool {
        match &self.output {
            Some(output) => self.inputs.iter().any(|input| input == output),
            None => false,
        }
    }

    /// §3: "a pass with `output = none` is terminal within its filter."
    pub fn is_terminal(&self) -> bool {
        self.output.is_none()
    }
}

/// `{group_index, binding_index, bindings}` (§3 Buffer attachment).
#[derive(Clone, Debug)]
pub struct BufferAttachment {
    pub group_index: u32,
    pub binding_index: u32,
    pub bindings: HashMap<String, Binding>,
}

impl BufferAttachment {
    /// §3 invariant: within group 0, bindings 0 and 1 are reserved for the
    /// sampler and primary texture.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        if self.group_index == 0 && (self.binding_index == 0 || self.binding_index == 1) {
            return Err(crate::error::ConfigError::new(
                "buffer_attachment.binding_index",
                "bindings 0 and 1 of group 0 are reserved for sampler and primary texture",
            ));
        }
        Ok(())
    }

    /// Binding names in a stable order, used by the buffer manager to lay
    /// out bytes deterministically.
    pub fn ordered_bindings(&self) -> Vec<(&String, &Binding)> {
        let mut entries: Vec<_> = self.bindings.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// How a binding is used by the shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingUsage {
    Read,
    Write,
    ReadWrite,
}

/// A typed parameter binding. Re-architected per DESIGN NOTES into a sum
/// type over the encoded value, rather than a `{type, value}` pair of
/// weakly-typed fields: the byte layout of each variant is fixed by its
/// shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Uniform(f32),
    Float(Vec<f32>),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
    Storage { size: Option<u64>, init: Vec<u8>, usage: BindingUsage },
}

impl Binding {
    /// `calculate_size` (§4.2): explicit `size` if present, else inferred
    /// from value length or type.
    pub fn calculate_size(&self) -> u64 {
        match self {
            Binding::Uniform(_) => 4,
            Binding::Float(values) => (values.len() as u64) * 4,
            Binding::Vec2(_) => 8,
            Binding::Vec3(_) => 12,
            Binding::Vec4(_) => 16,
            Binding::Mat4(_) => 64,
            Binding::Storage { size, init, .. } => size.unwrap_or(init.len() as u64),
        }
    }

    pub fn is_uniform_kind(&self) -> bool {
        matches!(self, Binding::Uniform(_))
    }

    pub fn is_float_kind(&self) -> bool {
        matches!(self, Binding::Float(_) | Binding::Vec2(_) | Binding::Vec3(_) | Binding::Vec4(_) | Binding::Mat4(_))
    }

    pub fn is_storage_kind(&self) -> bool {
        matches!(self, Binding::Storage { .. })
    }

    /// Encode this binding's value as little-endian bytes, per §4.2's
    /// "typed encoding".
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Binding::Uniform(v) => v.to_le_bytes().to_vec(),
            Binding::Float(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Binding::Vec2(v) => v.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Binding::Vec3(v) => v.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Binding::Vec4(v) => v.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Binding::Mat4(v) => v.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Binding::Storage { init, .. } => init.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliasing_requires_matching_name() {
        let pass = Pass::new("p", vec![TextureName::from("x")], Some(TextureName::from("x")), "shader");
        assert!(pass.aliases_output());
        let pass = Pass::new("p", vec![TextureName::from("x")], Some(TextureName::from("y")), "shader");
        assert!(!pass.aliases_output());
    }

    #[test]
    fn terminal_pass_has_no_output() {
        let pass = Pass::new("p", vec![], None, "shader");
        assert!(pass.is_terminal());
    }

    #[test]
    fn reserved_bindings_rejected() {
        let attachment = BufferAttachment {
            group_index: 0,
            binding_index: 1,
            bindings: HashMap::new(),
        };
        assert!(attachment.validate().is_err());
    }

    #[test]
    fn calculate_size_matches_type() {
        assert_eq!(Binding::Uniform(1.0).calculate_size(), 4);
        assert_eq!(Binding::Vec4([0.0; 4]).calculate_size(), 16);
        assert_eq!(Binding::Mat4([0.0; 16]).calculate_size(), 64);
        assert_eq!(Binding::Float(vec![0.0; 3]).calculate_size(), 12);
    }
}
