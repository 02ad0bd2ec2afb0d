//! Construction input (§6 "Construction input").
//!
//! `Settings` is a plain struct the embedding application builds; the
//! engine only validates it, it never parses a config file or environment
//! itself (that responsibility stays with the caller, matching the
//! teacher's plain-struct `wgpu::DeviceDescriptor` construction).
use std::collections::HashMap;

use crate::binding::FilterKind;
use crate::error::ConfigError;
use crate::filter::{BufferAttachment, Pass};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentationFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
}

impl PresentationFormat {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            PresentationFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            PresentationFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            PresentationFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            PresentationFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TextureUsageFlags: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl TextureUsageFlags {
    pub fn to_wgpu(self) -> wgpu::TextureUsages {
        let mut usages = wgpu::TextureUsages::empty();
        if self.contains(TextureUsageFlags::COPY_SRC) {
            usages |= wgpu::TextureUsages::COPY_SRC;
        }
        if self.contains(TextureUsageFlags::COPY_DST) {
            usages |= wgpu::TextureUsages::COPY_DST;
        }
        if self.contains(TextureUsageFlags::TEXTURE_BINDING) {
            usages |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if self.contains(TextureUsageFlags::STORAGE_BINDING) {
            usages |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if self.contains(TextureUsageFlags::RENDER_ATTACHMENT) {
            usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        usages
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Clone, Debug)]
pub struct TextureSettings {
    pub label: String,
    pub size: Option<TextureSize>,
    pub format: Option<wgpu::TextureFormat>,
    pub usage: TextureUsageFlags,
    pub sample_count: u32,
}

#[derive(Clone, Debug)]
pub struct FilterSettings {
    pub kind: FilterKind,
    pub active: bool,
    pub passes: Vec<PassSettings>,
    pub buffer_attachment: Option<BufferAttachment>,
    /// Name of the render filter whose `samplePoint`/`range` uniforms this
    /// filter's histogram feeds (§4.9). Only meaningful for a histogram-
    /// producing compute filter; `None` means auto-threshold feedback is
    /// skipped for this filter.
    pub threshold_filter: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PassSettings {
    pub input_textures: Vec<String>,
    pub shader_ref: String,
    /// WGSL source text for `shader_ref`, supplied by the embedding
    /// application (shader authoring is a Non-goal of this engine — it
    /// only fetches-once-per-ref, compiles, and caches what it is given,
    /// per §4.5 step 1).
    pub shader_source: String,
    pub output: Option<String>,
}

impl PassSettings {
    pub(crate) fn into_pass(self, label: String) -> Pass {
        Pass::new(
            label,
            self.input_textures.into_iter().map(|name| name.into()).collect(),
            self.output.map(Into::into),
            self.shader_ref,
        )
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub presentation_format: PresentationFormat,
    pub textures: HashMap<String, TextureSettings>,
    pub filters: HashMap<String, FilterSettings>,
}

const MAX_TEXTURE_DIM: u32 = 16384;
const MAX_TEXTURE_DEPTH: u32 = 2048;

impl Settings {
    /// Validate the settings object (§6). Returns the first violation
    /// found; construction is abandoned on the first error, matching
    /// `ConfigError during init is fatal` (§7).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, texture) in &self.textures {
            if let Some(size) = texture.size {
                if size.width > MAX_TEXTURE_DIM || size.height > MAX_TEXTURE_DIM {
                    return Err(ConfigError::new(
                        format!("textures.{name}.size"),
                        "width/height must not exceed 16384",
                    ));
                }
                if size.depth > MAX_TEXTURE_DEPTH {
                    return Err(ConfigError::new(
                        format!("textures.{name}.size.depth"),
                        "depth must not exceed 2048",
                    ));
                }
            }
            if !matches!(texture.sample_count, 1 | 4) {
                return Err(ConfigError::new(
                    format!("textures.{name}.sample_count"),
                    "sample_count must be 1 or 4",
                ));
            }
            if texture.usage.contains(TextureUsageFlags::STORAGE_BINDING)
                && texture.usage.contains(TextureUsageFlags::RENDER_ATTACHMENT)
            {
                return Err(ConfigError::new(
                    format!("textures.{name}.usage"),
                    "storage_binding and render_attachment are mutually exclusive",
                ));
            }
        }

        for (key, filter) in &self.filters {
            if let Some(attachment) = &filter.buffer_attachment {
                attachment
                    .validate()
                    .map_err(|e| ConfigError::new(format!("filters.{key}.buffer_attachment"), e.reason))?;
            }
            if let Some(threshold_filter) = &filter.threshold_filter {
                if threshold_filter == key {
                    return Err(ConfigError::new(
                        format!("filters.{key}.threshold_filter"),
                        "threshold_filter must name a different filter",
                    ));
                }
                if !self.filters.contains_key(threshold_filter) {
                    return Err(ConfigError::new(
                        format!("filters.{key}.threshold_filter"),
                        format!("unknown filter `{threshold_filter}`"),
                    ));
                }
            }
            for (index, pass) in filter.passes.iter().enumerate() {
                if pass.shader_ref.trim().is_empty() {
                    return Err(ConfigError::new(
                        format!("filters.{key}.passes[{index}].shader_ref"),
                        "shader_ref must not be empty",
                    ));
                }
                if pass.shader_source.trim().is_empty() {
                    return Err(ConfigError::new(
                        format!("filters.{key}.passes[{index}].shader_source"),
                        "shader_source must not be empty",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_filter() -> FilterSettings {
        FilterSettings {
            kind: FilterKind::Render,
            active: true,
            passes: vec![PassSettings {
                input_textures: vec![],
                shader_ref: "shader.wgsl".to_string(),
                shader_source: "// ok".to_string(),
                output: None,
            }],
            buffer_attachment: None,
            threshold_filter: None,
        }
    }

    #[test]
    fn threshold_filter_cannot_name_itself() {
        let mut histogram_filter = minimal_filter();
        histogram_filter.threshold_filter = Some("stats".to_string());

        let mut filters = HashMap::new();
        filters.insert("stats".to_string(), histogram_filter);

        let settings = Settings { presentation_format: PresentationFormat::Rgba8Unorm, textures: HashMap::new(), filters };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn threshold_filter_must_reference_a_declared_filter() {
        let mut histogram_filter = minimal_filter();
        histogram_filter.threshold_filter = Some("does-not-exist".to_string());

        let mut filters = HashMap::new();
        filters.insert("stats".to_string(), histogram_filter);

        let settings = Settings { presentation_format: PresentationFormat::Rgba8Unorm, textures: HashMap::new(), filters };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn threshold_filter_referencing_another_filter_is_valid() {
        let mut histogram_filter = minimal_filter();
        histogram_filter.threshold_filter = Some("display".to_string());

        let mut filters = HashMap::new();
        filters.insert("stats".to_string(), histogram_filter);
        filters.insert("display".to_string(), minimal_filter());

        let settings = Settings { presentation_format: PresentationFormat::Rgba8Unorm, textures: HashMap::new(), filters };
        assert!(settings.validate().is_ok());
    }
}
