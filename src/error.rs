//! Error kinds for the engine's public surface.
//!
//! Every fallible public operation returns `Result<_, EngineError>`. The
//! variants mirror the error kinds named by the engine's contract; callers
//! that care about a specific kind should match on `EngineError` rather
//! than rely on `Display` text.
use core::fmt;

/// A field/reason pair describing why construction was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration for `{}`: {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// A shader module failed to compile; at least one diagnostic had
/// severity `error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderCompileError {
    pub messages: Vec<String>,
}

impl fmt::Display for ShaderCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader failed to compile:")?;
        for message in &self.messages {
            write!(f, "\n  {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShaderCompileError {}

/// A pass referenced a texture name that does not resolve to a live
/// texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureError {
    pub name: String,
    pub available: Vec<String>,
}

impl fmt::Display for TextureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "texture `{}` not found (available: {})",
            self.name,
            self.available.join(", ")
        )
    }
}

impl std::error::Error for TextureError {}

/// A bind-group/layout construction failed for the named filter/pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingError {
    pub filter: String,
    pub pass: Option<usize>,
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pass {
            Some(pass) => write!(f, "binding error in filter `{}` pass {}", self.filter, pass),
            None => write!(f, "binding error in filter `{}`", self.filter),
        }
    }
}

impl std::error::Error for BindingError {}

/// A buffer construction/update failed for the named filter/binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferError {
    pub filter: String,
    pub binding: Option<String>,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binding {
            Some(binding) => write!(f, "buffer error in filter `{}` binding `{}`", self.filter, binding),
            None => write!(f, "buffer error in filter `{}`", self.filter),
        }
    }
}

impl std::error::Error for BufferError {}

/// Top-level error union for the engine's public API.
#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    ShaderCompile(ShaderCompileError),
    Texture(TextureError),
    Binding(BindingError),
    Buffer(BufferError),
    Pipeline(String),
    DeviceLost,
    Cancelled,
    Timeout,
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => e.fmt(f),
            EngineError::ShaderCompile(e) => e.fmt(f),
            EngineError::Texture(e) => e.fmt(f),
            EngineError::Binding(e) => e.fmt(f),
            EngineError::Buffer(e) => e.fmt(f),
            EngineError::Pipeline(reason) => write!(f, "pipeline error: {reason}"),
            EngineError::DeviceLost => write!(f, "device lost"),
            EngineError::Cancelled => write!(f, "cancelled"),
            EngineError::Timeout => write!(f, "timed out"),
            EngineError::Internal(reason) => write!(f, "internal error: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::ShaderCompile(e) => Some(e),
            EngineError::Texture(e) => Some(e),
            EngineError::Binding(e) => Some(e),
            EngineError::Buffer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

impl From<ShaderCompileError> for EngineError {
    fn from(e: ShaderCompileError) -> Self {
        EngineError::ShaderCompile(e)
    }
}

impl From<TextureError> for EngineError {
    fn from(e: TextureError) -> Self {
        EngineError::Texture(e)
    }
}

impl From<BindingError> for EngineError {
    fn from(e: BindingError) -> Self {
        EngineError::Binding(e)
    }
}

impl From<BufferError> for EngineError {
    fn from(e: BufferError) -> Self {
        EngineError::Buffer(e)
    }
}

/// One recorded error event, populated only when an `Observer` is
/// enabled (see `observer.rs`); otherwise callers only see the
/// `Display` string.
#[derive(Clone, Debug)]
pub struct ErrorContext {
    pub timestamp: std::time::Instant,
    pub component: &'static str,
    pub operation: &'static str,
    pub context: String,
}
