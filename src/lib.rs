//! Sequential GPU compute/render engine driving ordered multi-pass
//! image-processing filter pipelines on top of `wgpu`.
//!
//! See `README`/`DESIGN.md` in the repository root for the module map;
//! each `src/*.rs` file here corresponds to one component of the design
//! (texture pool, buffer manager, pipeline cache, binding manager,
//! pipeline manager, command queue, scheduler, filter executor,
//! histogram feedback, recovery coordinator).
pub mod binding;
pub mod buffer_manager;
pub mod cache;
pub mod command_queue;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod frame_source;
pub mod hash;
pub mod histogram;
pub mod observer;
pub mod pipeline_manager;
pub mod recovery;
pub mod scheduler;
pub mod settings;
pub mod texture_pool;

pub use binding::FilterKind;
pub use engine::{create_app, App, CacheStatsSnapshot, CompletionReport, Engine, FrameReport};
pub use error::EngineError;
pub use filter::{Binding, BindingUsage, BufferAttachment, Filter, Pass, TextureName};
pub use frame_source::{FrameTick, FrameTickSource, SystemFrameTickSource, VirtualFrameTickSource};
pub use observer::{LoggingObserver, NoopObserver, Observer};
pub use settings::{FilterSettings, PassSettings, PresentationFormat, Settings, TextureSettings, TextureSize, TextureUsageFlags};
