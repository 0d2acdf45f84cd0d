//! Pipeline Descriptors & Key Derivation
//!
//! Hashable descriptions of render and compute pipelines. A descriptor's
//! cache key is derived from its semantically relevant fields — entry
//! points, shader source, vertex/target layouts, primitive, depth-stencil
//! and multisample state. The human-readable `label` is deliberately
//! excluded: two descriptors differing only in label must collide on the
//! same compiled pipeline.

use std::hash::{Hash, Hasher};

/// Hashes a key with the same fast hasher the caches use for lookup.
pub fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

// ─── Pipeline State Enums ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth24PlusStencil8,
    Depth32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Sint32,
    Unorm8x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    #[default]
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    AlphaBlend,
    Additive,
}

// ─── Layout Fragments ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTarget {
    pub format: TextureFormat,
    pub blend: BlendMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveState {
    pub topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
}

impl Default for PrimitiveState {
    fn default() -> Self {
        Self {
            topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultisampleState {
    pub count: u32,
    pub alpha_to_coverage_enabled: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            count: 1,
            alpha_to_coverage_enabled: false,
        }
    }
}

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// Full render pipeline description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPipelineDesc {
    /// Human-readable name, excluded from the cache key.
    pub label: Option<String>,
    /// WGSL source for both stages.
    pub shader_source: String,
    pub vertex_entry: String,
    /// `None` for depth-only pipelines.
    pub fragment_entry: Option<String>,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub color_targets: Vec<ColorTarget>,
    pub primitive: PrimitiveState,
    pub depth_stencil: Option<DepthStencilState>,
    pub multisample: MultisampleState,
}

impl RenderPipelineDesc {
    /// Deterministic cache key over the semantically relevant fields.
    #[must_use]
    pub fn key(&self) -> u64 {
        fx_hash_key(&(
            &self.shader_source,
            &self.vertex_entry,
            &self.fragment_entry,
            &self.vertex_buffers,
            &self.color_targets,
            &self.primitive,
            &self.depth_stencil,
            &self.multisample,
        ))
    }

    #[must_use]
    pub fn label_or(&self, fallback: &'static str) -> String {
        self.label.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// Full compute pipeline description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    /// Human-readable name, excluded from the cache key.
    pub label: Option<String>,
    /// WGSL source.
    pub shader_source: String,
    pub entry_point: String,
}

impl ComputePipelineDesc {
    /// Deterministic cache key over the semantically relevant fields.
    #[must_use]
    pub fn key(&self) -> u64 {
        fx_hash_key(&(&self.shader_source, &self.entry_point))
    }

    #[must_use]
    pub fn label_or(&self, fallback: &'static str) -> String {
        self.label.clone().unwrap_or_else(|| fallback.to_string())
    }
}
