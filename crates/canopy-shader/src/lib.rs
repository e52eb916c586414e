//! On-demand shader variant generation.
//!
//! The active render state (material, lights, textures, shadow attributes)
//! is turned into a graph of shader nodes, emitted as GLSL source and cached
//! by a hash of the state that affects code generation.

mod cache;
mod compiler;
mod fragment;
pub mod graph;
pub mod state;
pub mod uniforms;
mod vertex;

pub use cache::ShaderVariantCache;
pub use compiler::{ProgramSource, ShaderCompiler, ShaderError};
pub use graph::{NodeIndex, ShaderGraph, ShaderNode, ShaderNodeKind, ShaderStage, VarId, VarKind, Variable};
pub use state::{
    BillboardAttribute, Light, LightKind, Material, MaterialUniform, PcfKernel, PointSizeAttribute, ShaderState,
    ShadowCastAttribute, ShadowPrecision, ShadowReceiveAttribute, ShadowTexture, StateAttribute, Stateful,
    Texture,
};
pub use uniforms::{UniformDecl, UniformLayout, UniformLayoutRegistry, VarType};
