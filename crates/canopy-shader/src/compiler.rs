//! Stateful compiler turning a [`ShaderState`] into program source.
//!
//! One compiler builds both stages of a program: the fragment stage first,
//! then the vertex stage, which writes every varying the fragment stage read.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use log::{debug, error};
use rustc_hash::{FxHashMap, FxHasher};
use thiserror::Error;

use crate::graph::{NodeIndex, ShaderGraph, ShaderNode, ShaderNodeKind, ShaderStage, VarId, VarKind};
use crate::state::ShaderState;
use crate::uniforms::{UniformLayout, UniformLayoutRegistry, VarType};

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("'{function}' can only be called while compiling the fragment stage")]
    NotInFragmentStage { function: &'static str },

    #[error("uniform layout '{layout}' has no member '{member}'")]
    MissingUniform { layout: String, member: String },

    #[error("variable '{name}' is declared as {existing}, requested as {requested}")]
    TypeMismatch {
        name: String,
        existing: VarType,
        requested: VarType,
    },
}

/// Source of both stages plus a hash of their content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramSource {
    pub fragment: String,
    pub vertex: String,
    pub hash: u64,
}

pub struct ShaderCompiler<'a> {
    pub(crate) state: &'a ShaderState,
    registry: &'a mut UniformLayoutRegistry,
    stage: Option<ShaderStage>,
    pub(crate) graph: ShaderGraph,
    /// Named variables of the current stage, for memoisation.
    pub(crate) variables: FxHashMap<String, VarId>,
    /// Varyings read by the fragment stage, in first-use order.
    varyings: Vec<(String, VarType)>,
    /// Sampled texel of each color texture unit.
    pub(crate) texture_variables: FxHashMap<u32, VarId>,
    fragment_shader_name: Option<String>,
}

impl<'a> ShaderCompiler<'a> {
    pub fn new(state: &'a ShaderState, registry: &'a mut UniformLayoutRegistry) -> Self {
        Self {
            state,
            registry,
            stage: None,
            graph: ShaderGraph::new(),
            variables: FxHashMap::default(),
            varyings: Vec::new(),
            texture_variables: FxHashMap::default(),
            fragment_shader_name: None,
        }
    }

    /// Name written as `SHADER_NAME` into the fragment source.
    pub fn with_fragment_shader_name(mut self, name: impl Into<String>) -> Self {
        self.fragment_shader_name = Some(name.into());
        self
    }

    pub fn stage(&self) -> Option<ShaderStage> {
        self.stage
    }

    pub fn graph(&self) -> &ShaderGraph {
        &self.graph
    }

    pub fn varyings(&self) -> &[(String, VarType)] {
        &self.varyings
    }

    /// Compile the fragment stage, then reset per-stage tables so the vertex
    /// stage can be compiled with the same compiler.
    pub fn compile_fragment(&mut self) -> Result<String, ShaderError> {
        self.stage = Some(ShaderStage::Fragment);
        let mut roots = match self.create_fragment_shader_graph() {
            Ok(roots) => roots,
            Err(err) => {
                error!("Fragment shader compilation aborted: {}", err);
                self.clean_after_fragment();
                return Err(err);
            }
        };
        if let Some(name) = self.fragment_shader_name.clone() {
            roots.push(self.graph.add_node(ShaderNode::new(ShaderNodeKind::Define {
                name: "SHADER_NAME".to_string(),
                value: name,
            })));
        }
        let source = self.graph.emit(ShaderStage::Fragment, &roots);
        debug!("Fragment shader:\n{}", source);
        self.clean_after_fragment();
        Ok(source)
    }

    pub fn compile_vertex(&mut self) -> Result<String, ShaderError> {
        self.stage = Some(ShaderStage::Vertex);
        let result = self.create_vertex_shader_graph();
        self.stage = None;
        let roots = result.inspect_err(|err| error!("Vertex shader compilation aborted: {}", err))?;
        let source = self.graph.emit(ShaderStage::Vertex, &roots);
        debug!("Vertex shader:\n{}", source);
        Ok(source)
    }

    /// Both stages, fragment first.
    pub fn compile_program(mut self) -> Result<ProgramSource, ShaderError> {
        let fragment = self.compile_fragment()?;
        let vertex = self.compile_vertex()?;
        let mut hasher = FxHasher::default();
        fragment.hash(&mut hasher);
        vertex.hash(&mut hasher);
        Ok(ProgramSource {
            hash: hasher.finish(),
            fragment,
            vertex,
        })
    }

    /// Clears the variable table and texture bindings of the fragment stage,
    /// keeping only its varyings, re-registered in a fresh graph.
    pub fn clean_after_fragment(&mut self) {
        self.stage = None;
        self.graph = ShaderGraph::new();
        self.variables.clear();
        self.texture_variables.clear();
        for (name, ty) in &self.varyings {
            let id = self.graph.add_variable(name, *ty, VarKind::Varying, None);
            self.variables.insert(name.clone(), id);
        }
    }

    pub(crate) fn ensure_fragment_stage(&self, function: &'static str) -> Result<(), ShaderError> {
        if self.stage == Some(ShaderStage::Fragment) {
            Ok(())
        } else {
            Err(ShaderError::NotInFragmentStage { function })
        }
    }

    pub(crate) fn layout(&mut self, key: &str, build: impl FnOnce() -> UniformLayout) -> Arc<UniformLayout> {
        self.registry.get_or_create(key, build)
    }

    pub(crate) fn add_node(&mut self, node: ShaderNode) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Fresh local; never shared.
    pub(crate) fn create_variable(&mut self, ty: VarType, name: &str) -> VarId {
        self.graph.add_variable(name, ty, VarKind::Local, None)
    }

    /// Fresh local registered under `name` for later lookups.
    pub(crate) fn create_named_variable(&mut self, ty: VarType, name: &str) -> VarId {
        let id = self.graph.add_variable(name, ty, VarKind::Local, None);
        self.variables.insert(name.to_string(), id);
        id
    }

    pub(crate) fn create_constant(&mut self, ty: VarType, name: &str, value: impl Into<String>) -> VarId {
        self.graph.add_variable(name, ty, VarKind::Constant, Some(value.into()))
    }

    pub(crate) fn get_or_create_constant_zero(&mut self, ty: VarType) -> Result<VarId, ShaderError> {
        self.get_or_create(&format!("zero_{ty}"), ty, VarKind::Constant, Some(ty.zero()))
    }

    pub(crate) fn get_or_create_constant_one(&mut self, ty: VarType) -> Result<VarId, ShaderError> {
        self.get_or_create(&format!("one_{ty}"), ty, VarKind::Constant, Some(ty.one()))
    }

    pub(crate) fn get_or_create_uniform(&mut self, name: &str, ty: VarType) -> Result<VarId, ShaderError> {
        self.get_or_create(name, ty, VarKind::Uniform, None)
    }

    /// Uniform declared by `member` of `layout`.
    pub(crate) fn uniform_from(&mut self, layout: &UniformLayout, member: &str) -> Result<VarId, ShaderError> {
        let decl = layout.require(member)?;
        self.get_or_create_uniform(&decl.name, decl.ty)
    }

    pub(crate) fn get_or_create_varying(&mut self, name: &str, ty: VarType) -> Result<VarId, ShaderError> {
        let id = self.get_or_create(name, ty, VarKind::Varying, None)?;
        if !self.varyings.iter().any(|(existing, _)| existing == name) {
            self.varyings.push((name.to_string(), ty));
        }
        Ok(id)
    }

    pub(crate) fn get_or_create_attribute(&mut self, name: &str, ty: VarType) -> Result<VarId, ShaderError> {
        self.get_or_create(name, ty, VarKind::Attribute, None)
    }

    pub(crate) fn get_or_create_sampler(&mut self, name: &str) -> Result<VarId, ShaderError> {
        self.get_or_create(name, VarType::Sampler2D, VarKind::Sampler, None)
    }

    pub(crate) fn get_or_create_builtin(&mut self, name: &str, ty: VarType) -> Result<VarId, ShaderError> {
        self.get_or_create(name, ty, VarKind::Builtin, None)
    }

    fn get_or_create(
        &mut self,
        name: &str,
        ty: VarType,
        kind: VarKind,
        value: Option<&str>,
    ) -> Result<VarId, ShaderError> {
        if let Some(&id) = self.variables.get(name) {
            let existing = self.graph.variable(id).ty;
            if existing != ty {
                return Err(ShaderError::TypeMismatch {
                    name: name.to_string(),
                    existing,
                    requested: ty,
                });
            }
            return Ok(id);
        }
        let id = self.graph.add_variable(name, ty, kind, value.map(str::to_string));
        self.variables.insert(name.to_string(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Material, Texture};

    #[test]
    fn test_fragment_helpers_fail_outside_fragment_stage() {
        let state = ShaderState::default();
        let mut registry = UniformLayoutRegistry::new();
        let mut compiler = ShaderCompiler::new(&state, &mut registry);

        let err = compiler.get_or_create_front_view_normal().unwrap_err();
        assert!(matches!(err, ShaderError::NotInFragmentStage { function: "get_or_create_front_view_normal" }));
        assert!(compiler.create_fragment_shader_graph().is_err());
    }

    #[test]
    fn test_uniform_type_conflict_is_reported() {
        let state = ShaderState::default();
        let mut registry = UniformLayoutRegistry::new();
        let mut compiler = ShaderCompiler::new(&state, &mut registry);

        compiler.get_or_create_uniform("uScale", VarType::Float).unwrap();
        let err = compiler.get_or_create_uniform("uScale", VarType::Vec3).unwrap_err();
        assert_eq!(err.to_string(), "variable 'uScale' is declared as float, requested as vec3");
    }

    #[test]
    fn test_clean_after_fragment_keeps_only_varyings() {
        let state = ShaderState::default().with_material(Material::default());
        let mut registry = UniformLayoutRegistry::new();
        let mut compiler = ShaderCompiler::new(&state, &mut registry);

        compiler.compile_fragment().unwrap();
        assert_eq!(compiler.stage(), None);
        assert!(compiler.texture_variables.is_empty());
        let names: Vec<&str> = compiler.graph().variables().map(|(_, var)| var.name.as_str()).collect();
        assert_eq!(names, vec!["vVertexColor"]);
        assert!(compiler.graph().nodes().is_empty());
    }

    #[test]
    fn test_program_hash_follows_content() {
        let plain = ShaderState::default().with_material(Material::default());
        let textured = ShaderState {
            textures: vec![Texture::new("albedo", 0)],
            ..plain.clone()
        };
        let mut registry = UniformLayoutRegistry::new();
        let first = ShaderCompiler::new(&plain, &mut registry).compile_program().unwrap();
        let again = ShaderCompiler::new(&plain, &mut registry).compile_program().unwrap();
        let other = ShaderCompiler::new(&textured, &mut registry).compile_program().unwrap();
        assert_eq!(first, again);
        assert_ne!(first.hash, other.hash);
    }

    #[test]
    fn test_shader_name_is_defined() {
        let state = ShaderState::default();
        let mut registry = UniformLayoutRegistry::new();
        let source = ShaderCompiler::new(&state, &mut registry)
            .with_fragment_shader_name("terrain")
            .compile_fragment()
            .unwrap();
        assert!(source.contains("#define SHADER_NAME terrain"));
    }
}
