//! Uniform declarations and the registry of per-attribute uniform layouts.
//!
//! Each attribute kind describes its uniforms once per key (for example
//! `Light0` or `ShadowReceive1`). The registry is owned by whoever builds
//! programs and is passed to the compiler explicitly.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::compiler::ShaderError;

/// GLSL type of a shader variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarType {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Sampler2D,
}

impl VarType {
    pub fn glsl_name(self) -> &'static str {
        match self {
            VarType::Bool => "bool",
            VarType::Int => "int",
            VarType::Float => "float",
            VarType::Vec2 => "vec2",
            VarType::Vec3 => "vec3",
            VarType::Vec4 => "vec4",
            VarType::Mat3 => "mat3",
            VarType::Mat4 => "mat4",
            VarType::Sampler2D => "sampler2D",
        }
    }

    /// Number of float components for scalar and vector types, 0 otherwise.
    pub fn components(self) -> usize {
        match self {
            VarType::Float => 1,
            VarType::Vec2 => 2,
            VarType::Vec3 => 3,
            VarType::Vec4 => 4,
            _ => 0,
        }
    }

    /// Literal for zero in this type.
    pub fn zero(self) -> &'static str {
        match self {
            VarType::Bool => "false",
            VarType::Int => "0",
            VarType::Float => "0.0",
            VarType::Vec2 => "vec2(0.0)",
            VarType::Vec3 => "vec3(0.0)",
            VarType::Vec4 => "vec4(0.0)",
            VarType::Mat3 => "mat3(0.0)",
            VarType::Mat4 => "mat4(0.0)",
            VarType::Sampler2D => "0",
        }
    }

    /// Literal for one in this type.
    pub fn one(self) -> &'static str {
        match self {
            VarType::Bool => "true",
            VarType::Int => "1",
            VarType::Float => "1.0",
            VarType::Vec2 => "vec2(1.0)",
            VarType::Vec3 => "vec3(1.0)",
            VarType::Vec4 => "vec4(1.0)",
            VarType::Mat3 => "mat3(1.0)",
            VarType::Mat4 => "mat4(1.0)",
            VarType::Sampler2D => "1",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

/// A uniform as it appears in generated source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UniformDecl {
    pub name: String,
    pub ty: VarType,
}

impl UniformDecl {
    pub fn new(name: impl Into<String>, ty: VarType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Named uniform members of one attribute instance kind.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformLayout {
    key: String,
    members: Vec<(String, UniformDecl)>,
}

impl UniformLayout {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            members: Vec::new(),
        }
    }

    /// Add `member`, declared in source as `name`.
    pub fn with(mut self, member: impl Into<String>, name: impl Into<String>, ty: VarType) -> Self {
        self.members.push((member.into(), UniformDecl::new(name, ty)));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, member: &str) -> Option<&UniformDecl> {
        self.members
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, decl)| decl)
    }

    /// Like [`get`](Self::get), failing with [`ShaderError::MissingUniform`].
    pub fn require(&self, member: &str) -> Result<&UniformDecl, ShaderError> {
        self.get(member).ok_or_else(|| ShaderError::MissingUniform {
            layout: self.key.clone(),
            member: member.to_string(),
        })
    }

    /// Members in declaration order.
    pub fn members(&self) -> impl Iterator<Item = (&str, &UniformDecl)> {
        self.members.iter().map(|(member, decl)| (member.as_str(), decl))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Uniform layouts keyed by attribute type member.
#[derive(Debug, Default)]
pub struct UniformLayoutRegistry {
    layouts: FxHashMap<String, Arc<UniformLayout>>,
}

impl UniformLayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout registered under `key`, built with `build` the first time.
    pub fn get_or_create(&mut self, key: &str, build: impl FnOnce() -> UniformLayout) -> Arc<UniformLayout> {
        if let Some(layout) = self.layouts.get(key) {
            return Arc::clone(layout);
        }
        let layout = Arc::new(build());
        self.layouts.insert(key.to_string(), Arc::clone(&layout));
        layout
    }

    pub fn get(&self, key: &str) -> Option<Arc<UniformLayout>> {
        self.layouts.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}
