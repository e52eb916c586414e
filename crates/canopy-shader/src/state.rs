//! Render-state attributes consumed by the shader compiler.
//!
//! Attribute kinds form a closed set ([`StateAttribute`]); the [`Stateful`]
//! capability gives each one an identity and the key of the code it
//! generates. [`ShaderState`] is the resolved set active on a drawable.

use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rustc_hash::FxHasher;

use crate::uniforms::{UniformLayout, VarType};

/// Identity and code-affecting key of an attribute.
pub trait Stateful {
    /// Attribute type plus instance index, e.g. `Light0` or `Texture2`.
    fn type_member(&self) -> String;

    /// Everything about the attribute that changes generated source. Values
    /// that only feed uniforms are not part of it.
    fn shader_key(&self) -> String;

    fn is_enabled(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Material
// ---------------------------------------------------------------------------

/// Fixed-function style surface colors.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub emission: Vec4,
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: Vec4::new(0.2, 0.2, 0.2, 1.0),
            diffuse: Vec4::new(0.8, 0.8, 0.8, 1.0),
            specular: Vec4::new(0.0, 0.0, 0.0, 1.0),
            emission: Vec4::new(0.0, 0.0, 0.0, 1.0),
            shininess: 12.5,
        }
    }
}

impl Material {
    pub fn uniform_layout() -> UniformLayout {
        UniformLayout::new("Material")
            .with("ambient", "uMaterialAmbient", VarType::Vec4)
            .with("diffuse", "uMaterialDiffuse", VarType::Vec4)
            .with("specular", "uMaterialSpecular", VarType::Vec4)
            .with("emission", "uMaterialEmission", VarType::Vec4)
            .with("shininess", "uMaterialShininess", VarType::Float)
    }

    /// Values for upload, in the member order of [`Material::uniform_layout`].
    pub fn to_uniform(&self) -> MaterialUniform {
        MaterialUniform {
            ambient: self.ambient.to_array(),
            diffuse: self.diffuse.to_array(),
            specular: self.specular.to_array(),
            emission: self.emission.to_array(),
            shininess_pad: [self.shininess, 0.0, 0.0, 0.0],
        }
    }
}

impl Stateful for Material {
    fn type_member(&self) -> String {
        "Material".to_string()
    }

    fn shader_key(&self) -> String {
        self.type_member()
    }
}

/// GPU-side material block, 80 bytes, std140-compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub emission: [f32; 4],
    /// x = shininess, yzw = padding.
    pub shininess_pad: [f32; 4],
}

// ---------------------------------------------------------------------------
// Light
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
    /// Hemispherical: sky color from above, ground color from below.
    Hemi,
}

impl LightKind {
    /// Name of the shading node, also the stem of its GLSL function.
    pub fn node_name(self) -> &'static str {
        match self {
            LightKind::Directional => "SunLight",
            LightKind::Point => "PointLight",
            LightKind::Spot => "SpotLight",
            LightKind::Hemi => "HemiLight",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    /// Index of the light; selects its uniforms and its shadow attributes.
    pub number: u32,
    pub kind: LightKind,
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub position: Vec4,
    pub direction: Vec3,
    /// Constant, linear and quadratic terms.
    pub attenuation: Vec3,
    /// Cone half-angle in degrees.
    pub spot_cut_off: f32,
    pub spot_blend: f32,
    pub ground: Vec4,
}

impl Light {
    pub fn new(number: u32, kind: LightKind) -> Self {
        Self {
            number,
            kind,
            ambient: Vec4::new(0.2, 0.2, 0.2, 1.0),
            diffuse: Vec4::new(0.8, 0.8, 0.8, 1.0),
            specular: Vec4::new(0.2, 0.2, 0.2, 1.0),
            position: Vec4::new(0.0, 0.0, 1.0, 0.0),
            direction: Vec3::new(0.0, 0.0, -1.0),
            attenuation: Vec3::new(1.0, 0.0, 0.0),
            spot_cut_off: 180.0,
            spot_blend: 0.01,
            ground: Vec4::new(0.2, 0.2, 0.2, 1.0),
        }
    }

    /// Uniforms of light `number`, named `uLight<number>_<member>`.
    pub fn uniform_layout(number: u32) -> UniformLayout {
        let name = |member: &str| format!("uLight{number}_{member}");
        UniformLayout::new(format!("Light{number}"))
            .with("ambient", name("ambient"), VarType::Vec4)
            .with("diffuse", name("diffuse"), VarType::Vec4)
            .with("specular", name("specular"), VarType::Vec4)
            .with("position", name("position"), VarType::Vec4)
            .with("direction", name("direction"), VarType::Vec3)
            .with("attenuation", name("attenuation"), VarType::Vec4)
            .with("spotCutOff", name("spotCutOff"), VarType::Float)
            .with("spotBlend", name("spotBlend"), VarType::Float)
            .with("ground", name("ground"), VarType::Vec4)
            .with("matrix", name("matrix"), VarType::Mat4)
            .with("invMatrix", name("invMatrix"), VarType::Mat4)
    }
}

impl Stateful for Light {
    fn type_member(&self) -> String {
        format!("Light{}", self.number)
    }

    fn shader_key(&self) -> String {
        format!("{}{:?}", self.type_member(), self.kind)
    }
}

// ---------------------------------------------------------------------------
// Textures
// ---------------------------------------------------------------------------

/// A color texture bound to a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    pub name: String,
    pub unit: u32,
}

impl Texture {
    pub fn new(name: impl Into<String>, unit: u32) -> Self {
        Self { name: name.into(), unit }
    }
}

impl Stateful for Texture {
    fn type_member(&self) -> String {
        format!("Texture{}", self.unit)
    }

    fn shader_key(&self) -> String {
        self.type_member()
    }
}

/// Depth map rendered from a light, bound to a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShadowTexture {
    pub name: String,
    pub unit: u32,
    pub light_number: u32,
}

impl ShadowTexture {
    pub fn new(name: impl Into<String>, unit: u32, light_number: u32) -> Self {
        Self {
            name: name.into(),
            unit,
            light_number,
        }
    }

    /// Uniforms of the shadow map on `unit`. Members suffixed `_<light>`
    /// belong to one light; the others are shared by every light.
    pub fn uniform_layout(unit: u32, light_number: u32) -> UniformLayout {
        let name = |member: &str| format!("uShadow_Texture{unit}_{member}");
        let lit = |member: &str| format!("{member}_{light_number}");
        UniformLayout::new(format!("ShadowTexture{unit}_{light_number}"))
            .with(lit("ViewMatrix"), name(&lit("ViewMatrix")), VarType::Mat4)
            .with(lit("ProjectionMatrix"), name(&lit("ProjectionMatrix")), VarType::Mat4)
            .with(lit("DepthRange"), name(&lit("DepthRange")), VarType::Vec4)
            .with(lit("MapSize"), name(&lit("MapSize")), VarType::Vec4)
            .with("RenderSize", name("RenderSize"), VarType::Vec2)
            .with(format!("Texture{unit}"), format!("Texture{unit}"), VarType::Int)
    }
}

impl Stateful for ShadowTexture {
    fn type_member(&self) -> String {
        format!("Texture{}", self.unit)
    }

    fn shader_key(&self) -> String {
        format!("ShadowTexture{}_{}", self.unit, self.light_number)
    }
}

// ---------------------------------------------------------------------------
// Shadows
// ---------------------------------------------------------------------------

/// Storage precision of shadow maps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShadowPrecision {
    #[default]
    UnsignedByte,
    HalfFloat,
    Float,
}

/// Percentage-closer filtering kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PcfKernel {
    /// 1 tap, 4 texture fetches.
    #[default]
    Tap1,
    /// 4 taps, 16 texture fetches.
    Tap4,
    /// 9 taps, 36 texture fetches.
    Tap9,
    /// 16 taps, 64 texture fetches.
    Tap16,
}

impl PcfKernel {
    fn define(self) -> &'static str {
        match self {
            PcfKernel::Tap1 => "_PCFx1",
            PcfKernel::Tap4 => "_PCFx4",
            PcfKernel::Tap9 => "_PCFx9",
            PcfKernel::Tap16 => "_PCFx25",
        }
    }
}

/// Makes the lit contribution of one light depend on its shadow map.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowReceiveAttribute {
    pub light_number: u32,
    /// Depth bias in shadow-map space.
    pub bias: f32,
    /// Offset along the normal; enables normal-offset sampling when set.
    pub normal_bias: Option<f32>,
    pub precision: ShadowPrecision,
    pub kernel: PcfKernel,
    pub jitter_offset: bool,
    pub atlas: bool,
    pub enabled: bool,
}

impl ShadowReceiveAttribute {
    pub fn new(light_number: u32) -> Self {
        Self {
            light_number,
            bias: 0.001,
            normal_bias: None,
            precision: ShadowPrecision::UnsignedByte,
            kernel: PcfKernel::Tap1,
            jitter_offset: false,
            atlas: false,
            enabled: true,
        }
    }

    /// Preprocessor switches shared by the receiving and the casting shaders.
    pub fn defines(&self) -> Vec<&'static str> {
        let mut defines = vec![self.kernel.define()];
        if self.precision != ShadowPrecision::UnsignedByte {
            defines.push("_FLOATTEX");
        }
        if self.atlas {
            defines.push("_ATLAS_SHADOW");
        }
        if self.normal_bias.is_some_and(|bias| bias != 0.0) {
            defines.push("_NORMAL_OFFSET");
        }
        if self.jitter_offset {
            defines.push("_JITTER_OFFSET");
        }
        defines
    }

    pub fn uniform_layout(light_number: u32) -> UniformLayout {
        UniformLayout::new(format!("ShadowReceive{light_number}"))
            .with("bias", format!("uShadowReceive{light_number}_bias"), VarType::Float)
            .with("normalBias", format!("uShadowReceive{light_number}_normalBias"), VarType::Float)
    }
}

impl Stateful for ShadowReceiveAttribute {
    fn type_member(&self) -> String {
        format!("ShadowReceive{}", self.light_number)
    }

    fn shader_key(&self) -> String {
        format!("{}_{}", self.type_member(), self.defines().join(","))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Switches the program to depth output for rendering a shadow map.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowCastAttribute {
    pub enabled: bool,
    /// Receiver whose precision and kernel the cast map must match.
    pub receive: Option<ShadowReceiveAttribute>,
}

impl ShadowCastAttribute {
    pub fn new(receive: ShadowReceiveAttribute) -> Self {
        Self {
            enabled: true,
            receive: Some(receive),
        }
    }

    pub fn defines(&self) -> Vec<&'static str> {
        self.receive
            .as_ref()
            .map(ShadowReceiveAttribute::defines)
            .unwrap_or_default()
    }
}

impl Stateful for ShadowCastAttribute {
    fn type_member(&self) -> String {
        "ShadowCast".to_string()
    }

    fn shader_key(&self) -> String {
        format!("ShadowCast_{}", self.defines().join(","))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ---------------------------------------------------------------------------
// Points and billboards
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct PointSizeAttribute {
    pub enabled: bool,
    pub size: f32,
    /// Discard fragments outside the inscribed circle of each point sprite.
    pub circle_shape: bool,
}

impl Default for PointSizeAttribute {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 1.0,
            circle_shape: false,
        }
    }
}

impl PointSizeAttribute {
    pub fn uniform_layout() -> UniformLayout {
        UniformLayout::new("PointSize").with("pointSize", "uPointSize", VarType::Float)
    }
}

impl Stateful for PointSizeAttribute {
    fn type_member(&self) -> String {
        "PointSize".to_string()
    }

    fn shader_key(&self) -> String {
        format!("PointSize{}", u8::from(self.circle_shape))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillboardAttribute {
    pub enabled: bool,
}

impl Default for BillboardAttribute {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Stateful for BillboardAttribute {
    fn type_member(&self) -> String {
        "Billboard".to_string()
    }

    fn shader_key(&self) -> String {
        self.type_member()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ---------------------------------------------------------------------------
// StateAttribute / ShaderState
// ---------------------------------------------------------------------------

/// Every attribute kind that influences shader generation.
#[derive(Clone, Debug, PartialEq)]
pub enum StateAttribute {
    Material(Material),
    Light(Light),
    Texture(Texture),
    ShadowTexture(ShadowTexture),
    ShadowReceive(ShadowReceiveAttribute),
    ShadowCast(ShadowCastAttribute),
    PointSize(PointSizeAttribute),
    Billboard(BillboardAttribute),
}

impl StateAttribute {
    fn as_stateful(&self) -> &dyn Stateful {
        match self {
            StateAttribute::Material(attr) => attr,
            StateAttribute::Light(attr) => attr,
            StateAttribute::Texture(attr) => attr,
            StateAttribute::ShadowTexture(attr) => attr,
            StateAttribute::ShadowReceive(attr) => attr,
            StateAttribute::ShadowCast(attr) => attr,
            StateAttribute::PointSize(attr) => attr,
            StateAttribute::Billboard(attr) => attr,
        }
    }
}

impl Stateful for StateAttribute {
    fn type_member(&self) -> String {
        self.as_stateful().type_member()
    }

    fn shader_key(&self) -> String {
        self.as_stateful().shader_key()
    }

    fn is_enabled(&self) -> bool {
        self.as_stateful().is_enabled()
    }
}

/// Attributes active on a drawable, resolved for compilation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderState {
    pub material: Option<Material>,
    /// Sorted by light number.
    pub lights: Vec<Light>,
    /// Color textures, sorted by unit.
    pub textures: Vec<Texture>,
    /// Sorted by unit.
    pub shadow_textures: Vec<ShadowTexture>,
    /// Sorted by light number.
    pub shadow_receives: Vec<ShadowReceiveAttribute>,
    pub shadow_cast: Option<ShadowCastAttribute>,
    pub point_size: Option<PointSizeAttribute>,
    pub billboard: bool,
}

impl ShaderState {
    /// Resolve `attributes` in order: disabled ones are skipped, a later
    /// attribute replaces an earlier one with the same type member.
    pub fn from_attributes(attributes: &[StateAttribute]) -> Self {
        let mut state = ShaderState::default();
        for attribute in attributes.iter().filter(|attribute| attribute.is_enabled()) {
            match attribute {
                StateAttribute::Material(material) => state.material = Some(material.clone()),
                StateAttribute::Light(light) => {
                    state.lights.retain(|existing| existing.number != light.number);
                    state.lights.push(light.clone());
                }
                StateAttribute::Texture(texture) => {
                    state.shadow_textures.retain(|existing| existing.unit != texture.unit);
                    state.textures.retain(|existing| existing.unit != texture.unit);
                    state.textures.push(texture.clone());
                }
                StateAttribute::ShadowTexture(texture) => {
                    state.textures.retain(|existing| existing.unit != texture.unit);
                    state.shadow_textures.retain(|existing| existing.unit != texture.unit);
                    state.shadow_textures.push(texture.clone());
                }
                StateAttribute::ShadowReceive(receive) => {
                    state.shadow_receives.retain(|existing| existing.light_number != receive.light_number);
                    state.shadow_receives.push(receive.clone());
                }
                StateAttribute::ShadowCast(cast) => state.shadow_cast = Some(cast.clone()),
                StateAttribute::PointSize(point_size) => state.point_size = Some(point_size.clone()),
                StateAttribute::Billboard(_) => state.billboard = true,
            }
        }
        state.lights.sort_by_key(|light| light.number);
        state.textures.sort_by_key(|texture| texture.unit);
        state.shadow_textures.sort_by_key(|texture| texture.unit);
        state.shadow_receives.sort_by_key(|receive| receive.light_number);
        state
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    pub fn shadow_receive_for_light(&self, light_number: u32) -> Option<&ShadowReceiveAttribute> {
        self.shadow_receives
            .iter()
            .find(|receive| receive.light_number == light_number)
    }

    pub fn shadow_textures_for_light(&self, light_number: u32) -> impl Iterator<Item = &ShadowTexture> {
        self.shadow_textures
            .iter()
            .filter(move |texture| texture.light_number == light_number)
    }

    /// Keys of the attributes that change generated source, in canonical order.
    pub fn shader_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        keys.extend(self.material.as_ref().map(Stateful::shader_key));
        keys.extend(self.lights.iter().map(Stateful::shader_key));
        keys.extend(self.textures.iter().map(Stateful::shader_key));
        keys.extend(self.shadow_textures.iter().map(Stateful::shader_key));
        keys.extend(self.shadow_receives.iter().map(Stateful::shader_key));
        keys.extend(self.shadow_cast.as_ref().map(Stateful::shader_key));
        keys.extend(self.point_size.as_ref().map(Stateful::shader_key));
        if self.billboard {
            keys.push("Billboard".to_string());
        }
        keys
    }

    /// Hash of [`shader_keys`](Self::shader_keys); equal for states that compile
    /// to the same program.
    pub fn shader_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.shader_keys().hash(&mut hasher);
        hasher.finish()
    }
}
