//! Fragment stage graph construction.
//!
//! Every public function here checks that the compiler is in the fragment
//! stage and fails with [`ShaderError::NotInFragmentStage`] otherwise.

use crate::compiler::{ShaderCompiler, ShaderError};
use crate::graph::{NodeIndex, ShaderNode, ShaderNodeKind, VarId};
use crate::state::{Light, LightKind, Material, ShadowReceiveAttribute, ShadowTexture};
use crate::uniforms::VarType;

/// Output written when no material is bound.
const MISSING_MATERIAL_COLOR: &str = "vec4(1.0, 0.0, 1.0, 0.7)";

impl ShaderCompiler<'_> {
    /// Build the fragment graph for the compiler's state and return its roots.
    pub fn create_fragment_shader_graph(&mut self) -> Result<Vec<NodeIndex>, ShaderError> {
        self.ensure_fragment_stage("create_fragment_shader_graph")?;
        let state = self.state;

        if let Some(cast) = state.shadow_cast.as_ref().filter(|cast| cast.enabled) {
            return Ok(vec![self.create_shadow_cast_depth(cast.defines())?]);
        }

        if state.material.is_none() {
            return Ok(vec![self.create_default_fragment_shader_graph()?]);
        }

        let material = self.layout("Material", Material::uniform_layout);
        let diffuse = self.uniform_from(&material, "diffuse")?;
        let diffuse_color = self.get_vertex_color(diffuse)?;

        let mut final_color = if state.lights.is_empty() {
            diffuse_color
        } else {
            self.create_lighting(diffuse_color)?
        };

        let emission = self.uniform_from(&material, "emission")?;
        let with_emission = self.create_variable(VarType::Vec3, "diffuseEmission");
        self.add_node(
            ShaderNode::new(ShaderNodeKind::Add)
                .inputs([final_color, emission])
                .output("out", with_emission),
        );
        final_color = with_emission;

        if let Some(texture_color) = self.get_diffuse_color_from_textures()? {
            self.add_node(
                ShaderNode::new(ShaderNodeKind::InlineCode("%color.rgb *= %texture.rgb;".to_string()))
                    .input("texture", texture_color)
                    .output("color", final_color),
            );
        }

        let alpha = self.create_variable(VarType::Float, "alpha");
        let texel = self.get_first_valid_texture()?;
        let mut alpha_code = if texel.is_some() {
            "%alpha = %color.a * %texelAlpha.a;".to_string()
        } else {
            "%alpha = %color.a;".to_string()
        };
        // billboards drop fully transparent fragments
        if state.billboard {
            alpha_code.push_str("\nif ( %alpha == 0.0) discard;");
        }
        let mut alpha_node = ShaderNode::new(ShaderNodeKind::InlineCode(alpha_code))
            .input("color", diffuse)
            .output("alpha", alpha);
        if let Some(texel) = texel {
            alpha_node = alpha_node.input("texelAlpha", texel);
        }
        self.add_node(alpha_node);

        let final_color = self.get_premult_alpha(final_color, alpha)?;
        let final_color = self.apply_point_size_circle(final_color)?;

        let frag_color = self.get_or_create_builtin("gl_FragColor", VarType::Vec4)?;
        let root = self.add_node(
            ShaderNode::new(ShaderNodeKind::SetAlpha)
                .input("color", final_color)
                .input("alpha", alpha)
                .output("color", frag_color),
        );
        Ok(vec![root])
    }

    /// Constant magenta output marking geometry without a material.
    pub fn create_default_fragment_shader_graph(&mut self) -> Result<NodeIndex, ShaderError> {
        self.ensure_fragment_stage("create_default_fragment_shader_graph")?;
        let color = self.create_constant(VarType::Vec4, "fofd", MISSING_MATERIAL_COLOR);
        let frag_color = self.get_or_create_builtin("gl_FragColor", VarType::Vec4)?;
        Ok(self.add_node(
            ShaderNode::new(ShaderNodeKind::SetFromNode)
                .inputs([color])
                .output("out", frag_color),
        ))
    }

    /// Depth output used while rendering into a shadow map.
    pub fn create_shadow_cast_depth(&mut self, defines: Vec<&'static str>) -> Result<NodeIndex, ShaderError> {
        self.ensure_fragment_stage("create_shadow_cast_depth")?;
        let depth_range = self.get_or_create_uniform("uShadowDepthRange", VarType::Vec4)?;
        let view_vertex = self.get_or_create_varying("vViewVertex", VarType::Vec4)?;
        let frag_color = self.get_or_create_builtin("gl_FragColor", VarType::Vec4)?;
        Ok(self.add_node(
            ShaderNode::new(ShaderNodeKind::ShadowCast { defines })
                .input("shadowDepthRange", depth_range)
                .input("fragEye", view_vertex)
                .output("color", frag_color),
        ))
    }

    /// Diffuse color multiplied by the per-vertex color when the vertex color
    /// array is enabled.
    pub fn get_vertex_color(&mut self, diffuse: VarId) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_vertex_color")?;
        let vertex_color = self.get_or_create_varying("vVertexColor", VarType::Vec4)?;
        let enabled = self.get_or_create_uniform("uArrayColorEnabled", VarType::Float)?;
        let color = self.create_variable(VarType::Vec4, "vertexDiffuse");
        let code = ["%color = %diffuse;", "if ( %hasVertexColor == 1.0)", "  %color *= %vertexColor.rgba;"].join("\n");
        self.add_node(
            ShaderNode::new(ShaderNodeKind::InlineCode(code))
                .input("diffuse", diffuse)
                .input("hasVertexColor", enabled)
                .input("vertexColor", vertex_color)
                .output("color", color)
                .comment("diffuse color = diffuse color * vertex color"),
        );
        Ok(color)
    }

    pub fn get_or_create_front_view_normal(&mut self) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_or_create_front_view_normal")?;
        if let Some(&id) = self.variables.get("frontViewNormal") {
            return Ok(id);
        }
        let normal = self.get_or_create_varying("vViewNormal", VarType::Vec3)?;
        let out = self.create_named_variable(VarType::Vec3, "frontViewNormal");
        self.add_node(ShaderNode::new(ShaderNodeKind::FrontNormal).input("normal", normal).output("normal", out));
        Ok(out)
    }

    pub fn get_or_create_normalized_front_view_normal(&mut self) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_or_create_normalized_front_view_normal")?;
        if let Some(&id) = self.variables.get("nFrontViewNormal") {
            return Ok(id);
        }
        let normal = self.get_or_create_front_view_normal()?;
        let out = self.create_named_variable(VarType::Vec3, "nFrontViewNormal");
        self.add_node(ShaderNode::new(ShaderNodeKind::Normalize).input("vec", normal).output("vec", out));
        Ok(out)
    }

    pub fn get_or_create_front_model_normal(&mut self) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_or_create_front_model_normal")?;
        if let Some(&id) = self.variables.get("frontModelNormal") {
            return Ok(id);
        }
        let normal = self.get_or_create_varying("vModelNormal", VarType::Vec3)?;
        let out = self.create_named_variable(VarType::Vec3, "frontModelNormal");
        self.add_node(ShaderNode::new(ShaderNodeKind::FrontNormal).input("normal", normal).output("normal", out));
        Ok(out)
    }

    pub fn get_or_create_normalized_front_model_normal(&mut self) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_or_create_normalized_front_model_normal")?;
        if let Some(&id) = self.variables.get("nFrontModelNormal") {
            return Ok(id);
        }
        let normal = self.get_or_create_front_model_normal()?;
        let out = self.create_named_variable(VarType::Vec3, "nFrontModelNormal");
        self.add_node(ShaderNode::new(ShaderNodeKind::Normalize).input("vec", normal).output("vec", out));
        Ok(out)
    }

    pub fn get_or_create_front_view_tangent(&mut self) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_or_create_front_view_tangent")?;
        if let Some(&id) = self.variables.get("frontViewTangent") {
            return Ok(id);
        }
        let tangent = self.get_or_create_varying("vViewTangent", VarType::Vec4)?;
        let out = self.create_named_variable(VarType::Vec4, "frontViewTangent");
        self.add_node(ShaderNode::new(ShaderNodeKind::FrontNormal).input("normal", tangent).output("normal", out));
        Ok(out)
    }

    /// Normalized direction from the fragment towards the eye, in view space.
    pub fn get_or_create_normalized_view_eye_direction(&mut self) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_or_create_normalized_view_eye_direction")?;
        if let Some(&id) = self.variables.get("eyeVector") {
            return Ok(id);
        }
        let view_vertex = self.get_or_create_varying("vViewVertex", VarType::Vec4)?;
        let cast_eye = self.create_variable(VarType::Vec3, "castEye");
        self.add_node(ShaderNode::new(ShaderNodeKind::SetFromNode).inputs([view_vertex]).output("out", cast_eye));
        let normalized = self.create_variable(VarType::Vec3, "normalizedEye");
        self.add_node(ShaderNode::new(ShaderNodeKind::Normalize).input("vec", cast_eye).output("vec", normalized));
        let minus_one = self.create_constant(VarType::Float, "minusOne", "-1.0");
        let out = self.create_named_variable(VarType::Vec3, "eyeVector");
        self.add_node(ShaderNode::new(ShaderNodeKind::Mult).inputs([normalized, minus_one]).output("out", out));
        Ok(out)
    }

    pub fn get_premult_alpha(&mut self, color: VarId, alpha: VarId) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_premult_alpha")?;
        let out = self.create_variable(VarType::Vec4, "premultAlpha");
        self.add_node(
            ShaderNode::new(ShaderNodeKind::PreMultAlpha)
                .input("color", color)
                .input("alpha", alpha)
                .output("color", out),
        );
        Ok(out)
    }

    /// Linear color encoded to sRGB.
    pub fn get_colors_rgb(&mut self, color: VarId) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_colors_rgb")?;
        let out = self.create_variable(VarType::Vec3, "srgbColor");
        self.add_node(ShaderNode::new(ShaderNodeKind::LinearTosRgb).input("color", color).output("color", out));
        Ok(out)
    }

    /// Discards fragments outside the inscribed circle of round point sprites.
    pub fn apply_point_size_circle(&mut self, color: VarId) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("apply_point_size_circle")?;
        let circle = self
            .state
            .point_size
            .as_ref()
            .is_some_and(|point_size| point_size.enabled && point_size.circle_shape);
        if !circle {
            return Ok(color);
        }
        let radius = self.get_or_create_constant_one(VarType::Float)?;
        self.add_node(
            ShaderNode::new(ShaderNodeKind::InlineCode(
                "if (length(2.0 * gl_PointCoord - 1.0) > %radius) discard;".to_string(),
            ))
            .input("radius", radius)
            .output("output", color),
        );
        Ok(color)
    }

    /// Sampled color of a texture unit, created on first use.
    pub fn get_texture_variable(&mut self, unit: u32) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("get_texture_variable")?;
        if let Some(&id) = self.texture_variables.get(&unit) {
            return Ok(id);
        }
        let sampler = self.get_or_create_sampler(&format!("Texture{unit}"))?;
        let tex_coord = self.get_or_create_varying(&format!("vTexCoord{unit}"), VarType::Vec2)?;
        let texel = self.create_variable(VarType::Vec4, &format!("texel{unit}"));
        self.add_node(
            ShaderNode::new(ShaderNodeKind::TextureRgba)
                .input("sampler", sampler)
                .input("uv", tex_coord)
                .output("color", texel),
        );
        self.texture_variables.insert(unit, texel);
        Ok(texel)
    }

    /// Product of all color textures; a single texture is returned as is.
    pub fn get_diffuse_color_from_textures(&mut self) -> Result<Option<VarId>, ShaderError> {
        self.ensure_fragment_stage("get_diffuse_color_from_textures")?;
        let state = self.state;
        let mut texels = Vec::new();
        for texture in state.textures.iter() {
            texels.push(self.get_texture_variable(texture.unit)?);
        }
        match texels.len() {
            0 => Ok(None),
            1 => Ok(Some(texels[0])),
            _ => {
                let accum = self.create_variable(VarType::Vec3, "texDiffuseAccum");
                self.add_node(ShaderNode::new(ShaderNodeKind::Mult).inputs(texels).output("out", accum));
                Ok(Some(accum))
            }
        }
    }

    /// Texel of the lowest bound color texture unit.
    pub fn get_first_valid_texture(&mut self) -> Result<Option<VarId>, ShaderError> {
        self.ensure_fragment_stage("get_first_valid_texture")?;
        let state = self.state;
        match state.textures.iter().next() {
            Some(texture) => self.get_texture_variable(texture.unit).map(Some),
            None => Ok(None),
        }
    }

    /// Sum of every light's shaded (and shadowed) color plus its ambient term.
    pub fn create_lighting(&mut self, material_diffuse: VarId) -> Result<VarId, ShaderError> {
        self.ensure_fragment_stage("create_lighting")?;
        let state = self.state;
        let mut light_sum = Vec::new();

        for light in &state.lights {
            let inputs = self.get_inputs_from_light(light, material_diffuse)?;
            let color = self.create_variable(VarType::Vec3, "lightColor");
            let lighted = self.create_variable(VarType::Bool, "lighted");
            let mut node = ShaderNode::new(ShaderNodeKind::Light(light.kind));
            for (key, var) in inputs {
                node = node.input(key, var);
            }
            self.add_node(node.output("color", color).output("lighted", lighted));

            let shadowed = self.create_shadowing_light(light, lighted, color)?;
            light_sum.push(shadowed.unwrap_or(color));
        }

        self.add_ambient_lighting(&mut light_sum)?;

        match light_sum.len() {
            0 => self.get_or_create_constant_zero(VarType::Vec3),
            1 => Ok(light_sum[0]),
            _ => {
                let out = self.create_variable(VarType::Vec3, "lightSum");
                self.add_node(ShaderNode::new(ShaderNodeKind::Add).inputs(light_sum).output("out", out));
                Ok(out)
            }
        }
    }

    /// Arguments of a light's shading function; which ones depend on its kind.
    pub fn get_inputs_from_light(
        &mut self,
        light: &Light,
        material_diffuse: VarId,
    ) -> Result<Vec<(String, VarId)>, ShaderError> {
        self.ensure_fragment_stage("get_inputs_from_light")?;
        let material = self.layout("Material", Material::uniform_layout);
        let number = light.number;
        let uniforms = self.layout(&format!("Light{number}"), || Light::uniform_layout(number));

        let mut inputs = vec![
            ("normal".to_string(), self.get_or_create_normalized_front_view_normal()?),
            ("eyeVector".to_string(), self.get_or_create_normalized_view_eye_direction()?),
            ("materialdiffuse".to_string(), material_diffuse),
            ("materialspecular".to_string(), self.uniform_from(&material, "specular")?),
            ("materialshininess".to_string(), self.uniform_from(&material, "shininess")?),
        ];
        let members: &[&str] = match light.kind {
            LightKind::Directional => &["diffuse", "position", "matrix", "specular"],
            LightKind::Point => &["diffuse", "position", "matrix", "specular", "attenuation"],
            LightKind::Spot => &[
                "diffuse",
                "position",
                "matrix",
                "specular",
                "attenuation",
                "direction",
                "spotCutOff",
                "spotBlend",
                "invMatrix",
            ],
            LightKind::Hemi => &["diffuse", "position", "matrix", "ground"],
        };
        for member in members {
            inputs.push((format!("light{member}"), self.uniform_from(&uniforms, member)?));
        }
        Ok(inputs)
    }

    /// Lit color of `light` attenuated by its shadow visibility, or `None`
    /// when the light has no shadow receiver or no shadow map.
    pub fn create_shadowing_light(
        &mut self,
        light: &Light,
        lighted: VarId,
        lit_color: VarId,
    ) -> Result<Option<VarId>, ShaderError> {
        self.ensure_fragment_stage("create_shadowing_light")?;
        let state = self.state;
        let Some(receive) = state.shadow_receive_for_light(light.number) else {
            return Ok(None);
        };
        let shadow_textures: Vec<&ShadowTexture> = state.shadow_textures_for_light(light.number).collect();
        if shadow_textures.is_empty() {
            return Ok(None);
        }

        let vertex_world = self.get_or_create_varying("vModelVertex", VarType::Vec3)?;
        let normal_world = self.get_or_create_normalized_front_model_normal()?;

        let number = receive.light_number;
        let receive_uniforms = self.layout(&format!("ShadowReceive{number}"), || {
            ShadowReceiveAttribute::uniform_layout(number)
        });
        let mut inputs = vec![
            ("lighted".to_string(), lighted),
            ("bias".to_string(), self.uniform_from(&receive_uniforms, "bias")?),
            ("normalBias".to_string(), self.uniform_from(&receive_uniforms, "normalBias")?),
        ];
        for texture in shadow_textures {
            self.create_shadow_texture_inputs(texture, &mut inputs)?;
        }
        inputs.push(("vertexWorld".to_string(), vertex_world));
        inputs.push(("normalWorld".to_string(), normal_world));

        let visibility = self.create_variable(VarType::Float, "shadowVisibility");
        let mut node = ShaderNode::new(ShaderNodeKind::ShadowReceive {
            defines: receive.defines(),
        });
        for (key, var) in inputs {
            node = node.input(key, var);
        }
        self.add_node(node.output("float", visibility));

        let shadowed = self.create_variable(VarType::Vec3, "lightAndShadowTempOutput");
        self.add_node(
            ShaderNode::new(ShaderNodeKind::Mult)
                .inputs([lit_color, visibility])
                .output("out", shadowed),
        );
        Ok(Some(shadowed))
    }

    /// Sampler and uniforms of one shadow map, keeping only the members that
    /// belong to the map's light.
    fn create_shadow_texture_inputs(
        &mut self,
        texture: &ShadowTexture,
        inputs: &mut Vec<(String, VarId)>,
    ) -> Result<(), ShaderError> {
        let (unit, light_number) = (texture.unit, texture.light_number);
        let sampler_name = format!("Texture{unit}");
        let sampler = self.get_or_create_sampler(&sampler_name)?;

        let key = format!("ShadowTexture{unit}_{light_number}");
        let uniforms = self.layout(&key, || ShadowTexture::uniform_layout(unit, light_number));
        let suffix = format!("_{light_number}");
        for (member, decl) in uniforms.members() {
            if member == sampler_name {
                continue;
            }
            let stem = member.strip_suffix(suffix.as_str()).unwrap_or(member);
            let id = self.get_or_create_uniform(&decl.name, decl.ty)?;
            inputs.push((format!("shadowTexture{stem}"), id));
        }
        inputs.push(("shadowTexture".to_string(), sampler));
        Ok(())
    }

    /// Appends `material ambient * light ambient` for every light.
    pub fn add_ambient_lighting(&mut self, terms: &mut Vec<VarId>) -> Result<(), ShaderError> {
        self.ensure_fragment_stage("add_ambient_lighting")?;
        let state = self.state;
        let material = self.layout("Material", Material::uniform_layout);
        for light in &state.lights {
            let number = light.number;
            let uniforms = self.layout(&format!("Light{number}"), || Light::uniform_layout(number));
            let material_ambient = self.uniform_from(&material, "ambient")?;
            let light_ambient = self.uniform_from(&uniforms, "ambient")?;
            let ambient = self.create_variable(VarType::Vec3, "ambient");
            self.add_node(
                ShaderNode::new(ShaderNodeKind::Mult)
                    .inputs([material_ambient, light_ambient])
                    .output("out", ambient),
            );
            terms.push(ambient);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::ShaderCompiler;
    use crate::state::{
        BillboardAttribute, Light, LightKind, Material, PointSizeAttribute, ShaderState, ShadowCastAttribute,
        ShadowReceiveAttribute, ShadowTexture, StateAttribute, Texture,
    };
    use crate::uniforms::UniformLayoutRegistry;

    fn fragment(state: &ShaderState) -> String {
        let mut registry = UniformLayoutRegistry::new();
        ShaderCompiler::new(state, &mut registry).compile_fragment().unwrap()
    }

    fn textured(billboard: bool) -> ShaderState {
        let mut attributes = vec![
            StateAttribute::Material(Material::default()),
            StateAttribute::Texture(Texture::new("leaves", 0)),
        ];
        if billboard {
            attributes.push(StateAttribute::Billboard(BillboardAttribute::default()));
        }
        ShaderState::from_attributes(&attributes)
    }

    #[test]
    fn test_missing_material_falls_back_to_constant_color() {
        let state = ShaderState::from_attributes(&[
            StateAttribute::Light(Light::new(0, LightKind::Directional)),
            StateAttribute::Texture(Texture::new("albedo", 0)),
        ]);
        let source = fragment(&state);
        assert!(source.contains("vec4 fofd = vec4(1.0, 0.0, 1.0, 0.7);"));
        assert!(source.contains("gl_FragColor = fofd;"));
        assert!(!source.contains("uLight0"));
        assert!(!source.contains("Texture0"));
    }

    #[test]
    fn test_billboard_discards_transparent_fragments() {
        let with_billboard = fragment(&textured(true));
        assert!(with_billboard.contains("alpha = uMaterialDiffuse.a * texel0.a;"));
        assert!(with_billboard.contains("if ( alpha == 0.0) discard;"));

        let without = fragment(&textured(false));
        assert!(without.contains("alpha = uMaterialDiffuse.a * texel0.a;"));
        assert!(!without.contains("discard"));
    }

    #[test]
    fn test_single_texture_is_not_multiplied() {
        let source = fragment(&textured(false));
        assert!(source.contains("diffuseEmission.rgb *= texel0.rgb;"));
        assert!(!source.contains("texDiffuseAccum"));

        let state = ShaderState::from_attributes(&[
            StateAttribute::Material(Material::default()),
            StateAttribute::Texture(Texture::new("albedo", 0)),
            StateAttribute::Texture(Texture::new("detail", 1)),
        ]);
        let source = fragment(&state);
        assert!(source.contains("texDiffuseAccum = texel0.xyz * texel1.xyz;"));
        assert!(source.contains("alpha = uMaterialDiffuse.a * texel0.a;"));
    }

    #[test]
    fn test_light_inputs_depend_on_light_kind() {
        let state = ShaderState::from_attributes(&[
            StateAttribute::Material(Material::default()),
            StateAttribute::Light(Light::new(0, LightKind::Directional)),
            StateAttribute::Light(Light::new(1, LightKind::Spot)),
            StateAttribute::Light(Light::new(2, LightKind::Hemi)),
        ]);
        let source = fragment(&state);
        assert!(source.contains("computeSunLightShading("));
        assert!(source.contains("computeSpotLightShading("));
        assert!(source.contains("computeHemiLightShading("));
        assert!(source.contains("uniform float uLight1_spotCutOff;"));
        assert!(source.contains("uniform vec4 uLight2_ground;"));
        assert!(!source.contains("uLight0_attenuation"));
        assert!(!source.contains("uLight2_specular"));
        // three lit colors and three ambient terms
        assert!(source.contains("lightSum = lightColor + lightColor1 + lightColor2 + ambient + ambient1 + ambient2;"));
    }

    #[test]
    fn test_normals_are_computed_once() {
        let state = ShaderState::from_attributes(&[
            StateAttribute::Material(Material::default()),
            StateAttribute::Light(Light::new(0, LightKind::Point)),
            StateAttribute::Light(Light::new(1, LightKind::Point)),
        ]);
        let source = fragment(&state);
        assert_eq!(source.matches("frontViewNormal = gl_FrontFacing").count(), 1);
        assert_eq!(source.matches("nFrontViewNormal = normalize(").count(), 1);
        assert_eq!(source.matches("eyeVector = normalizedEye * vec3(minusOne);").count(), 1);
    }

    #[test]
    fn test_shadowed_lights_use_their_own_maps() {
        let state = ShaderState::from_attributes(&[
            StateAttribute::Material(Material::default()),
            StateAttribute::Light(Light::new(0, LightKind::Directional)),
            StateAttribute::Light(Light::new(1, LightKind::Directional)),
            StateAttribute::ShadowReceive(ShadowReceiveAttribute::new(0)),
            StateAttribute::ShadowReceive(ShadowReceiveAttribute::new(1)),
            StateAttribute::ShadowTexture(ShadowTexture::new("shadow0", 2, 0)),
            StateAttribute::ShadowTexture(ShadowTexture::new("shadow1", 3, 1)),
        ]);
        let source = fragment(&state);
        assert!(source.contains("uniform sampler2D Texture2;"));
        assert!(source.contains("uniform sampler2D Texture3;"));
        assert!(source.contains("uniform mat4 uShadow_Texture2_ViewMatrix_0;"));
        assert!(source.contains("uniform mat4 uShadow_Texture3_ViewMatrix_1;"));
        assert!(!source.contains("uShadow_Texture2_ViewMatrix_1"));
        assert_eq!(source.matches("= computeShadow(").count(), 2);
        assert!(source.contains("lightAndShadowTempOutput1 = lightColor1 * vec3(shadowVisibility1);"));
        assert!(source.contains("#define _PCFx1"));
        assert!(source.contains("varying vec3 vModelVertex;"));
    }

    #[test]
    fn test_receiver_without_shadow_map_leaves_light_unshadowed() {
        let state = ShaderState::from_attributes(&[
            StateAttribute::Material(Material::default()),
            StateAttribute::Light(Light::new(0, LightKind::Directional)),
            StateAttribute::ShadowReceive(ShadowReceiveAttribute::new(0)),
        ]);
        let source = fragment(&state);
        assert!(!source.contains("computeShadow("));
    }

    #[test]
    fn test_shadow_cast_outputs_depth() {
        let state = ShaderState::from_attributes(&[
            StateAttribute::Material(Material::default()),
            StateAttribute::ShadowCast(ShadowCastAttribute::new(ShadowReceiveAttribute::new(0))),
        ]);
        let source = fragment(&state);
        assert!(source.contains("gl_FragColor = computeShadowDepth(uShadowDepthRange, vViewVertex);"));
        assert!(!source.contains("uMaterialDiffuse"));
    }

    #[test]
    fn test_round_points_discard_outside_circle() {
        let state = ShaderState::from_attributes(&[
            StateAttribute::Material(Material::default()),
            StateAttribute::PointSize(PointSizeAttribute {
                circle_shape: true,
                ..PointSizeAttribute::default()
            }),
        ]);
        let source = fragment(&state);
        assert!(source.contains("if (length(2.0 * gl_PointCoord - 1.0) > one_float) discard;"));
    }
}
