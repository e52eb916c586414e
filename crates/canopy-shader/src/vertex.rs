//! Vertex stage graph: clip-space position plus every varying the fragment
//! stage read.

use log::warn;

use crate::compiler::{ShaderCompiler, ShaderError};
use crate::graph::{NodeIndex, ShaderNode, ShaderNodeKind, VarId};
use crate::state::PointSizeAttribute;
use crate::uniforms::VarType;

impl ShaderCompiler<'_> {
    pub(crate) fn create_vertex_shader_graph(&mut self) -> Result<Vec<NodeIndex>, ShaderError> {
        let vertex = self.get_or_create_attribute("Vertex", VarType::Vec3)?;
        let model_view = self.get_or_create_uniform("uModelViewMatrix", VarType::Mat4)?;
        let projection = self.get_or_create_uniform("uProjectionMatrix", VarType::Mat4)?;
        let position = self.get_or_create_builtin("gl_Position", VarType::Vec4)?;

        let mut roots = vec![self.add_node(
            ShaderNode::new(ShaderNodeKind::InlineCode(
                "%out = %projection * %modelView * vec4(%vertex, 1.0);".to_string(),
            ))
            .input("projection", projection)
            .input("modelView", model_view)
            .input("vertex", vertex)
            .output("out", position),
        )];

        for (name, ty) in self.varyings().to_vec() {
            let varying = self.get_or_create_varying(&name, ty)?;
            roots.push(self.write_varying(&name, ty, varying, vertex, model_view)?);
        }

        let state = self.state;
        if state.point_size.as_ref().is_some_and(|point_size| point_size.enabled) {
            let layout = self.layout("PointSize", PointSizeAttribute::uniform_layout);
            let size = self.uniform_from(&layout, "pointSize")?;
            let point_size = self.get_or_create_builtin("gl_PointSize", VarType::Float)?;
            roots.push(self.add_node(
                ShaderNode::new(ShaderNodeKind::SetFromNode)
                    .inputs([size])
                    .output("out", point_size),
            ));
        }
        Ok(roots)
    }

    fn write_varying(
        &mut self,
        name: &str,
        ty: VarType,
        varying: VarId,
        vertex: VarId,
        model_view: VarId,
    ) -> Result<NodeIndex, ShaderError> {
        let mut node = ShaderNode::new(ShaderNodeKind::InlineCode(String::new())).output("out", varying);
        let code = match name {
            "vViewVertex" => {
                node = node.input("vertex", vertex).input("modelView", model_view);
                "%out = %modelView * vec4(%vertex, 1.0);"
            }
            "vModelVertex" => {
                let model = self.get_or_create_uniform("uModelMatrix", VarType::Mat4)?;
                node = node.input("vertex", vertex).input("model", model);
                "%out = vec3(%model * vec4(%vertex, 1.0));"
            }
            "vViewNormal" | "vModelNormal" => {
                let normal = self.get_or_create_attribute("Normal", VarType::Vec3)?;
                let matrix = if name == "vViewNormal" {
                    self.get_or_create_uniform("uModelViewNormalMatrix", VarType::Mat4)?
                } else {
                    self.get_or_create_uniform("uModelNormalMatrix", VarType::Mat4)?
                };
                node = node.input("normal", normal).input("matrix", matrix);
                "%out = vec3(%matrix * vec4(%normal, 0.0));"
            }
            "vViewTangent" => {
                let tangent = self.get_or_create_attribute("Tangent", VarType::Vec4)?;
                let matrix = self.get_or_create_uniform("uModelViewNormalMatrix", VarType::Mat4)?;
                node = node.input("tangent", tangent).input("matrix", matrix);
                "%out = vec4(vec3(%matrix * vec4(%tangent.xyz, 0.0)), %tangent.w);"
            }
            "vVertexColor" => {
                let color = self.get_or_create_attribute("Color", VarType::Vec4)?;
                node = node.input("color", color);
                "%out = %color;"
            }
            _ => match name.strip_prefix("vTexCoord") {
                Some(unit) => {
                    let tex_coord = self.get_or_create_attribute(&format!("TexCoord{unit}"), ty)?;
                    node = node.input("texCoord", tex_coord);
                    "%out = %texCoord;"
                }
                None => {
                    warn!("No vertex source for varying '{}', writing zero", name);
                    let zero = self.get_or_create_constant_zero(ty)?;
                    node = node.input("zero", zero);
                    "%out = %zero;"
                }
            },
        };
        node.kind = ShaderNodeKind::InlineCode(code.to_string());
        Ok(self.add_node(node))
    }
}
