//! Shader graph: typed variables connected by operation nodes, emitted as
//! GLSL source.
//!
//! Nodes read named input variables and write named output variables. Only
//! nodes reachable from the roots passed to [`ShaderGraph::emit`] end up in
//! the source, in the order they were added.

use std::fmt::Write as _;

use rustc_hash::FxHashSet;

use crate::state::LightKind;
use crate::uniforms::VarType;

/// Index of a variable in its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

/// Index of a node in its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

/// Storage class of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarKind {
    Local,
    /// Local initialized from a literal.
    Constant,
    Uniform,
    Varying,
    Attribute,
    Sampler,
    /// Predefined output or input such as `gl_FragColor`; never declared.
    Builtin,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: VarType,
    pub kind: VarKind,
    /// Initializer literal.
    pub value: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Operation performed by a node.
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderNodeKind {
    /// Assigns the single input to the single output, casting if needed.
    SetFromNode,
    /// GLSL template; `%key` is replaced by the variable bound to `key`.
    InlineCode(String),
    /// Sum of all inputs.
    Add,
    /// Product of all inputs.
    Mult,
    Normalize,
    /// Flips `normal` for back faces.
    FrontNormal,
    PreMultAlpha,
    SetAlpha,
    LinearTosRgb,
    TextureRgba,
    /// Shading of one light; inputs are passed to the light function in order.
    Light(LightKind),
    /// Visibility of a fragment from one light's shadow maps.
    ShadowReceive { defines: Vec<&'static str> },
    /// Depth written while rendering a shadow map.
    ShadowCast { defines: Vec<&'static str> },
    /// Preprocessor definition; produces no statements.
    Define { name: String, value: String },
}

impl ShaderNodeKind {
    /// GLSL library files the node's functions live in.
    fn includes(&self) -> &'static [&'static str] {
        match self {
            ShaderNodeKind::Light(_) => &["lights.glsl"],
            ShaderNodeKind::ShadowReceive { .. } => &["shadowsReceive.glsl"],
            ShaderNodeKind::ShadowCast { .. } => &["shadowsCast.glsl"],
            ShaderNodeKind::LinearTosRgb => &["colorEncode.glsl"],
            _ => &[],
        }
    }

    fn defines(&self) -> Vec<String> {
        match self {
            ShaderNodeKind::ShadowReceive { defines } | ShaderNodeKind::ShadowCast { defines } => {
                defines.iter().map(|define| format!("#define {define}")).collect()
            }
            ShaderNodeKind::Define { name, value } => vec![format!("#define {name} {value}")],
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderNode {
    pub kind: ShaderNodeKind,
    pub inputs: Vec<(String, VarId)>,
    pub outputs: Vec<(String, VarId)>,
    pub comment: Option<String>,
}

impl ShaderNode {
    pub fn new(kind: ShaderNodeKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            comment: None,
        }
    }

    pub fn input(mut self, key: impl Into<String>, var: VarId) -> Self {
        self.inputs.push((key.into(), var));
        self
    }

    /// Positional inputs keyed `in0`, `in1`, ...
    pub fn inputs(mut self, vars: impl IntoIterator<Item = VarId>) -> Self {
        for var in vars {
            let key = format!("in{}", self.inputs.len());
            self.inputs.push((key, var));
        }
        self
    }

    pub fn output(mut self, key: impl Into<String>, var: VarId) -> Self {
        self.outputs.push((key.into(), var));
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn input_var(&self, key: &str) -> Option<VarId> {
        self.inputs.iter().find(|(name, _)| name == key).map(|(_, var)| *var)
    }

    fn first_output(&self) -> Option<VarId> {
        self.outputs.first().map(|(_, var)| *var)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShaderGraph {
    variables: Vec<Variable>,
    nodes: Vec<ShaderNode>,
    names: FxHashSet<String>,
}

impl ShaderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable. Locals with a name already taken get a numeric suffix;
    /// other kinds keep their name since it is part of the program interface.
    pub fn add_variable(&mut self, name: &str, ty: VarType, kind: VarKind, value: Option<String>) -> VarId {
        let mut unique = name.to_string();
        if matches!(kind, VarKind::Local | VarKind::Constant) {
            let mut suffix = 0;
            while self.names.contains(&unique) {
                suffix += 1;
                unique = format!("{name}{suffix}");
            }
        }
        self.names.insert(unique.clone());
        self.variables.push(Variable {
            name: unique,
            ty,
            kind,
            value,
        });
        VarId(self.variables.len() - 1)
    }

    pub fn add_node(&mut self, node: ShaderNode) -> NodeIndex {
        self.nodes.push(node);
        NodeIndex(self.nodes.len() - 1)
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn node(&self, index: NodeIndex) -> &ShaderNode {
        &self.nodes[index.0]
    }

    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.variables.iter().enumerate().map(|(index, var)| (VarId(index), var))
    }

    pub fn nodes(&self) -> &[ShaderNode] {
        &self.nodes
    }

    /// Nodes that write `var`, in creation order.
    pub fn producers(&self, var: VarId) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.outputs.iter().any(|(_, out)| *out == var))
            .map(|(index, _)| NodeIndex(index))
            .collect()
    }

    /// Nodes contributing to `roots`: the roots plus every node writing a
    /// variable that a contributing node reads or writes.
    pub fn contributing_nodes(&self, roots: &[NodeIndex]) -> Vec<NodeIndex> {
        let mut active: FxHashSet<NodeIndex> = FxHashSet::default();
        let mut visited_vars: FxHashSet<VarId> = FxHashSet::default();
        let mut stack: Vec<NodeIndex> = roots.to_vec();
        while let Some(index) = stack.pop() {
            if !active.insert(index) {
                continue;
            }
            let node = &self.nodes[index.0];
            for (_, var) in node.inputs.iter().chain(node.outputs.iter()) {
                if visited_vars.insert(*var) {
                    stack.extend(self.producers(*var));
                }
            }
        }
        let mut ordered: Vec<NodeIndex> = active.into_iter().collect();
        ordered.sort();
        ordered
    }

    /// Emit source for `stage` containing the nodes contributing to `roots`.
    pub fn emit(&self, stage: ShaderStage, roots: &[NodeIndex]) -> String {
        let active = self.contributing_nodes(roots);

        let mut used: Vec<VarId> = Vec::new();
        let mut seen: FxHashSet<VarId> = FxHashSet::default();
        for index in &active {
            let node = &self.nodes[index.0];
            for (_, var) in node.inputs.iter().chain(node.outputs.iter()) {
                if seen.insert(*var) {
                    used.push(*var);
                }
            }
        }
        used.sort();

        let mut source = String::new();
        if stage == ShaderStage::Fragment {
            source.push_str("precision highp float;\n");
        }

        let mut header: Vec<String> = Vec::new();
        for index in &active {
            let kind = &self.nodes[index.0].kind;
            for line in kind.defines() {
                if !header.contains(&line) {
                    header.push(line);
                }
            }
        }
        for index in &active {
            for include in self.nodes[index.0].kind.includes() {
                let line = format!("#pragma include \"{include}\"");
                if !header.contains(&line) {
                    header.push(line);
                }
            }
        }
        for line in header {
            let _ = writeln!(source, "{line}");
        }
        source.push('\n');

        for kind in [VarKind::Attribute, VarKind::Uniform, VarKind::Sampler, VarKind::Varying] {
            let qualifier = match kind {
                VarKind::Attribute => "attribute",
                VarKind::Varying => "varying",
                _ => "uniform",
            };
            for var in used.iter().map(|id| self.variable(*id)).filter(|var| var.kind == kind) {
                let _ = writeln!(source, "{qualifier} {} {};", var.ty, var.name);
            }
        }

        source.push_str("\nvoid main() {\n");
        for var in used.iter().map(|id| self.variable(*id)) {
            match (var.kind, &var.value) {
                (VarKind::Local | VarKind::Constant, Some(value)) => {
                    let _ = writeln!(source, "    {} {} = {};", var.ty, var.name, value);
                }
                (VarKind::Local | VarKind::Constant, None) => {
                    let _ = writeln!(source, "    {} {};", var.ty, var.name);
                }
                _ => {}
            }
        }
        for index in &active {
            let node = &self.nodes[index.0];
            if let Some(comment) = &node.comment {
                let _ = writeln!(source, "    // {comment}");
            }
            for line in self.node_code(node).lines().filter(|line| !line.trim().is_empty()) {
                let _ = writeln!(source, "    {}", line.trim());
            }
        }
        source.push_str("}\n");
        source
    }

    fn node_code(&self, node: &ShaderNode) -> String {
        let Some(out) = node.first_output() else {
            return match &node.kind {
                ShaderNodeKind::InlineCode(code) => self.substitute(code, node),
                _ => String::new(),
            };
        };
        let out_var = self.variable(out);
        let out_name = out_var.name.as_str();
        let args = || -> Vec<String> { node.inputs.iter().map(|(_, var)| self.variable(*var).name.clone()).collect() };

        match &node.kind {
            ShaderNodeKind::SetFromNode => match node.inputs.first() {
                Some((_, var)) => format!("{out_name} = {};", self.cast(*var, out_var.ty)),
                None => String::new(),
            },
            ShaderNodeKind::InlineCode(code) => self.substitute(code, node),
            ShaderNodeKind::Add | ShaderNodeKind::Mult => {
                let operator = if node.kind == ShaderNodeKind::Add { " + " } else { " * " };
                let terms: Vec<String> = node.inputs.iter().map(|(_, var)| self.cast(*var, out_var.ty)).collect();
                format!("{out_name} = {};", terms.join(operator))
            }
            ShaderNodeKind::Normalize | ShaderNodeKind::FrontNormal => {
                let Some((_, var)) = node.inputs.first() else {
                    return String::new();
                };
                let input = self.cast(*var, out_var.ty);
                if node.kind == ShaderNodeKind::Normalize {
                    format!("{out_name} = normalize({input});")
                } else {
                    format!("{out_name} = gl_FrontFacing ? {input} : -{input};")
                }
            }
            ShaderNodeKind::PreMultAlpha => match (node.input_var("color"), node.input_var("alpha")) {
                (Some(color), Some(alpha)) => {
                    let color = self.cast(color, VarType::Vec3);
                    let alpha = self.cast(alpha, VarType::Float);
                    if out_var.ty == VarType::Vec4 {
                        format!("{out_name} = vec4({color} * {alpha}, {alpha});")
                    } else {
                        format!("{out_name} = {color} * {alpha};")
                    }
                }
                _ => String::new(),
            },
            ShaderNodeKind::SetAlpha => match (node.input_var("color"), node.input_var("alpha")) {
                (Some(color), Some(alpha)) => format!(
                    "{out_name} = vec4({}, {});",
                    self.cast(color, VarType::Vec3),
                    self.cast(alpha, VarType::Float)
                ),
                _ => String::new(),
            },
            ShaderNodeKind::LinearTosRgb => match node.input_var("color") {
                Some(color) => format!("{out_name} = linearTosRGB({}, vec3(2.2));", self.cast(color, VarType::Vec3)),
                None => String::new(),
            },
            ShaderNodeKind::TextureRgba => match (node.input_var("sampler"), node.input_var("uv")) {
                (Some(sampler), Some(uv)) => format!(
                    "{out_name} = texture2D({}, {});",
                    self.variable(sampler).name,
                    self.cast(uv, VarType::Vec2)
                ),
                _ => String::new(),
            },
            ShaderNodeKind::Light(kind) => {
                let mut call_args = args();
                call_args.extend(node.outputs.iter().skip(1).map(|(_, var)| self.variable(*var).name.clone()));
                format!("{out_name} = compute{}Shading({});", kind.node_name(), call_args.join(", "))
            }
            ShaderNodeKind::ShadowReceive { .. } => {
                format!("{out_name} = computeShadow({});", args().join(", "))
            }
            ShaderNodeKind::ShadowCast { .. } => {
                format!("{out_name} = computeShadowDepth({});", args().join(", "))
            }
            ShaderNodeKind::Define { .. } => String::new(),
        }
    }

    /// Replace `%key` markers, longest keys first so `%alpha` never eats
    /// the prefix of `%alphaTest`.
    fn substitute(&self, code: &str, node: &ShaderNode) -> String {
        let mut bindings: Vec<(&str, VarId)> = node
            .inputs
            .iter()
            .chain(node.outputs.iter())
            .map(|(key, var)| (key.as_str(), *var))
            .collect();
        bindings.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let mut text = code.to_string();
        for (key, var) in bindings {
            text = text.replace(&format!("%{key}"), &self.variable(var).name);
        }
        text
    }

    /// Expression reading `var` as a value of type `to`.
    fn cast(&self, var: VarId, to: VarType) -> String {
        let variable = self.variable(var);
        self.literal_cast(&variable.name, variable.ty, to)
    }

    fn literal_cast(&self, expr: &str, from: VarType, to: VarType) -> String {
        if from == to {
            return expr.to_string();
        }
        let (from_n, to_n) = (from.components(), to.components());
        if from_n == 0 || to_n == 0 {
            return expr.to_string();
        }
        if from_n == 1 {
            return format!("{to}({expr})");
        }
        if to_n < from_n {
            return format!("{expr}.{}", &"xyzw"[..to_n]);
        }
        let padding = vec!["1.0"; to_n - from_n].join(", ");
        format!("{to}({expr}, {padding})")
    }
}
