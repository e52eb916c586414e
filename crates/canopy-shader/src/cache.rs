//! Compiled program sources keyed by the shader hash of their state.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::compiler::{ProgramSource, ShaderCompiler, ShaderError};
use crate::state::ShaderState;
use crate::uniforms::UniformLayoutRegistry;

/// Owns the uniform layout registry and the programs built with it. The
/// oldest program is dropped once `capacity` is exceeded.
#[derive(Debug)]
pub struct ShaderVariantCache {
    registry: UniformLayoutRegistry,
    programs: FxHashMap<u64, Arc<ProgramSource>>,
    insertion_order: VecDeque<u64>,
    capacity: usize,
    fragment_shader_name: Option<String>,
    hits: u64,
    misses: u64,
}

impl ShaderVariantCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: UniformLayoutRegistry::new(),
            programs: FxHashMap::default(),
            insertion_order: VecDeque::new(),
            capacity: capacity.max(1),
            fragment_shader_name: None,
            hits: 0,
            misses: 0,
        }
    }

    pub fn with_fragment_shader_name(mut self, name: impl Into<String>) -> Self {
        self.fragment_shader_name = Some(name.into());
        self
    }

    /// Program for `state`, compiled on first request.
    pub fn get_or_compile(&mut self, state: &ShaderState) -> Result<Arc<ProgramSource>, ShaderError> {
        let key = state.shader_hash();
        if let Some(program) = self.programs.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(program));
        }
        self.misses += 1;

        let mut compiler = ShaderCompiler::new(state, &mut self.registry);
        if let Some(name) = &self.fragment_shader_name {
            compiler = compiler.with_fragment_shader_name(name.clone());
        }
        let program = Arc::new(compiler.compile_program()?);
        info!(
            "Compiled shader variant {:016x} ({} fragment bytes, {} vertex bytes)",
            key,
            program.fragment.len(),
            program.vertex.len()
        );

        self.programs.insert(key, Arc::clone(&program));
        self.insertion_order.push_back(key);
        while self.programs.len() > self.capacity {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.programs.remove(&oldest);
            debug!("Evicted shader variant {:016x}", oldest);
        }
        Ok(program)
    }

    pub fn get(&self, state: &ShaderState) -> Option<Arc<ProgramSource>> {
        self.programs.get(&state.shader_hash()).cloned()
    }

    pub fn registry(&self) -> &UniformLayoutRegistry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.programs.clear();
        self.insertion_order.clear();
    }
}
