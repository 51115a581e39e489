use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::Backend;
use crate::compile::{FragmentSource, VERTEX_SHADER_GLSL};
use crate::error::{LoadError, ShaderError};
use crate::runtime::{ClockState, FrameClock};
use crate::uniforms::UniformTable;

/// A linked program and the uniform table resolved against it.
///
/// The two are only ever created and replaced together.
pub struct ActiveProgram<P> {
    handle: P,
    uniforms: UniformTable,
}

impl<P> ActiveProgram<P> {
    /// Compiles `fragment` and resolves its uniform table. The assembled
    /// source is consumed and released once the program exists.
    pub fn build<B>(backend: &mut B, fragment: FragmentSource) -> Result<Self, ShaderError>
    where
        B: Backend<Program = P>,
    {
        let handle = backend.compile_program(VERTEX_SHADER_GLSL, fragment.as_str())?;
        drop(fragment);
        let uniforms = UniformTable::resolve(&*backend, &handle);
        debug!(uniforms = ?uniforms.present_names(), "resolved uniform table");
        Ok(Self { handle, uniforms })
    }

    /// Reads, assembles and builds the program at `path`.
    pub fn load<B>(backend: &mut B, path: &Path) -> Result<Self, LoadError>
    where
        B: Backend<Program = P>,
    {
        let fragment = FragmentSource::read(path)?;
        Ok(Self::build(backend, fragment)?)
    }

    pub fn handle(&self) -> &P {
        &self.handle
    }

    pub fn uniforms(&self) -> &UniformTable {
        &self.uniforms
    }
}

/// Everything the render loop mutates per frame, owned by the render thread.
pub struct RunnerState<P> {
    source_path: PathBuf,
    active: ActiveProgram<P>,
    clock: FrameClock,
}

impl<P> RunnerState<P> {
    pub fn new(source_path: PathBuf, active: ActiveProgram<P>, clock: FrameClock) -> Self {
        Self {
            source_path,
            active,
            clock,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn active(&self) -> &ActiveProgram<P> {
        &self.active
    }

    pub fn clock(&self) -> ClockState {
        self.clock.state()
    }

    pub(crate) fn clock_mut(&mut self) -> &mut FrameClock {
        &mut self.clock
    }

    /// Installs a program that already linked, then restarts the clock. The
    /// previous program is released only after the new pair is in place.
    pub fn swap(&mut self, next: ActiveProgram<P>) {
        let previous = std::mem::replace(&mut self.active, next);
        self.clock.reset();
        drop(previous);
    }
}
