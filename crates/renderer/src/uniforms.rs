//! Standard ShaderToy inputs and the per-program table of resolved slots.
//!
//! A [`UniformTable`] is always built from a freshly linked program and is
//! replaced wholesale whenever the program changes. Slots remember the program
//! generation that produced them, so a slot can never silently address a
//! destroyed program.

use crate::backend::Backend;

/// Number of semantic uniforms the preamble declares.
pub const UNIFORM_COUNT: usize = 6;

/// The fixed set of semantic uniform names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UniformName {
    Resolution,
    Time,
    TimeDelta,
    Frame,
    Pointer,
    KeyInput,
}

impl UniformName {
    pub const ALL: [UniformName; UNIFORM_COUNT] = [
        UniformName::Resolution,
        UniformName::Time,
        UniformName::TimeDelta,
        UniformName::Frame,
        UniformName::Pointer,
        UniformName::KeyInput,
    ];

    /// Name user shaders refer to.
    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformName::Resolution => "iResolution",
            UniformName::Time => "iTime",
            UniformName::TimeDelta => "iTimeDelta",
            UniformName::Frame => "iFrame",
            UniformName::Pointer => "iMouse",
            UniformName::KeyInput => "iKeyInput",
        }
    }

    /// Binding index inside bind group 0. Must match the preamble.
    pub fn binding(self) -> u32 {
        self.index() as u32
    }

    pub fn from_binding(binding: u32) -> Option<Self> {
        Self::ALL.get(binding as usize).copied()
    }

    fn index(self) -> usize {
        match self {
            UniformName::Resolution => 0,
            UniformName::Time => 1,
            UniformName::TimeDelta => 2,
            UniformName::Frame => 3,
            UniformName::Pointer => 4,
            UniformName::KeyInput => 5,
        }
    }
}

/// A value pushed into a uniform slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformValue {
    /// std140 image of the value, padded to a full 16-byte row.
    pub fn to_std140(self) -> [f32; 4] {
        match self {
            UniformValue::Float(x) => [x, 0.0, 0.0, 0.0],
            UniformValue::Vec3([x, y, z]) => [x, y, z, 0.0],
            UniformValue::Vec4(v) => v,
        }
    }
}

/// Resolved location of one uniform inside one specific program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformSlot {
    generation: u64,
    binding: u32,
}

impl UniformSlot {
    pub fn new(generation: u64, binding: u32) -> Self {
        Self {
            generation,
            binding,
        }
    }

    /// Generation of the program this slot was resolved against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }
}

/// Optional slot per semantic uniform, resolved against a single program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniformTable {
    slots: [Option<UniformSlot>; UNIFORM_COUNT],
}

impl UniformTable {
    /// Queries every semantic name on `program`. Missing uniforms are stored
    /// as absent; that is not an error.
    pub fn resolve<B: Backend>(backend: &B, program: &B::Program) -> Self {
        let mut table = Self::default();
        for name in UniformName::ALL {
            table.slots[name.index()] = backend.uniform_slot(program, name);
        }
        table
    }

    pub fn slot(&self, name: UniformName) -> Option<UniformSlot> {
        self.slots[name.index()]
    }

    pub fn is_present(&self, name: UniformName) -> bool {
        self.slot(name).is_some()
    }

    pub fn present_names(&self) -> Vec<UniformName> {
        UniformName::ALL
            .into_iter()
            .filter(|name| self.is_present(*name))
            .collect()
    }

    /// Pushes `value` if the program declares `name`; absent slots are skipped.
    pub fn write<B: Backend>(&self, backend: &mut B, name: UniformName, value: UniformValue) {
        if let Some(slot) = self.slot(name) {
            backend.set_uniform(slot, value);
        }
    }
}
