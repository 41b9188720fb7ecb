use bon::Builder;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const COUNT: usize = 3;
    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "Vertex",
            ShaderStage::Fragment => "Fragment",
            ShaderStage::Compute => "Compute",
        }
    }

    pub const fn is_graphics(self) -> bool {
        !matches!(self, ShaderStage::Compute)
    }
}

impl Display for ShaderStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling tier of a program.
///
/// Urgent programs are always picked before normal ones; inside a tier, programs are compiled in
/// submission order.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Priority {
    Urgent,
    #[default]
    Normal,
}

impl Priority {
    /// Lower ranks are scheduled first.
    #[inline]
    pub const fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::Normal => 1,
        }
    }
}

/// A typed compile-time constant value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SpecValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    /// Must be finite. Programs with a NaN or infinite constant are rejected on submit.
    Float(f32),
}

impl SpecValue {
    /// Whether [`wgsl_literal`](Self::wgsl_literal) yields valid WGSL for this value.
    pub fn is_expressible(&self) -> bool {
        match self {
            SpecValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }

    pub(crate) const fn tag(&self) -> u8 {
        match self {
            SpecValue::Bool(_) => 0,
            SpecValue::Int(_) => 1,
            SpecValue::UInt(_) => 2,
            SpecValue::Float(_) => 3,
        }
    }

    pub(crate) fn to_le_bytes(self) -> [u8; 4] {
        match self {
            SpecValue::Bool(v) => u32::from(v).to_le_bytes(),
            SpecValue::Int(v) => v.to_le_bytes(),
            SpecValue::UInt(v) => v.to_le_bytes(),
            SpecValue::Float(v) => v.to_bits().to_le_bytes(),
        }
    }

    pub fn wgsl_type(&self) -> &'static str {
        match self {
            SpecValue::Bool(_) => "bool",
            SpecValue::Int(_) => "i32",
            SpecValue::UInt(_) => "u32",
            SpecValue::Float(_) => "f32",
        }
    }

    pub fn wgsl_literal(&self) -> String {
        match self {
            SpecValue::Bool(v) => v.to_string(),
            SpecValue::Int(v) => format!("{v}i"),
            SpecValue::UInt(v) => format!("{v}u"),
            SpecValue::Float(v) => format!("{v:?}f"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpecConstant {
    pub id: u32,
    pub value: SpecValue,
}

impl SpecConstant {
    pub const fn new(id: u32, value: SpecValue) -> Self {
        Self { id, value }
    }
}

/// Binds a named vertex attribute to a fixed slot before linking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeBinding {
    pub name: String,
    pub slot: u32,
}

impl AttributeBinding {
    pub fn new<S: Into<String>>(name: S, slot: u32) -> Self {
        Self {
            name: name.into(),
            slot,
        }
    }
}

/// One source slot per [`ShaderStage`]. An empty slot means the stage is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSources {
    slots: [Option<String>; ShaderStage::COUNT],
}

impl StageSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, stage: ShaderStage, source: S) -> Self {
        self.set(stage, source);
        self
    }

    pub fn vertex<S: Into<String>>(self, source: S) -> Self {
        self.with(ShaderStage::Vertex, source)
    }

    pub fn fragment<S: Into<String>>(self, source: S) -> Self {
        self.with(ShaderStage::Fragment, source)
    }

    pub fn compute<S: Into<String>>(self, source: S) -> Self {
        self.with(ShaderStage::Compute, source)
    }

    pub fn set<S: Into<String>>(&mut self, stage: ShaderStage, source: S) {
        self.slots[stage.index()] = Some(source.into());
    }

    pub fn get(&self, stage: ShaderStage) -> Option<&str> {
        self.slots[stage.index()].as_deref()
    }

    /// Present stages in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (ShaderStage, &str)> {
        ShaderStage::ALL
            .into_iter()
            .filter_map(|stage| self.get(stage).map(|source| (stage, source)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything needed to build one program. Consumed by
/// [`ProgramCompiler::submit`](crate::ProgramCompiler::submit).
#[derive(Debug, Clone, Builder)]
pub struct ProgramDescription {
    /// Only used for diagnostics.
    #[builder(into)]
    pub name: String,
    /// Stable identity of the program. Programs without one are never cached.
    pub cache_id: Option<u64>,
    #[builder(default)]
    pub priority: Priority,
    #[builder(default)]
    pub stages: StageSources,
    #[builder(default)]
    pub constants: Vec<SpecConstant>,
    #[builder(default)]
    pub attributes: Vec<AttributeBinding>,
}
