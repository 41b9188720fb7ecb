//! The graphics driver capability the compiler runs on top of.
//!
//! The compiler never assumes a specific native API: everything it needs from the driver goes
//! through [`GraphicsDriver`]. Every create call always hands out a handle, even for broken
//! sources, so scheduling never has to branch on failure. Status is only asked for once the
//! program is consumed.

mod naga_driver;

pub use self::naga_driver::{NagaDriver, ShaderValidError, validate_wgsl_source};

use crate::program::ShaderStage;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StageHandle(NonZeroU32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProgramHandle(NonZeroU32);

impl StageHandle {
    pub const fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

impl ProgramHandle {
    pub const fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

impl Display for StageHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Display for ProgramHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque driver-specific image of a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinary(Vec<u8>);

impl ProgramBinary {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DriverCaps {
    /// Compiles may run on several contexts at once without the driver serializing them.
    pub overlapped_compile: bool,
    /// [`GraphicsDriver::stage_compile_done`] and [`GraphicsDriver::link_done`] can be polled
    /// without blocking.
    pub nonblocking_query: bool,
}

pub trait GraphicsDriver: Send + Sync + 'static {
    fn capabilities(&self) -> DriverCaps;

    /// Issues the compile of one stage. Always returns a handle.
    fn create_stage(&self, stage: ShaderStage, source: &str) -> StageHandle;
    fn stage_compile_done(&self, stage: StageHandle) -> bool;
    fn stage_compiled(&self, stage: StageHandle) -> bool;
    fn stage_log(&self, stage: StageHandle) -> String;
    fn destroy_stage(&self, stage: StageHandle);

    fn create_program(&self) -> ProgramHandle;
    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle);
    fn detach_stage(&self, program: ProgramHandle, stage: StageHandle);
    fn bind_attribute(&self, program: ProgramHandle, name: &str, slot: u32);
    fn link(&self, program: ProgramHandle);
    fn link_done(&self, program: ProgramHandle) -> bool;
    fn program_linked(&self, program: ProgramHandle) -> bool;
    fn program_log(&self, program: ProgramHandle) -> String;
    fn destroy_program(&self, program: ProgramHandle);

    /// `None` when the program isn't linked or the driver can't export it.
    fn program_binary(&self, program: ProgramHandle) -> Option<ProgramBinary>;
    /// `None` when the driver rejects the binary.
    fn load_program_binary(&self, binary: &ProgramBinary) -> Option<ProgramHandle>;
}
