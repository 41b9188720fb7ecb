//! In-process WGSL driver built on `naga`.
//!
//! A stage "compile" parses and validates the WGSL source, a "link" checks that the attached
//! stages fit together. Both finish synchronously, so completion polls always succeed. The
//! exported program binary is a JSON image of the linked sources which is validated again when
//! loaded.

use crate::driver::{DriverCaps, GraphicsDriver, ProgramBinary, ProgramHandle, StageHandle};
use crate::program::ShaderStage;
use ::naga::front::wgsl::{self, ParseError};
use ::naga::valid::{Capabilities, ModuleInfo, ValidationError, ValidationFlags, Validator};
use ::naga::{Module, WithSpan};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{trace, warn};

const BINARY_VERSION: u32 = 1;

#[derive(Debug)]
pub enum ShaderValidError {
    Parse(ParseError),
    Validation(WithSpan<ValidationError>),
}

impl ShaderValidError {
    pub fn emit_to_string(&self, source: &str) -> String {
        match self {
            ShaderValidError::Parse(e) => e.emit_to_string(source),
            ShaderValidError::Validation(e) => e.emit_to_string(source),
        }
    }
}

pub fn validate_wgsl_source(source: &str) -> Result<(Module, ModuleInfo), ShaderValidError> {
    let module = wgsl::parse_str(source).map_err(ShaderValidError::Parse)?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .map_err(ShaderValidError::Validation)?;
    Ok((module, info))
}

#[derive(Debug, Clone)]
enum StageStatus {
    Compiled {
        entry_points: SmallVec<[ShaderStage; 2]>,
    },
    Failed {
        log: String,
    },
}

impl StageStatus {
    fn compile(source: &str) -> Self {
        match validate_wgsl_source(source) {
            Ok((module, _)) => StageStatus::Compiled {
                entry_points: entry_stages(&module),
            },
            Err(e) => StageStatus::Failed {
                log: e.emit_to_string(source),
            },
        }
    }
}

fn entry_stages(module: &Module) -> SmallVec<[ShaderStage; 2]> {
    module
        .entry_points
        .iter()
        .filter_map(|entry| match entry.stage {
            ::naga::ShaderStage::Vertex => Some(ShaderStage::Vertex),
            ::naga::ShaderStage::Fragment => Some(ShaderStage::Fragment),
            ::naga::ShaderStage::Compute => Some(ShaderStage::Compute),
            _ => None,
        })
        .collect()
}

#[derive(Debug)]
struct StageRecord {
    stage: ShaderStage,
    source: String,
    status: StageStatus,
    attachments: u32,
}

#[derive(Debug)]
enum LinkStatus {
    Unlinked,
    Linked(BinaryImage),
    Failed(String),
}

#[derive(Debug)]
struct ProgramRecord {
    stages: SmallVec<[StageHandle; 2]>,
    attributes: Vec<(String, u32)>,
    status: LinkStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryImage {
    version: u32,
    stages: Vec<BinaryStage>,
    attributes: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryStage {
    stage: ShaderStage,
    source: String,
}

fn check_link(stages: &[(ShaderStage, StageStatus)], attributes: &[(String, u32)]) -> Result<(), String> {
    if stages.is_empty() {
        return Err("no shader stages attached".to_string());
    }

    let mut seen = [false; ShaderStage::COUNT];
    for (stage, status) in stages {
        if std::mem::replace(&mut seen[stage.index()], true) {
            return Err(format!("{stage} stage attached more than once"));
        }

        match status {
            StageStatus::Failed { .. } => {
                return Err(format!("{stage} stage did not compile"));
            }
            StageStatus::Compiled { entry_points } if !entry_points.contains(stage) => {
                return Err(format!(
                    "{stage} stage declares no @{} entry point",
                    stage.name().to_lowercase()
                ));
            }
            StageStatus::Compiled { .. } => {}
        }
    }

    let compute = seen[ShaderStage::Compute.index()];
    let graphics = seen[ShaderStage::Vertex.index()] || seen[ShaderStage::Fragment.index()];
    if compute && graphics {
        return Err("compute stage cannot be linked together with graphics stages".to_string());
    }
    if !compute && !seen[ShaderStage::Vertex.index()] {
        return Err("graphics program has no vertex stage".to_string());
    }

    for (i, (name, slot)) in attributes.iter().enumerate() {
        if let Some((other, _)) = attributes[..i].iter().find(|(_, s)| s == slot) {
            return Err(format!(
                "attributes `{other}` and `{name}` are both bound to slot {slot}"
            ));
        }
    }

    Ok(())
}

pub struct NagaDriver {
    caps: DriverCaps,
    next_id: AtomicU32,
    stages: DashMap<u32, StageRecord>,
    programs: DashMap<u32, ProgramRecord>,
}

impl Default for NagaDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NagaDriver {
    pub fn new() -> Self {
        Self::with_capabilities(DriverCaps {
            overlapped_compile: true,
            nonblocking_query: true,
        })
    }

    pub fn with_capabilities(caps: DriverCaps) -> Self {
        Self {
            caps,
            next_id: AtomicU32::new(1),
            stages: DashMap::new(),
            programs: DashMap::new(),
        }
    }

    /// Number of stage objects that have not been destroyed yet.
    pub fn live_stages(&self) -> usize {
        self.stages.len()
    }

    /// Number of program objects that have not been destroyed yet.
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn next_raw(&self) -> NonZeroU32 {
        loop {
            if let Some(raw) = NonZeroU32::new(self.next_id.fetch_add(1, Ordering::Relaxed)) {
                return raw;
            }
        }
    }

    fn stage_statuses(&self, record: &ProgramRecord) -> (Vec<(ShaderStage, StageStatus)>, Vec<BinaryStage>) {
        let mut statuses = Vec::with_capacity(record.stages.len());
        let mut sources = Vec::with_capacity(record.stages.len());

        for handle in &record.stages {
            let Some(stage) = self.stages.get(&handle.raw()) else {
                warn!("[Naga Driver] Attached stage {handle} no longer exists");
                continue;
            };
            statuses.push((stage.stage, stage.status.clone()));
            sources.push(BinaryStage {
                stage: stage.stage,
                source: stage.source.clone(),
            });
        }

        (statuses, sources)
    }
}

impl GraphicsDriver for NagaDriver {
    fn capabilities(&self) -> DriverCaps {
        self.caps
    }

    fn create_stage(&self, stage: ShaderStage, source: &str) -> StageHandle {
        let handle = StageHandle::new(self.next_raw());
        let status = StageStatus::compile(source);

        trace!("[Naga Driver] Created {stage} stage {handle}");

        self.stages.insert(
            handle.raw(),
            StageRecord {
                stage,
                source: source.to_string(),
                status,
                attachments: 0,
            },
        );

        handle
    }

    fn stage_compile_done(&self, _stage: StageHandle) -> bool {
        true
    }

    fn stage_compiled(&self, stage: StageHandle) -> bool {
        self.stages
            .get(&stage.raw())
            .is_some_and(|record| matches!(record.status, StageStatus::Compiled { .. }))
    }

    fn stage_log(&self, stage: StageHandle) -> String {
        match self.stages.get(&stage.raw()) {
            Some(record) => match &record.status {
                StageStatus::Failed { log } => log.clone(),
                StageStatus::Compiled { .. } => String::new(),
            },
            None => format!("invalid stage handle {stage}"),
        }
    }

    fn destroy_stage(&self, stage: StageHandle) {
        match self.stages.remove(&stage.raw()) {
            Some((_, record)) if record.attachments > 0 => {
                warn!(
                    "[Naga Driver] {} stage {stage} destroyed while still attached to {} program(s)",
                    record.stage, record.attachments
                );
            }
            Some(_) => {}
            None => warn!("[Naga Driver] Invalid Reference: stage {stage} not found"),
        }
    }

    fn create_program(&self) -> ProgramHandle {
        let handle = ProgramHandle::new(self.next_raw());
        self.programs.insert(
            handle.raw(),
            ProgramRecord {
                stages: SmallVec::new(),
                attributes: Vec::new(),
                status: LinkStatus::Unlinked,
            },
        );

        trace!("[Naga Driver] Created program {handle}");

        handle
    }

    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle) {
        let Some(mut record) = self.programs.get_mut(&program.raw()) else {
            warn!("[Naga Driver] Invalid Reference: program {program} not found");
            return;
        };
        let Some(mut stage_record) = self.stages.get_mut(&stage.raw()) else {
            warn!("[Naga Driver] Invalid Reference: stage {stage} not found");
            return;
        };

        stage_record.attachments += 1;
        record.stages.push(stage);
    }

    fn detach_stage(&self, program: ProgramHandle, stage: StageHandle) {
        let Some(mut record) = self.programs.get_mut(&program.raw()) else {
            warn!("[Naga Driver] Invalid Reference: program {program} not found");
            return;
        };
        let Some(index) = record.stages.iter().position(|s| *s == stage) else {
            warn!("[Naga Driver] Stage {stage} is not attached to program {program}");
            return;
        };

        record.stages.remove(index);
        if let Some(mut stage_record) = self.stages.get_mut(&stage.raw()) {
            stage_record.attachments = stage_record.attachments.saturating_sub(1);
        }
    }

    fn bind_attribute(&self, program: ProgramHandle, name: &str, slot: u32) {
        let Some(mut record) = self.programs.get_mut(&program.raw()) else {
            warn!("[Naga Driver] Invalid Reference: program {program} not found");
            return;
        };

        match record.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(binding) => binding.1 = slot,
            None => record.attributes.push((name.to_string(), slot)),
        }
    }

    fn link(&self, program: ProgramHandle) {
        let Some(mut record) = self.programs.get_mut(&program.raw()) else {
            warn!("[Naga Driver] Invalid Reference: program {program} not found");
            return;
        };

        let (statuses, sources) = self.stage_statuses(&record);
        record.status = match check_link(&statuses, &record.attributes) {
            Ok(()) => LinkStatus::Linked(BinaryImage {
                version: BINARY_VERSION,
                stages: sources,
                attributes: record.attributes.clone(),
            }),
            Err(log) => LinkStatus::Failed(log),
        };

        trace!("[Naga Driver] Linked program {program}");
    }

    fn link_done(&self, _program: ProgramHandle) -> bool {
        true
    }

    fn program_linked(&self, program: ProgramHandle) -> bool {
        self.programs
            .get(&program.raw())
            .is_some_and(|record| matches!(record.status, LinkStatus::Linked(_)))
    }

    fn program_log(&self, program: ProgramHandle) -> String {
        match self.programs.get(&program.raw()) {
            Some(record) => match &record.status {
                LinkStatus::Unlinked => "program was never linked".to_string(),
                LinkStatus::Linked(_) => String::new(),
                LinkStatus::Failed(log) => log.clone(),
            },
            None => format!("invalid program handle {program}"),
        }
    }

    fn destroy_program(&self, program: ProgramHandle) {
        let Some((_, record)) = self.programs.remove(&program.raw()) else {
            warn!("[Naga Driver] Invalid Reference: program {program} not found");
            return;
        };

        for stage in record.stages {
            if let Some(mut stage_record) = self.stages.get_mut(&stage.raw()) {
                stage_record.attachments = stage_record.attachments.saturating_sub(1);
            }
        }
    }

    fn program_binary(&self, program: ProgramHandle) -> Option<ProgramBinary> {
        let record = self.programs.get(&program.raw())?;
        let LinkStatus::Linked(image) = &record.status else {
            return None;
        };

        match serde_json::to_vec(image) {
            Ok(bytes) => Some(ProgramBinary::new(bytes)),
            Err(e) => {
                warn!("[Naga Driver] Failed to export program {program}: {e}");
                None
            }
        }
    }

    fn load_program_binary(&self, binary: &ProgramBinary) -> Option<ProgramHandle> {
        let image: BinaryImage = match serde_json::from_slice(binary.as_bytes()) {
            Ok(image) => image,
            Err(e) => {
                warn!("[Naga Driver] Rejected corrupt program binary: {e}");
                return None;
            }
        };

        if image.version != BINARY_VERSION {
            trace!(
                "[Naga Driver] Rejected program binary of version {} (expected {BINARY_VERSION})",
                image.version
            );
            return None;
        }

        let statuses: Vec<_> = image
            .stages
            .iter()
            .map(|stage| (stage.stage, StageStatus::compile(&stage.source)))
            .collect();

        if let Err(log) = check_link(&statuses, &image.attributes) {
            warn!("[Naga Driver] Rejected program binary: {log}");
            return None;
        }

        let handle = ProgramHandle::new(self.next_raw());
        self.programs.insert(
            handle.raw(),
            ProgramRecord {
                stages: SmallVec::new(),
                attributes: image.attributes.clone(),
                status: LinkStatus::Linked(image),
            },
        );

        trace!("[Naga Driver] Loaded program {handle} from binary");

        Some(handle)
    }
}
