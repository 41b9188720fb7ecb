#![allow(dead_code)]

use kiln::driver::{DriverCaps, GraphicsDriver, NagaDriver, ProgramBinary, ProgramHandle, StageHandle};
use kiln::{ProgramDescription, ShaderStage, StageSources};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

pub const VERTEX: &str = "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";
pub const FRAGMENT: &str = "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
pub const BROKEN_FRAGMENT: &str = "@fragment fn fs_main() -> @location(0) vec4<f32> { return 1.0; }";

/// Stage sources containing this marker block in `create_stage` until [`RecordingDriver::open_gate`].
pub const GATE: &str = "// gate";

/// Everything the compiler did to the driver, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateStage(StageHandle),
    CreateProgram(ProgramHandle),
    Attach(ProgramHandle, StageHandle),
    Detach(ProgramHandle, StageHandle),
    DestroyStage(StageHandle),
    DestroyProgram(ProgramHandle),
}

/// [`NagaDriver`] that records calls and can hold compiles back.
pub struct RecordingDriver {
    inner: NagaDriver,
    calls: Mutex<Vec<Call>>,
    /// First line of every stage source, in compile order.
    compiled_tags: Mutex<Vec<String>>,
    compile_threads: Mutex<Vec<ThreadId>>,
    programs_created: AtomicUsize,
    gate_open: Mutex<bool>,
    gate_changed: Condvar,
    gated: AtomicUsize,
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(DriverCaps {
            overlapped_compile: true,
            nonblocking_query: true,
        })
    }

    pub fn with_capabilities(caps: DriverCaps) -> Arc<Self> {
        Arc::new(Self {
            inner: NagaDriver::with_capabilities(caps),
            calls: Mutex::new(Vec::new()),
            compiled_tags: Mutex::new(Vec::new()),
            compile_threads: Mutex::new(Vec::new()),
            programs_created: AtomicUsize::new(0),
            gate_open: Mutex::new(false),
            gate_changed: Condvar::new(),
            gated: AtomicUsize::new(0),
        })
    }

    pub fn inner(&self) -> &NagaDriver {
        &self.inner
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn compiled_tags(&self) -> Vec<String> {
        self.compiled_tags.lock().clone()
    }

    pub fn compile_threads(&self) -> Vec<ThreadId> {
        self.compile_threads.lock().clone()
    }

    pub fn programs_created(&self) -> usize {
        self.programs_created.load(Ordering::SeqCst)
    }

    pub fn open_gate(&self) {
        *self.gate_open.lock() = true;
        self.gate_changed.notify_all();
    }

    /// Waits until a compile is parked at the gate.
    pub fn wait_for_gated(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.gated.load(Ordering::SeqCst) == 0 {
            if std::time::Instant::now() > deadline {
                return false;
            }
            std::thread::yield_now();
        }
        true
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl GraphicsDriver for RecordingDriver {
    fn capabilities(&self) -> DriverCaps {
        self.inner.capabilities()
    }

    fn create_stage(&self, stage: ShaderStage, source: &str) -> StageHandle {
        if source.contains(GATE) {
            self.gated.fetch_add(1, Ordering::SeqCst);
            let mut open = self.gate_open.lock();
            while !*open {
                self.gate_changed.wait(&mut open);
            }
        }

        let tag = source
            .lines()
            .find(|line| line.starts_with("// "))
            .unwrap_or_default()
            .to_string();
        self.compiled_tags.lock().push(tag);
        self.compile_threads.lock().push(std::thread::current().id());

        let handle = self.inner.create_stage(stage, source);
        self.record(Call::CreateStage(handle));
        handle
    }

    fn stage_compile_done(&self, stage: StageHandle) -> bool {
        self.inner.stage_compile_done(stage)
    }

    fn stage_compiled(&self, stage: StageHandle) -> bool {
        self.inner.stage_compiled(stage)
    }

    fn stage_log(&self, stage: StageHandle) -> String {
        self.inner.stage_log(stage)
    }

    fn destroy_stage(&self, stage: StageHandle) {
        self.record(Call::DestroyStage(stage));
        self.inner.destroy_stage(stage)
    }

    fn create_program(&self) -> ProgramHandle {
        self.programs_created.fetch_add(1, Ordering::SeqCst);
        let handle = self.inner.create_program();
        self.record(Call::CreateProgram(handle));
        handle
    }

    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle) {
        self.record(Call::Attach(program, stage));
        self.inner.attach_stage(program, stage)
    }

    fn detach_stage(&self, program: ProgramHandle, stage: StageHandle) {
        self.record(Call::Detach(program, stage));
        self.inner.detach_stage(program, stage)
    }

    fn bind_attribute(&self, program: ProgramHandle, name: &str, slot: u32) {
        self.inner.bind_attribute(program, name, slot)
    }

    fn link(&self, program: ProgramHandle) {
        self.inner.link(program)
    }

    fn link_done(&self, program: ProgramHandle) -> bool {
        self.inner.link_done(program)
    }

    fn program_linked(&self, program: ProgramHandle) -> bool {
        self.inner.program_linked(program)
    }

    fn program_log(&self, program: ProgramHandle) -> String {
        self.inner.program_log(program)
    }

    fn destroy_program(&self, program: ProgramHandle) {
        self.record(Call::DestroyProgram(program));
        self.inner.destroy_program(program)
    }

    fn program_binary(&self, program: ProgramHandle) -> Option<ProgramBinary> {
        self.inner.program_binary(program)
    }

    fn load_program_binary(&self, binary: &ProgramBinary) -> Option<ProgramHandle> {
        self.inner.load_program_binary(binary)
    }
}

/// A vertex + fragment program whose vertex source starts with `// <tag>`.
pub fn tagged(tag: &str) -> ProgramDescription {
    ProgramDescription::builder()
        .name(tag)
        .stages(
            StageSources::new()
                .vertex(format!("// {tag}\n{VERTEX}"))
                .fragment(FRAGMENT),
        )
        .build()
}

/// Like [`tagged`], but its compile blocks until the driver gate opens.
pub fn gated(tag: &str) -> ProgramDescription {
    ProgramDescription::builder()
        .name(tag)
        .stages(
            StageSources::new()
                .vertex(format!("// {tag}\n{GATE}\n{VERTEX}"))
                .fragment(FRAGMENT),
        )
        .build()
}

pub fn broken(name: &str) -> ProgramDescription {
    ProgramDescription::builder()
        .name(name)
        .stages(StageSources::new().vertex(VERTEX).fragment(BROKEN_FRAGMENT))
        .build()
}

/// Counts warnings and errors emitted while it is the default subscriber.
#[derive(Clone, Default)]
pub struct LevelCounter {
    warnings: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl LevelCounter {
    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for LevelCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::WARN => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            Level::ERROR => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}
