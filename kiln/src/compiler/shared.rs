use crate::cache::BlobCache;
use crate::compiler::notifier::CompletionNotifier;
use crate::compiler::stats::StatCounters;
use crate::compiler::token::{CompiledProgram, Phase, StageHandles, TokenState};
use crate::driver::{GraphicsDriver, ProgramHandle};
use kiln_utils::debug_panic;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// State every compile job needs, shared between the compiler and its schedulers.
pub(crate) struct CompilerShared {
    pub driver: Arc<dyn GraphicsDriver>,
    pub cache: Option<Arc<dyn BlobCache>>,
    pub notifier: CompletionNotifier,
    pub stats: StatCounters,
}

impl CompilerShared {
    /// Issues every stage compile and sets up the program object. Never looks at compile status.
    fn begin(&self, token: &TokenState) -> CompiledProgram {
        let mut stages = StageHandles::new();
        for (stage, source) in &token.sources {
            stages.push((*stage, self.driver.create_stage(*stage, source)));
        }

        let program = self.driver.create_program();
        for (_, stage) in &stages {
            self.driver.attach_stage(program, *stage);
        }
        for attribute in &token.attributes {
            self.driver.bind_attribute(program, &attribute.name, attribute.slot);
        }

        token.set_phase(Phase::Compiling);
        trace!("[Program Compiler] Issued {} stage(s) of {:?}", stages.len(), token.name);

        CompiledProgram {
            program,
            stages,
            from_cache: false,
        }
    }

    fn link(&self, token: &TokenState, compiled: &CompiledProgram) {
        self.driver.link(compiled.program);
        token.set_phase(Phase::LinkPending);
    }

    fn resolve(&self, token: &TokenState, compiled: CompiledProgram) {
        if let Err(compiled) = token.result.try_set(compiled) {
            debug_panic!("Program {:?} resolved twice", token.name);
            self.release_program(&compiled);
            return;
        }

        token.set_phase(Phase::Resolved);
        token.release_completion(&self.notifier);
    }

    /// Stores the linked binary of a resolved token. Failures only cost a future recompile.
    fn insert_into_cache(&self, token: &TokenState) {
        if token.key.is_empty() || token.is_canceled() {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };
        let Some(compiled) = token.result.try_get() else {
            return;
        };
        let Some(binary) = self.driver.program_binary(compiled.program) else {
            trace!("[Program Compiler] No binary for {:?}, not caching it", token.name);
            return;
        };

        match cache.put(&token.key, &binary) {
            Ok(()) => {
                self.stats.record_cache_insert();
                trace!("[Program Compiler] Cached {:?} as {}", token.name, token.key);
            }
            Err(e) => warn!("[Program Compiler] Failed to cache program {:?}: {e}", token.name),
        }
    }

    fn complete(&self, token: &TokenState, compiled: CompiledProgram) {
        self.resolve(token, compiled);
        self.insert_into_cache(token);
    }

    /// Compiles and links in one go. Used on worker threads and for inline execution.
    fn compile_blocking(&self, token: &TokenState) {
        if token.is_canceled() {
            return;
        }

        self.stats.record_compile();
        let compiled = self.begin(token);
        self.link(token, &compiled);
        self.complete(token, compiled);
    }

    /// Advances a cooperative compile by one phase. Returns `true` once there's nothing left to do.
    fn cooperative_step(&self, token: &TokenState) -> bool {
        if token.is_canceled() {
            return true;
        }

        match token.phase() {
            Phase::Pending => {
                self.stats.record_compile();
                let compiled = self.begin(token);

                if !self.driver.capabilities().nonblocking_query {
                    self.link(token, &compiled);
                    self.complete(token, compiled);
                    return true;
                }

                *token.artifacts.lock() = Some(compiled);
                false
            }
            Phase::Compiling => {
                let artifacts = token.artifacts.lock();
                let Some(compiled) = artifacts.as_ref() else {
                    debug_panic!("Cooperative compile of {:?} lost its stages", token.name);
                    return true;
                };

                let compiled_all = compiled
                    .stages
                    .iter()
                    .all(|(_, stage)| self.driver.stage_compile_done(*stage));
                if compiled_all {
                    self.link(token, compiled);
                }
                false
            }
            Phase::LinkPending => {
                let compiled = {
                    let mut artifacts = token.artifacts.lock();
                    let linked = artifacts
                        .as_ref()
                        .map(|compiled| self.driver.link_done(compiled.program));
                    if linked == Some(false) {
                        return false;
                    }
                    artifacts.take()
                };

                match compiled {
                    Some(compiled) => self.complete(token, compiled),
                    None => debug_panic!("Cooperative link of {:?} lost its program", token.name),
                }
                true
            }
            Phase::Resolved => true,
        }
    }

    /// Looks at the link status of a resolved token for the first time.
    ///
    /// A linked program loses its stage objects and is handed out. A failed one gets every
    /// diagnostic logged and is released completely.
    pub fn finish(&self, token: &TokenState) -> Option<ProgramHandle> {
        let compiled = token.result.try_get()?;
        let program = compiled.program;

        if self.driver.program_linked(program) {
            for (_, stage) in &compiled.stages {
                self.driver.detach_stage(program, *stage);
                self.driver.destroy_stage(*stage);
            }
            debug!(
                "[Program Compiler] Program {:?} ready as {program}{}",
                token.name,
                if compiled.from_cache { " (cached)" } else { "" }
            );
            return Some(program);
        }

        error!(
            "[Program Compiler] Failed to link program {:?}: {}",
            token.name,
            self.driver.program_log(program)
        );
        for (stage, handle) in &compiled.stages {
            if self.driver.stage_compiled(*handle) {
                continue;
            }

            error!(
                "[Program Compiler] {stage} stage of program {:?} failed to compile:\n{}",
                token.name,
                self.driver.stage_log(*handle)
            );

            #[cfg(debug_assertions)]
            if let Some(source) = token.source_of(*stage) {
                error!(
                    "[Program Compiler] {stage} stage source of {:?}:\n{}",
                    token.name,
                    kiln_utils::annotate_source(source)
                );
            }
        }

        self.stats.record_failure();
        self.release_program(compiled);
        None
    }

    /// Stages go first, each detached before it's deleted.
    pub fn release_program(&self, compiled: &CompiledProgram) {
        for (_, stage) in &compiled.stages {
            self.driver.detach_stage(compiled.program, *stage);
            self.driver.destroy_stage(*stage);
        }
        self.driver.destroy_program(compiled.program);
    }
}

/// The scheduled half of a token.
///
/// However a task ends (run to completion, discarded on shutdown, canceled before it started or
/// unwound by a panic) dropping it releases leftover driver objects and retires the token. A token
/// that was canceled while its job ran gets its result released here, on the job's thread.
pub(crate) struct CompileTask {
    shared: Arc<CompilerShared>,
    token: Arc<TokenState>,
}

impl CompileTask {
    pub fn new(shared: Arc<CompilerShared>, token: Arc<TokenState>) -> Self {
        Self { shared, token }
    }

    pub fn run_blocking(self) {
        self.shared.compile_blocking(&self.token);
    }

    pub fn step(&mut self) -> bool {
        self.shared.cooperative_step(&self.token)
    }
}

impl Drop for CompileTask {
    fn drop(&mut self) {
        let leftover = self.token.artifacts.lock().take();
        if let Some(compiled) = leftover {
            trace!("[Program Compiler] Releasing unfinished program {:?}", self.token.name);
            self.shared.release_program(&compiled);
        }

        self.token.release_completion(&self.shared.notifier);

        if self.token.retire()
            && let Some(compiled) = self.token.result.try_get()
        {
            trace!("[Program Compiler] Releasing canceled program {:?}", self.token.name);
            self.shared.release_program(compiled);
        }
    }
}
