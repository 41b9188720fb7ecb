use crate::compiler::cell::ResultCell;
use crate::compiler::notifier::{CompletionHandle, CompletionNotifier};
use crate::driver::{ProgramHandle, StageHandle};
use crate::program::{AttributeBinding, CacheKey, Priority, ShaderStage};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tracing::warn;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide identity of a submitted program. Jobs are matched by it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl TokenId {
    pub fn next() -> Self {
        Self(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Display for TokenId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Pending = 0,
    Compiling = 1,
    LinkPending = 2,
    Resolved = 3,
}

impl Phase {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Pending,
            1 => Phase::Compiling,
            2 => Phase::LinkPending,
            _ => Phase::Resolved,
        }
    }
}

pub(crate) type StageHandles = SmallVec<[(ShaderStage, StageHandle); 2]>;

/// Driver objects backing one program. Stage handles are gone for programs loaded from a binary.
#[derive(Debug, Clone)]
pub(crate) struct CompiledProgram {
    pub program: ProgramHandle,
    pub stages: StageHandles,
    pub from_cache: bool,
}

pub(crate) struct TokenState {
    pub id: TokenId,
    pub name: String,
    pub key: CacheKey,
    pub priority: Priority,
    /// Specialized stage sources, kept for diagnostics.
    pub sources: SmallVec<[(ShaderStage, String); 2]>,
    pub attributes: Vec<AttributeBinding>,
    completion: Mutex<Option<CompletionHandle>>,
    phase: AtomicU8,
    canceled: AtomicBool,
    pub result: ResultCell<CompiledProgram>,
    /// Set once the job is completely done with the token, cache insert included.
    pub retired: ResultCell<()>,
    /// Driver objects of a cooperative compile that hasn't resolved yet.
    pub artifacts: Mutex<Option<CompiledProgram>>,
    /// Orders [`cancel`](Self::cancel) against [`retire`](Self::retire).
    handoff: Mutex<()>,
}

impl TokenState {
    pub fn new(
        name: String,
        key: CacheKey,
        priority: Priority,
        sources: SmallVec<[(ShaderStage, String); 2]>,
        attributes: Vec<AttributeBinding>,
        completion: Option<CompletionHandle>,
    ) -> Self {
        Self {
            id: TokenId::next(),
            name,
            key,
            priority,
            sources,
            attributes,
            completion: Mutex::new(completion),
            phase: AtomicU8::new(Phase::Pending as u8),
            canceled: AtomicBool::new(false),
            result: ResultCell::new(),
            retired: ResultCell::new(),
            artifacts: Mutex::new(None),
            handoff: Mutex::new(()),
        }
    }

    /// A token that never went through a scheduler.
    pub fn resolved(name: String, key: CacheKey, priority: Priority, program: CompiledProgram) -> Self {
        let state = Self::new(name, key, priority, SmallVec::new(), Vec::new(), None);
        state.phase.store(Phase::Resolved as u8, Ordering::Release);
        let _ = state.result.try_set(program);
        let _ = state.retired.try_set(());
        state
    }

    /// A token that was turned down on submit. It is ready right away but has no program.
    pub fn rejected(name: String, key: CacheKey, priority: Priority) -> Self {
        let state = Self::new(name, key, priority, SmallVec::new(), Vec::new(), None);
        state.phase.store(Phase::Resolved as u8, Ordering::Release);
        let _ = state.retired.try_set(());
        state
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Marks the token canceled.
    ///
    /// Returns `true` if its job already retired, in which case the caller releases the result.
    /// Otherwise the job does so when it retires.
    pub fn cancel(&self) -> bool {
        let _handoff = self.handoff.lock();
        self.canceled.store(true, Ordering::Release);
        self.retired.is_set()
    }

    /// Marks the job done with the token.
    ///
    /// Returns `true` if the token was canceled before, in which case the job releases the result.
    pub fn retire(&self) -> bool {
        let _handoff = self.handoff.lock();
        let _ = self.retired.try_set(());
        self.canceled.load(Ordering::Acquire)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Hands the completion handle back to the notifier. Only the first call does anything.
    pub fn release_completion(&self, notifier: &CompletionNotifier) {
        let handle = self.completion.lock().take();
        if let Some(handle) = handle {
            notifier.release(handle);
        }
    }

    pub fn source_of(&self, stage: ShaderStage) -> Option<&str> {
        self.sources
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, source)| source.as_str())
    }
}

/// Claim on a program that was handed to [`ProgramCompiler::submit`](crate::ProgramCompiler::submit).
///
/// Tokens are move-only and must be handed back through
/// [`get_result`](crate::ProgramCompiler::get_result) or
/// [`cancel`](crate::ProgramCompiler::cancel). Dropping one leaks whatever the driver created for it.
pub struct ProgramToken {
    pub(crate) state: Arc<TokenState>,
    user_data: Option<Box<dyn Any + Send + Sync>>,
    consumed: bool,
}

impl ProgramToken {
    pub(crate) fn new(state: Arc<TokenState>) -> Self {
        Self {
            state,
            user_data: None,
            consumed: false,
        }
    }

    pub fn id(&self) -> TokenId {
        self.state.id
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn key(&self) -> &CacheKey {
        &self.state.key
    }

    pub fn priority(&self) -> Priority {
        self.state.priority
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Whether the outcome is known. Consuming a ready token never waits on a compile.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state.phase() == Phase::Resolved
    }

    pub fn set_user_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_deref()?.downcast_ref()
    }

    pub fn take_user_data<T: Any + Send + Sync>(&mut self) -> Option<Box<T>> {
        match self.user_data.take()?.downcast() {
            Ok(data) => Some(data),
            Err(other) => {
                self.user_data = Some(other);
                None
            }
        }
    }

    pub(crate) fn consume(mut self) -> Arc<TokenState> {
        self.consumed = true;
        self.state.clone()
    }
}

impl Debug for ProgramToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramToken")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .field("key", &self.state.key)
            .field("phase", &self.state.phase())
            .finish()
    }
}

impl Drop for ProgramToken {
    fn drop(&mut self) {
        if !self.consumed {
            warn!(
                "[Program Compiler] Token {} of program {:?} was dropped without get_result or cancel",
                self.state.id, self.state.name
            );
        }
    }
}
