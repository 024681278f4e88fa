//! Per-context interop environment
//!
//! One [`NapiEnv`] exists per execution context (worker coroutine or
//! attached native thread). It is the `&mut self` receiver of the whole NAPI
//! surface and owns everything the context must not share: the local
//! reference frames, the managed/native execution state, the pending
//! exception slot, and the coroutine-switch disable counter.

use std::sync::Arc;

use crate::error::VelaException;
use crate::refs::LocalFrames;
use crate::vm::Vm;

/// Which side of the native boundary the context is currently executing on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecState {
    /// Running managed code (or holding the managed-code transition)
    Managed,
    /// Running native code
    Native,
}

/// Execution environment of one context.
pub struct NapiEnv {
    /// Owning runtime
    pub(crate) vm: Arc<Vm>,
    /// Frame-scoped reference storage of this context
    pub(crate) locals: LocalFrames,
    state: ExecState,
    pending_exception: Option<VelaException>,
    switch_disable: u32,
    /// Worker index when this context runs on a pool worker
    pub(crate) worker: Option<usize>,
}

impl NapiEnv {
    /// Create an environment attached to `vm`, starting in native state.
    pub fn new(vm: Arc<Vm>) -> Self {
        Self {
            locals: LocalFrames::new(vm.options().max_local_refs),
            vm,
            state: ExecState::Native,
            pending_exception: None,
            switch_disable: 0,
            worker: None,
        }
    }

    pub(crate) fn with_worker(vm: Arc<Vm>, worker: usize) -> Self {
        let mut env = Self::new(vm);
        env.worker = Some(worker);
        env
    }

    /// The owning runtime.
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    /// Current execution state.
    pub fn state(&self) -> ExecState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ExecState) {
        self.state = state;
    }

    /// True while an unraised managed exception is pending on this context.
    pub fn has_pending_exception(&self) -> bool {
        self.pending_exception.is_some()
    }

    /// Peek the pending exception.
    pub fn pending_exception(&self) -> Option<&VelaException> {
        self.pending_exception.as_ref()
    }

    /// Raise `exc` on this context. An already-pending exception is kept;
    /// the later one is dropped, matching one-pending-at-a-time semantics.
    pub fn raise(&mut self, exc: VelaException) {
        if self.pending_exception.is_none() {
            self.pending_exception = Some(exc);
        } else {
            log::debug!("dropping exception raised over a pending one: {exc}");
        }
    }

    /// Take and clear the pending exception.
    pub fn clear_pending_exception(&mut self) -> Option<VelaException> {
        self.pending_exception.take()
    }

    /// True while coroutine switching is disabled on this context.
    pub fn switching_disabled(&self) -> bool {
        self.switch_disable > 0
    }

    pub(crate) fn disable_switching(&mut self) {
        self.switch_disable += 1;
    }

    pub(crate) fn enable_switching(&mut self) {
        debug_assert!(self.switch_disable > 0, "unbalanced switch re-enable");
        self.switch_disable = self.switch_disable.saturating_sub(1);
    }

    /// Frame-scoped reference storage of this context.
    pub fn locals(&self) -> &LocalFrames {
        &self.locals
    }

    /// Mutable frame-scoped reference storage of this context.
    pub fn locals_mut(&mut self) -> &mut LocalFrames {
        &mut self.locals
    }
}
