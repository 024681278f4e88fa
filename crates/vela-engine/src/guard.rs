//! Managed-code transition guards
//!
//! Every boundary operation that touches managed objects runs under a
//! [`ScopedManagedCode`] guard. Constructing the guard transitions the
//! context from native to managed state (a no-op when already managed, so
//! guards nest); dropping it reverts the transition it made and raises any
//! exception deferred during the scope.
//!
//! [`FastNativeScope`] is the inverted guard fast natives run under: the
//! context stays in managed state for the whole call, and coroutine
//! switching is disabled so the native body never observes a migration.

use crate::env::{ExecState, NapiEnv};
use crate::error::VelaException;
use crate::object::ObjPtr;
use vela_sdk::NapiRef;

/// RAII managed-code transition for one boundary operation.
pub struct ScopedManagedCode<'a> {
    env: &'a mut NapiEnv,
    entered: bool,
    deferred: Option<VelaException>,
}

impl<'a> ScopedManagedCode<'a> {
    /// Enter managed state (if not already there) for the guard's lifetime.
    pub fn new(env: &'a mut NapiEnv) -> Self {
        let entered = env.state() == ExecState::Native;
        if entered {
            env.set_state(ExecState::Managed);
        }
        Self {
            env,
            entered,
            deferred: None,
        }
    }

    /// The guarded environment.
    pub fn env(&self) -> &NapiEnv {
        self.env
    }

    /// The guarded environment, mutably.
    pub fn env_mut(&mut self) -> &mut NapiEnv {
        self.env
    }

    /// Record `exc` to be raised on the context when the guard drops.
    /// At most one exception can be deferred per scope.
    pub fn defer_exception(&mut self, exc: VelaException) {
        debug_assert!(
            self.deferred.is_none(),
            "second exception deferred in one guarded scope: {exc}"
        );
        if self.deferred.is_none() {
            self.deferred = Some(exc);
        }
    }

    /// Resolve a handle to the raw object pointer it currently names.
    /// `None` in is managed null; `Ok(None)` out is null or an empty weak.
    pub fn to_internal(&self, r: Option<NapiRef>) -> Result<Option<ObjPtr>, VelaException> {
        match r {
            None => Ok(None),
            Some(r) if r.is_frame_scoped() => self.env.locals().get(r),
            Some(r) => self.env.vm().globals().get(r),
        }
    }

    /// Mint a frame-scoped reference to `ptr` in the current frame.
    pub fn add_local_ref(&mut self, ptr: ObjPtr) -> Result<NapiRef, VelaException> {
        self.env.locals_mut().new_ref(ptr)
    }

    /// Mint a Global reference to `ptr`.
    pub fn add_global_ref(&self, ptr: ObjPtr) -> Result<NapiRef, VelaException> {
        self.env.vm().globals().new_ref(ptr, false)
    }

    /// Mint a Weak reference to `ptr`.
    pub fn add_weak_ref(&self, ptr: ObjPtr) -> Result<NapiRef, VelaException> {
        self.env.vm().globals().new_ref(ptr, true)
    }

    /// Release a Global/Weak reference.
    pub fn del_global_ref(&self, r: NapiRef) -> Result<(), VelaException> {
        self.env.vm().globals().remove(r).map(|_| ())
    }
}

impl Drop for ScopedManagedCode<'_> {
    fn drop(&mut self) {
        if let Some(exc) = self.deferred.take() {
            self.env.raise(exc);
        }
        if self.entered {
            self.env.set_state(ExecState::Native);
        }
    }
}

/// Scope a fast native body runs in: managed state throughout, coroutine
/// switching disabled.
pub struct FastNativeScope<'a> {
    env: &'a mut NapiEnv,
}

impl<'a> FastNativeScope<'a> {
    /// Open the scope. The context must already be in managed state.
    pub fn new(env: &'a mut NapiEnv) -> Self {
        debug_assert_eq!(
            env.state(),
            ExecState::Managed,
            "fast native entered outside managed state"
        );
        env.disable_switching();
        Self { env }
    }

    /// The scoped environment.
    pub fn env(&self) -> &NapiEnv {
        self.env
    }

    /// The scoped environment, mutably.
    pub fn env_mut(&mut self) -> &mut NapiEnv {
        self.env
    }
}

impl Drop for FastNativeScope<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.env.state(),
            ExecState::Managed,
            "fast native left managed state"
        );
        self.env.enable_switching();
    }
}
