//! Coroutine launch and completion
//!
//! The interop layer does not schedule; it enqueues. [`launch`] binds a
//! callable object to a new [`Coroutine`], attaches a [`CompletionEvent`]
//! over a freshly allocated Promise/Job, and hands the pair to the
//! [`CoroScheduler`]'s worker pool. Workers run coroutines to completion and
//! settle the Promise/Job exactly once through the event.

mod coroutine;
mod event;
mod launcher;
pub mod promise;
mod scheduler;
mod worker;

pub use coroutine::Coroutine;
pub use event::CompletionEvent;
pub use launcher::{launch, LaunchMode};
pub use promise::{PromiseOutcome, ResultFlavor};
pub use scheduler::CoroScheduler;
