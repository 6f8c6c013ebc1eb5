//! Trigger dispatch.
//!
//! A trigger is a hook program bound to lifecycle events of a collection
//! subtree. Every mutation dispatches its event twice: in the Before phase,
//! where a failing hook vetoes the mutation, and in the After phase, where
//! failures are only reported.
//!
//! ## Modules
//!
//! - `event`: the [`LifecycleEvent`] and [`Phase`] taxonomy
//! - `registry`: [`TriggerBinding`] and per-collection selection
//! - `variables`: the external variables hooks see
//! - `guard`: the per-context [`ReentrancyGuard`]
//! - `dispatcher`: the [`TriggerDispatcher`] state machine
//! - `diagnostics`: the After-phase failure channel

mod diagnostics;
mod dispatcher;
mod event;
mod guard;
mod registry;
mod variables;

pub use diagnostics::{AfterPhaseFailure, TriggerDiagnostics};
pub use dispatcher::TriggerDispatcher;
pub use event::{LifecycleEvent, Phase};
pub use guard::ReentrancyGuard;
pub use registry::{
    DispatchMode, Selected, TriggerBinding, TriggerRegistry, DEFAULT_BINDING_PREFIX,
};
pub use variables::TRIGGER_NAMESPACE;
