//! Module validation framework.
//!
//! Two distinct kinds of validation happen before and after a module is
//! mounted:
//!
//! - [`mount_plan::MountPlanValidator`] checks the *shape* of a mount plan
//!   (a deep-merged settings document) before the loader touches it --
//!   catches "missing `module` field" errors with a precise path instead
//!   of a panic three layers down.
//! - The per-type validators (`tool`, `provider`, `context`, `hook`,
//!   `orchestrator`) check semantic well-formedness of an already-mounted
//!   instance. Unlike the Python kernel, where modules are dynamically
//!   imported and checked with `isinstance()` against a runtime-checkable
//!   `Protocol`, Rust's `Arc<dyn Trait>` already guarantees structural
//!   compliance at compile time -- there is no "mounted something that
//!   doesn't implement the trait" failure mode left to catch.
//!
//! Both produce [`crate::models::ValidationResult`] /
//! [`mount_plan::MountPlanValidationResult`] so callers can inspect
//! `passed()`, `errors()`, and `warnings()` uniformly.

pub mod context;
pub mod hook;
pub mod mount_plan;
pub mod orchestrator;
pub mod provider;
pub mod tool;

pub use context::ContextValidator;
pub use hook::HookValidator;
pub use mount_plan::{MountPlanValidationResult, MountPlanValidator};
pub use orchestrator::OrchestratorValidator;
pub use provider::ProviderValidator;
pub use tool::ToolValidator;
