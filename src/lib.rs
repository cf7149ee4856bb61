//! # Reactive Component Compiler
//!
//! Compiles declarative UI components (state, derived declarations, handlers
//! and a template tree) into mount/apply/unmount lifecycles.
//!
//! ## Pipeline
//!
//! 1. **Validate**: names are unique, emittable and not reserved.
//! 2. **Lower**: expression and handler source is parsed with `oxc` and lowered
//!    into [`expression::Expr`] / [`expression::Stmt`].
//! 3. **Resolve**: every free name in a binding or declaration classifies as
//!    state, derived, handler, callback or host global, or compilation fails.
//! 4. **Schedule**: derived declarations are ordered so producers precede
//!    consumers; cycles are rejected with the members of the first cycle found.
//! 5. **Plan**: the template becomes a [`ComponentPlan`] of host nodes,
//!    bindings with dependency sets, subscriptions and nested instances.
//! 6. **Emit**: the plan is printed as an ES module, and can also be executed
//!    directly through [`Program`] against any [`HostTree`].
//!
//! ## Update model
//!
//! Every instance owns a `pending` set and a `flushing` flag. A handler
//! mutates state and requests one update for every name it assigned; the
//! request runs one derived pass in scheduled order and rewrites only the
//! bindings whose dependencies intersect the changed names. Nested instances
//! receive only the props whose inputs changed, through their prop-update
//! entry point.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod cache;
mod codegen;
mod component;
mod eval;
mod expression;
mod finalize;
mod graph;
mod host;
mod lifecycle;
mod options;
mod runtime;
mod schedule;
mod scope;
mod validate;
mod visitor;

#[cfg(test)]
mod runtime_tests;
#[cfg(test)]
mod safety_tests;
#[cfg(test)]
mod schedule_tests;

pub use cache::IncrementalCache;
pub use codegen::{generate_module, print_expr};
pub use component::{validate_composition, ComponentRegistry};
pub use eval::{Evaluator, Value};
pub use expression::{parse_expression, parse_statements, Expr, Stmt};
pub use finalize::{
    compile_component, compile_component_json, compile_program, compile_program_json,
    ComponentManifest, CompileResult, ProgramOutput,
};
pub use graph::{DeclarationModel, DependencyGraph};
pub use host::{HandlerKey, HostCall, HostNode, HostTree, InstanceId, MemoryHost, Subscription};
pub use lifecycle::{plan_component, ComponentPlan};
pub use options::{CompileOptions, ReentrancyPolicy, RuntimeOptions, TeardownPolicy};
pub use runtime::{ComponentInstance, InstanceStats, Program, PropValue, Props, RuntimeError};
pub use schedule::schedule;
pub use validate::*;

#[cfg(feature = "napi")]
pub use finalize::{compile_component_native, compile_program_native};

#[cfg(feature = "napi")]
#[napi]
pub fn compile_bridge() -> String {
    "Component Compiler Native Bridge Connected".to_string()
}
