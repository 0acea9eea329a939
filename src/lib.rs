//! # flowloom: a durable, tree-walking workflow interpreter
//!
//! flowloom runs a fixed tree of `Step`/`If`/`Switch`/`While`/`ForEach`
//! nodes over caller-defined state, checkpointing progress after every
//! completed step so a crashed or cancelled flow can resume from exactly
//! where it left off. Failures unwind through a saga-style compensation
//! stack: every step that completed successfully gets its paired undo body
//! invoked, in reverse order, before the flow settles as rolled back.
//!
//! ## Core Concepts
//!
//! - **Definition**: an immutable tree built once via [`DefinitionBuilder`]
//! - **State**: a caller type implementing [`FlowState`], mutated in place
//!   by step bodies
//! - **Cursor**: the durable program counter, persisted alongside state in
//!   every checkpoint
//! - **Compensation**: a LIFO stack of undo bodies, rolled back on failure
//! - **Executor**: the stateless handle that runs, cancels, and resumes a
//!   `Definition`
//!
//! ## Quick Start
//!
//! ```
//! use flowloom::{DefinitionBuilder, Executor, MapState};
//!
//! # async fn run() -> Result<(), flowloom::FlowError> {
//! let definition = DefinitionBuilder::<MapState>::new()
//!     .step("reserve_inventory", |state: &mut MapState, _ctx: &flowloom::StepContext| async move {
//!         state.set("reserved", true);
//!         Ok::<bool, flowloom::StepFailure>(true)
//!     })
//!     .with_compensation(|state: &mut MapState, _ctx: &flowloom::StepContext| async move {
//!         state.set("reserved", false);
//!         Ok::<(), flowloom::StepFailure>(())
//!     })
//!     .build()?;
//!
//! let executor = Executor::new(definition);
//! let result = executor.execute(MapState::new("order-1")).await?;
//! assert!(result.is_completed());
//! # Ok(())
//! # }
//! ```
//!
//! ### Branching and Loops
//!
//! ```
//! use flowloom::{DefinitionBuilder, MapState};
//!
//! let definition = DefinitionBuilder::<MapState>::new()
//!     .if_branch(
//!         |state: &MapState| state.get_bool("vip"),
//!         |b| b.step("apply_discount", |s: &mut MapState, _ctx: &flowloom::StepContext| async move {
//!             s.set("discounted", true);
//!             Ok::<bool, flowloom::StepFailure>(true)
//!         }),
//!     )
//!     .else_branch(|b| b.step("apply_standard_rate", |_: &mut MapState, _ctx: &flowloom::StepContext| async move {
//!         Ok::<bool, flowloom::StepFailure>(true)
//!     }))
//!     .end_if()
//!     .build()
//!     .unwrap();
//! # let _ = definition;
//! ```
//!
//! ## Error Handling
//!
//! Every fallible boundary (build-time validation, step execution,
//! checkpoint I/O) is collected behind [`FlowError`], a `miette::Diagnostic`
//! so both plain `std::error::Error` consumers and `miette`-aware ones see
//! the same cause chain and help text.
//!
//! ## Module Guide
//!
//! - [`definition`] — the fluent builder and the immutable tree it produces
//! - [`executor`] — the tree-walking interpreter
//! - [`step`] — the `StepBody`/`CompensationBody` contracts
//! - [`resilience`] — retry and timeout policies
//! - [`compensation`] — the saga rollback stack
//! - [`cursor`] — the durable program counter
//! - [`checkpoint`] — durable persistence of paused flows
//! - [`diagnostics`] — the in-process event bus
//! - [`flow_state`] — the state capability flows are threaded through
//! - [`config`] — runtime configuration, resolved from the environment

pub mod checkpoint;
pub mod compensation;
pub mod concurrency;
pub mod config;
pub mod cursor;
pub mod definition;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod flow_state;
pub mod ids;
pub mod resilience;
pub mod result;
pub mod serializer;
pub mod step;
pub mod telemetry;

pub use checkpoint::{Checkpointer, InMemoryCheckpointer};
pub use compensation::{CompensationEntry, CompensationStack};
pub use config::RuntimeConfig;
pub use cursor::{Cursor, Frame, Position};
pub use definition::{Definition, DefinitionBuilder};
pub use diagnostics::{DiagnosticsBus, FlowEvent, FlowEventKind};
pub use error::{BuildError, ErrorKind, FlowError, StepFailure};
pub use executor::Executor;
pub use flow_state::{FlowState, MapState};
pub use ids::{FlowId, NodeId};
pub use resilience::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use result::ExecutionResult;
pub use step::{CompensationBody, StepBody, StepContext};

#[cfg(feature = "sqlite")]
pub use checkpoint::sqlite::SqliteCheckpointer;
