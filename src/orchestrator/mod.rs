//! Orchestration of evolving runs.
//!
//! An [`EvolvingLoop`] drives an experiment through strictly sequential rounds:
//!
//! 1. **Query**: the knowledge base is snapshotted for every sub-task that is
//!    neither passing nor given up
//! 2. **Generate**: the evolving strategy produces one candidate per attempted sub-task
//! 3. **Merge**: candidates are injected in index order (later index wins)
//! 4. **Evaluate**: the evaluator scores every sub-task
//! 5. **Record**: generation failures and evaluated outcomes are appended to the knowledge base
//!
//! The run ends as [`LoopState::Converged`] when every sub-task passes, or as
//! [`LoopState::Exhausted`] when the round or time budget runs out.
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_forge::orchestrator::{EvolveConfig, EvolvingLoop};
//!
//! let config = EvolveConfig::new().with_max_rounds(5).with_max_concurrency(4);
//! let evolving = EvolvingLoop::new(strategy, evaluator, config);
//! let outcome = evolving.run(experiment).await?;
//! println!("{} after {} rounds", outcome.state, outcome.rounds());
//! ```

pub mod config;
pub mod evolving_loop;

pub use config::{ConfigError, EvolveConfig};
pub use evolving_loop::{EvolvingLoop, GenerationFailure, LoopState, RoundRecord, RunOutcome};
