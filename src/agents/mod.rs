//! Research crew built from data-configured stages.
//!
//! - `stage`: one stage record (role, goal, task, tools, delegation, context)
//!   and its builder
//! - `executor`: the per-stage reasoning loop over the language model
//! - `crew`: the three research stages and the `run_research` entry point

pub mod crew;
pub mod executor;
pub mod stage;

pub use crew::{ResearchCrew, run_research};
pub use executor::StageExecutor;
pub use stage::{Stage, StageInput};
