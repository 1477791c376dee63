//! Experiment orchestration
//!
//! Stages run in a fixed order and are recorded in a resumable ledger.

mod experiment;
mod ledger;
mod liveness;

pub use experiment::{
    write_json, Experiment, ExperimentOutcome, ExperimentPlan, RoundArtifact, TargetOutcome,
    TargetSpec,
};
pub use ledger::{Stage, StageLedger, TargetProgress, TargetStatus};
pub use liveness::{wait_until_live, LiveTarget, LivenessConfig};
