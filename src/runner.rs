//! Fixed lifecycle for long-running workflow phases.
//!
//! Implementors supply the three stage bodies; `drive` owns the order.
//! The sequencing lives in an explicit stage machine rather than in the
//! implementor, so no runner can skip setup or forget to persist.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Where a driven runner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStage {
    Setup,
    Execute,
    Persist,
    Done,
}

impl RunnerStage {
    fn next(self) -> Self {
        match self {
            Self::Setup => Self::Execute,
            Self::Execute => Self::Persist,
            Self::Persist => Self::Done,
            Self::Done => Self::Done,
        }
    }
}

/// A workflow phase with a setup / run / persist shape.
#[async_trait]
pub trait PhaseRunner: Send {
    type Output: Send;

    fn name(&self) -> &str;

    /// Acquire resources and validate preconditions.
    async fn setup(&mut self) -> Result<()>;

    /// Do the phase's actual work.
    async fn run(&mut self) -> Result<Self::Output>;

    /// Record the produced output durably.
    async fn persist(&mut self, output: &Self::Output) -> Result<()>;
}

/// Drive a runner through setup, execution, and persistence in that fixed
/// order. A stage error stops the machine; later stages never run.
pub async fn drive<R: PhaseRunner>(runner: &mut R) -> Result<R::Output> {
    let mut stage = RunnerStage::Setup;
    let mut output = None;

    while stage != RunnerStage::Done {
        debug!(runner = runner.name(), stage = ?stage, "entering stage");
        match stage {
            RunnerStage::Setup => {
                runner
                    .setup()
                    .await
                    .with_context(|| format!("{} setup failed", runner.name()))?;
            }
            RunnerStage::Execute => {
                let out = runner
                    .run()
                    .await
                    .with_context(|| format!("{} execution failed", runner.name()))?;
                output = Some(out);
            }
            RunnerStage::Persist => {
                let out = output.as_ref().expect("execute stage ran before persist");
                runner
                    .persist(out)
                    .await
                    .with_context(|| format!("{} persistence failed", runner.name()))?;
            }
            RunnerStage::Done => unreachable!(),
        }
        stage = stage.next();
    }

    Ok(output.expect("driver completed all stages"))
}
