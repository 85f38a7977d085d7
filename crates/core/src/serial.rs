// Serial task runner: each step starts only after the previous one resolved.

use std::future::Future;
use std::pin::Pin;

use anyhow::Context;

pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type Step = Box<dyn FnOnce() -> StepFuture + Send>;

/// An ordered chain of async steps. The first failure stops the chain.
#[derive(Default)]
pub struct SerialRunner {
    steps: Vec<Step>,
}

impl SerialRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F, Fut>(mut self, step: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push(Box::new(move || -> StepFuture { Box::pin(step()) }));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        run_serially(self.steps).await
    }
}

pub async fn run_serially(steps: Vec<Step>) -> anyhow::Result<()> {
    let total = steps.len();
    for (index, step) in steps.into_iter().enumerate() {
        step().await.with_context(|| format!("step {} of {total} failed", index + 1))?;
    }
    Ok(())
}
