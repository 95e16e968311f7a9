//! Recipe runner trait and execution types.
//!
//! A recipe runner executes a queue's build recipe as an external process
//! and reports its merged output and exit status.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::Result;

/// What to run for one build.
#[derive(Debug, Clone)]
pub struct RecipeRequest {
    /// Recipe identifier of the queue.
    pub recipe: String,
    /// Directory the process runs in.
    pub workdir: PathBuf,
    /// Variables added on top of the inherited process environment.
    pub env: BTreeMap<String, String>,
}

/// Outcome of a recipe run that could be started.
#[derive(Debug, Clone)]
pub struct RecipeOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Standard output and standard error, interleaved in arrival order.
    pub output: Vec<u8>,
}

impl RecipeOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for recipe runners.
#[async_trait]
pub trait RecipeRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Run a recipe to completion.
    ///
    /// Returns an error only when the process could not be started or its
    /// output could not be collected.
    async fn run(&self, request: RecipeRequest) -> Result<RecipeOutput>;
}
