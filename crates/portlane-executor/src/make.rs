//! Runner invoking `make` with a per-recipe makefile.

use async_trait::async_trait;
use portlane_core::Result;
use portlane_core::executor::{RecipeOutput, RecipeRequest, RecipeRunner};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use crate::capture::run_captured;

/// Runs `make -C <workdir> -f <recipes>/<recipe>.mk all`.
pub struct MakeRunner {
    program: PathBuf,
    recipes: PathBuf,
}

impl MakeRunner {
    /// Create a runner using `make` from `PATH`.
    pub fn new(recipes: impl Into<PathBuf>) -> Self {
        Self::with_program("make", recipes)
    }

    /// Create a runner with an explicit make binary.
    pub fn with_program(program: impl Into<PathBuf>, recipes: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            recipes: recipes.into(),
        }
    }

    /// Makefile of a recipe.
    pub fn makefile(&self, recipe: &str) -> PathBuf {
        self.recipes.join(format!("{}.mk", recipe))
    }

    fn command(&self, request: &RecipeRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-C")
            .arg(&request.workdir)
            .arg("-f")
            .arg(self.makefile(&request.recipe))
            .arg("all")
            .current_dir(&request.workdir)
            .envs(&request.env);
        command
    }

    pub fn recipes(&self) -> &Path {
        &self.recipes
    }
}

#[async_trait]
impl RecipeRunner for MakeRunner {
    fn name(&self) -> &'static str {
        "make"
    }

    async fn run(&self, request: RecipeRequest) -> Result<RecipeOutput> {
        info!(
            recipe = %request.recipe,
            makefile = %self.makefile(&request.recipe).display(),
            workdir = %request.workdir.display(),
            "Running make recipe"
        );
        run_captured(self.command(&request)).await
    }
}
