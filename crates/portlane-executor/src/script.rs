//! Runner executing a per-recipe shell script.

use async_trait::async_trait;
use portlane_core::Result;
use portlane_core::executor::{RecipeOutput, RecipeRequest, RecipeRunner};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

use crate::capture::run_captured;

/// Runs `sh <recipes>/<recipe>.sh` inside the queue working directory.
pub struct ScriptRunner {
    shell: PathBuf,
    recipes: PathBuf,
}

impl ScriptRunner {
    pub fn new(recipes: impl Into<PathBuf>) -> Self {
        Self {
            shell: PathBuf::from("sh"),
            recipes: recipes.into(),
        }
    }

    pub fn script(&self, recipe: &str) -> PathBuf {
        self.recipes.join(format!("{}.sh", recipe))
    }
}

#[async_trait]
impl RecipeRunner for ScriptRunner {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn run(&self, request: RecipeRequest) -> Result<RecipeOutput> {
        let script = self.script(&request.recipe);
        info!(
            recipe = %request.recipe,
            script = %script.display(),
            workdir = %request.workdir.display(),
            "Running script recipe"
        );

        let mut command = Command::new(&self.shell);
        command
            .arg(&script)
            .current_dir(&request.workdir)
            .envs(&request.env);

        run_captured(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn write_recipe(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{}.sh", name)), body).unwrap();
    }

    fn request(recipe: &str, workdir: &Path, env: &[(&str, &str)]) -> RecipeRequest {
        RecipeRequest {
            recipe: recipe.to_string(),
            workdir: workdir.to_path_buf(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_success_captures_both_streams() {
        let recipes = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        write_recipe(
            recipes.path(),
            "ok",
            "echo \"building $JOB_PORT\"\necho warning >&2\nexit 0\n",
        );

        let runner = ScriptRunner::new(recipes.path());
        let output = runner
            .run(request("ok", workdir.path(), &[("JOB_PORT", "net/foo")]))
            .await
            .unwrap();

        assert!(output.success());
        let text = String::from_utf8_lossy(&output.output);
        assert!(text.contains("building net/foo"));
        assert!(text.contains("warning"));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let recipes = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        write_recipe(recipes.path(), "broken", "echo 'compile error' >&2\nexit 1\n");

        let runner = ScriptRunner::new(recipes.path());
        let output = runner
            .run(request("broken", workdir.path(), &[]))
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(1));
        assert!(!output.output.is_empty());
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let recipes = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        write_recipe(recipes.path(), "touch", "touch marker\n");

        let runner = ScriptRunner::new(recipes.path());
        let output = runner
            .run(request("touch", workdir.path(), &[]))
            .await
            .unwrap();

        assert!(output.success());
        assert!(workdir.path().join("marker").exists());
    }
}
