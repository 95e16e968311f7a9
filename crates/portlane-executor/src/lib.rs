//! Recipe runners for portlane.
//!
//! Provides runner implementations for executing build recipes:
//! - `make` with a per-recipe makefile (production)
//! - `sh` with a per-recipe shell script

mod capture;
pub mod make;
pub mod script;

pub use make::MakeRunner;
pub use portlane_core::executor::{RecipeOutput, RecipeRequest, RecipeRunner};
pub use script::ScriptRunner;
