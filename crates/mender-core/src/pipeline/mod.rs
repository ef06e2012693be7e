//! Pipeline definition API
//!
//! - **handler**: StepHandler trait と StepContext
//! - **registry**: StepRegistry（step -> handler の対応表、fail-fast 構築）

pub mod handler;
pub mod registry;

pub use handler::{StepContext, StepHandler};
pub use registry::{RegistryBuilder, RegistryError, StepRegistry};
