// Built-in workflow definitions, registered at startup

mod order;
mod refund;

use conveyor_engine::{RegistryError, WorkflowRegistry};

/// Register every built-in workflow
pub fn register_all(registry: &mut WorkflowRegistry) -> Result<(), RegistryError> {
    order::register(registry)?;
    refund::register(registry)?;
    Ok(())
}
