// RefundProcess: ValidateRefund -> ProcessRefund -> NotifyCustomer
//
// Pass-through steps; each propagates an absent output payload.

use std::time::Duration;

use tracing::info;

use conveyor_engine::{RegistryError, TaskContext, TaskResult, WorkflowRegistry};

/// Register the RefundProcess workflow
pub fn register(registry: &mut WorkflowRegistry) -> Result<(), RegistryError> {
    registry
        .workflow("RefundProcess")
        .task("ValidateRefund", validate_refund)
        .task("ProcessRefund", process_refund)
        .task("NotifyCustomer", notify_customer)
        .register()
}

async fn validate_refund(_ctx: TaskContext) -> TaskResult {
    info!(task = "ValidateRefund", "validating refund request");
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(None)
}

async fn process_refund(_ctx: TaskContext) -> TaskResult {
    info!(task = "ProcessRefund", "processing refund");
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(None)
}

async fn notify_customer(_ctx: TaskContext) -> TaskResult {
    info!(task = "NotifyCustomer", "notifying customer");
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(None)
}
