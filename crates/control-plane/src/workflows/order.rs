// OrderProcess: ValidateOrder -> DeductMoney -> SendEmail
//
// The first two steps fail at a fixed rate to exercise the retry path;
// task authors are expected to be idempotent, and these are.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tracing::info;

use conveyor_engine::{RegistryError, TaskContext, TaskError, TaskResult, WorkflowRegistry};

/// Register the OrderProcess workflow
pub fn register(registry: &mut WorkflowRegistry) -> Result<(), RegistryError> {
    registry
        .workflow("OrderProcess")
        .task("ValidateOrder", validate_order)
        .task("DeductMoney", deduct_money)
        .task("SendEmail", send_email)
        .register()
}

async fn validate_order(ctx: TaskContext) -> TaskResult {
    info!(task = "ValidateOrder", "validating order");
    let input: Value = ctx.input().unwrap_or(Value::Null);

    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Some(order_id) = input.get("order_id").and_then(Value::as_str) {
        if order_id.is_empty() {
            return Err(TaskError::new("order_id is required"));
        }
    }
    if let Some(amount) = input.get("amount").and_then(Value::as_f64) {
        if amount <= 0.0 {
            return Err(TaskError::new("amount must be positive"));
        }
    }

    // Simulated flakiness (30%) so retries are observable in the demo
    if rand::thread_rng().gen_bool(0.3) {
        return Err(TaskError::new("validation service unavailable"));
    }

    Ok(Some(json!({
        "validated": true,
        "order_id": input.get("order_id").cloned().unwrap_or(Value::Null),
        "amount": input.get("amount").cloned().unwrap_or(Value::Null),
        "validated_at": Utc::now().to_rfc3339(),
    })))
}

async fn deduct_money(ctx: TaskContext) -> TaskResult {
    info!(task = "DeductMoney", "deducting money");
    let input: Value = ctx.input().unwrap_or(Value::Null);

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Simulated flakiness (20%)
    if rand::thread_rng().gen_bool(0.2) {
        return Err(TaskError::new("payment gateway timeout"));
    }

    Ok(Some(json!({
        "payment_status": "SUCCESS",
        "transaction_id": format!("TXN{}", Utc::now().format("%Y%m%d%H%M%S")),
        "amount": input.get("amount").cloned().unwrap_or(Value::Null),
        "deducted_at": Utc::now().to_rfc3339(),
    })))
}

async fn send_email(ctx: TaskContext) -> TaskResult {
    info!(task = "SendEmail", "sending email");
    let input: Value = ctx.input().unwrap_or(Value::Null);

    tokio::time::sleep(Duration::from_secs(1)).await;

    Ok(Some(json!({
        "email_sent": true,
        "recipient": "customer@example.com",
        "sent_at": Utc::now().to_rfc3339(),
        "order_id": input.get("order_id").cloned().unwrap_or(Value::Null),
        "transaction": input.get("transaction_id").cloned().unwrap_or(Value::Null),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;
    use uuid::Uuid;

    fn context(input: &str) -> (TaskContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let ctx = TaskContext::new(
            Uuid::now_v7(),
            1,
            "ValidateOrder".to_string(),
            0,
            Some(input.to_string()),
            rx,
        );
        (ctx, tx)
    }

    #[tokio::test]
    async fn test_validate_rejects_empty_order_id() {
        let (ctx, _tx) = context(r#"{"order_id": "", "amount": 10.0}"#);
        let err = validate_order(ctx).await.unwrap_err();
        assert!(err.to_string().contains("order_id"));
    }

    #[tokio::test]
    async fn test_validate_rejects_non_positive_amount() {
        let (ctx, _tx) = context(r#"{"order_id": "ORD-1", "amount": -5}"#);
        let err = validate_order(ctx).await.unwrap_err();
        assert!(err.to_string().contains("amount"));
    }

    #[tokio::test]
    async fn test_send_email_threads_transaction() {
        let (ctx, _tx) = context(r#"{"order_id": "ORD-1", "transaction_id": "TXN42"}"#);
        let output = send_email(ctx).await.unwrap().unwrap();
        assert_eq!(output["transaction"], "TXN42");
        assert_eq!(output["order_id"], "ORD-1");
        assert_eq!(output["email_sent"], true);
    }
}
