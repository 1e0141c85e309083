//! Orchestration: after a task completes, create the next step or close
//! the workflow.

use serde_json::json;
use tracing::{error, info};

use crate::persistence::{EventType, NewActivityLog, NewTask, Task, WorkflowStatus, WorkflowStore};
use crate::registry::WorkflowRegistry;

/// Advance a workflow past a just-completed task
///
/// Creates the next PENDING task with the completed task's output as its
/// input, or — when the completed task was the last in the declared
/// list — marks the instance COMPLETED and appends the workflow-level
/// log entry. The new task only becomes visible here, which is what
/// keeps execution strictly sequential per instance.
pub(super) async fn advance(store: &dyn WorkflowStore, registry: &WorkflowRegistry, task: &Task) {
    let workflow = match store.workflow_by_id(task.workflow_instance_id).await {
        Ok(workflow) => workflow,
        Err(e) => {
            error!(
                error = %e,
                workflow_id = %task.workflow_instance_id,
                "failed to load workflow for orchestration"
            );
            return;
        }
    };

    let Some(definition) = registry.definition(&workflow.workflow_name) else {
        error!(workflow_name = %workflow.workflow_name, "workflow definition not found");
        return;
    };

    let Some(index) = definition
        .task_names
        .iter()
        .position(|name| name == &task.task_name)
    else {
        // Duplicate-free lists and exact matching make this unreachable;
        // never mistake it for completion.
        error!(
            task_name = %task.task_name,
            workflow_name = %workflow.workflow_name,
            "completed task not in workflow task list"
        );
        return;
    };

    if index + 1 < definition.task_names.len() {
        let next_task = definition.task_names[index + 1].clone();
        info!(
            next_task = %next_task,
            workflow_id = %workflow.id,
            "moving to next step"
        );

        if let Err(e) = store
            .create_task(NewTask {
                workflow_instance_id: workflow.id,
                task_name: next_task.clone(),
                input_payload: task.output_payload.clone(),
            })
            .await
        {
            error!(
                error = %e,
                next_task = %next_task,
                workflow_id = %workflow.id,
                "failed to create next task"
            );
        }
    } else {
        info!(
            workflow_name = %workflow.workflow_name,
            workflow_id = %workflow.id,
            "workflow completed"
        );

        if let Err(e) = store
            .update_workflow_status(workflow.id, WorkflowStatus::Completed)
            .await
        {
            error!(error = %e, workflow_id = %workflow.id, "failed to mark workflow completed");
            return;
        }

        let details = json!({
            "workflow_id": workflow.id,
            "workflow_name": workflow.workflow_name,
            "total_tasks": definition.task_names.len(),
            "status": "completed",
        });
        if let Err(e) = store
            .create_activity_log(NewActivityLog {
                workflow_instance_id: workflow.id,
                task_name: None,
                event_type: EventType::WorkflowCompleted,
                details: Some(details.to_string()),
            })
            .await
        {
            error!(error = %e, workflow_id = %workflow.id, "failed to append completion log");
        }
    }
}
