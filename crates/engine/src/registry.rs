//! Workflow registry: the in-memory catalogue of workflow shapes
//!
//! A workflow definition is an ordered list of task names plus an
//! executor per task. Definitions are registered during process
//! initialization and the registry is shared read-only (behind `Arc`)
//! by the admission service and the worker from then on.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::task::{TaskContext, TaskExecutor, TaskResult};

/// Errors from registry operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Workflow name is empty
    #[error("workflow name cannot be empty")]
    EmptyName,

    /// Workflow declares no tasks
    #[error("workflow {0} must declare at least one task")]
    EmptyTaskList(String),

    /// Workflow name already registered
    #[error("workflow already registered: {0}")]
    DuplicateWorkflow(String),

    /// Task name appears twice in one workflow
    #[error("duplicate task {task} in workflow {workflow}")]
    DuplicateTask { workflow: String, task: String },
}

/// A named, ordered sequence of tasks and their executors
pub struct WorkflowDefinition {
    pub name: String,
    pub task_names: Vec<String>,
    executors: HashMap<String, TaskExecutor>,
}

impl WorkflowDefinition {
    /// Build a definition from `(task name, executor)` pairs in order
    pub fn new(name: impl Into<String>, tasks: Vec<(String, TaskExecutor)>) -> Self {
        let mut task_names = Vec::with_capacity(tasks.len());
        let mut executors = HashMap::with_capacity(tasks.len());
        for (task_name, executor) in tasks {
            task_names.push(task_name.clone());
            executors.insert(task_name, executor);
        }
        Self {
            name: name.into(),
            task_names,
            executors,
        }
    }

    /// The executor registered for a task, if any
    pub fn executor(&self, task_name: &str) -> Option<TaskExecutor> {
        self.executors.get(task_name).cloned()
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("task_names", &self.task_names)
            .finish()
    }
}

/// Registry of workflow definitions
///
/// # Example
///
/// ```ignore
/// let mut registry = WorkflowRegistry::new();
/// registry
///     .workflow("OrderProcess")
///     .task("ValidateOrder", validate_order)
///     .task("SendEmail", send_email)
///     .register()?;
/// ```
#[derive(Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Register a complete workflow definition
    ///
    /// Rejects an empty name, an empty task list, a name that is already
    /// registered, and a task name that appears twice in the list.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), RegistryError> {
        if definition.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if definition.task_names.is_empty() {
            return Err(RegistryError::EmptyTaskList(definition.name));
        }
        if self.definitions.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateWorkflow(definition.name));
        }
        for (i, task) in definition.task_names.iter().enumerate() {
            if definition.task_names[..i].contains(task) {
                return Err(RegistryError::DuplicateTask {
                    workflow: definition.name,
                    task: task.clone(),
                });
            }
        }

        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Start building a workflow that registers into this registry
    pub fn workflow(&mut self, name: impl Into<String>) -> WorkflowBuilder<'_> {
        WorkflowBuilder {
            registry: self,
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Look up a workflow definition
    pub fn definition(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(name)
    }

    /// Look up the executor for a task within a workflow
    pub fn executor(&self, workflow_name: &str, task_name: &str) -> Option<TaskExecutor> {
        self.definitions
            .get(workflow_name)?
            .executor(task_name)
    }

    /// Whether a workflow name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// All registered workflow names, sorted for stable output
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered workflows
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.names())
            .finish()
    }
}

/// Fluent builder that accumulates `(task name, executor)` pairs in
/// insertion order and commits them atomically on `register()`.
pub struct WorkflowBuilder<'a> {
    registry: &'a mut WorkflowRegistry,
    name: String,
    tasks: Vec<(String, TaskExecutor)>,
}

impl WorkflowBuilder<'_> {
    /// Append a task with its executor
    pub fn task<F, Fut>(mut self, name: impl Into<String>, executor: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let executor: TaskExecutor = Arc::new(move |ctx| Box::pin(executor(ctx)));
        self.tasks.push((name.into(), executor));
        self
    }

    /// Register the accumulated workflow
    pub fn register(self) -> Result<(), RegistryError> {
        let definition = WorkflowDefinition::new(self.name, self.tasks);
        self.registry.register(definition)
    }
}
