//! Fail-fast pipeline executor.
//!
//! An [`Operation`] runs the pre-tasks, the main tasks and the post-tasks of
//! a [`TaskDetails`] plan in declaration order and stops at the first
//! failure. Every task sees the same spec and status, so later tasks observe
//! what earlier tasks changed.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use cluster_shared_types::{ClusterSpec, ClusterStatus, OrchestrationError, Result, TaskGroup};
use os_utility_interface::OsUtil;

use crate::task::{Task, TaskContext};

/// Execution plan for one distribution and operation.
pub struct TaskDetails {
    pub pre_tasks: Vec<Box<dyn Task>>,
    pub tasks: Vec<Box<dyn Task>>,
    pub post_tasks: Vec<Box<dyn Task>>,
    pub os: Arc<dyn OsUtil>,
}

impl TaskDetails {
    pub fn new(os: Arc<dyn OsUtil>) -> Self {
        Self {
            pre_tasks: Vec::new(),
            tasks: Vec::new(),
            post_tasks: Vec::new(),
            os,
        }
    }

    pub fn with_pre_tasks(mut self, tasks: Vec<Box<dyn Task>>) -> Self {
        self.pre_tasks = tasks;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<Box<dyn Task>>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_post_tasks(mut self, tasks: Vec<Box<dyn Task>>) -> Self {
        self.post_tasks = tasks;
        self
    }

    /// Task names of one group, in execution order.
    pub fn task_names(&self, group: TaskGroup) -> Vec<&'static str> {
        self.group(group).iter().map(|t| t.name()).collect()
    }

    fn group(&self, group: TaskGroup) -> &[Box<dyn Task>] {
        match group {
            TaskGroup::Pre => &self.pre_tasks,
            TaskGroup::Main => &self.tasks,
            TaskGroup::Post => &self.post_tasks,
        }
    }
}

impl fmt::Debug for TaskDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDetails")
            .field("pre_tasks", &self.task_names(TaskGroup::Pre))
            .field("tasks", &self.task_names(TaskGroup::Main))
            .field("post_tasks", &self.task_names(TaskGroup::Post))
            .finish()
    }
}

pub struct Operation {
    name: String,
    status: ClusterStatus,
    spec: ClusterSpec,
    details: TaskDetails,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        status: ClusterStatus,
        spec: ClusterSpec,
        details: TaskDetails,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            spec,
            details,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub fn status(&self) -> &ClusterStatus {
        &self.status
    }

    pub fn into_parts(self) -> (ClusterStatus, ClusterSpec) {
        (self.status, self.spec)
    }

    pub async fn run(&mut self, ctx: &TaskContext) -> Result<()> {
        info!(operation = %self.name, "Starting operation");
        for group in [TaskGroup::Pre, TaskGroup::Main, TaskGroup::Post] {
            self.run_group(ctx, group).await?;
        }
        info!(operation = %self.name, "Operation completed");
        Ok(())
    }

    async fn run_group(&mut self, ctx: &TaskContext, group: TaskGroup) -> Result<()> {
        let os = self.details.os.clone();
        let tasks = match group {
            TaskGroup::Pre => &self.details.pre_tasks,
            TaskGroup::Main => &self.details.tasks,
            TaskGroup::Post => &self.details.post_tasks,
        };

        for task in tasks {
            let wrap = |message: String| OrchestrationError::Task {
                group,
                task: task.name().to_string(),
                message,
            };

            ctx.ensure_active().map_err(|e| wrap(e.to_string()))?;
            info!(operation = %self.name, group = %group, task = task.name(), "Running task");

            if let Err(e) = task
                .run(ctx, &mut self.status, &mut self.spec, os.as_ref())
                .await
            {
                error!(
                    operation = %self.name,
                    group = %group,
                    task = task.name(),
                    error = %e,
                    "Task failed"
                );
                return Err(wrap(e.to_string()));
            }
            info!(operation = %self.name, group = %group, task = task.name(), "Task completed");
        }
        Ok(())
    }
}
