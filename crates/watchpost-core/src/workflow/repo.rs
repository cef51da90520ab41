use crate::error::Result;
use crate::store::memory::Collection;

use super::Workflow;

pub trait WorkflowRepository: Send + Sync {
    fn insert(&self, workflow: Workflow) -> Result<Workflow>;
    fn get(&self, id: &str) -> Result<Workflow>;
    fn list(&self) -> Result<Vec<Workflow>>;
    fn remove(&self, id: &str) -> Result<bool>;
    /// Bump `execution_count` and return the updated workflow.
    fn record_execution(&self, id: &str) -> Result<Workflow>;
}

pub struct MemoryWorkflowRepository {
    workflows: Collection<Workflow>,
}

impl Default for MemoryWorkflowRepository {
    fn default() -> Self {
        Self {
            workflows: Collection::new("workflow"),
        }
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    fn insert(&self, workflow: Workflow) -> Result<Workflow> {
        self.workflows.put(workflow.id.clone(), workflow)
    }

    fn get(&self, id: &str) -> Result<Workflow> {
        self.workflows.get(id)
    }

    fn list(&self) -> Result<Vec<Workflow>> {
        self.workflows.list()
    }

    fn remove(&self, id: &str) -> Result<bool> {
        self.workflows.delete(id)
    }

    fn record_execution(&self, id: &str) -> Result<Workflow> {
        self.workflows.update(id, |wf| {
            wf.execution_count += 1;
            wf.clone()
        })
    }
}
