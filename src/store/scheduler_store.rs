use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{BackboneError, BackboneResult};
use crate::ids::{OwnerId, TaskId, TenantId};
use crate::model::{ScheduleType, ScheduledTask, TaskStatus};

use super::Index;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: ScheduledTask) -> BackboneResult<()>;
    async fn get(&self, id: &TaskId) -> BackboneResult<ScheduledTask>;
    /// Full rewrite with index rebuild for this id (§4.C: "old-vs-new
    /// status is not always known at the call site").
    async fn update(&self, task: ScheduledTask) -> BackboneResult<()>;
    async fn delete(&self, id: &TaskId) -> BackboneResult<()>;
    async fn list(
        &self,
        owner_id: Option<&OwnerId>,
        tenant_id: Option<&TenantId>,
        status: Option<TaskStatus>,
        schedule_type: Option<ScheduleType>,
        tag: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Vec<ScheduledTask>;
    /// Active tasks due at or before `now`, sorted by `next_run_at`
    /// ascending, whose `[start_date, end_date]` window admits `now`.
    async fn due_tasks(&self, now: DateTime<Utc>) -> Vec<ScheduledTask>;
}

#[derive(Default)]
struct Indexes {
    by_owner: Index<OwnerId, TaskId>,
    by_tenant: Index<TenantId, TaskId>,
    by_status: Index<TaskStatusKey, TaskId>,
    by_schedule_type: Index<ScheduleTypeKey, TaskId>,
    by_tag: Index<String, TaskId>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskStatusKey(u8);

impl From<TaskStatus> for TaskStatusKey {
    fn from(s: TaskStatus) -> Self {
        TaskStatusKey(s as u8)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
struct ScheduleTypeKey(u8);

impl From<ScheduleType> for ScheduleTypeKey {
    fn from(s: ScheduleType) -> Self {
        ScheduleTypeKey(s as u8)
    }
}

struct Inner {
    items: HashMap<TaskId, ScheduledTask>,
    indexes: Indexes,
}

pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        InMemoryTaskStore {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                indexes: Indexes::default(),
            }),
        }
    }

    fn index_task(indexes: &mut Indexes, task: &ScheduledTask) {
        indexes.by_owner.insert(task.owner_id.clone(), task.task_id);
        indexes.by_tenant.insert(task.tenant_id.clone(), task.task_id);
        indexes.by_status.insert(task.status.into(), task.task_id);
        indexes.by_schedule_type.insert(task.schedule_type.into(), task.task_id);
        for tag in &task.tags {
            indexes.by_tag.insert(tag.clone(), task.task_id);
        }
    }

    fn unindex_task(indexes: &mut Indexes, task: &ScheduledTask) {
        indexes.by_owner.remove(&task.owner_id, &task.task_id);
        indexes.by_tenant.remove(&task.tenant_id, &task.task_id);
        indexes.by_status.remove(&task.status.into(), &task.task_id);
        indexes.by_schedule_type.remove(&task.schedule_type.into(), &task.task_id);
        for tag in &task.tags {
            indexes.by_tag.remove(tag, &task.task_id);
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: ScheduledTask) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        Self::index_task(&mut inner.indexes, &task);
        inner.items.insert(task.task_id, task);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> BackboneResult<ScheduledTask> {
        let inner = self.inner.lock().await;
        inner
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| BackboneError::NotFound(format!("task {id}")))
    }

    async fn update(&self, task: ScheduledTask) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.items.get(&task.task_id).cloned() {
            Self::unindex_task(&mut inner.indexes, &old);
        }
        Self::index_task(&mut inner.indexes, &task);
        inner.items.insert(task.task_id, task);
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> BackboneResult<()> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .items
            .remove(id)
            .ok_or_else(|| BackboneError::NotFound(format!("task {id}")))?;
        Self::unindex_task(&mut inner.indexes, &task);
        Ok(())
    }

    async fn list(
        &self,
        owner_id: Option<&OwnerId>,
        tenant_id: Option<&TenantId>,
        status: Option<TaskStatus>,
        schedule_type: Option<ScheduleType>,
        tag: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Vec<ScheduledTask> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<&ScheduledTask> = inner.items.values().collect();
        if let Some(owner_id) = owner_id {
            candidates.retain(|t| &t.owner_id == owner_id);
        }
        if let Some(tenant_id) = tenant_id {
            candidates.retain(|t| &t.tenant_id == tenant_id);
        }
        if let Some(status) = status {
            candidates.retain(|t| t.status == status);
        }
        if let Some(schedule_type) = schedule_type {
            candidates.retain(|t| t.schedule_type == schedule_type);
        }
        if let Some(tag) = tag {
            candidates.retain(|t| t.tags.iter().any(|x| x == tag));
        }
        candidates.sort_by_key(|t| t.task_id);
        candidates
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let inner = self.inner.lock().await;
        let mut due: Vec<ScheduledTask> = inner
            .items
            .values()
            .filter(|t| t.status == TaskStatus::Active || t.status == TaskStatus::Running)
            .filter(|t| t.next_run_at.is_some_and(|at| at <= now))
            .filter(|t| t.start_date.map_or(true, |sd| sd <= now))
            .filter(|t| t.end_date.map_or(true, |ed| ed >= now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_run_at);
        due
    }
}
