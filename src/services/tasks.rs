//! Task list adapters.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

use crate::storage::SharedDatabase;
use crate::types::{Result, TaskItem, TaskPriority, TaskStatus, TidyError};

#[async_trait]
pub trait TaskList: Send + Sync {
    async fn list_items(&self, list: &str) -> Result<Vec<TaskItem>>;

    async fn add_item(
        &self,
        list: &str,
        description: &str,
        priority: TaskPriority,
    ) -> Result<TaskItem>;

    /// Marking an already completed item is a no-op
    async fn mark_done(&self, list: &str, item_id: &str) -> Result<()>;
}

pub type SharedTaskList = Arc<dyn TaskList>;

fn new_item(description: &str, priority: TaskPriority) -> TaskItem {
    TaskItem {
        id: uuid::Uuid::new_v4().to_string(),
        description: description.trim().to_string(),
        status: TaskStatus::NeedsAction,
        priority,
        created_at: Utc::now(),
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// Task lists persisted in the local database
pub struct SqliteTaskList {
    db: SharedDatabase,
}

impl SqliteTaskList {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskList for SqliteTaskList {
    async fn list_items(&self, list: &str) -> Result<Vec<TaskItem>> {
        self.db.list_task_items(list)
    }

    async fn add_item(
        &self,
        list: &str,
        description: &str,
        priority: TaskPriority,
    ) -> Result<TaskItem> {
        let item = new_item(description, priority);
        self.db.insert_task_item(list, &item)?;
        Ok(item)
    }

    async fn mark_done(&self, list: &str, item_id: &str) -> Result<()> {
        if self.db.complete_task_item(list, item_id)? {
            Ok(())
        } else {
            Err(TidyError::TaskList(format!(
                "item {} not found in list {}",
                item_id, list
            )))
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryTaskList {
    lists: DashMap<String, Vec<TaskItem>>,
}

impl InMemoryTaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an active item with a known id
    pub fn with_item(self, list: &str, id: &str, description: &str) -> Self {
        let mut item = new_item(description, TaskPriority::Medium);
        item.id = id.to_string();
        self.lists.entry(list.to_string()).or_default().push(item);
        self
    }

    pub fn snapshot(&self, list: &str) -> Vec<TaskItem> {
        self.lists
            .get(list)
            .map(|items| items.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskList for InMemoryTaskList {
    async fn list_items(&self, list: &str) -> Result<Vec<TaskItem>> {
        Ok(self.snapshot(list))
    }

    async fn add_item(
        &self,
        list: &str,
        description: &str,
        priority: TaskPriority,
    ) -> Result<TaskItem> {
        let item = new_item(description, priority);
        self.lists
            .entry(list.to_string())
            .or_default()
            .push(item.clone());
        Ok(item)
    }

    async fn mark_done(&self, list: &str, item_id: &str) -> Result<()> {
        let mut items = self
            .lists
            .get_mut(list)
            .ok_or_else(|| TidyError::TaskList(format!("unknown list {}", list)))?;
        let item = items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| {
                TidyError::TaskList(format!("item {} not found in list {}", item_id, list))
            })?;
        item.status = TaskStatus::Completed;
        Ok(())
    }
}
