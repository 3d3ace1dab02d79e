//! Prompt Builder
//!
//! Section-based prompt construction for the batched zone analysis. One
//! prompt per zone covers task completion, new tasks and the cleanliness
//! assessment so that a single provider call answers all three.

use crate::constants::analysis::MAX_NEW_TASKS;
use crate::types::{TaskItem, ZoneConfig};

/// System message shared by every backend
pub const SYSTEM_PROMPT: &str = "You are a household tidiness assistant. You look at a single \
camera snapshot of one area of a home and report, as strict JSON, which listed chores appear \
done, which new chores are needed, and how clean the area looks. Respond with JSON only.";

#[derive(Debug, Clone)]
enum PromptSection {
    Role { expertise: String, task: String },
    Objectives(Vec<String>),
    Context(Vec<(String, String)>),
    Text {
        header: Option<String>,
        content: String,
    },
    Focus {
        target: String,
        restrictions: Vec<String>,
    },
    Schema(String),
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, expertise: &str, task: &str) -> Self {
        self.sections.push(PromptSection::Role {
            expertise: expertise.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn objectives(mut self, objectives: Vec<&str>) -> Self {
        self.sections.push(PromptSection::Objectives(
            objectives.into_iter().map(String::from).collect(),
        ));
        self
    }

    /// Add a context item; items keep insertion order
    pub fn context_item(mut self, key: &str, value: &str) -> Self {
        let item = (key.to_string(), value.to_string());
        let existing = self
            .sections
            .iter()
            .position(|s| matches!(s, PromptSection::Context(_)));
        match existing {
            Some(idx) => {
                if let PromptSection::Context(ctx) = &mut self.sections[idx] {
                    ctx.push(item);
                }
            }
            None => self.sections.push(PromptSection::Context(vec![item])),
        }
        self
    }

    pub fn section(mut self, header: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: Some(header.to_string()),
            content: content.to_string(),
        });
        self
    }

    pub fn focus(mut self, target: &str, restrictions: Vec<&str>) -> Self {
        self.sections.push(PromptSection::Focus {
            target: target.to_string(),
            restrictions: restrictions.into_iter().map(String::from).collect(),
        });
        self
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.sections.push(PromptSection::Schema(schema.to_string()));
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role { expertise, task } => {
                    prompt.push_str("<ROLE>\n");
                    prompt.push_str(&format!("You are an expert {} {}.\n", expertise, task));
                    prompt.push_str("</ROLE>\n\n");
                }
                PromptSection::Objectives(objectives) => {
                    prompt.push_str("<OBJECTIVES>\n");
                    for (i, obj) in objectives.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, obj));
                    }
                    prompt.push_str("</OBJECTIVES>\n\n");
                }
                PromptSection::Context(ctx) => {
                    prompt.push_str("# Context\n\n");
                    for (key, value) in ctx {
                        prompt.push_str(&format!("**{}**: {}\n", key, value));
                    }
                    prompt.push('\n');
                }
                PromptSection::Text { header, content } => {
                    if let Some(h) = header {
                        prompt.push_str(&format!("# {}\n\n", h));
                    }
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Focus {
                    target,
                    restrictions,
                } => {
                    prompt.push_str("<FOCUS>\n");
                    prompt.push_str(&format!("IMPORTANT: Focus EXCLUSIVELY on: {}\n", target));
                    for restriction in restrictions {
                        prompt.push_str(&format!("- {}\n", restriction));
                    }
                    prompt.push_str("</FOCUS>\n\n");
                }
                PromptSection::Schema(schema) => {
                    prompt.push_str("# Response Format\n\nRespond with a single JSON object:\n\n");
                    prompt.push_str("```json\n");
                    prompt.push_str(&schema);
                    prompt.push_str("\n```\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

const RESPONSE_SCHEMA: &str = r#"{
  "completed_tasks": [
    {"task_id": "<id from the active task list>", "confidence": 0.0, "reasoning": "<what you see>"}
  ],
  "new_tasks": [
    {"description": "<short imperative chore>", "priority": "low|medium|high", "category": "<optional>"}
  ],
  "cleanliness": {
    "score": 0,
    "state": "clean|acceptable|needs_attention|messy",
    "observations": ["<what you see>"],
    "recommendations": ["<what to do>"]
  }
}"#;

/// Batched prompt for one zone and its active tasks
pub fn build_batch_prompt(zone: &ZoneConfig, active_tasks: &[TaskItem]) -> String {
    let mut builder = PromptBuilder::new()
        .role("home organization assistant", "reviewing a camera snapshot")
        .objectives(vec![
            "Decide which ACTIVE TASKS are visibly done in the image",
            "Propose new chores only for problems clearly visible in the image",
            "Score the overall cleanliness of the area from 0 (filthy) to 100 (spotless)",
        ])
        .context_item("Zone", &zone.name);

    if !zone.purpose.trim().is_empty() {
        builder = builder.context_item("Purpose", zone.purpose.trim());
    }

    let tasks = if active_tasks.is_empty() {
        "(none)".to_string()
    } else {
        active_tasks
            .iter()
            .map(|t| format!("- [{}] {} (priority: {})", t.id, t.description, t.priority.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    builder = builder.section("Active Tasks", &tasks);

    if !zone.ignore_rules.is_empty() {
        let rules = zone
            .ignore_rules
            .iter()
            .map(|r| format!("- {}", r))
            .collect::<Vec<_>>()
            .join("\n");
        builder = builder.section("Ignore", &rules);
    }

    let max_new = format!("Propose at most {} new tasks", MAX_NEW_TASKS);
    builder
        .focus(
            &format!("the {} zone as it appears in the image", zone.name),
            vec![
                "Only mark a task completed when the image clearly shows it is done",
                "Use task ids exactly as listed; never invent ids",
                "Do NOT propose chores that duplicate an active task",
                &max_new,
                "Items matching an Ignore rule are never a problem",
            ],
        )
        .schema(RESPONSE_SCHEMA)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskPriority, TaskStatus};
    use chrono::Utc;

    fn task(id: &str, description: &str) -> TaskItem {
        TaskItem {
            id: id.to_string(),
            description: description.to_string(),
            status: TaskStatus::NeedsAction,
            priority: TaskPriority::High,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_batch_prompt_lists_tasks_and_rules() {
        let zone = ZoneConfig::new("kitchen", "cam.kitchen", "chores")
            .with_purpose("Cooking and eating")
            .with_ignore_rule("Fruit bowl on the counter");
        let prompt = build_batch_prompt(&zone, &[task("t1", "Wipe the counter")]);

        assert!(prompt.contains("**Zone**: kitchen"));
        assert!(prompt.contains("**Purpose**: Cooking and eating"));
        assert!(prompt.contains("- [t1] Wipe the counter (priority: high)"));
        assert!(prompt.contains("- Fruit bowl on the counter"));
        assert!(prompt.contains("\"completed_tasks\""));
    }

    #[test]
    fn test_batch_prompt_without_tasks() {
        let zone = ZoneConfig::new("garage", "cam.garage", "chores");
        let prompt = build_batch_prompt(&zone, &[]);
        assert!(prompt.contains("(none)"));
        assert!(!prompt.contains("# Ignore"));
        assert!(!prompt.contains("**Purpose**"));
    }

    #[test]
    fn test_context_items_keep_order() {
        let prompt = PromptBuilder::new()
            .context_item("A", "1")
            .context_item("B", "2")
            .build();
        let a = prompt.find("**A**").unwrap();
        let b = prompt.find("**B**").unwrap();
        assert!(a < b);
        assert_eq!(prompt.matches("# Context").count(), 1);
    }
}
