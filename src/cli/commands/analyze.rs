//! Analyze Command
//!
//! One-shot analysis of a single zone. Follows the retry chain so the printed
//! outcome is the final one.

use std::time::{Duration, Instant};

use crate::cli::ui::{Output, styled_state};
use crate::config::Config;
use crate::context::AppContext;
use crate::pipeline::Scheduler;
use crate::types::{
    BatchAnalysisResult, Priority, RequestId, RequestOutcome, RequestState, Result, TidyError,
};

const FOLLOW_UP_POLL: Duration = Duration::from_millis(100);

pub async fn run(config: Config, zone: &str, priority: Priority, timeout_secs: u64, format: &str) -> Result<()> {
    let ctx = AppContext::from_config(config)?;
    let timeout = Duration::from_secs(timeout_secs);

    let first = ctx.scheduler.enqueue(zone, priority)?;
    let waited = wait_final(&ctx.scheduler, first, timeout).await;
    ctx.shutdown().await;
    let (id, outcome) = waited?;

    if format == "json" {
        let body = serde_json::json!({
            "request_id": id.as_str(),
            "zone": zone,
            "state": outcome.state(),
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_outcome(zone, &id, &outcome);
    }

    match outcome {
        RequestOutcome::Completed(_) => Ok(()),
        RequestOutcome::Failed(failure) => Err(TidyError::NotCompleted {
            state: RequestState::Failed,
            reason: failure.error,
        }),
        RequestOutcome::Cancelled { reason } => Err(TidyError::NotCompleted {
            state: RequestState::Cancelled,
            reason,
        }),
    }
}

/// Wait for a request, then for each retry it spawns, within one deadline
async fn wait_final(
    scheduler: &Scheduler,
    mut id: RequestId,
    timeout: Duration,
) -> Result<(RequestId, RequestOutcome)> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = scheduler.wait(&id, remaining).await?;

        let RequestOutcome::Failed(failure) = &outcome else {
            return Ok((id, outcome));
        };
        if !failure.retry_scheduled {
            return Ok((id, outcome));
        }

        loop {
            if let Some(next) = scheduler.follow_up(&id) {
                id = next;
                break;
            }
            // The retry is dropped if the scheduler stops first
            if !scheduler.is_accepting() || Instant::now() >= deadline {
                return Ok((id, outcome));
            }
            tokio::time::sleep(FOLLOW_UP_POLL).await;
        }
    }
}

fn print_outcome(zone: &str, id: &RequestId, outcome: &RequestOutcome) {
    let output = Output::new();
    let message = format!("{} [{}] {}", zone, id.short(), outcome.state());
    output.request_outcome(outcome.state(), &message);

    match outcome {
        RequestOutcome::Completed(result) => {
            let c = &result.cleanliness;
            output.field("score", c.score);
            output.field("state", styled_state(c.state));
            if let Some(provider) = &result.metadata.provider {
                output.field("provider", provider);
            }
            output.field("latency", format!("{} ms", result.metadata.latency_ms));
            if result.metadata.cache_hit {
                output.field("cache", "hit");
            }
            if result.is_fallback() {
                output.warning("Provider answer was unreadable; score left unchanged");
            }
            for (label, value) in task_lines(result) {
                output.field(label, value);
            }
        }
        RequestOutcome::Failed(failure) => {
            output.field("error", &failure.error);
            for attempt in &failure.attempts {
                output.field(&attempt.provider, &attempt.outcome);
            }
        }
        RequestOutcome::Cancelled { reason } => output.field("reason", reason),
    }
}

/// Provider proposals, labelled as such: the task list only takes the
/// completions above the confidence threshold and new tasks not already open.
fn task_lines(result: &BatchAnalysisResult) -> Vec<(&'static str, String)> {
    let done = result.completed_tasks.iter().map(|task| {
        (
            "proposed done",
            format!("{} ({:.0}%)", task.task_id, task.confidence * 100.0),
        )
    });
    let new = result
        .new_tasks
        .iter()
        .map(|task| ("proposed new", task.description.clone()));
    let observed = result
        .cleanliness
        .observations
        .iter()
        .map(|note| ("observed", note.clone()));
    done.chain(new).chain(observed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CleanlinessAssessment, CleanlinessState, CompletedTask, ProposedTask};

    #[test]
    fn test_task_lines_label_proposals() {
        let mut result = BatchAnalysisResult::fallback("blurry frame");
        result.cleanliness = CleanlinessAssessment {
            score: 60,
            state: CleanlinessState::Messy,
            observations: vec!["cups on desk".to_string()],
            recommendations: Vec::new(),
        };
        result.completed_tasks.push(CompletedTask {
            task_id: "t1".to_string(),
            confidence: 0.42,
            reasoning: String::new(),
        });
        result.new_tasks.push(ProposedTask {
            description: "Clear desk".to_string(),
            priority: Default::default(),
            category: None,
        });

        let lines = task_lines(&result);
        assert_eq!(
            lines,
            vec![
                ("proposed done", "t1 (42%)".to_string()),
                ("proposed new", "Clear desk".to_string()),
                ("observed", "cups on desk".to_string()),
            ]
        );
        assert!(lines.iter().all(|(label, _)| *label != "done" && *label != "new"));
    }
}
