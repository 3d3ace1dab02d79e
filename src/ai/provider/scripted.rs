//! Scripted in-memory vision backend.
//!
//! Replays queued replies in order, then falls back to a default reply.
//! Used by tests and by the `mock` provider kind for offline runs.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ProviderReply, VisionProvider, VisionRequest};
use crate::types::{ProviderError, ProviderErrorKind};

#[derive(Debug, Clone)]
pub struct ScriptedReply {
    outcome: Result<Value, ProviderErrorKind>,
    delay: Option<Duration>,
}

impl ScriptedReply {
    pub fn ok(content: Value) -> Self {
        Self {
            outcome: Ok(content),
            delay: None,
        }
    }

    pub fn fail(kind: ProviderErrorKind) -> Self {
        Self {
            outcome: Err(kind),
            delay: None,
        }
    }

    /// Never answers in practice; the caller's timeout fires first
    pub fn hang() -> Self {
        Self::ok(Value::Null).with_delay(Duration::from_secs(3_600))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// JSON shaped like a real provider answer
pub fn sample_analysis(score: u8, completed: &[&str], new_tasks: &[&str]) -> Value {
    json!({
        "completed_tasks": completed
            .iter()
            .map(|id| json!({"task_id": id, "confidence": 0.95, "reasoning": "no longer visible"}))
            .collect::<Vec<_>>(),
        "new_tasks": new_tasks
            .iter()
            .map(|d| json!({"description": d, "priority": "medium", "category": "tidying"}))
            .collect::<Vec<_>>(),
        "cleanliness": {
            "score": score,
            "observations": [],
            "recommendations": []
        }
    })
}

pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<ScriptedReply>>,
    default_reply: ScriptedReply,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, default_reply: ScriptedReply) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            default_reply,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Always answers with a clean zone and no task changes
    pub fn canned(name: impl Into<String>) -> Self {
        Self::new(name, ScriptedReply::ok(sample_analysis(85, &[], &[])))
    }

    pub fn failing(name: impl Into<String>, kind: ProviderErrorKind) -> Self {
        Self::new(name, ScriptedReply::fail(kind))
    }

    /// Queue a reply ahead of the default
    pub fn then(self, reply: ScriptedReply) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `submit` calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_reply(&self) -> ScriptedReply {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VisionProvider for ScriptedProvider {
    async fn submit(
        &self,
        request: VisionRequest<'_>,
    ) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        *self
            .last_prompt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request.prompt.to_string());

        let reply = self.next_reply();
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        match reply.outcome {
            Ok(content) => Ok(ProviderReply::content_only(content)),
            Err(kind) => Err(ProviderError::with_provider(
                kind,
                "scripted failure",
                &self.name,
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> VisionRequest<'static> {
        VisionRequest {
            prompt: "prompt",
            image: b"img",
            credential: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_script_then_default() {
        let provider = ScriptedProvider::canned("mock")
            .then(ScriptedReply::fail(ProviderErrorKind::Unavailable));

        let first = provider.submit(request()).await.unwrap_err();
        assert_eq!(first.kind, ProviderErrorKind::Unavailable);
        assert_eq!(first.provider.as_deref(), Some("mock"));

        let second = provider.submit(request()).await.unwrap();
        assert_eq!(second.content["cleanliness"]["score"], 85);
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.last_prompt().as_deref(), Some("prompt"));
    }

    #[test]
    fn test_sample_analysis_shape() {
        let value = sample_analysis(40, &["t1"], &["Sweep"]);
        assert_eq!(value["completed_tasks"][0]["task_id"], "t1");
        assert_eq!(value["new_tasks"][0]["description"], "Sweep");
        assert_eq!(value["cleanliness"]["score"], 40);
    }
}
