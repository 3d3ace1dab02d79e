use console::{StyledObject, style};

use crate::types::{CleanlinessState, RequestState, ZoneRunStatus};

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<14} {}", style(label).dim(), value);
    }

    pub fn request_outcome(&self, state: RequestState, message: &str) {
        match state {
            RequestState::Completed => self.success(message),
            RequestState::Cancelled => self.warning(message),
            _ => self.error(message),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

pub fn styled_state(state: CleanlinessState) -> StyledObject<&'static str> {
    let label = style(state.as_str());
    match state {
        CleanlinessState::Clean => label.green(),
        CleanlinessState::Acceptable => label.cyan(),
        CleanlinessState::NeedsAttention => label.yellow(),
        CleanlinessState::Messy => label.red(),
        CleanlinessState::Unknown => label.dim(),
    }
}

pub fn styled_status(status: ZoneRunStatus) -> StyledObject<&'static str> {
    let label = style(status.as_str());
    match status {
        ZoneRunStatus::Completed => label.green(),
        ZoneRunStatus::Failed => label.red(),
        ZoneRunStatus::Queued | ZoneRunStatus::Processing => label.yellow(),
        ZoneRunStatus::Cancelled | ZoneRunStatus::Idle => label.dim(),
    }
}
