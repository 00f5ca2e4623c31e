//! Token estimation and conversation-window trimming.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use shared::chat_api::ChatTurn;

/// Context-window sizes per provider model id.
const CONTEXT_WINDOW: &[(&str, u32)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4o-2024-05-13", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-turbo-2024-04-09", 128_000),
    ("gpt-4-turbo-preview", 128_000),
    ("gpt-4-0125-preview", 128_000),
    ("gpt-4-1106-preview", 128_000),
    ("gpt-4-vision-preview", 128_000),
    ("gpt-4-1106-vision-preview", 128_000),
    ("gpt-4", 8_192),
    ("gpt-4-0613", 8_192),
    ("gpt-4-32k", 32_768),
    ("gpt-4-32k-0613", 32_768),
    ("gpt-3.5-turbo", 16_385),
    ("gpt-3.5-turbo-0125", 16_385),
    ("gpt-3.5-turbo-1106", 16_385),
    ("gpt-3.5-turbo-instruct", 4_096),
    ("gpt-3.5-turbo-16k", 16_385),
    ("gpt-3.5-turbo-0613", 4_096),
    ("gpt-3.5-turbo-16k-0613", 16_385),
];

/// Conservative budget for models not in the table.
const DEFAULT_CONTEXT_WINDOW: u32 = 3_750;

pub fn context_window(model: &str) -> u32 {
    CONTEXT_WINDOW
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Per-session token estimator.
///
/// Counts with the external `tiktoken-cli` helper when it is installed;
/// after the first execution failure it degrades to the word-ratio
/// heuristic for the rest of the session and never retries; tokenizer
/// availability is an environment property that does not change mid-run.
pub struct TokenEstimator {
    model: String,
    max_tokens: u32,
    precise: Option<PathBuf>,
    degraded: AtomicBool,
}

impl TokenEstimator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            max_tokens: context_window(model),
            precise: find_tokenizer(),
            degraded: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn with_tokenizer(model: &str, tokenizer: PathBuf) -> Self {
        Self {
            model: model.to_string(),
            max_tokens: context_window(model),
            precise: Some(tokenizer),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn estimate(&self, text: &str, role: &str) -> u32 {
        if !self.is_degraded() {
            if let Some(bin) = &self.precise {
                if let Some(count) = run_tokenizer(bin, &self.model, role, text) {
                    return count;
                }
                // one-way transition; no per-call retries
                self.degraded.store(true, Ordering::Relaxed);
            }
        }
        heuristic(text)
    }

    fn turn_cost(&self, turn: &ChatTurn) -> u32 {
        self.estimate(&turn.question, "user") + self.estimate(&turn.answer, "assistant")
    }

    /// Trim history to the model's window budget.
    pub fn limit(&self, turns: &[ChatTurn]) -> Vec<ChatTurn> {
        self.limit_to(turns, self.max_tokens)
    }

    /// Walk `turns` oldest-first, accumulating cost. The walk stops (not
    /// skips) at the first turn that would overflow `budget`, so every
    /// later turn is excluded even when it would individually fit.
    pub fn limit_to(&self, turns: &[ChatTurn], budget: u32) -> Vec<ChatTurn> {
        let costs: Vec<u32> = turns.iter().map(|t| self.turn_cost(t)).collect();
        let kept = retain_within_budget(&costs, budget);
        turns[..kept].to_vec()
    }
}

/// Number of leading turns whose running total stays within budget.
fn retain_within_budget(costs: &[u32], budget: u32) -> usize {
    let mut total = 0u32;
    for (index, cost) in costs.iter().enumerate() {
        total = total.saturating_add(*cost);
        if total > budget {
            return index;
        }
    }
    costs.len()
}

/// ~75 words per 100 tokens, the published word/token ratio.
fn heuristic(text: &str) -> u32 {
    let words = text.split_whitespace().count() as u32;
    words.div_ceil(75) * 100
}

fn find_tokenizer() -> Option<PathBuf> {
    let home = directories::BaseDirs::new()?.home_dir().to_path_buf();
    let path = home.join(".cargo/bin/tiktoken-cli");
    path.is_file().then_some(path)
}

fn run_tokenizer(bin: &Path, model: &str, role: &str, text: &str) -> Option<u32> {
    let output = Command::new(bin)
        .args(["--role", role, "--model", model, "--text", text])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}
