//! Sliding-window context compression.
//!
//! Keeps a conversation under the configured token and message caps by
//! replacing the middle of the history with a single deterministic summary
//! message. No LLM call is involved.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::message::{Message, Role};

const STOP_WORDS: &[&str] = &[
    "的", "是", "在", "有", "和", "与", "或", "但", "而", "the", "is", "in", "and", "or", "but",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Retain 70% of the window.
    Low,
    /// Retain 50%.
    Medium,
    /// Retain 30%.
    High,
}

impl CompressionStrategy {
    pub fn retention_ratio(&self) -> f64 {
        match self {
            CompressionStrategy::Low => 0.7,
            CompressionStrategy::Medium => 0.5,
            CompressionStrategy::High => 0.3,
        }
    }

    /// Strategy selection by token usage ratio.
    pub fn for_usage(usage_ratio: f64) -> Self {
        if usage_ratio > 0.8 {
            CompressionStrategy::High
        } else if usage_ratio > 0.6 {
            CompressionStrategy::Medium
        } else {
            CompressionStrategy::Low
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    pub message_count: usize,
    pub estimated_tokens: usize,
    pub token_usage_ratio: f64,
    pub compression_needed: bool,
}

/// Telemetry record for one compression pass.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionRecord {
    pub role: String,
    pub content: String,
    pub original_length: usize,
    pub compressed_length: usize,
    pub compression_ratio: f64,
    pub is_compressed: bool,
}

/// In-memory summary of a conversation window. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub summary_id: String,
    pub session_id: String,
    pub content: String,
    pub key_topics: Vec<String>,
    pub important_points: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
    pub token_estimate: usize,
}

pub struct ContextManager {
    max_tokens: usize,
    max_messages: usize,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(20_000, 50)
    }
}

impl ContextManager {
    pub fn new(max_tokens: usize, max_messages: usize) -> Self {
        Self {
            max_tokens,
            max_messages,
        }
    }

    /// Token estimation: english bytes / 4 + CJK code points + other bytes / 4,
    /// minimum 1.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        let mut english_bytes = 0usize;
        let mut cjk_chars = 0usize;
        let mut other_bytes = 0usize;

        for ch in text.chars() {
            if ch.is_ascii_alphabetic() {
                english_bytes += 1;
            } else if ('\u{4e00}'..='\u{9fff}').contains(&ch) {
                cjk_chars += 1;
            } else {
                other_bytes += ch.len_utf8();
            }
        }

        (english_bytes / 4 + cjk_chars + other_bytes / 4).max(1)
    }

    pub fn status(&self, messages: &[Message]) -> ContextStatus {
        let estimated_tokens: usize = messages
            .iter()
            .map(|m| self.estimate_tokens(&m.content))
            .sum();
        let token_usage_ratio = estimated_tokens as f64 / self.max_tokens as f64;

        ContextStatus {
            message_count: messages.len(),
            estimated_tokens,
            token_usage_ratio,
            compression_needed: estimated_tokens > self.max_tokens
                || messages.len() > self.max_messages,
        }
    }

    /// Compress `messages` in place of the middle window.
    ///
    /// The first system message is retained, the most recent
    /// `ceil(N * ratio)` messages are retained, and everything in between is
    /// replaced by one synthetic system message carrying the summary.
    pub fn compress(
        &self,
        messages: &[Message],
        strategy: CompressionStrategy,
    ) -> (Vec<Message>, Vec<CompressionRecord>) {
        let total = messages.len();
        let keep = ((total as f64) * strategy.retention_ratio()).ceil() as usize;

        let (system, rest): (Option<&Message>, &[Message]) = match messages.first() {
            Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
            _ => (None, messages),
        };

        if rest.len() <= keep {
            return (messages.to_vec(), Vec::new());
        }

        let split = rest.len() - keep;
        let (middle, recent) = rest.split_at(split);

        let summary = self.summarize_window(middle);
        let original_length: usize = middle.iter().map(|m| m.content.len()).sum();
        let record = CompressionRecord {
            role: "system".to_string(),
            content: summary.clone(),
            original_length,
            compressed_length: summary.len(),
            compression_ratio: summary.len() as f64 / original_length.max(1) as f64,
            is_compressed: true,
        };

        let mut compressed = Vec::with_capacity(keep + 2);
        if let Some(system) = system {
            compressed.push(system.clone());
        }
        compressed.push(Message::system(format!("[上下文摘要] {summary}")));
        compressed.extend(recent.iter().cloned());

        log::info!(
            "上下文压缩完成: {} -> {} 条消息",
            total,
            compressed.len()
        );
        (compressed, vec![record])
    }

    pub fn generate_summary(&self, messages: &[Message], session_id: &str) -> ContextSummary {
        let key_topics = self.extract_key_topics(messages);
        let important_points = self.extract_important_points(messages);
        let total_content: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        ContextSummary {
            summary_id: format!("summary_{}_{}", session_id, Uuid::new_v4()),
            session_id: session_id.to_string(),
            content: self.summarize_window(messages),
            key_topics,
            important_points,
            created_at: Utc::now(),
            message_count: messages.len(),
            token_estimate: self.estimate_tokens(&total_content),
        }
    }

    fn summarize_window(&self, messages: &[Message]) -> String {
        if messages.is_empty() {
            return "无中间对话内容".to_string();
        }

        let user_text: String = join_contents(messages, Role::User);
        let assistant_text: String = join_contents(messages, Role::Assistant);
        let question_count = messages.iter().filter(|m| m.role == Role::User).count();

        let mut parts = Vec::new();
        let keywords = extract_keywords(&user_text);
        if !keywords.is_empty() {
            parts.push(format!("用户讨论了: {}", keywords.join(", ")));
        }
        let concepts = extract_concepts(&assistant_text);
        if !concepts.is_empty() {
            parts.push(format!("AI提供了: {}", concepts.join(", ")));
        }
        parts.push(format!("共{question_count}个问题"));

        parts.join("；")
    }

    fn extract_key_topics(&self, messages: &[Message]) -> Vec<String> {
        let mut topics = Vec::new();
        for message in messages {
            let words = match message.role {
                Role::User => extract_keywords(&message.content),
                Role::Assistant => extract_concepts(&message.content),
                _ => continue,
            };
            for word in words {
                if !topics.contains(&word) {
                    topics.push(word);
                }
            }
        }
        topics.truncate(10);
        topics
    }

    fn extract_important_points(&self, messages: &[Message]) -> Vec<String> {
        const MARKERS: &[&str] = &[
            "结论",
            "结果",
            "建议",
            "总结",
            "conclusion",
            "result",
            "recommendation",
            "summary",
        ];

        let mut points = Vec::new();
        for message in messages.iter().filter(|m| m.role == Role::Assistant) {
            let lowered = message.content.to_lowercase();
            if !MARKERS.iter().any(|marker| lowered.contains(marker)) {
                continue;
            }
            for sentence in message
                .content
                .split(|c| "。！？.!?".contains(c))
                .map(str::trim)
            {
                let lowered = sentence.to_lowercase();
                if MARKERS.iter().any(|marker| lowered.contains(marker)) {
                    points.push(sentence.chars().take(100).collect());
                    break;
                }
            }
            if points.len() >= 5 {
                break;
            }
        }
        points
    }
}

fn join_contents(messages: &[Message], role: Role) -> String {
    messages
        .iter()
        .filter(|m| m.role == role)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut current_is_cjk = false;

    for ch in text.chars() {
        let is_cjk = ('\u{4e00}'..='\u{9fff}').contains(&ch);
        if ch.is_ascii_alphanumeric() || is_cjk {
            if !current.is_empty() && current_is_cjk != is_cjk {
                words.push(std::mem::take(&mut current));
            }
            current_is_cjk = is_cjk;
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn extract_keywords(text: &str) -> Vec<String> {
    split_words(text)
        .into_iter()
        .filter(|word| word.chars().count() > 1 && !STOP_WORDS.contains(&word.as_str()))
        .take(5)
        .collect()
}

fn extract_concepts(text: &str) -> Vec<String> {
    split_words(text)
        .into_iter()
        .filter(|word| {
            let count = word.chars().count();
            if word.chars().all(|c| c.is_ascii()) {
                count >= 6
            } else {
                count >= 2
            }
        })
        .take(5)
        .collect()
}
