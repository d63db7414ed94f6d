//! Deterministic prompt construction.
//!
//! Composes the system preamble, one-phrase ability / emotion / difficulty
//! summaries, the context block (recent then relevant, with role markers
//! and timestamps) and the learner's message. Context is trimmed oldest
//! first until the prompt fits the input-side token allowance. Same
//! inputs, byte-identical prompt.

use sage_context::AssembledContext;
use sage_core::{
    AbilityEstimate, DifficultyLevel, EmotionResult, Message, Role, TokenBudget,
};

const SYSTEM_PREAMBLE: &str = "You are Sage, an adaptive tutor. Answer the learner's question \
directly, matching the requested difficulty, and keep an encouraging tone.";

pub struct PromptInputs<'a> {
    pub user_message: &'a str,
    pub emotion: &'a EmotionResult,
    pub ability: &'a AbilityEstimate,
    pub difficulty: DifficultyLevel,
    pub context: &'a AssembledContext,
}

fn ability_phrase(ability: &AbilityEstimate) -> String {
    format!(
        "Learner ability in {}: {:.2} on a 0-1 scale over {} observations.",
        ability.subject, ability.theta, ability.sample_count
    )
}

fn emotion_phrase(emotion: &EmotionResult) -> String {
    format!(
        "Learner state: {} (readiness {:?}, cognitive load {:?}).",
        emotion.primary_emotion, emotion.learning_readiness, emotion.cognitive_load
    )
}

fn difficulty_phrase(level: DifficultyLevel) -> String {
    format!("Difficulty: {}.", level.directive())
}

fn context_line(msg: &Message) -> String {
    let role = match msg.role {
        Role::User => "learner",
        Role::Assistant => "tutor",
    };
    format!(
        "[{} @ {}] {}",
        role,
        msg.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        msg.content
    )
}

fn estimate_tokens(text: &str) -> u32 {
    ((text.len() / 4).max(1)) as u32
}

/// Build the final prompt, fitting the input allowance
/// `budget.total() - budget.response_tokens - safety_margin`.
pub fn build_prompt(inputs: &PromptInputs<'_>, budget: &TokenBudget, safety_margin: u32) -> String {
    let allowance = budget
        .total()
        .saturating_sub(budget.response_tokens)
        .saturating_sub(safety_margin)
        .max(1);

    // Context entries carry (timestamp, rendered line); trimming drops the
    // oldest entry first, regardless of which set it came from.
    let mut recent: Vec<&Message> = inputs.context.recent.iter().collect();
    let mut relevant: Vec<&Message> = inputs.context.relevant.iter().collect();

    loop {
        let prompt = render(inputs, &recent, &relevant);
        if estimate_tokens(&prompt) <= allowance || (recent.is_empty() && relevant.is_empty()) {
            return prompt;
        }
        let oldest_recent = recent.first().map(|m| m.timestamp);
        let oldest_relevant = relevant.last().map(|m| m.timestamp);
        match (oldest_recent, oldest_relevant) {
            (Some(a), Some(b)) if a <= b => {
                recent.remove(0);
            }
            (Some(_), Some(_)) | (None, Some(_)) => {
                relevant.pop();
            }
            (Some(_), None) => {
                recent.remove(0);
            }
            (None, None) => unreachable!("loop guard"),
        }
    }
}

fn render(inputs: &PromptInputs<'_>, recent: &[&Message], relevant: &[&Message]) -> String {
    let mut out = String::new();
    out.push_str(SYSTEM_PREAMBLE);
    out.push_str("\n\n");
    out.push_str(&ability_phrase(inputs.ability));
    out.push('\n');
    out.push_str(&emotion_phrase(inputs.emotion));
    out.push('\n');
    out.push_str(&difficulty_phrase(inputs.difficulty));
    out.push('\n');

    if !recent.is_empty() {
        out.push_str("\nRecent conversation:\n");
        for msg in recent {
            out.push_str(&context_line(msg));
            out.push('\n');
        }
    }
    if !relevant.is_empty() {
        out.push_str("\nRelated earlier discussion:\n");
        for msg in relevant {
            out.push_str(&context_line(msg));
            out.push('\n');
        }
    }

    out.push_str("\nLearner question: ");
    out.push_str(inputs.user_message);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn ability() -> AbilityEstimate {
        AbilityEstimate {
            user_id: "u".into(),
            subject: "biology".into(),
            theta: 0.42,
            confidence: 0.3,
            sample_count: 7,
            last_updated: Utc::now(),
        }
    }

    fn budget(total_reasoning: u32) -> TokenBudget {
        TokenBudget {
            reasoning_tokens: total_reasoning,
            response_tokens: 512,
            provider_max_tokens: 32_768,
            utilization: 0.1,
        }
    }

    fn message(content: &str, offset_ms: i64) -> Message {
        let mut m = Message::user(Uuid::nil(), "u", content);
        m.timestamp = chrono::DateTime::from_timestamp(1_700_000_000 + offset_ms, 0).unwrap();
        m
    }

    #[test]
    fn same_inputs_byte_identical_prompt() {
        let emotion = EmotionResult::neutral();
        let ability = ability();
        let ctx = AssembledContext {
            recent: vec![message("earlier question", 0)],
            relevant: vec![],
        };
        let inputs = PromptInputs {
            user_message: "What is osmosis?",
            emotion: &emotion,
            ability: &ability,
            difficulty: DifficultyLevel::Moderate,
            context: &ctx,
        };
        let a = build_prompt(&inputs, &budget(2048), 128);
        let b = build_prompt(&inputs, &budget(2048), 128);
        assert_eq!(a, b);
        assert!(a.contains("What is osmosis?"));
        assert!(a.contains("biology"));
        assert!(a.contains("earlier question"));
    }

    #[test]
    fn trims_oldest_context_first() {
        let emotion = EmotionResult::neutral();
        let ability = ability();
        let ctx = AssembledContext {
            recent: vec![
                message(&format!("oldest {}", "x".repeat(600)), 0),
                message("newest question", 100),
            ],
            relevant: vec![],
        };
        let inputs = PromptInputs {
            user_message: "short",
            emotion: &emotion,
            ability: &ability,
            difficulty: DifficultyLevel::Easy,
            context: &ctx,
        };
        // Tight input allowance: total 812 - response 512 - margin 64
        // leaves ~236 tokens, not enough for the long oldest message.
        let tight = TokenBudget {
            reasoning_tokens: 300,
            response_tokens: 512,
            provider_max_tokens: 32_768,
            utilization: 0.1,
        };
        let prompt = build_prompt(&inputs, &tight, 64);
        assert!(!prompt.contains("oldest"));
        assert!(prompt.contains("newest question"));
    }

    #[test]
    fn user_message_always_survives_trimming() {
        let emotion = EmotionResult::neutral();
        let ability = ability();
        let ctx = AssembledContext {
            recent: (0..10).map(|i| message(&"c".repeat(200), i)).collect(),
            relevant: vec![message(&"r".repeat(200), -50)],
        };
        let inputs = PromptInputs {
            user_message: "the actual question",
            emotion: &emotion,
            ability: &ability,
            difficulty: DifficultyLevel::Hard,
            context: &ctx,
        };
        let tiny = TokenBudget {
            reasoning_tokens: 520,
            response_tokens: 512,
            provider_max_tokens: 32_768,
            utilization: 0.1,
        };
        let prompt = build_prompt(&inputs, &tiny, 4);
        assert!(prompt.contains("the actual question"));
        assert!(!prompt.contains("ccccc"));
        assert!(!prompt.contains("rrrrr"));
    }
}
