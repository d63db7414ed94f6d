//! Token budget allocation: estimate query complexity, split the
//! provider's window between reasoning and response, and enforce the
//! budget invariants.

use sage_affect::heads::LinearRegressor;
use sage_core::{AbilityEstimate, CognitiveLoad, EmotionResult, LearningReadiness, TokenBudget};

/// Clamps lifted from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BudgetParams {
    pub min_reasoning: u32,
    pub max_reasoning: u32,
    pub min_response: u32,
    pub max_response: u32,
}

/// Complexity features, in the order the regressor artifact declares:
/// normalized length, question-word presence, math markers, code markers,
/// abstractness indicators, normalized average word length.
pub fn complexity_features(query: &str) -> Vec<f32> {
    const QUESTION_WORDS: [&str; 8] =
        ["what", "why", "how", "when", "where", "which", "explain", "prove"];
    const MATH_MARKERS: [&str; 8] = [
        "equation", "integral", "derivative", "theorem", "solve", "matrix", "=", "∑",
    ];
    const CODE_MARKERS: [&str; 8] = ["```", "fn ", "def ", "class ", "function", "{", ";", "()"];
    const ABSTRACT_WORDS: [&str; 8] = [
        "concept", "theory", "abstract", "meaning", "philosophy", "principle", "implication",
        "tradeoff",
    ];

    let lower = query.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let length_norm = (query.len() as f32 / 1000.0).min(1.0);
    let count = |set: &[&str]| set.iter().filter(|m| lower.contains(**m)).count() as f32;
    let question_words = (count(&QUESTION_WORDS) / 3.0).min(1.0);
    let math_markers = (count(&MATH_MARKERS) / 3.0).min(1.0);
    let code_markers = (count(&CODE_MARKERS) / 3.0).min(1.0);
    let abstractness = (count(&ABSTRACT_WORDS) / 3.0).min(1.0);
    let avg_word_len = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.len()).sum::<usize>() as f32 / words.len() as f32
    };
    let avg_word_len_norm = (avg_word_len / 10.0).min(1.0);

    vec![
        length_norm,
        question_words,
        math_markers,
        code_markers,
        abstractness,
        avg_word_len_norm,
    ]
}

/// Estimate query complexity in [0, 1] via the registry-loaded regressor,
/// or — when no artifact is available — a documented fallback: the mean of
/// the feature vector, which rises with length, question density and
/// technical markers.
pub fn estimate_complexity(query: &str, regressor: Option<&LinearRegressor>) -> f32 {
    let features = complexity_features(query);
    if let Some(model) = regressor
        && let Ok(value) = model.predict(&features)
    {
        return value.clamp(0.0, 1.0);
    }
    let mean = features.iter().sum::<f32>() / features.len() as f32;
    mean.clamp(0.0, 1.0)
}

fn emotion_factor(emotion: &EmotionResult) -> f64 {
    // Confused or frustrated learners get more reasoning room; bored or
    // overwhelmed ones get less.
    match emotion.primary_emotion.as_str() {
        "confusion" | "annoyance" | "anger" | "disappointment" | "nervousness" => 1.2,
        "boredom" => 0.8,
        _ if emotion.cognitive_load == CognitiveLoad::Overload => 0.8,
        _ => 1.0,
    }
}

fn load_factor(load: CognitiveLoad) -> f64 {
    match load {
        CognitiveLoad::Minimal => 1.2,
        CognitiveLoad::Low => 1.1,
        CognitiveLoad::Moderate => 1.0,
        CognitiveLoad::High => 0.9,
        CognitiveLoad::Overload => 0.8,
    }
}

fn readiness_factor(readiness: LearningReadiness) -> f64 {
    match readiness {
        LearningReadiness::NotReady => 0.8,
        LearningReadiness::Low => 0.9,
        LearningReadiness::Moderate => 1.0,
        LearningReadiness::High => 1.1,
        LearningReadiness::Optimal => 1.2,
    }
}

/// Allocate the token budget for one request against a provider window.
///
/// Invariants on the result: `reasoning + response <= provider_max` and
/// `response >= min_response` (provided the window itself admits it).
pub fn allocate(
    query: &str,
    emotion: &EmotionResult,
    _ability: &AbilityEstimate,
    provider_max: u32,
    params: &BudgetParams,
    regressor: Option<&LinearRegressor>,
) -> TokenBudget {
    let complexity = estimate_complexity(query, regressor) as f64;

    let min_r = params.min_reasoning as f64;
    let max_r = params.max_reasoning as f64;
    let base_reasoning = min_r + (max_r - min_r) * complexity;

    let factors = emotion_factor(emotion)
        * load_factor(emotion.cognitive_load)
        * readiness_factor(emotion.learning_readiness);
    let mut reasoning = (base_reasoning * factors).clamp(min_r, max_r) as u32;

    let mut response = (provider_max.saturating_sub(reasoning))
        .clamp(params.min_response, params.max_response);

    // Over-committed window: scale both down proportionally, then give the
    // response floor the last word.
    let total = reasoning + response;
    if total > provider_max {
        let scale = provider_max as f64 / total as f64;
        reasoning = (reasoning as f64 * scale) as u32;
        response = (response as f64 * scale) as u32;
        if response < params.min_response {
            response = params.min_response.min(provider_max);
            reasoning = provider_max.saturating_sub(response);
        }
    }

    TokenBudget {
        reasoning_tokens: reasoning,
        response_tokens: response,
        provider_max_tokens: provider_max,
        utilization: (reasoning + response) as f64 / provider_max.max(1) as f64,
    }
}

/// Refit an allocated budget onto a specific provider's window, keeping
/// the invariants.
pub fn fit_to(budget: &TokenBudget, provider_max: u32, params: &BudgetParams) -> TokenBudget {
    if budget.total() <= provider_max {
        return TokenBudget {
            provider_max_tokens: provider_max,
            utilization: budget.total() as f64 / provider_max.max(1) as f64,
            ..*budget
        };
    }
    let scale = provider_max as f64 / budget.total() as f64;
    let mut reasoning = (budget.reasoning_tokens as f64 * scale) as u32;
    let mut response = (budget.response_tokens as f64 * scale) as u32;
    if response < params.min_response {
        response = params.min_response.min(provider_max);
        reasoning = provider_max.saturating_sub(response);
    }
    TokenBudget {
        reasoning_tokens: reasoning,
        response_tokens: response,
        provider_max_tokens: provider_max,
        utilization: (reasoning + response) as f64 / provider_max.max(1) as f64,
    }
}
