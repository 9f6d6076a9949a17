//! Detects requests for tool automations in free text.
//!
//! Matching is pure: no I/O, no shared state. A message is first scanned for
//! action phrases; each phrase picks its best-scoring tool. When no phrase is
//! found the whole message is scored against the tools instead.

use std::collections::BTreeSet;

use regex::Regex;
use uuid::Uuid;

use crate::types::{MatchKind, ToolCall, ToolDefinition};

pub const PHRASE_THRESHOLD: f64 = 0.3;
pub const CONTEXTUAL_THRESHOLD: f64 = 0.4;

const SALIENT_TERM_BONUS: f64 = 0.15;
const MAX_ACTION_CHARS: usize = 160;

// Ordered: earlier patterns claim their span first.
const ACTION_PATTERNS: &[&str] = &[
    // polite requests
    r"(?i)\b(?:pode|poderia|podes|consegue|conseguiria)\s+(?:me\s+|por\s+favor\s+)*(?P<action>\p{L}{3,}[^?!;\n]*)",
    r"(?i)\b(?:can|could|would)\s+you\s+(?:please\s+)?(?P<action>\p{L}{3,}[^?!;\n]*)",
    // formal petitions
    r"(?i)\b(?:solicito|requeiro|gostaria\s+de|preciso(?:\s+de)?|quero|desejo)\s+(?:que\s+)?(?P<action>\p{L}{2,}[^?!;\n]*)",
    r"(?i)\b(?:i\s+need\s+(?:to\s+)?|i\s+would\s+like\s+(?:to\s+)?|please\s+)(?P<action>\p{L}{3,}[^?!;\n]*)",
    // "how do I ..."
    r"(?i)\bcomo\s+(?:eu\s+)?(?:fa[çc]o\s+para|posso|consigo|fa[çc]o)\s+(?P<action>\p{L}{3,}[^?!;\n]*)",
    r"(?i)\bhow\s+(?:do|can|should)\s+i\s+(?P<action>\p{L}{3,}[^?!;\n]*)",
    // imperatives
    r"(?i)\b(?P<action>(?:consulte|consultar|verifique|verificar|gere|gerar|calcule|calcular|envie|enviar|emita|emitir|busque|buscar|agende|agendar|crie|criar|send|generate|calculate|check|look\s+up)\b[^?!;\n]*)",
];

const SALIENT_TERMS: &[&str] = &[
    "cpf", "cnpj", "rg", "oab", "cep", "nis", "pis", "processo", "consultar", "gerar", "calcular",
    "enviar", "emitir", "agendar", "generate", "calculate", "send",
];

struct KeywordFamily {
    keywords: &'static [&'static str],
    weight: f64,
}

const KEYWORD_FAMILIES: &[KeywordFamily] = &[
    // identity document lookups
    KeywordFamily {
        keywords: &["cpf", "cnpj", "rg", "identidade", "documento", "documentos", "certidao"],
        weight: 0.3,
    },
    // document generation
    KeywordFamily {
        keywords: &[
            "gerar", "gere", "contrato", "procuracao", "peticao", "minuta", "declaracao", "modelo",
        ],
        weight: 0.25,
    },
    // notifications and email
    KeywordFamily {
        keywords: &[
            "email", "enviar", "envie", "notificar", "notificacao", "mensagem", "avisar", "lembrete",
        ],
        weight: 0.2,
    },
    // benefit calculations
    KeywordFamily {
        keywords: &[
            "calcular", "calcule", "calculo", "beneficio", "aposentadoria", "inss", "rescisao",
            "pensao", "fgts",
        ],
        weight: 0.3,
    },
];

/// An action phrase located in a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPhrase {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

pub struct IntentMatcher {
    patterns: Vec<Regex>,
}

impl Default for IntentMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentMatcher {
    pub fn new() -> Self {
        let patterns = ACTION_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        Self { patterns }
    }

    /// Non-overlapping action phrases in message order.
    pub fn detect_actions(&self, message: &str) -> Vec<ActionPhrase> {
        let mut found = Vec::<ActionPhrase>::new();
        for pattern in &self.patterns {
            for caps in pattern.captures_iter(message) {
                let Some(action) = caps.name("action") else {
                    continue;
                };
                let text = clip_action(action.as_str());
                if tokens(&text).is_empty() {
                    continue;
                }
                let start = action.start();
                let end = start + text.len();
                if found.iter().any(|prior| start < prior.end && prior.start < end) {
                    continue;
                }
                found.push(ActionPhrase { text, start, end });
            }
        }
        found.sort_by_key(|phrase| phrase.start);
        found
    }

    /// Candidate tool calls for a message. An empty result is a normal outcome.
    pub fn match_tools(&self, message: &str, tools: &[ToolDefinition]) -> Vec<ToolCall> {
        if tools.is_empty() || message.trim().is_empty() {
            return vec![];
        }

        let actions = self.detect_actions(message);
        if actions.is_empty() {
            return contextual_match(message, tools).into_iter().collect();
        }

        actions
            .iter()
            .filter_map(|action| {
                let (tool, score) = best_tool(tools, |tool| {
                    phrase_score(&action.text, &tool.match_text())
                })?;
                if score < PHRASE_THRESHOLD {
                    return None;
                }
                Some(tool_call(tool, &action.text, score, MatchKind::Phrase))
            })
            .collect()
    }
}

fn contextual_match(message: &str, tools: &[ToolDefinition]) -> Option<ToolCall> {
    let (tool, score) = best_tool(tools, |tool| contextual_score(message, &tool.match_text()))?;
    if score <= CONTEXTUAL_THRESHOLD {
        return None;
    }
    Some(tool_call(tool, message.trim(), score, MatchKind::Contextual))
}

/// Highest score wins; ties keep the first tool encountered.
fn best_tool<'a>(
    tools: &'a [ToolDefinition],
    score: impl Fn(&ToolDefinition) -> f64,
) -> Option<(&'a ToolDefinition, f64)> {
    let mut best: Option<(&ToolDefinition, f64)> = None;
    for tool in tools {
        let value = score(tool);
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((tool, value)),
        }
    }
    best
}

fn tool_call(tool: &ToolDefinition, description: &str, score: f64, kind: MatchKind) -> ToolCall {
    ToolCall {
        tool_name: tool.name.clone(),
        matched_description: description.to_string(),
        correlation_id: Uuid::new_v4().to_string(),
        tool: tool.clone(),
        score,
        kind,
    }
}

/// Token overlap plus a bonus per salient term present in both texts.
pub fn phrase_score(action: &str, tool_text: &str) -> f64 {
    let action_words = words(action);
    let tool_words = words(tool_text);
    let shared_salient = SALIENT_TERMS
        .iter()
        .filter(|term| {
            action_words.iter().any(|w| w == *term) && tool_words.iter().any(|w| w == *term)
        })
        .count();
    let score = jaccard(&tokens(action), &tokens(tool_text))
        + SALIENT_TERM_BONUS * shared_salient as f64;
    score.min(1.0)
}

/// Token overlap plus the weight of every keyword family both texts mention.
pub fn contextual_score(message: &str, tool_text: &str) -> f64 {
    let message_words = words(message);
    let tool_words = words(tool_text);
    let family_bonus: f64 = KEYWORD_FAMILIES
        .iter()
        .filter(|family| {
            mentions(&message_words, family.keywords) && mentions(&tool_words, family.keywords)
        })
        .map(|family| family.weight)
        .sum();
    (jaccard(&tokens(message), &tokens(tool_text)) + family_bonus).min(1.0)
}

fn mentions(words: &[String], keywords: &[&str]) -> bool {
    words.iter().any(|w| keywords.contains(&w.as_str()))
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Lowercased, accent-folded words with punctuation removed.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn tokens(text: &str) -> BTreeSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 2)
        .collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Cut a raw capture at the first sentence break and trim trailing punctuation.
fn clip_action(raw: &str) -> String {
    let mut text = raw;
    if let Some(idx) = text.find(". ") {
        text = &text[..idx];
    }
    let text = text.trim_end_matches(|c: char| c == '.' || c == ',' || c.is_whitespace());
    text.chars().take(MAX_ACTION_CHARS).collect::<String>().trim().to_string()
}
