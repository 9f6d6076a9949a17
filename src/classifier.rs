use crate::intent::words;

/// Suggests conversation tags and whether a human should take over.
pub trait Classifier: Send + Sync {
    fn suggest_tags(&self, text: &str) -> Vec<String>;

    fn transfer_target(&self, text: &str) -> Option<String>;
}

const HANDOVER_TERMS: &[&str] = &[
    "human",
    "real person",
    "representative",
    "live agent",
    "transfer",
    "handover",
    "talk to agent",
    "speak to agent",
    "speak with agent",
    "atendente",
    "falar com advogado",
    "falar com um advogado",
    "falar com uma pessoa",
    "pessoa real",
    "humano",
];

const PRACTICE_AREAS: &[(&str, &[&str])] = &[
    ("previdenciario", &["inss", "aposentadoria", "beneficio", "auxilio", "pensao"]),
    ("trabalhista", &["demissao", "rescisao", "fgts", "carteira assinada", "horas extras"]),
    ("familia", &["divorcio", "pensao alimenticia", "guarda", "inventario"]),
    ("consumidor", &["procon", "reembolso", "cobranca indevida", "produto com defeito"]),
];

pub struct KeywordClassifier {
    handover_terms: Vec<String>,
    transfer_target: String,
    tags: Vec<(String, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(
            HANDOVER_TERMS.iter().map(|term| term.to_string()).collect(),
            "human",
            PRACTICE_AREAS
                .iter()
                .map(|(tag, keywords)| {
                    (
                        tag.to_string(),
                        keywords.iter().map(|k| k.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

impl KeywordClassifier {
    pub fn new(
        handover_terms: Vec<String>,
        transfer_target: &str,
        tags: Vec<(String, Vec<String>)>,
    ) -> Self {
        Self {
            handover_terms: handover_terms.iter().map(|t| normalized(t)).collect(),
            transfer_target: transfer_target.to_string(),
            tags: tags
                .into_iter()
                .map(|(tag, keywords)| (tag, keywords.iter().map(|k| normalized(k)).collect()))
                .collect(),
        }
    }
}

impl Classifier for KeywordClassifier {
    fn suggest_tags(&self, text: &str) -> Vec<String> {
        let haystack = normalized(text);
        self.tags
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| contains_phrase(&haystack, k)))
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    fn transfer_target(&self, text: &str) -> Option<String> {
        let haystack = normalized(text);
        self.handover_terms
            .iter()
            .any(|term| contains_phrase(&haystack, term))
            .then(|| self.transfer_target.clone())
    }
}

fn normalized(text: &str) -> String {
    words(text).join(" ")
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    !phrase.is_empty() && format!(" {haystack} ").contains(&format!(" {phrase} "))
}
