use tracing::debug;

use crate::config::EngineConfig;
use crate::model::{Candidate, RetrievedCode};

use super::icd::IcdNormalizer;
use super::rank::{dedupe_by_code, normalize_confidence, rank_candidates, sort_by_score};

const SUDDEN_ONSET_TERMS: &[&str] = &["внезап"];
const FACIAL_OR_SPEECH_TERMS: &[&str] = &["перекос", "нарушение речи"];

const NEUROLOGY_TERMS: &[&str] = &["перекос", "речь", "речи", "слабость"];
const ACUTE_ABDOMEN_TERMS: &[&str] = &["живот", "тошнота", "рвота"];

const RESPIRATORY_POOL_TERMS: &[&str] = &["кашель", "температур", "мокрот"];
const ABDOMINAL_POOL_TERMS: &[&str] = &["живот", "правой нижн"];
const OBSTETRIC_POOL_TERMS: &[&str] = &["беремен", "давление"];

const FALLBACK_EVIDENCE: &str = "Контекстный fallback";

struct SymptomHint {
    keyword: &'static str,
    codes: &'static [&'static str],
}

// Respiratory, cardiac, appendicitis and stroke clusters.
const SYMPTOM_HINTS: &[SymptomHint] = &[
    SymptomHint {
        keyword: "кашель",
        codes: &["J13", "J14", "J15", "J18"],
    },
    SymptomHint {
        keyword: "мокрот",
        codes: &["J13", "J18"],
    },
    SymptomHint {
        keyword: "одышк",
        codes: &["J13", "J18", "I50"],
    },
    SymptomHint {
        keyword: "боль в груди",
        codes: &["J13", "I21"],
    },
    SymptomHint {
        keyword: "правой нижн",
        codes: &["K35"],
    },
    SymptomHint {
        keyword: "перекос лица",
        codes: &["I63", "I61"],
    },
    SymptomHint {
        keyword: "нарушение речи",
        codes: &["I63"],
    },
];

/// Coarse clinical category of a query; selects the blacklist.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueryContext {
    Neurology,
    AcuteAbdomen,
    General,
}

impl QueryContext {
    /// First matching rule wins.
    pub fn detect(query: &str) -> Self {
        let lowered = query.to_lowercase();
        if contains_any(&lowered, NEUROLOGY_TERMS) {
            Self::Neurology
        } else if contains_any(&lowered, ACUTE_ABDOMEN_TERMS) {
            Self::AcuteAbdomen
        } else {
            Self::General
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neurology => "neurology",
            Self::AcuteAbdomen => "acute_abdomen",
            Self::General => "general",
        }
    }

    /// Diagnosis-name fragments implausible under this context.
    pub fn blacklist(self) -> &'static [&'static str] {
        match self {
            Self::Neurology => &["тиреоидит"],
            Self::AcuteAbdomen => &["астма", "анафилак"],
            Self::General => &[],
        }
    }

    pub fn is_blacklisted(self, diagnosis_name: &str) -> bool {
        let lowered = diagnosis_name.to_lowercase();
        contains_any(&lowered, self.blacklist())
    }
}

/// Static backfill pools, chosen by their own keyword rules.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FallbackPool {
    Respiratory,
    Abdominal,
    ObstetricHypertensive,
    General,
}

impl FallbackPool {
    pub fn detect(query: &str) -> Self {
        let lowered = query.to_lowercase();
        if contains_any(&lowered, RESPIRATORY_POOL_TERMS) {
            Self::Respiratory
        } else if contains_any(&lowered, ABDOMINAL_POOL_TERMS) {
            Self::Abdominal
        } else if contains_any(&lowered, OBSTETRIC_POOL_TERMS) {
            Self::ObstetricHypertensive
        } else {
            Self::General
        }
    }

    pub fn entries(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Respiratory => &[
                ("Внебольничная пневмония", "J18"),
                ("Острый бронхит", "J20"),
                ("ОРВИ", "J06"),
            ],
            Self::Abdominal => &[
                ("Острый аппендицит", "K35"),
                ("Гастроэнтерит", "A09"),
                ("Кишечная колика", "K59"),
            ],
            Self::ObstetricHypertensive => &[
                ("Преэклампсия", "O14"),
                ("HELLP-синдром", "O14"),
                ("Гипертензия при беременности", "O10"),
            ],
            Self::General => &[
                ("Артериальная гипертензия", "I10"),
                ("Астенический синдром", "R53"),
                ("Вегетативная дисфункция", "G90"),
            ],
        }
    }
}

/// Deterministic clinical rules applied around retrieval.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    codes: IcdNormalizer,
    rule_boost_unit: f64,
    fallback_score: f64,
}

impl RuleEngine {
    pub fn new(codes: IcdNormalizer, config: &EngineConfig) -> Self {
        Self {
            codes,
            rule_boost_unit: config.rule_boost_unit,
            fallback_score: config.fallback_score,
        }
    }

    /// Sudden onset together with facial asymmetry or speech disturbance
    /// returns the fixed stroke triad, bypassing retrieval entirely.
    pub fn emergency_override(&self, query: &str) -> Option<Vec<Candidate>> {
        let lowered = query.to_lowercase();
        if !(contains_any(&lowered, SUDDEN_ONSET_TERMS)
            && contains_any(&lowered, FACIAL_OR_SPEECH_TERMS))
        {
            return None;
        }

        Some(vec![
            Candidate::new(
                "Ишемический инсульт",
                "I63",
                "emergency_stroke",
                1.0,
                vec!["Экстренное правило: подозрение на инсульт".to_string()],
            ),
            Candidate::new(
                "Транзиторная ишемическая атака",
                "G45",
                "fallback_tia",
                0.7,
                vec!["Дифференциальная диагностика".to_string()],
            ),
            Candidate::new(
                "Гипертонический криз",
                "I16",
                "fallback_htn",
                0.6,
                vec!["Возможный триггер симптомов".to_string()],
            ),
        ])
    }

    pub fn keyword_boost(&self, query: &str, icd10_code: &str) -> f64 {
        let lowered = query.to_lowercase();
        SYMPTOM_HINTS
            .iter()
            .filter(|hint| lowered.contains(hint.keyword))
            .filter(|hint| {
                hint.codes
                    .iter()
                    .any(|category| self.codes.in_category(icd10_code, category))
            })
            .count() as f64
            * self.rule_boost_unit
    }

    /// Fallback candidates for codes not yet in `present`, each pool code
    /// used at most once. A pool category is also skipped when one of its
    /// subcodes is already present (`K35` after `K35.8`).
    pub fn contextual_fallback(&self, query: &str, present: &[Candidate]) -> Vec<Candidate> {
        let mut used = present
            .iter()
            .map(|candidate| self.codes.canonical(&candidate.icd10_code))
            .collect::<Vec<String>>();

        let mut fallback = Vec::<Candidate>::new();
        for (name, code) in FallbackPool::detect(query).entries() {
            let code = self.codes.canonical(code);
            if used
                .iter()
                .any(|existing| self.codes.in_category(existing, &code))
            {
                continue;
            }

            used.push(code.clone());
            fallback.push(Candidate::new(
                *name,
                code,
                "context_fallback",
                self.fallback_score,
                vec![FALLBACK_EVIDENCE.to_string()],
            ));
        }
        fallback
    }

    /// Context → blacklist → boost → dedupe/sort → fallback if short →
    /// truncate → normalize.
    pub fn build_diagnoses(
        &self,
        query: &str,
        retrieved: &[RetrievedCode],
        top_k: usize,
    ) -> Vec<Candidate> {
        let context = QueryContext::detect(query);

        let mut candidates = Vec::<Candidate>::with_capacity(retrieved.len());
        for item in retrieved {
            if context.is_blacklisted(&item.title) {
                debug!(
                    context = context.as_str(),
                    code = %item.icd10_code,
                    name = %item.title,
                    "candidate dropped by context blacklist"
                );
                continue;
            }

            let boost = self.keyword_boost(query, &item.icd10_code);
            let evidence = if item.evidence.is_empty() {
                vec![item.explanation()]
            } else {
                item.evidence.clone()
            };
            candidates.push(Candidate::new(
                item.title.clone(),
                item.icd10_code.clone(),
                item.protocol_id.clone(),
                item.score + boost,
                evidence,
            ));
        }

        let mut candidates = dedupe_by_code(&self.codes, candidates);
        sort_by_score(&mut candidates);

        if candidates.len() < top_k {
            let fallback = self.contextual_fallback(query, &candidates);
            debug!(
                context = context.as_str(),
                retrieved = candidates.len(),
                fallback = fallback.len(),
                "backfilling with contextual fallback"
            );
            candidates.extend(fallback);
            sort_by_score(&mut candidates);
        }

        self.finalize(candidates, top_k)
    }

    pub fn finalize(&self, candidates: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
        let mut ranked = rank_candidates(&self.codes, candidates, top_k);
        normalize_confidence(&mut ranked);
        ranked
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
