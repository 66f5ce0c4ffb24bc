//! Keyword lexicon and severity scorer.
//!
//! Deterministic, case-insensitive hazard keyword matching against a fixed
//! per-language table. Always available, no I/O.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use regex::RegexSet;

use crate::error::Result;

/// Severity floor when a high-severity keyword matches.
pub const HIGH_SEVERITY: u8 = 8;
/// Severity floor when a medium-severity keyword matches.
pub const MEDIUM_SEVERITY: u8 = 5;
/// Severity floor when any other keyword matches.
pub const ANY_MATCH_SEVERITY: u8 = 3;
/// Severity when nothing matches.
pub const NO_MATCH_SEVERITY: u8 = 1;

/// Languages with a keyword table. Unsupported codes map to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    English,
    Hindi,
    Tamil,
    Telugu,
    Bengali,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::English,
        Language::Hindi,
        Language::Tamil,
        Language::Telugu,
        Language::Bengali,
    ];

    /// Resolve an ISO 639-1 code, falling back to English.
    ///
    /// ```
    /// use tidewatch::lexicon::Language;
    ///
    /// assert_eq!(Language::from_code("ta"), Language::Tamil);
    /// assert_eq!(Language::from_code("HI"), Language::Hindi);
    /// assert_eq!(Language::from_code("fr"), Language::English);
    /// ```
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "hi" => Self::Hindi,
            "ta" => Self::Tamil,
            "te" => Self::Telugu,
            "bn" => Self::Bengali,
            _ => Self::English,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Hindi => "hi",
            Self::Tamil => "ta",
            Self::Telugu => "te",
            Self::Bengali => "bn",
        }
    }

    fn table(&self) -> &'static [(&'static str, Tier)] {
        match self {
            Self::English => ENGLISH,
            Self::Hindi => HINDI,
            Self::Tamil => TAMIL,
            Self::Telugu => TELUGU,
            Self::Bengali => BENGALI,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Severity tier of a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Any,
    Medium,
    High,
}

impl Tier {
    fn severity(self) -> u8 {
        match self {
            Tier::High => HIGH_SEVERITY,
            Tier::Medium => MEDIUM_SEVERITY,
            Tier::Any => ANY_MATCH_SEVERITY,
        }
    }
}

const ENGLISH: &[(&str, Tier)] = &[
    ("tsunami", Tier::High),
    ("flood", Tier::Medium),
    ("wave", Tier::Any),
    ("tide", Tier::Any),
    ("erosion", Tier::Any),
    ("storm", Tier::Medium),
    ("cyclone", Tier::Medium),
    ("hurricane", Tier::Any),
    ("damage", Tier::Any),
    ("danger", Tier::Any),
    ("warning", Tier::Any),
    ("evacuate", Tier::High),
    ("emergency", Tier::High),
];

const HINDI: &[(&str, Tier)] = &[
    ("सुनामी", Tier::High),
    ("बाढ़", Tier::Medium),
    ("लहर", Tier::Any),
    ("ज्वार", Tier::Any),
    ("कटाव", Tier::Any),
    ("तूफान", Tier::Any),
    ("चक्रवात", Tier::Any),
    ("खतरा", Tier::Any),
    ("चेतावनी", Tier::Any),
    ("आपातकाल", Tier::Any),
];

const TAMIL: &[(&str, Tier)] = &[
    ("சுனாமி", Tier::High),
    ("வெள்ளம்", Tier::Medium),
    ("அலை", Tier::Any),
    ("ஓதம்", Tier::Any),
    ("அரிப்பு", Tier::Any),
    ("புயல்", Tier::Any),
    ("சூறாவளி", Tier::Any),
    ("ஆபத்து", Tier::Any),
    ("எச்சரிக்கை", Tier::Any),
];

const TELUGU: &[(&str, Tier)] = &[
    ("సునామి", Tier::High),
    ("వరద", Tier::Medium),
    ("అల", Tier::Any),
    ("ఓడ", Tier::Any),
    ("కోత", Tier::Any),
    ("తుఫాను", Tier::Any),
    ("చక్రవాతం", Tier::Any),
    ("ప్రమాదం", Tier::Any),
    ("హెచ్చరిక", Tier::Any),
];

const BENGALI: &[(&str, Tier)] = &[
    ("সুনামি", Tier::High),
    ("বন্যা", Tier::Medium),
    ("তরঙ্গ", Tier::Any),
    ("জোয়ার", Tier::Any),
    ("ক্ষয়", Tier::Any),
    ("ঝড়", Tier::Any),
    ("ঘূর্ণিঝড়", Tier::Any),
    ("বিপদ", Tier::Any),
    ("সতর্কতা", Tier::Any),
];

/// Keywords found in a text and the severity floor they imply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keywords: BTreeSet<String>,
    /// 1, 3, 5 or 8.
    pub severity: u8,
}

struct CompiledTable {
    set: RegexSet,
    entries: &'static [(&'static str, Tier)],
}

/// Compiled keyword matcher for every supported language.
pub struct KeywordScorer {
    tables: HashMap<Language, CompiledTable>,
}

impl KeywordScorer {
    /// Compile the keyword tables.
    pub fn new() -> Result<Self> {
        let mut tables = HashMap::with_capacity(Language::ALL.len());
        for language in Language::ALL {
            let entries = language.table();
            let patterns = entries
                .iter()
                .map(|(keyword, _)| format!("(?i){}", regex::escape(keyword)));
            tables.insert(
                language,
                CompiledTable {
                    set: RegexSet::new(patterns)?,
                    entries,
                },
            );
        }
        Ok(Self { tables })
    }

    /// Match `text` against the lexicon for `language_code`.
    pub fn score(&self, text: &str, language_code: &str) -> KeywordMatch {
        self.score_language(text, Language::from_code(language_code))
    }

    pub fn score_language(&self, text: &str, language: Language) -> KeywordMatch {
        let Some(table) = self.tables.get(&language) else {
            return KeywordMatch {
                keywords: BTreeSet::new(),
                severity: NO_MATCH_SEVERITY,
            };
        };

        let mut keywords = BTreeSet::new();
        let mut top: Option<Tier> = None;
        for index in table.set.matches(text).iter() {
            let (keyword, tier) = table.entries[index];
            keywords.insert(keyword.to_string());
            top = top.max(Some(tier));
        }

        KeywordMatch {
            keywords,
            severity: top.map(Tier::severity).unwrap_or(NO_MATCH_SEVERITY),
        }
    }
}
