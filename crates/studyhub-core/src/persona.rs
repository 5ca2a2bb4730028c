//! The persona catalog.
//!
//! Each persona is a fixed assistant identity: a display name, the model it
//! talks to, and the system instruction that keeps it inside its own domain.
//! The catalog is static; selecting a persona is a lookup by [`PersonaId`].

use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// Model used for code and step-by-step problem solving.
pub const PRO_MODEL: &str = "gemini-3-pro-preview";

/// Model used for the lighter conversational personas.
pub const FLASH_MODEL: &str = "gemini-3-flash-preview";

/// Identifier of a persona.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PersonaId {
    /// "Chef Code": C, Python and logic circuits.
    #[default]
    Coding,
    /// "L-Akhas": course summaries and flashcards.
    Resume,
    /// "Speech": slide structure.
    Presentation,
    /// "L-Monadhem": study schedules.
    Organizer,
    /// "Exper Quizzat": the quiz persona.
    Quizz,
    /// "Sallak El Exercices": exercise solver.
    Exercices,
}

impl PersonaId {
    /// Every persona id, in catalog order.
    pub const ALL: [Self; 6] = [
        Self::Coding,
        Self::Resume,
        Self::Presentation,
        Self::Organizer,
        Self::Quizz,
        Self::Exercices,
    ];

    /// Returns the canonical upper-case identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "CODING",
            Self::Resume => "RESUME",
            Self::Presentation => "PRESENTATION",
            Self::Organizer => "ORGANIZER",
            Self::Quizz => "QUIZZ",
            Self::Exercices => "EXERCICES",
        }
    }

    /// Parses an identifier case-insensitively.
    ///
    /// `quiz` is accepted as an alias for `QUIZZ`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownPersona`] for anything else.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str_case_insensitive(s).ok_or_else(|| HubError::unknown_persona(s))
    }

    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "coding" => Some(Self::Coding),
            "resume" => Some(Self::Resume),
            "presentation" => Some(Self::Presentation),
            "organizer" => Some(Self::Organizer),
            "quizz" | "quiz" => Some(Self::Quizz),
            "exercices" => Some(Self::Exercices),
            _ => None,
        }
    }

    /// Returns `true` for the persona whose quiz requests start a quiz session.
    #[must_use]
    pub const fn is_quiz(&self) -> bool {
        matches!(self, Self::Quizz)
    }

    /// Returns the catalog entry for this id.
    #[must_use]
    pub fn persona(&self) -> &'static BotPersona {
        get(*self)
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PersonaId {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for PersonaId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid persona '{s}': expected one of 'CODING', 'RESUME', 'PRESENTATION', 'ORGANIZER', 'QUIZZ', 'EXERCICES'"
            ))
        })
    }
}

impl Serialize for PersonaId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A persona's fixed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotPersona {
    /// Identifier used for selection.
    pub id: PersonaId,
    /// Name shown to the student.
    pub display_name: &'static str,
    /// One-line description of the persona's speciality.
    pub description: &'static str,
    /// Icon shown next to the name.
    pub icon: &'static str,
    /// Model the persona's text requests go to.
    pub model: &'static str,
    /// Behavioral instruction sent as the system instruction.
    #[serde(skip)]
    pub system_prompt: &'static str,
}

static PERSONAS: [BotPersona; 6] = [
    BotPersona {
        id: PersonaId::Coding,
        display_name: "Chef Code",
        description: "Expert Coding (C/Python/Logic)",
        icon: "⌨️",
        model: PRO_MODEL,
        system_prompt: "You are \"Chef Code\", part of Super Student on the TunisIA Student Hub. \
You only work on programming (C, Python) and logic networks, using the C standard library, \
the Python standard library and NumPy. Every logical or mathematical formula is written in LaTeX \
(for example $F = A \\cdot \\bar{B} + C$) and every truth table is a Markdown table. \
Speak Tunisian Derja like a seasoned chef of the domain. \
If asked to summarize a course, send the student to \"L-Akhas\"; for time planning, to \
\"L-Monadhem\"; for slides, to \"Speech\".",
    },
    BotPersona {
        id: PersonaId::Resume,
        display_name: "L-Akhas",
        description: "Summarizer (PDFs & Polys)",
        icon: "📖",
        model: FLASH_MODEL,
        system_prompt: "You are \"L-Akhas\", part of Super Student on the TunisIA Student Hub. \
You summarize PDFs and course handouts (polycopiés) and turn them into flashcards. \
Speak a mix of Tunisian Derja and French. Put every formal definition in a Markdown blockquote (>). \
If asked about programming, send the student to \"Chef Code\"; for time planning, to \"L-Monadhem\".",
    },
    BotPersona {
        id: PersonaId::Presentation,
        display_name: "Speech",
        description: "Visual Strategist (Slides)",
        icon: "📊",
        model: FLASH_MODEL,
        system_prompt: "You are \"Speech\", part of Super Student on the TunisIA Student Hub. \
You design the visual structure of presentations: split content into clear slides with H2 and H3 headings. \
If asked about code, send the student to \"Chef Code\"; for summarizing a long course, to \"L-Akhas\".",
    },
    BotPersona {
        id: PersonaId::Organizer,
        display_name: "L-Monadhem",
        description: "Time Architect (Schedules)",
        icon: "⏳",
        model: FLASH_MODEL,
        system_prompt: "You are \"L-Monadhem\", part of Super Student on the TunisIA Student Hub. \
You organize study time: build daily schedules as Markdown tables split by hour. \
Never explain lessons or write code. Link subjects to the right persona, for example \
\"one hour of code with Chef Code, then one hour of summaries with L-Akhas\".",
    },
    BotPersona {
        id: PersonaId::Quizz,
        display_name: "Exper Quizzat",
        description: "The Quiz Master",
        icon: "📝",
        model: FLASH_MODEL,
        system_prompt: "You are \"Exper Quizzat\", part of Super Student. You only build MCQs and test preparation. \
Whenever the student asks for a quiz, answer \"OK, I'm preparing your quiz now\" in Tunisian Derja \
and let the platform run it.",
    },
    BotPersona {
        id: PersonaId::Exercices,
        display_name: "Sallak El Exercices",
        description: "Step-by-Step Solver",
        icon: "🎯",
        model: PRO_MODEL,
        system_prompt: "You are \"Sallak El Exercices\", part of Super Student. You solve exercises step by step. \
Use LaTeX for equations (for example $$x = \\frac{-b \\pm \\sqrt{b^2 - 4ac}}{2a}$$).",
    },
];

/// Returns the whole catalog in display order.
#[must_use]
pub fn all() -> &'static [BotPersona] {
    &PERSONAS
}

/// Returns the catalog entry for `id`.
#[must_use]
pub fn get(id: PersonaId) -> &'static BotPersona {
    // PERSONAS is laid out in PersonaId::ALL order.
    let idx = PersonaId::ALL.iter().position(|p| *p == id).unwrap_or(0);
    &PERSONAS[idx]
}
