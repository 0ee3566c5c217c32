//! Built-in subject catalog.
//!
//! Each subject carries the system prompt the tutor is tuned with, a few
//! starter questions, and the canned reply the demo backend streams.

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(skip)]
    pub quick_questions: Vec<String>,
    #[serde(skip)]
    pub demo_response: Option<String>,
}

impl Subject {
    /// Storage key for this subject's chat history.
    pub fn storage_key(&self) -> String {
        history_key(&self.id)
    }

    /// BCP 47 tag used for speech input and prompt language hints.
    pub fn language_tag(&self) -> &'static str {
        if self.id == "urdu" { "ur-PK" } else { "en-US" }
    }
}

pub fn history_key(subject_id: &str) -> String {
    format!("chat_history_{subject_id}")
}

struct SubjectSeed {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    system_prompt: &'static str,
    quick_questions: &'static [&'static str],
    demo_response: &'static str,
}

const SEEDS: &[SubjectSeed] = &[
    SubjectSeed {
        id: "mathematics",
        name: "Mathematics",
        description: "Algebra, geometry, calculus and problem-solving",
        system_prompt: "You are JLX, the Mathematics expert of JLHS. Be clear and encouraging, show every step, and use LaTeX for formulas and markdown for formatting.",
        quick_questions: &[
            "Explain the Pythagorean theorem.",
            "How do I solve a quadratic equation?",
            "What are derivatives?",
            "What is the value of Pi?",
        ],
        demo_response: "Of course! The Pythagorean theorem states that for any right-angled triangle, the square of the hypotenuse equals the sum of the squares of the other two sides: $$a^2 + b^2 = c^2$$",
    },
    SubjectSeed {
        id: "physics",
        name: "Physics",
        description: "Laws of motion, energy, and the physical universe",
        system_prompt: "You are JLX, the Physics expert of JLHS. Focus on explaining laws, formulas and experiments. Use LaTeX for formulas and markdown for formatting.",
        quick_questions: &[
            "Explain Newton's first law of motion.",
            "What is the theory of relativity?",
            "Define kinetic energy.",
            "How does gravity work?",
        ],
        demo_response: "Newton's first law, the law of inertia, says an object stays at rest or in uniform straight-line motion unless an external force acts on it.",
    },
    SubjectSeed {
        id: "chemistry",
        name: "Chemistry",
        description: "Elements, reactions, and molecular science",
        system_prompt: "You are JLX, the Chemistry expert of JLHS. Provide balanced equations and safe lab tips. Use markdown for formatting.",
        quick_questions: &[
            "What is a covalent bond?",
            "How do you balance a chemical equation?",
            "Describe the periodic table.",
            "What is pH?",
        ],
        demo_response: "A covalent bond is a chemical bond formed when two atoms share one or more pairs of electrons.",
    },
    SubjectSeed {
        id: "biology",
        name: "Biology",
        description: "Life sciences, cells, and living organisms",
        system_prompt: "You are JLX, the Biology expert of JLHS. Use simple explanations, ASCII diagrams when useful, and mnemonics. Use markdown for formatting.",
        quick_questions: &[
            "What is photosynthesis?",
            "Explain DNA replication.",
            "What are the parts of a cell?",
            "Describe the human circulatory system.",
        ],
        demo_response: "Photosynthesis is how plants turn light energy into chemical energy:\n\n`6CO2 + 6H2O + light -> C6H12O6 + 6O2`",
    },
    SubjectSeed {
        id: "pakistan-studies",
        name: "Pakistan Studies",
        description: "History, culture, and civics of Pakistan",
        system_prompt: "You are JLX, the Pakistan Studies expert of JLHS. Provide factual, unbiased summaries. Use markdown for formatting.",
        quick_questions: &[
            "Who was the first Governor-General of Pakistan?",
            "What is the significance of the Lahore Resolution?",
            "Describe the geography of northern Pakistan.",
            "What are some major cultural festivals?",
        ],
        demo_response: "The first Governor-General of Pakistan was Muhammad Ali Jinnah, revered as the nation's founder, *Quaid-i-Azam*.",
    },
    SubjectSeed {
        id: "english",
        name: "English",
        description: "Grammar, literature, and communication skills",
        system_prompt: "You are JLX, the English expert of JLHS. Help with grammar, writing and literature. Use markdown for formatting.",
        quick_questions: &[
            "What is the difference between 'its' and 'it's'?",
            "Can you explain what a metaphor is?",
            "Who wrote 'Hamlet'?",
            "How can I improve my essay writing?",
        ],
        demo_response: "**It's** is short for 'it is' or 'it has'. **Its** is the possessive: the dog wagged *its* tail.",
    },
    SubjectSeed {
        id: "urdu",
        name: "Urdu",
        description: "Language, poetry, and prose analysis",
        system_prompt: "You are JLX, the Urdu expert of JLHS. Conduct the entire conversation in Urdu script only, with no English or Roman Urdu. Help with translation, grammar, poetry and prose.",
        quick_questions: &[
            "'خوش آمدید' کا مطلب کیا ہے؟",
            "علامہ اقبال کون تھے؟",
            "غزل کی تشریح کریں۔",
        ],
        demo_response: "'خوش آمدید' کا مطلب ہے 'Welcome'۔",
    },
    SubjectSeed {
        id: "history",
        name: "History",
        description: "World events, timelines, and civilizations",
        system_prompt: "You are JLX, the History expert of JLHS. Explain events with timelines and short summaries. Use markdown for formatting.",
        quick_questions: &[
            "What were the main causes of World War I?",
            "Who was Alexander the Great?",
            "Describe the Indus Valley Civilization.",
            "What was the Renaissance?",
        ],
        demo_response: "The main causes of World War I are often summarized as M.A.I.N.: Militarism, Alliances, Imperialism and Nationalism.",
    },
    SubjectSeed {
        id: "computer-science",
        name: "Computer Science",
        description: "Algorithms, data structures, and programming",
        system_prompt: "You are JLX, the Computer Science expert of JLHS. Explain concepts clearly, give code examples in Python or JavaScript, and discuss algorithms and data structures. Use markdown for formatting.",
        quick_questions: &[
            "What is an algorithm?",
            "Explain Big O notation.",
            "What's the difference between an array and a linked list?",
            "How does the internet work?",
        ],
        demo_response: "An algorithm is a finite list of step-by-step instructions for solving a problem, like a recipe for making tea.",
    },
];

static SUBJECTS: Lazy<Vec<Subject>> = Lazy::new(|| {
    SEEDS
        .iter()
        .map(|seed| Subject {
            id: seed.id.to_string(),
            name: seed.name.to_string(),
            description: seed.description.to_string(),
            system_prompt: seed.system_prompt.to_string(),
            quick_questions: seed.quick_questions.iter().map(|q| q.to_string()).collect(),
            demo_response: Some(seed.demo_response.to_string()),
        })
        .collect()
});

pub fn all() -> &'static [Subject] {
    &SUBJECTS
}

pub fn find(id: &str) -> Option<&'static Subject> {
    SUBJECTS.iter().find(|subject| subject.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_unique() {
        let mut ids: Vec<_> = all().iter().map(|s| s.id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn history_keys_are_scoped_per_subject() {
        let math = find("mathematics").unwrap();
        let physics = find("physics").unwrap();
        assert_eq!(math.storage_key(), "chat_history_mathematics");
        assert_ne!(math.storage_key(), physics.storage_key());
        assert!(find("alchemy").is_none());
    }
}
