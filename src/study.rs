//! Quizzes and flashcards drawn from a conversation.

use crate::ai::{LlmBackend, StructuredRequest};
use crate::subjects::Subject;
use crate::types::{Message, Role};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Messages of context given to the generator.
const CONTEXT_MESSAGES: usize = 10;
const MIN_ITEMS: usize = 1;
const MAX_ITEMS: usize = 20;
const QUIZ_OPTIONS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StudyKind {
    Quiz,
    ExtraHardQuiz,
    Flashcards,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

impl QuizQuestion {
    fn is_valid(&self) -> bool {
        !self.question.trim().is_empty()
            && self.options.len() == QUIZ_OPTIONS
            && self.options.iter().all(|opt| !opt.trim().is_empty())
            && self.options.contains(&self.correct_answer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

impl Flashcard {
    fn is_valid(&self) -> bool {
        !self.front.trim().is_empty() && !self.back.trim().is_empty()
    }
}

/// Last few completed messages as a `User:` / `AI:` transcript.
pub fn transcript(messages: &[Message]) -> String {
    let usable: Vec<&Message> = messages.iter().filter(|m| !m.is_interrupted).collect();
    let start = usable.len().saturating_sub(CONTEXT_MESSAGES);
    usable[start..]
        .iter()
        .map(|msg| {
            let speaker = match msg.role {
                Role::User => "User",
                Role::Model => "AI",
            };
            let text = msg
                .parts
                .iter()
                .filter_map(|p| p.as_text())
                .collect::<Vec<_>>()
                .join(" ");
            format!("{speaker}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn context(messages: &[Message]) -> Vec<Message> {
    let usable: Vec<Message> = messages
        .iter()
        .filter(|m| !m.is_interrupted)
        .cloned()
        .collect();
    let start = usable.len().saturating_sub(CONTEXT_MESSAGES);
    usable[start..].to_vec()
}

pub fn clamp_count(count: usize) -> usize {
    count.clamp(MIN_ITEMS, MAX_ITEMS)
}

fn system_instruction(kind: StudyKind) -> &'static str {
    match kind {
        StudyKind::Quiz => "You are a helpful assistant that creates educational quizzes in JSON format.",
        StudyKind::ExtraHardQuiz => {
            "You are a demanding examiner who writes challenging educational quizzes in JSON format."
        }
        StudyKind::Flashcards => {
            "You are a helpful assistant that creates concise study flashcards in JSON format."
        }
    }
}

fn prompt(kind: StudyKind, subject: &Subject, count: usize, conversation: &str) -> String {
    let task = match kind {
        StudyKind::Quiz => format!(
            "generate a short multiple-choice quiz with {count} questions to test understanding. \
             The questions should be relevant to the key topics discussed. Ensure the 'correctAnswer' \
             value is an exact match to one of the strings in the 'options' array."
        ),
        StudyKind::ExtraHardQuiz => format!(
            "generate an extra-hard multiple-choice quiz with {count} questions. Go beyond recall: \
             ask for application, multi-step reasoning and edge cases of the topics discussed, with \
             plausible distractors. Ensure the 'correctAnswer' value is an exact match to one of the \
             strings in the 'options' array."
        ),
        StudyKind::Flashcards => format!(
            "create {count} flashcards covering the key terms and ideas discussed. Put a term or \
             question on the front and a short answer on the back."
        ),
    };
    format!(
        "Based on the following conversation about {}, {task}\n\nConversation:\n{conversation}",
        subject.name
    )
}

fn schema(kind: StudyKind) -> Value {
    let item = match kind {
        StudyKind::Quiz | StudyKind::ExtraHardQuiz => json!({
            "type": "OBJECT",
            "properties": {
                "question": { "type": "STRING", "description": "The quiz question." },
                "options": {
                    "type": "ARRAY",
                    "description": "An array of 4 possible answers.",
                    "items": { "type": "STRING" }
                },
                "correctAnswer": {
                    "type": "STRING",
                    "description": "The correct answer, which must be one of the strings from the options array."
                }
            },
            "required": ["question", "options", "correctAnswer"]
        }),
        StudyKind::Flashcards => json!({
            "type": "OBJECT",
            "properties": {
                "front": { "type": "STRING", "description": "Term or question." },
                "back": { "type": "STRING", "description": "Definition or answer." }
            },
            "required": ["front", "back"]
        }),
    };
    json!({ "type": "ARRAY", "items": item })
}

/// Assemble the structured request for one study set.
pub fn build_request(
    kind: StudyKind,
    subject: &Subject,
    messages: &[Message],
    count: usize,
) -> StructuredRequest {
    let count = clamp_count(count);
    StructuredRequest {
        kind,
        subject: subject.clone(),
        context: context(messages),
        count,
        system_instruction: system_instruction(kind).to_string(),
        prompt: prompt(kind, subject, count, &transcript(messages)),
        schema: schema(kind),
    }
}

/// Parse a JSON array of items, rejecting the whole set if any item is bad.
fn parse_items<T: DeserializeOwned>(value: Value, valid: impl Fn(&T) -> bool) -> Option<Vec<T>> {
    let Value::Array(raw) = value else {
        tracing::error!("study set was not a JSON array");
        return None;
    };
    if raw.is_empty() {
        tracing::warn!("study set came back empty");
        return None;
    }
    let mut items = Vec::with_capacity(raw.len());
    for (index, entry) in raw.into_iter().enumerate() {
        match serde_json::from_value::<T>(entry) {
            Ok(item) if valid(&item) => items.push(item),
            Ok(_) => {
                tracing::error!(index, "study item failed validation");
                return None;
            }
            Err(err) => {
                tracing::error!(index, error = %err, "study item was malformed");
                return None;
            }
        }
    }
    Some(items)
}

pub fn parse_quiz(value: Value) -> Option<Vec<QuizQuestion>> {
    parse_items(value, QuizQuestion::is_valid)
}

pub fn parse_flashcards(value: Value) -> Option<Vec<Flashcard>> {
    parse_items(value, Flashcard::is_valid)
}

async fn request_json(
    backend: &dyn LlmBackend,
    kind: StudyKind,
    subject: &Subject,
    messages: &[Message],
    count: usize,
) -> Option<Value> {
    let request = build_request(kind, subject, messages, count);
    tracing::debug!(?kind, count = request.count, backend = backend.name(), "requesting study set");
    match backend.complete_json(request).await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(?kind, error = %err, "study set generation failed");
            None
        }
    }
}

pub async fn generate_quiz(
    backend: &dyn LlmBackend,
    subject: &Subject,
    messages: &[Message],
    count: usize,
    hard: bool,
) -> Option<Vec<QuizQuestion>> {
    let kind = if hard {
        StudyKind::ExtraHardQuiz
    } else {
        StudyKind::Quiz
    };
    parse_quiz(request_json(backend, kind, subject, messages, count).await?)
}

pub async fn generate_flashcards(
    backend: &dyn LlmBackend,
    subject: &Subject,
    messages: &[Message],
    count: usize,
) -> Option<Vec<Flashcard>> {
    parse_flashcards(request_json(backend, StudyKind::Flashcards, subject, messages, count).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::DemoBackend;
    use crate::subjects;
    use crate::types::Part;

    fn conversation() -> Vec<Message> {
        let mut failed = Message::model("network error");
        failed.is_interrupted = true;
        vec![
            Message::user(vec![Part::text("What is inertia?")]),
            failed,
            Message::user(vec![Part::text("What is inertia?"), Part::inline("image/png", "AAAA")]),
            Message::model("Resistance to changes in motion."),
        ]
    }

    #[test]
    fn transcript_skips_interrupted_messages() {
        assert_eq!(
            transcript(&conversation()),
            "User: What is inertia?\n\nUser: What is inertia?\n\nAI: Resistance to changes in motion."
        );
    }

    #[test]
    fn transcript_keeps_the_last_ten() {
        let messages: Vec<Message> = (0..14)
            .map(|i| Message::user(vec![Part::text(format!("q{i}"))]))
            .collect();
        let text = transcript(&messages);
        assert!(text.starts_with("User: q4\n\n"));
        assert!(text.ends_with("User: q13"));
    }

    #[test]
    fn counts_are_clamped() {
        assert_eq!(clamp_count(0), 1);
        assert_eq!(clamp_count(5), 5);
        assert_eq!(clamp_count(99), 20);
        let subject = subjects::find("physics").unwrap();
        assert_eq!(build_request(StudyKind::Quiz, subject, &[], 50).count, 20);
    }

    #[test]
    fn quiz_requests_carry_the_schema() {
        let subject = subjects::find("physics").unwrap();
        let request = build_request(StudyKind::ExtraHardQuiz, subject, &conversation(), 3);
        assert_eq!(request.schema["type"], "ARRAY");
        assert_eq!(request.schema["items"]["required"][2], "correctAnswer");
        assert!(request.prompt.contains("extra-hard"));
        assert!(request.prompt.contains("Physics"));
        assert_eq!(request.context.len(), 3);
    }

    #[test]
    fn one_bad_question_rejects_the_quiz() {
        let good = json!({"question": "2+2?", "options": ["1", "2", "3", "4"], "correctAnswer": "4"});
        assert_eq!(parse_quiz(json!([good.clone()])).unwrap().len(), 1);

        let wrong_answer =
            json!({"question": "2+2?", "options": ["1", "2", "3", "5"], "correctAnswer": "4"});
        assert!(parse_quiz(json!([good.clone(), wrong_answer])).is_none());

        let three_options =
            json!({"question": "2+2?", "options": ["2", "3", "4"], "correctAnswer": "4"});
        assert!(parse_quiz(json!([good.clone(), three_options])).is_none());

        assert!(parse_quiz(json!([good, {"question": "missing fields"}])).is_none());
    }

    #[test]
    fn non_arrays_and_empty_sets_are_rejected() {
        assert!(parse_quiz(json!({"question": "x"})).is_none());
        assert!(parse_quiz(json!([])).is_none());
        assert!(parse_flashcards(json!([{"front": "", "back": "b"}])).is_none());
    }

    #[tokio::test]
    async fn demo_backend_yields_valid_sets() {
        let backend = DemoBackend::default();
        let subject = subjects::find("mathematics").unwrap();
        let quiz = generate_quiz(&backend, subject, &conversation(), 2, false)
            .await
            .unwrap();
        assert_eq!(quiz.len(), 2);
        assert_eq!(quiz[0].correct_answer, "4");

        let cards = generate_flashcards(&backend, subject, &conversation(), 5)
            .await
            .unwrap();
        assert_eq!(cards.len(), 3);
    }
}
