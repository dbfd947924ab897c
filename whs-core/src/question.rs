//! Question Mediator (component I, §4.4 "pendingQuestion" handling, §6
//! "Question payload"): turns an agent-issued clarifying question into a
//! blocker record's description, and turns a human answer back into a
//! tracker comment.

use serde::{Deserialize, Serialize};

use crate::runner::PendingQuestion;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionMetadata {
    pub session_id: Option<String>,
    pub worktree: String,
    pub step_id: String,
    pub epic_id: String,
    pub project: String,
    pub asked_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionOption {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionEntry {
    pub question: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(rename = "multiSelect")]
    pub multi_select: bool,
    pub options: Vec<QuestionOption>,
}

/// The JSON record stored as a question issue's description (§6 "Question
/// payload").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionRecord {
    pub metadata: QuestionMetadata,
    pub context: String,
    pub questions: Vec<QuestionEntry>,
}

/// Build a `QuestionRecord` from the runner's pending-question payload and
/// the step context it was raised from (§4.3 "stash a pending-question
/// payload", §4.4 "create a question record whose description encodes the
/// question(s) and metadata").
pub fn build_question_record(
    pending: &PendingQuestion,
    session_id: Option<String>,
    worktree: String,
    step_id: String,
    epic_id: String,
    project: String,
    context: String,
    asked_at: chrono::DateTime<chrono::Utc>,
) -> QuestionRecord {
    QuestionRecord {
        metadata: QuestionMetadata {
            session_id,
            worktree,
            step_id,
            epic_id,
            project,
            asked_at,
        },
        context,
        questions: vec![QuestionEntry {
            question: pending.question.clone(),
            header: None,
            multi_select: pending.multi_select,
            options: pending
                .options
                .iter()
                .map(|o| QuestionOption {
                    label: o.label.clone(),
                    description: None,
                })
                .collect(),
        }],
    }
}

pub fn serialize_record(record: &QuestionRecord) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(record)?)
}

pub fn parse_record(description: &str) -> anyhow::Result<QuestionRecord> {
    Ok(serde_json::from_str(description)?)
}

/// The comment text the router posts when an answer is recorded (§8 E4
/// `answer <qid> "JWT"` ⇒ a comment "Answer: JWT").
pub fn format_answer_comment(answer: &str) -> String {
    format!("Answer: {answer}")
}
