//! Typed import records.
//!
//! Raw import payloads arrive as loosely-structured JSON maps. Everything is
//! validated here, at the boundary, into one of the `Candidate` variants
//! before the importer touches the store.

use crate::store::PropValue;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub const ALLOWED_LINK_STATUSES: &[&str] = &["learning", "completed", "mastered", "reviewing"];

/// Node labels the importer checks existence against. Hierarchy levels
/// above Lesson are only ever touched by seeding and never referenced by an
/// imported record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    User,
    Knowledge,
    Question,
    Answer,
    Lesson,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::User => "User",
            Label::Knowledge => "Knowledge",
            Label::Question => "Question",
            Label::Answer => "Answer",
            Label::Lesson => "Lesson",
        }
    }
}

/// Which entity or link type a bulk import call carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    User,
    Knowledge,
    Question,
    Answer,
    LearnedLink,
}

impl ImportKind {
    /// Link-heavy kinds get a smaller default to bound per-transaction
    /// statement size.
    pub fn default_batch_size(&self) -> usize {
        match self {
            ImportKind::User | ImportKind::Knowledge => 1000,
            ImportKind::Question | ImportKind::Answer | ImportKind::LearnedLink => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::User => "user",
            ImportKind::Knowledge => "knowledge",
            ImportKind::Question => "question",
            ImportKind::Answer => "answer",
            ImportKind::LearnedLink => "learned link",
        }
    }
}

/// Why a single record was rejected during boundary validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing {0}")]
    Missing(String),
    #[error("invalid email format \"{0}\"")]
    InvalidEmail(String),
    #[error("empty id provided")]
    EmptyId,
    #[error("status \"{0}\" is not one of learning, completed, mastered, reviewing")]
    InvalidStatus(String),
    #[error("{field} must be {expected}")]
    BadValue {
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: i64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewKnowledge {
    pub id: String,
    pub name: String,
    pub description: String,
    pub subject: String,
    pub grade: String,
    pub order: i64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewQuestion {
    pub id: String,
    pub lesson_id: String,
    pub title: String,
    pub content: String,
    pub correct_answer: String,
    pub image_question: String,
    pub image_answer: String,
    pub difficulty: String,
    pub page: i64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAnswer {
    pub id: String,
    pub user_id: String,
    pub question_id: String,
    pub student_answer: String,
    pub is_correct: bool,
    pub start_time: String,
    pub completion_time: String,
    pub duration_seconds: i64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewLearnedLink {
    pub user_id: String,
    pub knowledge_id: String,
    pub status: String,
    pub progress: i64,
    #[serde(rename = "linkedAt")]
    pub linked_at: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

/// A validated record, ready for existence checks and insertion.
#[derive(Debug, Clone)]
pub enum Candidate {
    User(NewUser),
    Knowledge(NewKnowledge),
    Question(NewQuestion),
    Answer(NewAnswer),
    LearnedLink(NewLearnedLink),
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn clamp_progress(progress: i64) -> i64 {
    progress.clamp(0, 100)
}

fn req_str(map: &serde_json::Map<String, Value>, field: &str, missing: &mut Vec<String>) -> String {
    match map.get(field).and_then(Value::as_str) {
        Some(s) => s.to_string(),
        None => {
            missing.push(field.to_string());
            String::new()
        }
    }
}

fn opt_str(map: &serde_json::Map<String, Value>, field: &str, default: &str) -> String {
    map.get(field)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn opt_i64(map: &serde_json::Map<String, Value>, field: &str, default: i64) -> i64 {
    map.get(field).and_then(Value::as_i64).unwrap_or(default)
}

/// Caller-supplied id if present and non-empty after trimming; a fresh UUID
/// otherwise. An explicitly provided but blank id is an error rather than a
/// silent regeneration.
fn assign_id(map: &serde_json::Map<String, Value>) -> Result<String, RecordError> {
    match map.get("id") {
        None | Some(Value::Null) => Ok(uuid::Uuid::new_v4().to_string()),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err(RecordError::EmptyId)
            } else {
                Ok(trimmed.to_string())
            }
        }
        Some(_) => Err(RecordError::BadValue {
            field: "id",
            expected: "a string",
        }),
    }
}

impl Candidate {
    /// Validate one raw record against the kind's schema: required fields,
    /// shape checks, identifier assignment.
    pub fn parse(kind: ImportKind, raw: &Value) -> Result<Candidate, RecordError> {
        let map = raw.as_object().ok_or(RecordError::BadValue {
            field: "record",
            expected: "a JSON object",
        })?;
        let now = now_iso();
        let mut missing = Vec::new();

        match kind {
            ImportKind::User => {
                let name = req_str(map, "name", &mut missing);
                let email = req_str(map, "email", &mut missing);
                if !missing.is_empty() {
                    return Err(RecordError::Missing(missing.join(", ")));
                }
                let email = email.trim().to_lowercase();
                if !email.contains('@') {
                    return Err(RecordError::InvalidEmail(email));
                }
                Ok(Candidate::User(NewUser {
                    id: assign_id(map)?,
                    name: name.trim().to_string(),
                    email,
                    age: opt_i64(map, "age", 7),
                    created_at: now.clone(),
                    updated_at: now,
                }))
            }
            ImportKind::Knowledge => {
                let name = req_str(map, "name", &mut missing);
                let subject = req_str(map, "subject", &mut missing);
                let grade = req_str(map, "grade", &mut missing);
                if !missing.is_empty() {
                    return Err(RecordError::Missing(missing.join(", ")));
                }
                let description = opt_str(map, "description", &name);
                Ok(Candidate::Knowledge(NewKnowledge {
                    id: assign_id(map)?,
                    name,
                    description,
                    subject,
                    grade,
                    order: opt_i64(map, "order", 1),
                    created_at: now.clone(),
                    updated_at: now,
                }))
            }
            ImportKind::Question => {
                let lesson_id = req_str(map, "lesson_id", &mut missing);
                let title = req_str(map, "title", &mut missing);
                let content = req_str(map, "content", &mut missing);
                let correct_answer = req_str(map, "correct_answer", &mut missing);
                let difficulty = req_str(map, "difficulty", &mut missing);
                let page = match map.get("page") {
                    Some(v) => v.as_i64().ok_or(RecordError::BadValue {
                        field: "page",
                        expected: "an integer",
                    })?,
                    None => {
                        missing.push("page".to_string());
                        0
                    }
                };
                if !missing.is_empty() {
                    return Err(RecordError::Missing(missing.join(", ")));
                }
                Ok(Candidate::Question(NewQuestion {
                    id: assign_id(map)?,
                    lesson_id,
                    title,
                    content,
                    correct_answer,
                    image_question: opt_str(map, "image_question", ""),
                    image_answer: opt_str(map, "image_answer", ""),
                    difficulty,
                    page,
                    created_at: now.clone(),
                    updated_at: now,
                }))
            }
            ImportKind::Answer => {
                let user_id = req_str(map, "user_id", &mut missing);
                let question_id = req_str(map, "question_id", &mut missing);
                let student_answer = req_str(map, "student_answer", &mut missing);
                let is_correct = match map.get("is_correct") {
                    Some(v) => v.as_bool().ok_or(RecordError::BadValue {
                        field: "is_correct",
                        expected: "a boolean",
                    })?,
                    None => {
                        missing.push("is_correct".to_string());
                        false
                    }
                };
                if !missing.is_empty() {
                    return Err(RecordError::Missing(missing.join(", ")));
                }
                Ok(Candidate::Answer(NewAnswer {
                    id: assign_id(map)?,
                    user_id,
                    question_id,
                    student_answer,
                    is_correct,
                    start_time: opt_str(map, "start_time", &now),
                    completion_time: opt_str(map, "completion_time", &now),
                    duration_seconds: opt_i64(map, "duration_seconds", 0),
                    created_at: now.clone(),
                    updated_at: now,
                }))
            }
            ImportKind::LearnedLink => {
                let user_id = req_str(map, "user_id", &mut missing);
                let knowledge_id = req_str(map, "knowledge_id", &mut missing);
                if !missing.is_empty() {
                    return Err(RecordError::Missing(missing.join(", ")));
                }
                let status = opt_str(map, "status", "learning");
                if !ALLOWED_LINK_STATUSES.contains(&status.as_str()) {
                    return Err(RecordError::InvalidStatus(status));
                }
                Ok(Candidate::LearnedLink(NewLearnedLink {
                    user_id,
                    knowledge_id,
                    status,
                    progress: clamp_progress(opt_i64(map, "progress", 0)),
                    linked_at: now.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                }))
            }
        }
    }

    /// Node identity, if this kind materializes as a node. LEARNED links are
    /// identified by their (user, knowledge) pair instead.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Candidate::User(u) => Some(&u.id),
            Candidate::Knowledge(k) => Some(&k.id),
            Candidate::Question(q) => Some(&q.id),
            Candidate::Answer(a) => Some(&a.id),
            Candidate::LearnedLink(_) => None,
        }
    }

    /// Semantic uniqueness key for kinds carrying one.
    pub fn unique_key(&self) -> Option<String> {
        match self {
            Candidate::User(u) => Some(u.email.clone()),
            Candidate::Knowledge(k) => Some(format!("{}|{}|{}", k.name, k.subject, k.grade)),
            Candidate::LearnedLink(l) => Some(format!("{}|{}", l.user_id, l.knowledge_id)),
            Candidate::Question(_) | Candidate::Answer(_) => None,
        }
    }

    /// Foreign keys that must resolve before insertion.
    pub fn foreign_keys(&self) -> Vec<(Label, &str, &str)> {
        match self {
            Candidate::Question(q) => vec![(Label::Lesson, "lesson_id", q.lesson_id.as_str())],
            Candidate::Answer(a) => vec![
                (Label::User, "user_id", a.user_id.as_str()),
                (Label::Question, "question_id", a.question_id.as_str()),
            ],
            Candidate::LearnedLink(l) => vec![
                (Label::User, "user_id", l.user_id.as_str()),
                (Label::Knowledge, "knowledge_id", l.knowledge_id.as_str()),
            ],
            Candidate::User(_) | Candidate::Knowledge(_) => Vec::new(),
        }
    }

    /// Flat property map, as handed to the UNWIND insert statements.
    pub fn props(&self) -> HashMap<String, PropValue> {
        let mut m = HashMap::new();
        match self {
            Candidate::User(u) => {
                m.insert("id".to_string(), PropValue::Str(u.id.clone()));
                m.insert("name".to_string(), PropValue::Str(u.name.clone()));
                m.insert("email".to_string(), PropValue::Str(u.email.clone()));
                m.insert("age".to_string(), PropValue::Int(u.age));
                m.insert("createdAt".to_string(), PropValue::Str(u.created_at.clone()));
                m.insert("updatedAt".to_string(), PropValue::Str(u.updated_at.clone()));
            }
            Candidate::Knowledge(k) => {
                m.insert("id".to_string(), PropValue::Str(k.id.clone()));
                m.insert("name".to_string(), PropValue::Str(k.name.clone()));
                m.insert("description".to_string(), PropValue::Str(k.description.clone()));
                m.insert("subject".to_string(), PropValue::Str(k.subject.clone()));
                m.insert("grade".to_string(), PropValue::Str(k.grade.clone()));
                m.insert("order".to_string(), PropValue::Int(k.order));
                m.insert("createdAt".to_string(), PropValue::Str(k.created_at.clone()));
                m.insert("updatedAt".to_string(), PropValue::Str(k.updated_at.clone()));
            }
            Candidate::Question(q) => {
                m.insert("id".to_string(), PropValue::Str(q.id.clone()));
                m.insert("lesson_id".to_string(), PropValue::Str(q.lesson_id.clone()));
                m.insert("title".to_string(), PropValue::Str(q.title.clone()));
                m.insert("content".to_string(), PropValue::Str(q.content.clone()));
                m.insert(
                    "correct_answer".to_string(),
                    PropValue::Str(q.correct_answer.clone()),
                );
                m.insert(
                    "image_question".to_string(),
                    PropValue::Str(q.image_question.clone()),
                );
                m.insert("image_answer".to_string(), PropValue::Str(q.image_answer.clone()));
                m.insert("difficulty".to_string(), PropValue::Str(q.difficulty.clone()));
                m.insert("page".to_string(), PropValue::Int(q.page));
                m.insert("createdAt".to_string(), PropValue::Str(q.created_at.clone()));
                m.insert("updatedAt".to_string(), PropValue::Str(q.updated_at.clone()));
            }
            Candidate::Answer(a) => {
                m.insert("id".to_string(), PropValue::Str(a.id.clone()));
                m.insert("user_id".to_string(), PropValue::Str(a.user_id.clone()));
                m.insert("question_id".to_string(), PropValue::Str(a.question_id.clone()));
                m.insert(
                    "student_answer".to_string(),
                    PropValue::Str(a.student_answer.clone()),
                );
                m.insert("is_correct".to_string(), PropValue::Bool(a.is_correct));
                m.insert("start_time".to_string(), PropValue::Str(a.start_time.clone()));
                m.insert(
                    "completion_time".to_string(),
                    PropValue::Str(a.completion_time.clone()),
                );
                m.insert("duration_seconds".to_string(), PropValue::Int(a.duration_seconds));
                m.insert("createdAt".to_string(), PropValue::Str(a.created_at.clone()));
                m.insert("updatedAt".to_string(), PropValue::Str(a.updated_at.clone()));
            }
            Candidate::LearnedLink(l) => {
                m.insert("user_id".to_string(), PropValue::Str(l.user_id.clone()));
                m.insert(
                    "knowledge_id".to_string(),
                    PropValue::Str(l.knowledge_id.clone()),
                );
                m.insert("status".to_string(), PropValue::Str(l.status.clone()));
                m.insert("progress".to_string(), PropValue::Int(l.progress));
                m.insert("linkedAt".to_string(), PropValue::Str(l.linked_at.clone()));
                m.insert("createdAt".to_string(), PropValue::Str(l.created_at.clone()));
                m.insert("updatedAt".to_string(), PropValue::Str(l.updated_at.clone()));
            }
        }
        m
    }

    /// JSON view of the record as it was persisted, for result reporting.
    pub fn to_json(&self) -> Value {
        match self {
            Candidate::User(u) => serde_json::to_value(u),
            Candidate::Knowledge(k) => serde_json::to_value(k),
            Candidate::Question(q) => serde_json::to_value(q),
            Candidate::Answer(a) => serde_json::to_value(a),
            Candidate::LearnedLink(l) => serde_json::to_value(l),
        }
        .unwrap_or(Value::Null)
    }
}
