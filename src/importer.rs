//! Bulk import pipeline.
//!
//! Every bulk call runs the same phases: per-record validation, in-batch
//! deduplication, batched existence checks against the store, then chunked
//! UNWIND inserts inside a single transaction. A record rejected in any phase
//! never reaches the transaction; a transaction failure rolls everything
//! back and surfaces as an unsuccessful report, not a hard error.

use crate::model::{Candidate, ImportKind, Label};
use crate::store::{GraphStore, ParamValue, PropValue, Statement};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

pub(crate) const CREATE_USERS: &str = "UNWIND $rows AS row \
     CREATE (u:User {id: row.id, name: row.name, email: row.email, age: row.age, \
     createdAt: row.createdAt, updatedAt: row.updatedAt})";

pub(crate) const CREATE_KNOWLEDGE: &str = "UNWIND $rows AS row \
     CREATE (k:Knowledge {id: row.id, name: row.name, description: row.description, \
     subject: row.subject, grade: row.grade, order: row.order, \
     createdAt: row.createdAt, updatedAt: row.updatedAt})";

pub(crate) const CREATE_QUESTIONS: &str = "UNWIND $rows AS row \
     MATCH (l:Lesson {id: row.lesson_id}) \
     CREATE (q:Question {id: row.id, lesson_id: row.lesson_id, title: row.title, \
     content: row.content, correct_answer: row.correct_answer, \
     image_question: row.image_question, image_answer: row.image_answer, \
     difficulty: row.difficulty, page: row.page, \
     createdAt: row.createdAt, updatedAt: row.updatedAt}) \
     CREATE (q)-[:BELONGS_TO_LESSON]->(l)";

pub(crate) const CREATE_ANSWERS: &str = "UNWIND $rows AS row \
     MATCH (u:User {id: row.user_id}) \
     MATCH (q:Question {id: row.question_id}) \
     CREATE (a:Answer {id: row.id, user_id: row.user_id, question_id: row.question_id, \
     student_answer: row.student_answer, is_correct: row.is_correct, \
     start_time: row.start_time, completion_time: row.completion_time, \
     duration_seconds: row.duration_seconds, \
     createdAt: row.createdAt, updatedAt: row.updatedAt}) \
     CREATE (u)-[:ANSWERED]->(a) \
     CREATE (a)-[:ANSWERS_QUESTION]->(q)";

pub(crate) const CREATE_LEARNED_LINKS: &str = "UNWIND $rows AS row \
     MATCH (u:User {id: row.user_id}) \
     MATCH (k:Knowledge {id: row.knowledge_id}) \
     CREATE (u)-[:LEARNED {status: row.status, progress: row.progress, \
     linkedAt: row.linkedAt, createdAt: row.createdAt, updatedAt: row.updatedAt}]->(k)";

pub(crate) const EXISTING_USER_EMAILS: &str =
    "MATCH (u:User) WHERE u.email IN $values RETURN u.email AS value";

pub(crate) const EXISTING_KNOWLEDGE_KEYS: &str = "MATCH (k:Knowledge) \
     WHERE k.name + '|' + k.subject + '|' + k.grade IN $values \
     RETURN k.name + '|' + k.subject + '|' + k.grade AS value";

pub(crate) const EXISTING_LEARNED_PAIRS: &str = "MATCH (u:User)-[:LEARNED]->(k:Knowledge) \
     WHERE u.id + '|' + k.id IN $values RETURN u.id + '|' + k.id AS value";

/// Id lookups are one fixed template per label; the label is never spliced
/// into query text at runtime.
pub(crate) fn id_lookup(label: Label) -> &'static str {
    match label {
        Label::User => "MATCH (n:User) WHERE n.id IN $values RETURN n.id AS value",
        Label::Knowledge => "MATCH (n:Knowledge) WHERE n.id IN $values RETURN n.id AS value",
        Label::Question => "MATCH (n:Question) WHERE n.id IN $values RETURN n.id AS value",
        Label::Answer => "MATCH (n:Answer) WHERE n.id IN $values RETURN n.id AS value",
        Label::Lesson => "MATCH (n:Lesson) WHERE n.id IN $values RETURN n.id AS value",
    }
}

fn insert_statement(kind: ImportKind) -> &'static str {
    match kind {
        ImportKind::User => CREATE_USERS,
        ImportKind::Knowledge => CREATE_KNOWLEDGE,
        ImportKind::Question => CREATE_QUESTIONS,
        ImportKind::Answer => CREATE_ANSWERS,
        ImportKind::LearnedLink => CREATE_LEARNED_LINKS,
    }
}

fn node_label(kind: ImportKind) -> Option<Label> {
    match kind {
        ImportKind::User => Some(Label::User),
        ImportKind::Knowledge => Some(Label::Knowledge),
        ImportKind::Question => Some(Label::Question),
        ImportKind::Answer => Some(Label::Answer),
        ImportKind::LearnedLink => None,
    }
}

/// Outcome of one bulk import call. `success` tracks whether anything was
/// actually created; partial rejection with at least one insert still counts
/// as success.
#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub message: String,
    pub created: Vec<Value>,
    pub total_processed: usize,
    pub total_created: usize,
    pub total_errors: usize,
    pub errors: Vec<String>,
    pub success: bool,
}

async fn existing_values(
    store: &dyn GraphStore,
    text: &'static str,
    values: Vec<String>,
    batch_size: usize,
) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in values.chunks(batch_size) {
        let stmt = Statement::new(text).param("values", ParamValue::StrList(chunk.to_vec()));
        found.extend(store.run_read(stmt).await?);
    }
    Ok(found)
}

fn in_batch_duplicate_reason(kind: ImportKind, index: usize, key: &str) -> String {
    match kind {
        ImportKind::User => format!("record {index}: duplicate email \"{key}\" in batch"),
        ImportKind::Knowledge => {
            format!("record {index}: duplicate knowledge key \"{key}\" in batch")
        }
        ImportKind::LearnedLink => {
            format!("record {index}: duplicate user/knowledge pair \"{key}\" in batch")
        }
        ImportKind::Question | ImportKind::Answer => {
            format!("record {index}: duplicate key \"{key}\" in batch")
        }
    }
}

fn existing_key_reason(index: usize, candidate: &Candidate) -> String {
    match candidate {
        Candidate::User(u) => format!("record {index}: email \"{}\" already exists", u.email),
        Candidate::Knowledge(k) => format!(
            "record {index}: knowledge \"{}\" for subject \"{}\" grade \"{}\" already exists",
            k.name, k.subject, k.grade
        ),
        Candidate::LearnedLink(l) => format!(
            "record {index}: user \"{}\" is already linked to knowledge \"{}\"",
            l.user_id, l.knowledge_id
        ),
        _ => format!("record {index}: already exists"),
    }
}

/// Validate, deduplicate, and insert a batch of records of one kind.
///
/// Read-side failures (the existence checks) propagate as errors; a failure
/// inside the write transaction rolls back and is reported in the returned
/// summary instead.
pub async fn import_records(
    store: &dyn GraphStore,
    kind: ImportKind,
    records: &[Value],
    batch_size: Option<usize>,
) -> Result<ImportReport> {
    let batch_size = batch_size.unwrap_or_else(|| kind.default_batch_size()).max(1);
    let total = records.len();
    info!("📦 importing {} {} record(s)", total, kind.as_str());

    // Phase 1: per-record validation and in-batch deduplication. The first
    // occurrence of a contested id or semantic key wins, in input order.
    let mut survivors: Vec<(usize, Candidate)> = Vec::new();
    let mut rejected: Vec<(usize, String)> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_keys: HashSet<String> = HashSet::new();
    for (index, raw) in records.iter().enumerate() {
        match Candidate::parse(kind, raw) {
            Ok(candidate) => {
                if let Some(id) = candidate.node_id() {
                    if !seen_ids.insert(id.to_string()) {
                        rejected.push((
                            index,
                            format!("record {index}: duplicate id \"{id}\" in batch"),
                        ));
                        continue;
                    }
                }
                if let Some(key) = candidate.unique_key() {
                    if !seen_keys.insert(key.clone()) {
                        rejected.push((index, in_batch_duplicate_reason(kind, index, &key)));
                        continue;
                    }
                }
                survivors.push((index, candidate));
            }
            Err(err) => rejected.push((index, format!("record {index}: {err}"))),
        }
    }

    // Phase 2: every referenced node must already exist.
    let mut fk_ids: HashMap<Label, HashSet<String>> = HashMap::new();
    for (_, candidate) in &survivors {
        for (label, _, value) in candidate.foreign_keys() {
            fk_ids.entry(label).or_default().insert(value.to_string());
        }
    }
    let mut fk_found: HashMap<Label, HashSet<String>> = HashMap::new();
    for (label, ids) in fk_ids {
        let found =
            existing_values(store, id_lookup(label), ids.into_iter().collect(), batch_size).await?;
        fk_found.insert(label, found);
    }
    let mut remaining = Vec::with_capacity(survivors.len());
    for (index, candidate) in survivors {
        let missing: Option<(Label, String, String)> = candidate
            .foreign_keys()
            .into_iter()
            .find(|(label, _, value)| {
                !fk_found
                    .get(label)
                    .map(|found| found.contains(*value))
                    .unwrap_or(false)
            })
            .map(|(label, field, value)| (label, field.to_string(), value.to_string()));
        match missing {
            Some((label, field, value)) => rejected.push((
                index,
                format!(
                    "record {index}: {field} \"{value}\" does not reference an existing {}",
                    label.as_str()
                ),
            )),
            None => remaining.push((index, candidate)),
        }
    }
    let mut survivors = remaining;

    // Phase 3: reject ids already present in the store. Re-running the same
    // payload therefore rejects everything instead of duplicating nodes.
    if let Some(label) = node_label(kind) {
        let ids: Vec<String> = survivors
            .iter()
            .filter_map(|(_, c)| c.node_id().map(str::to_string))
            .collect();
        if !ids.is_empty() {
            let taken = existing_values(store, id_lookup(label), ids, batch_size).await?;
            let mut remaining = Vec::with_capacity(survivors.len());
            for (index, candidate) in survivors {
                let conflict = candidate
                    .node_id()
                    .filter(|id| taken.contains(*id))
                    .map(str::to_string);
                match conflict {
                    Some(id) => rejected.push((
                        index,
                        format!("record {index}: id \"{id}\" already exists"),
                    )),
                    None => remaining.push((index, candidate)),
                }
            }
            survivors = remaining;
        }
    }

    // Phase 4: semantic uniqueness against the store.
    let lookup = match kind {
        ImportKind::User => Some(EXISTING_USER_EMAILS),
        ImportKind::Knowledge => Some(EXISTING_KNOWLEDGE_KEYS),
        ImportKind::LearnedLink => Some(EXISTING_LEARNED_PAIRS),
        ImportKind::Question | ImportKind::Answer => None,
    };
    if let Some(text) = lookup {
        let keys: Vec<String> = survivors
            .iter()
            .filter_map(|(_, c)| c.unique_key())
            .collect();
        if !keys.is_empty() {
            let taken = existing_values(store, text, keys, batch_size).await?;
            let mut remaining = Vec::with_capacity(survivors.len());
            for (index, candidate) in survivors {
                match candidate.unique_key() {
                    Some(key) if taken.contains(&key) => {
                        rejected.push((index, existing_key_reason(index, &candidate)))
                    }
                    _ => remaining.push((index, candidate)),
                }
            }
            survivors = remaining;
        }
    }

    rejected.sort_by_key(|(index, _)| *index);
    let errors: Vec<String> = rejected.into_iter().map(|(_, reason)| reason).collect();

    if survivors.is_empty() {
        warn!("⚠️ no valid {} records to import", kind.as_str());
        return Ok(ImportReport {
            message: format!("imported 0 of {total} {} record(s)", kind.as_str()),
            created: Vec::new(),
            total_processed: total,
            total_created: 0,
            total_errors: errors.len(),
            errors,
            success: false,
        });
    }

    // Phase 5: one transaction for the whole call, chunked UNWIND inserts.
    let rows: Vec<HashMap<String, PropValue>> =
        survivors.iter().map(|(_, c)| c.props()).collect();
    let text = insert_statement(kind);
    let mut txn = store.begin().await?;
    let mut write_err = None;
    for chunk in rows.chunks(batch_size) {
        let stmt = Statement::new(text).param("rows", ParamValue::Rows(chunk.to_vec()));
        if let Err(err) = txn.run_write(stmt).await {
            write_err = Some(err);
            break;
        }
    }
    let commit_err = match write_err {
        Some(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!("rollback after failed write also failed: {rollback_err:#}");
            }
            Some(err)
        }
        None => txn.commit().await.err(),
    };

    if let Some(err) = commit_err {
        warn!("❌ {} import transaction failed: {err:#}", kind.as_str());
        let mut errors = errors;
        errors.push(format!("transaction failed: {err:#}"));
        return Ok(ImportReport {
            message: format!("imported 0 of {total} {} record(s)", kind.as_str()),
            created: Vec::new(),
            total_processed: total,
            total_created: 0,
            total_errors: errors.len(),
            errors,
            success: false,
        });
    }

    let created: Vec<Value> = survivors.iter().map(|(_, c)| c.to_json()).collect();
    let total_created = created.len();
    info!(
        "✅ imported {}/{} {} record(s), {} rejected",
        total_created,
        total,
        kind.as_str(),
        errors.len()
    );
    Ok(ImportReport {
        message: format!("imported {total_created} of {total} {} record(s)", kind.as_str()),
        created,
        total_processed: total,
        total_created,
        total_errors: errors.len(),
        errors,
        success: total_created > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GraphTxn;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemState {
        ids: HashMap<&'static str, HashSet<String>>,
        emails: HashSet<String>,
        knowledge_keys: HashSet<String>,
        learned_pairs: HashSet<String>,
        writes: usize,
        begins: usize,
        fail_on_write: Option<usize>,
    }

    /// In-memory stand-in for the graph store. Statement text is matched
    /// against the fixed templates to decide which index a read consults and
    /// how a committed write mutates state.
    #[derive(Clone, Default)]
    struct MemStore {
        state: Arc<Mutex<MemState>>,
    }

    impl MemStore {
        fn with_nodes(label: &'static str, ids: &[&str]) -> Self {
            let store = MemStore::default();
            {
                let mut state = store.state.lock().unwrap();
                state
                    .ids
                    .entry(label)
                    .or_default()
                    .extend(ids.iter().map(|s| s.to_string()));
            }
            store
        }

        fn fail_on_write(self, nth: usize) -> Self {
            self.state.lock().unwrap().fail_on_write = Some(nth);
            self
        }

        fn node_count(&self, label: &'static str) -> usize {
            self.state
                .lock()
                .unwrap()
                .ids
                .get(label)
                .map(HashSet::len)
                .unwrap_or(0)
        }

        fn pair_count(&self) -> usize {
            self.state.lock().unwrap().learned_pairs.len()
        }

        fn begins(&self) -> usize {
            self.state.lock().unwrap().begins
        }
    }

    fn param_values(stmt: &Statement) -> Vec<String> {
        match &stmt.params[0].1 {
            ParamValue::StrList(values) => values.clone(),
            other => panic!("expected string list param, got {other:?}"),
        }
    }

    fn row_str(row: &HashMap<String, PropValue>, key: &str) -> String {
        match row.get(key) {
            Some(PropValue::Str(s)) => s.clone(),
            other => panic!("expected string prop {key}, got {other:?}"),
        }
    }

    #[async_trait]
    impl GraphStore for MemStore {
        async fn run_read(&self, stmt: Statement) -> Result<Vec<String>> {
            let state = self.state.lock().unwrap();
            let asked = param_values(&stmt);
            let empty = HashSet::new();
            let index: &HashSet<String> = if stmt.text == EXISTING_USER_EMAILS {
                &state.emails
            } else if stmt.text == EXISTING_KNOWLEDGE_KEYS {
                &state.knowledge_keys
            } else if stmt.text == EXISTING_LEARNED_PAIRS {
                &state.learned_pairs
            } else {
                let label = ["User", "Knowledge", "Question", "Answer", "Lesson"]
                    .iter()
                    .find(|label| stmt.text == id_lookup(label_of(label)))
                    .unwrap_or_else(|| panic!("unknown read statement: {}", stmt.text));
                state.ids.get(*label).unwrap_or(&empty)
            };
            Ok(asked.into_iter().filter(|v| index.contains(v)).collect())
        }

        async fn begin(&self) -> Result<Box<dyn GraphTxn>> {
            self.state.lock().unwrap().begins += 1;
            Ok(Box::new(MemTxn {
                state: self.state.clone(),
                staged: Vec::new(),
            }))
        }
    }

    fn label_of(name: &str) -> Label {
        match name {
            "User" => Label::User,
            "Knowledge" => Label::Knowledge,
            "Question" => Label::Question,
            "Answer" => Label::Answer,
            "Lesson" => Label::Lesson,
            other => panic!("unknown label {other}"),
        }
    }

    struct MemTxn {
        state: Arc<Mutex<MemState>>,
        staged: Vec<Statement>,
    }

    #[async_trait]
    impl GraphTxn for MemTxn {
        async fn run_write(&mut self, stmt: Statement) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.writes += 1;
            if state.fail_on_write == Some(state.writes) {
                return Err(anyhow!("simulated write failure"));
            }
            self.staged.push(stmt);
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            for stmt in &self.staged {
                let rows = match &stmt.params[0].1 {
                    ParamValue::Rows(rows) => rows,
                    other => panic!("expected rows param, got {other:?}"),
                };
                for row in rows {
                    if stmt.text == CREATE_USERS {
                        state.ids.entry("User").or_default().insert(row_str(row, "id"));
                        state.emails.insert(row_str(row, "email"));
                    } else if stmt.text == CREATE_KNOWLEDGE {
                        state
                            .ids
                            .entry("Knowledge")
                            .or_default()
                            .insert(row_str(row, "id"));
                        state.knowledge_keys.insert(format!(
                            "{}|{}|{}",
                            row_str(row, "name"),
                            row_str(row, "subject"),
                            row_str(row, "grade")
                        ));
                    } else if stmt.text == CREATE_QUESTIONS {
                        state
                            .ids
                            .entry("Question")
                            .or_default()
                            .insert(row_str(row, "id"));
                    } else if stmt.text == CREATE_ANSWERS {
                        state.ids.entry("Answer").or_default().insert(row_str(row, "id"));
                    } else if stmt.text == CREATE_LEARNED_LINKS {
                        state.learned_pairs.insert(format!(
                            "{}|{}",
                            row_str(row, "user_id"),
                            row_str(row, "knowledge_id")
                        ));
                    } else {
                        panic!("unknown write statement: {}", stmt.text);
                    }
                }
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn users(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({"id": format!("u{i}"), "name": format!("User {i}"), "email": format!("u{i}@x.com")}))
            .collect()
    }

    #[tokio::test]
    async fn imports_a_clean_user_batch() {
        let store = MemStore::default();
        let report = import_records(&store, ImportKind::User, &users(3), None)
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.total_processed, 3);
        assert_eq!(report.total_created, 3);
        assert_eq!(report.total_errors, 0);
        assert_eq!(report.created.len(), 3);
        assert_eq!(store.node_count("User"), 3);
    }

    #[tokio::test]
    async fn rejections_keep_input_indices_in_order() {
        let records = vec![
            json!({"name": "A", "email": "a@x.com"}),
            json!({"name": "B"}),
            json!({"name": "C", "email": "no-at-sign"}),
            json!({"name": "D", "email": "a@x.com"}),
        ];
        let store = MemStore::default();
        let report = import_records(&store, ImportKind::User, &records, None)
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.total_created, 1);
        assert_eq!(
            report.errors,
            vec![
                "record 1: missing email".to_string(),
                "record 2: invalid email format \"no-at-sign\"".to_string(),
                "record 3: duplicate email \"a@x.com\" in batch".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn first_occurrence_wins_on_in_batch_collision() {
        let records = vec![
            json!({"id": "u1", "name": "First", "email": "one@x.com"}),
            json!({"id": "u1", "name": "Second", "email": "two@x.com"}),
        ];
        let store = MemStore::default();
        let report = import_records(&store, ImportKind::User, &records, None)
            .await
            .unwrap();
        assert_eq!(report.total_created, 1);
        assert_eq!(report.created[0]["name"], "First");
        assert_eq!(
            report.errors,
            vec!["record 1: duplicate id \"u1\" in batch".to_string()]
        );
    }

    #[tokio::test]
    async fn rerunning_the_same_payload_creates_nothing() {
        let store = MemStore::default();
        let payload = users(3);
        let first = import_records(&store, ImportKind::User, &payload, None)
            .await
            .unwrap();
        assert_eq!(first.total_created, 3);

        let second = import_records(&store, ImportKind::User, &payload, None)
            .await
            .unwrap();
        assert!(!second.success);
        assert_eq!(second.total_created, 0);
        assert_eq!(second.total_errors, 3);
        assert!(second.errors[0].contains("id \"u0\" already exists"));
        assert_eq!(store.node_count("User"), 3);
    }

    #[tokio::test]
    async fn existing_email_is_reported_with_the_value() {
        let store = MemStore::default();
        store
            .state
            .lock()
            .unwrap()
            .emails
            .insert("taken@x.com".to_string());
        let records = vec![json!({"name": "E", "email": "taken@x.com"})];
        let report = import_records(&store, ImportKind::User, &records, None)
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(
            report.errors,
            vec!["record 0: email \"taken@x.com\" already exists".to_string()]
        );
        // Nothing survived validation, so no transaction was ever opened.
        assert_eq!(store.begins(), 0);
    }

    #[tokio::test]
    async fn questions_require_an_existing_lesson() {
        let store = MemStore::with_nodes("Lesson", &["lesson-1"]);
        let records = vec![
            json!({"lesson_id": "lesson-1", "title": "Q1", "content": "?", "correct_answer": "1", "difficulty": "easy", "page": 1}),
            json!({"lesson_id": "lesson-9", "title": "Q2", "content": "?", "correct_answer": "2", "difficulty": "easy", "page": 2}),
        ];
        let report = import_records(&store, ImportKind::Question, &records, None)
            .await
            .unwrap();
        assert_eq!(report.total_created, 1);
        assert_eq!(
            report.errors,
            vec![
                "record 1: lesson_id \"lesson-9\" does not reference an existing Lesson"
                    .to_string()
            ]
        );
        assert_eq!(store.node_count("Question"), 1);
    }

    #[tokio::test]
    async fn answers_check_both_endpoints() {
        let store = MemStore::with_nodes("User", &["u1"]);
        store
            .state
            .lock()
            .unwrap()
            .ids
            .entry("Question")
            .or_default()
            .insert("q1".to_string());
        let records = vec![
            json!({"user_id": "u1", "question_id": "q1", "student_answer": "5", "is_correct": true}),
            json!({"user_id": "u2", "question_id": "q1", "student_answer": "6", "is_correct": false}),
        ];
        let report = import_records(&store, ImportKind::Answer, &records, None)
            .await
            .unwrap();
        assert_eq!(report.total_created, 1);
        assert!(report.errors[0].contains("user_id \"u2\""));
        // Defaults are filled into the persisted record.
        assert!(report.created[0]["start_time"].as_str().is_some());
        assert_eq!(report.created[0]["duration_seconds"], 0);
    }

    #[tokio::test]
    async fn relinking_a_pair_is_rejected() {
        let store = MemStore::with_nodes("User", &["u1"]);
        store
            .state
            .lock()
            .unwrap()
            .ids
            .entry("Knowledge")
            .or_default()
            .insert("k1".to_string());
        let link = vec![json!({"user_id": "u1", "knowledge_id": "k1", "progress": 40})];

        let first = import_records(&store, ImportKind::LearnedLink, &link, None)
            .await
            .unwrap();
        assert_eq!(first.total_created, 1);
        assert_eq!(store.pair_count(), 1);

        let second = import_records(&store, ImportKind::LearnedLink, &link, None)
            .await
            .unwrap();
        assert!(!second.success);
        assert_eq!(
            second.errors,
            vec!["record 0: user \"u1\" is already linked to knowledge \"k1\"".to_string()]
        );
        assert_eq!(store.pair_count(), 1);
    }

    #[tokio::test]
    async fn link_with_unknown_status_is_rejected() {
        let store = MemStore::with_nodes("User", &["u1"]);
        store
            .state
            .lock()
            .unwrap()
            .ids
            .entry("Knowledge")
            .or_default()
            .insert("k1".to_string());
        let records =
            vec![json!({"user_id": "u1", "knowledge_id": "k1", "status": "bogus"})];
        let report = import_records(&store, ImportKind::LearnedLink, &records, None)
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.total_created, 0);
        assert_eq!(
            report.errors,
            vec![
                "record 0: status \"bogus\" is not one of learning, completed, mastered, reviewing"
                    .to_string()
            ]
        );
        assert_eq!(store.pair_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_pair_in_one_batch_keeps_the_first() {
        let store = MemStore::with_nodes("User", &["u1"]);
        store
            .state
            .lock()
            .unwrap()
            .ids
            .entry("Knowledge")
            .or_default()
            .insert("k1".to_string());
        let records = vec![
            json!({"user_id": "u1", "knowledge_id": "k1", "progress": 10}),
            json!({"user_id": "u1", "knowledge_id": "k1", "progress": 90}),
        ];
        let report = import_records(&store, ImportKind::LearnedLink, &records, None)
            .await
            .unwrap();
        assert_eq!(report.total_created, 1);
        assert_eq!(report.created[0]["progress"], 10);
        assert_eq!(
            report.errors,
            vec!["record 1: duplicate user/knowledge pair \"u1|k1\" in batch".to_string()]
        );
        assert_eq!(store.pair_count(), 1);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_the_whole_call() {
        // batch_size 1 means 3 survivors take 3 writes; the 2nd one fails.
        let store = MemStore::default().fail_on_write(2);
        let report = import_records(&store, ImportKind::User, &users(3), Some(1))
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.total_created, 0);
        assert!(report
            .errors
            .last()
            .unwrap()
            .starts_with("transaction failed:"));
        assert_eq!(store.node_count("User"), 0);
    }

    #[tokio::test]
    async fn batch_size_does_not_change_the_outcome() {
        let payload = users(5);
        let small = MemStore::default();
        let big = MemStore::default();
        let a = import_records(&small, ImportKind::User, &payload, Some(2))
            .await
            .unwrap();
        let b = import_records(&big, ImportKind::User, &payload, Some(100))
            .await
            .unwrap();
        assert_eq!(a.total_created, b.total_created);
        assert_eq!(a.errors, b.errors);
        assert_eq!(small.node_count("User"), big.node_count("User"));
    }

    #[tokio::test]
    async fn empty_input_reports_failure_without_a_transaction() {
        let store = MemStore::default();
        let report = import_records(&store, ImportKind::User, &[], None)
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.total_processed, 0);
        assert_eq!(store.begins(), 0);
    }

    #[tokio::test]
    async fn knowledge_key_collision_against_store() {
        let store = MemStore::default();
        store
            .state
            .lock()
            .unwrap()
            .knowledge_keys
            .insert("Fractions|math|4".to_string());
        let records = vec![
            json!({"name": "Fractions", "subject": "math", "grade": "4"}),
            json!({"name": "Decimals", "subject": "math", "grade": "4"}),
        ];
        let report = import_records(&store, ImportKind::Knowledge, &records, None)
            .await
            .unwrap();
        assert_eq!(report.total_created, 1);
        assert_eq!(
            report.errors,
            vec![
                "record 0: knowledge \"Fractions\" for subject \"math\" grade \"4\" already exists"
                    .to_string()
            ]
        );
    }
}
