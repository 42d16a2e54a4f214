//! Read and single-record mutation queries against the content graph.
//!
//! Optional filters never splice into query text; each combination of
//! present filters selects one of a fixed set of parameterized templates.

use crate::model::{clamp_progress, now_iso, ALLOWED_LINK_STATUSES};
use neo4rs::Graph;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("user \"{0}\" is already linked to knowledge \"{1}\"")]
    AlreadyLinked(String, String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] neo4rs::Error),
}

#[derive(Debug, Serialize)]
pub struct SubjectInfo {
    pub id: String,
    pub name: String,
    pub grade_name: String,
    pub order: i64,
}

#[derive(Debug, Serialize)]
pub struct TypeBookInfo {
    pub id: String,
    pub name: String,
    pub subject_name: String,
    pub order: i64,
}

#[derive(Debug, Serialize)]
pub struct ChapterInfo {
    pub id: String,
    pub name: String,
    pub typebook_name: String,
    pub order: i64,
}

#[derive(Debug, Serialize)]
pub struct LessonInfo {
    pub id: String,
    pub name: String,
    pub chapter_name: String,
    pub order: i64,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: i64,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub subject: String,
    pub grade: String,
    pub order: i64,
}

#[derive(Debug, Serialize)]
pub struct LearnedInfo {
    pub knowledge_id: String,
    pub knowledge_name: String,
    pub subject: String,
    pub grade: String,
    pub status: String,
    pub progress: i64,
    pub linked_at: String,
}

#[derive(Debug, Serialize)]
pub struct LinkResult {
    pub user_id: String,
    pub knowledge_id: String,
    pub status: String,
    pub progress: i64,
    pub linked_at: String,
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub users: i64,
    pub knowledge: i64,
    pub questions: i64,
    pub answers: i64,
    pub learned_links: i64,
}

const SUBJECTS: &str = "MATCH (s:Subject)-[:BELONGS_TO_GRADE]->(g:Grade) \
     RETURN s.id AS id, s.name AS name, g.name AS parent, coalesce(s.order, 0) AS ord \
     ORDER BY s.name";

const TYPEBOOKS_ALL: &str = "MATCH (t:TypeBook)-[:BELONGS_TO_SUBJECT]->(s:Subject) \
     RETURN t.id AS id, t.name AS name, s.name AS parent, coalesce(t.order, 0) AS ord \
     ORDER BY t.name";

const TYPEBOOKS_BY_SUBJECT: &str = "MATCH (t:TypeBook)-[:BELONGS_TO_SUBJECT]->(s:Subject {id: $parent_id}) \
     RETURN t.id AS id, t.name AS name, s.name AS parent, coalesce(t.order, 0) AS ord \
     ORDER BY t.name";

const CHAPTERS_ALL: &str = "MATCH (c:Chapter)-[:BELONGS_TO_TYPE_BOOK]->(t:TypeBook) \
     RETURN c.id AS id, c.name AS name, t.name AS parent, coalesce(c.order, 0) AS ord \
     ORDER BY t.name, ord";

const CHAPTERS_BY_TYPEBOOK: &str = "MATCH (c:Chapter)-[:BELONGS_TO_TYPE_BOOK]->(t:TypeBook {id: $parent_id}) \
     RETURN c.id AS id, c.name AS name, t.name AS parent, coalesce(c.order, 0) AS ord \
     ORDER BY ord";

const LESSONS_ALL: &str = "MATCH (l:Lesson)-[:BELONGS_TO_CHAPTER]->(c:Chapter) \
     RETURN l.id AS id, l.name AS name, c.name AS parent, coalesce(l.order, 0) AS ord \
     ORDER BY c.name, ord";

const LESSONS_BY_CHAPTER: &str = "MATCH (l:Lesson)-[:BELONGS_TO_CHAPTER]->(c:Chapter {id: $parent_id}) \
     RETURN l.id AS id, l.name AS name, c.name AS parent, coalesce(l.order, 0) AS ord \
     ORDER BY ord";

const USERS: &str = "MATCH (u:User) \
     RETURN u.id AS id, u.name AS name, u.email AS email, coalesce(u.age, 0) AS age \
     ORDER BY u.name";

// The four knowledge templates differ only in their MATCH head; the macro
// stamps out the shared column list.
macro_rules! knowledge_query {
    ($head:literal) => {
        concat!(
            $head,
            "RETURN k.id AS id, k.name AS name, \
             coalesce(k.description, '') AS description, k.subject AS subject, \
             k.grade AS grade, coalesce(k.order, 0) AS ord \
             ORDER BY k.subject, k.grade, ord"
        )
    };
}

const KNOWLEDGE_ALL: &str = knowledge_query!("MATCH (k:Knowledge) ");
const KNOWLEDGE_BY_SUBJECT: &str = knowledge_query!("MATCH (k:Knowledge {subject: $subject}) ");
const KNOWLEDGE_BY_GRADE: &str = knowledge_query!("MATCH (k:Knowledge {grade: $grade}) ");
const KNOWLEDGE_BY_BOTH: &str =
    knowledge_query!("MATCH (k:Knowledge {subject: $subject, grade: $grade}) ");

const USER_EXISTS: &str = "MATCH (u:User {id: $user_id}) RETURN u.id AS id";
const KNOWLEDGE_EXISTS: &str = "MATCH (k:Knowledge {id: $knowledge_id}) RETURN k.id AS id";
const PAIR_EXISTS: &str =
    "MATCH (:User {id: $user_id})-[r:LEARNED]->(:Knowledge {id: $knowledge_id}) RETURN count(r) AS n";

const USER_KNOWLEDGE: &str = "MATCH (u:User {id: $user_id})-[r:LEARNED]->(k:Knowledge) \
     RETURN k.id AS knowledge_id, k.name AS knowledge_name, k.subject AS subject, \
     k.grade AS grade, coalesce(r.status, 'learning') AS status, \
     coalesce(r.progress, 0) AS progress, coalesce(r.linkedAt, '') AS linked_at \
     ORDER BY r.linkedAt DESC";

const CREATE_LINK: &str = "MATCH (u:User {id: $user_id}) \
     MATCH (k:Knowledge {id: $knowledge_id}) \
     CREATE (u)-[:LEARNED {status: $status, progress: $progress, linkedAt: $now, \
     createdAt: $now, updatedAt: $now}]->(k)";

const DELETE_LINK: &str =
    "MATCH (:User {id: $user_id})-[r:LEARNED]->(:Knowledge {id: $knowledge_id}) DELETE r";

const SET_PROGRESS_AND_STATUS: &str =
    "MATCH (:User {id: $user_id})-[r:LEARNED]->(:Knowledge {id: $knowledge_id}) \
     SET r.progress = $progress, r.status = $status, r.updatedAt = $now \
     RETURN r.status AS status, r.progress AS progress, coalesce(r.linkedAt, '') AS linked_at";

const SET_PROGRESS: &str =
    "MATCH (:User {id: $user_id})-[r:LEARNED]->(:Knowledge {id: $knowledge_id}) \
     SET r.progress = $progress, r.updatedAt = $now \
     RETURN r.status AS status, r.progress AS progress, coalesce(r.linkedAt, '') AS linked_at";

const SET_STATUS: &str =
    "MATCH (:User {id: $user_id})-[r:LEARNED]->(:Knowledge {id: $knowledge_id}) \
     SET r.status = $status, r.updatedAt = $now \
     RETURN r.status AS status, r.progress AS progress, coalesce(r.linkedAt, '') AS linked_at";

fn knowledge_template(by_subject: bool, by_grade: bool) -> &'static str {
    match (by_subject, by_grade) {
        (false, false) => KNOWLEDGE_ALL,
        (true, false) => KNOWLEDGE_BY_SUBJECT,
        (false, true) => KNOWLEDGE_BY_GRADE,
        (true, true) => KNOWLEDGE_BY_BOTH,
    }
}

fn validate_status(status: &str) -> Result<(), GraphError> {
    if ALLOWED_LINK_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(GraphError::InvalidInput(format!(
            "status \"{status}\" is not one of {}",
            ALLOWED_LINK_STATUSES.join(", ")
        )))
    }
}

fn get_str(row: &neo4rs::Row, key: &str) -> String {
    row.get::<String>(key).unwrap_or_default()
}

fn get_i64(row: &neo4rs::Row, key: &str) -> i64 {
    row.get::<i64>(key).unwrap_or_default()
}

async fn fetch_named(
    graph: &Graph,
    query: neo4rs::Query,
) -> Result<Vec<(String, String, String, i64)>, GraphError> {
    let mut stream = graph.execute(query).await?;
    let mut out = Vec::new();
    while let Ok(Some(row)) = stream.next().await {
        out.push((
            get_str(&row, "id"),
            get_str(&row, "name"),
            get_str(&row, "parent"),
            get_i64(&row, "ord"),
        ));
    }
    Ok(out)
}

pub async fn subjects(graph: &Graph) -> Result<Vec<SubjectInfo>, GraphError> {
    let rows = fetch_named(graph, neo4rs::query(SUBJECTS)).await?;
    Ok(rows
        .into_iter()
        .map(|(id, name, grade_name, order)| SubjectInfo {
            id,
            name,
            grade_name,
            order,
        })
        .collect())
}

pub async fn typebooks(
    graph: &Graph,
    subject_id: Option<&str>,
) -> Result<Vec<TypeBookInfo>, GraphError> {
    let query = match subject_id {
        Some(id) => neo4rs::query(TYPEBOOKS_BY_SUBJECT).param("parent_id", id),
        None => neo4rs::query(TYPEBOOKS_ALL),
    };
    let rows = fetch_named(graph, query).await?;
    Ok(rows
        .into_iter()
        .map(|(id, name, subject_name, order)| TypeBookInfo {
            id,
            name,
            subject_name,
            order,
        })
        .collect())
}

pub async fn chapters(
    graph: &Graph,
    typebook_id: Option<&str>,
) -> Result<Vec<ChapterInfo>, GraphError> {
    let query = match typebook_id {
        Some(id) => neo4rs::query(CHAPTERS_BY_TYPEBOOK).param("parent_id", id),
        None => neo4rs::query(CHAPTERS_ALL),
    };
    let rows = fetch_named(graph, query).await?;
    Ok(rows
        .into_iter()
        .map(|(id, name, typebook_name, order)| ChapterInfo {
            id,
            name,
            typebook_name,
            order,
        })
        .collect())
}

pub async fn lessons(
    graph: &Graph,
    chapter_id: Option<&str>,
) -> Result<Vec<LessonInfo>, GraphError> {
    let query = match chapter_id {
        Some(id) => neo4rs::query(LESSONS_BY_CHAPTER).param("parent_id", id),
        None => neo4rs::query(LESSONS_ALL),
    };
    let rows = fetch_named(graph, query).await?;
    Ok(rows
        .into_iter()
        .map(|(id, name, chapter_name, order)| LessonInfo {
            id,
            name,
            chapter_name,
            order,
        })
        .collect())
}

pub async fn users(graph: &Graph) -> Result<Vec<UserInfo>, GraphError> {
    let mut stream = graph.execute(neo4rs::query(USERS)).await?;
    let mut out = Vec::new();
    while let Ok(Some(row)) = stream.next().await {
        out.push(UserInfo {
            id: get_str(&row, "id"),
            name: get_str(&row, "name"),
            email: get_str(&row, "email"),
            age: get_i64(&row, "age"),
        });
    }
    Ok(out)
}

pub async fn knowledge(
    graph: &Graph,
    subject: Option<&str>,
    grade: Option<&str>,
) -> Result<Vec<KnowledgeInfo>, GraphError> {
    let mut query = neo4rs::query(knowledge_template(subject.is_some(), grade.is_some()));
    if let Some(subject) = subject {
        query = query.param("subject", subject);
    }
    if let Some(grade) = grade {
        query = query.param("grade", grade);
    }
    let mut stream = graph.execute(query).await?;
    let mut out = Vec::new();
    while let Ok(Some(row)) = stream.next().await {
        out.push(KnowledgeInfo {
            id: get_str(&row, "id"),
            name: get_str(&row, "name"),
            description: get_str(&row, "description"),
            subject: get_str(&row, "subject"),
            grade: get_str(&row, "grade"),
            order: get_i64(&row, "ord"),
        });
    }
    Ok(out)
}

async fn exists(graph: &Graph, query: neo4rs::Query) -> Result<bool, GraphError> {
    let mut stream = graph.execute(query).await?;
    Ok(matches!(stream.next().await, Ok(Some(_))))
}

async fn pair_linked(
    graph: &Graph,
    user_id: &str,
    knowledge_id: &str,
) -> Result<bool, GraphError> {
    let query = neo4rs::query(PAIR_EXISTS)
        .param("user_id", user_id)
        .param("knowledge_id", knowledge_id);
    let mut stream = graph.execute(query).await?;
    if let Ok(Some(row)) = stream.next().await {
        Ok(get_i64(&row, "n") > 0)
    } else {
        Ok(false)
    }
}

async fn require_user(graph: &Graph, user_id: &str) -> Result<(), GraphError> {
    if exists(graph, neo4rs::query(USER_EXISTS).param("user_id", user_id)).await? {
        Ok(())
    } else {
        Err(GraphError::NotFound(format!("user \"{user_id}\"")))
    }
}

async fn require_knowledge(graph: &Graph, knowledge_id: &str) -> Result<(), GraphError> {
    let query = neo4rs::query(KNOWLEDGE_EXISTS).param("knowledge_id", knowledge_id);
    if exists(graph, query).await? {
        Ok(())
    } else {
        Err(GraphError::NotFound(format!("knowledge \"{knowledge_id}\"")))
    }
}

/// Everything a user has LEARNED, with the knowledge context attached.
pub async fn user_knowledge(graph: &Graph, user_id: &str) -> Result<Vec<LearnedInfo>, GraphError> {
    require_user(graph, user_id).await?;
    let query = neo4rs::query(USER_KNOWLEDGE).param("user_id", user_id);
    let mut stream = graph.execute(query).await?;
    let mut out = Vec::new();
    while let Ok(Some(row)) = stream.next().await {
        out.push(LearnedInfo {
            knowledge_id: get_str(&row, "knowledge_id"),
            knowledge_name: get_str(&row, "knowledge_name"),
            subject: get_str(&row, "subject"),
            grade: get_str(&row, "grade"),
            status: get_str(&row, "status"),
            progress: get_i64(&row, "progress"),
            linked_at: get_str(&row, "linked_at"),
        });
    }
    Ok(out)
}

/// Create a single LEARNED link. Both endpoints must exist and the pair must
/// not already be linked.
pub async fn link_user_knowledge(
    graph: &Graph,
    user_id: &str,
    knowledge_id: &str,
    status: Option<&str>,
    progress: Option<i64>,
) -> Result<LinkResult, GraphError> {
    let status = status.unwrap_or("learning");
    validate_status(status)?;
    let progress = clamp_progress(progress.unwrap_or(0));
    require_user(graph, user_id).await?;
    require_knowledge(graph, knowledge_id).await?;
    if pair_linked(graph, user_id, knowledge_id).await? {
        return Err(GraphError::AlreadyLinked(
            user_id.to_string(),
            knowledge_id.to_string(),
        ));
    }
    let now = now_iso();
    let query = neo4rs::query(CREATE_LINK)
        .param("user_id", user_id)
        .param("knowledge_id", knowledge_id)
        .param("status", status)
        .param("progress", progress)
        .param("now", now.as_str());
    graph.run(query).await?;
    Ok(LinkResult {
        user_id: user_id.to_string(),
        knowledge_id: knowledge_id.to_string(),
        status: status.to_string(),
        progress,
        linked_at: now,
    })
}

pub async fn unlink_user_knowledge(
    graph: &Graph,
    user_id: &str,
    knowledge_id: &str,
) -> Result<(), GraphError> {
    if !pair_linked(graph, user_id, knowledge_id).await? {
        return Err(GraphError::NotFound(format!(
            "link between user \"{user_id}\" and knowledge \"{knowledge_id}\""
        )));
    }
    let query = neo4rs::query(DELETE_LINK)
        .param("user_id", user_id)
        .param("knowledge_id", knowledge_id);
    graph.run(query).await?;
    Ok(())
}

fn progress_template(set_progress: bool, set_status: bool) -> Option<&'static str> {
    match (set_progress, set_status) {
        (true, true) => Some(SET_PROGRESS_AND_STATUS),
        (true, false) => Some(SET_PROGRESS),
        (false, true) => Some(SET_STATUS),
        (false, false) => None,
    }
}

/// Update progress and/or status on an existing LEARNED link.
pub async fn update_learned_progress(
    graph: &Graph,
    user_id: &str,
    knowledge_id: &str,
    progress: Option<i64>,
    status: Option<&str>,
) -> Result<LinkResult, GraphError> {
    if let Some(status) = status {
        validate_status(status)?;
    }
    let text = progress_template(progress.is_some(), status.is_some()).ok_or_else(|| {
        GraphError::InvalidInput("at least one of progress or status is required".to_string())
    })?;
    if !pair_linked(graph, user_id, knowledge_id).await? {
        return Err(GraphError::NotFound(format!(
            "link between user \"{user_id}\" and knowledge \"{knowledge_id}\""
        )));
    }
    let now = now_iso();
    let mut query = neo4rs::query(text)
        .param("user_id", user_id)
        .param("knowledge_id", knowledge_id)
        .param("now", now.as_str());
    if let Some(progress) = progress {
        query = query.param("progress", clamp_progress(progress));
    }
    if let Some(status) = status {
        query = query.param("status", status);
    }
    let mut stream = graph.execute(query).await?;
    match stream.next().await {
        Ok(Some(row)) => Ok(LinkResult {
            user_id: user_id.to_string(),
            knowledge_id: knowledge_id.to_string(),
            status: get_str(&row, "status"),
            progress: get_i64(&row, "progress"),
            linked_at: get_str(&row, "linked_at"),
        }),
        _ => Err(GraphError::NotFound(format!(
            "link between user \"{user_id}\" and knowledge \"{knowledge_id}\""
        ))),
    }
}

async fn count(graph: &Graph, text: &str) -> Result<i64, GraphError> {
    let mut stream = graph.execute(neo4rs::query(text)).await?;
    if let Ok(Some(row)) = stream.next().await {
        Ok(get_i64(&row, "n"))
    } else {
        Ok(0)
    }
}

pub async fn stats(graph: &Graph) -> Result<GraphStats, GraphError> {
    Ok(GraphStats {
        users: count(graph, "MATCH (n:User) RETURN count(n) AS n").await?,
        knowledge: count(graph, "MATCH (n:Knowledge) RETURN count(n) AS n").await?,
        questions: count(graph, "MATCH (n:Question) RETURN count(n) AS n").await?,
        answers: count(graph, "MATCH (n:Answer) RETURN count(n) AS n").await?,
        learned_links: count(graph, "MATCH (:User)-[r:LEARNED]->(:Knowledge) RETURN count(r) AS n")
            .await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_filters_select_fixed_templates() {
        assert_eq!(knowledge_template(false, false), KNOWLEDGE_ALL);
        assert_eq!(knowledge_template(true, false), KNOWLEDGE_BY_SUBJECT);
        assert_eq!(knowledge_template(false, true), KNOWLEDGE_BY_GRADE);
        assert_eq!(knowledge_template(true, true), KNOWLEDGE_BY_BOTH);
        assert!(KNOWLEDGE_BY_BOTH.contains("subject: $subject, grade: $grade"));
    }

    #[test]
    fn user_knowledge_lists_newest_link_first() {
        assert!(USER_KNOWLEDGE.ends_with("ORDER BY r.linkedAt DESC"));
    }

    #[test]
    fn subjects_and_typebooks_list_by_name() {
        assert!(SUBJECTS.ends_with("ORDER BY s.name"));
        assert!(TYPEBOOKS_ALL.ends_with("ORDER BY t.name"));
        assert!(TYPEBOOKS_BY_SUBJECT.ends_with("ORDER BY t.name"));
    }

    #[test]
    fn progress_update_requires_something_to_set() {
        assert_eq!(progress_template(true, true), Some(SET_PROGRESS_AND_STATUS));
        assert_eq!(progress_template(true, false), Some(SET_PROGRESS));
        assert_eq!(progress_template(false, true), Some(SET_STATUS));
        assert_eq!(progress_template(false, false), None);
    }

    #[test]
    fn unknown_status_is_rejected_with_the_allowed_set() {
        let err = validate_status("finished").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("finished"));
        assert!(msg.contains("learning, completed, mastered, reviewing"));
        assert!(validate_status("mastered").is_ok());
    }
}
