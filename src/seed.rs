//! Hierarchy seeding and maintenance utilities.
//!
//! A seed file describes the Grade → Subject → TypeBook → Chapter → Lesson
//! tree as nested JSON. Seeding MERGEs by name within the parent path, so
//! re-running the same file is a no-op for nodes that already exist.

use crate::model::now_iso;
use crate::store::{GraphStore, ParamValue, PropValue, Statement};
use anyhow::{Context, Result};
use neo4rs::Graph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

fn default_order() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct SeedTree {
    pub grades: Vec<SeedGrade>,
}

#[derive(Debug, Deserialize)]
pub struct SeedGrade {
    pub name: String,
    #[serde(default = "default_order")]
    pub order: i64,
    #[serde(default)]
    pub subjects: Vec<SeedSubject>,
}

#[derive(Debug, Deserialize)]
pub struct SeedSubject {
    pub name: String,
    #[serde(default = "default_order")]
    pub order: i64,
    #[serde(default)]
    pub typebooks: Vec<SeedTypeBook>,
}

#[derive(Debug, Deserialize)]
pub struct SeedTypeBook {
    pub name: String,
    #[serde(default = "default_order")]
    pub order: i64,
    #[serde(default)]
    pub chapters: Vec<SeedChapter>,
}

#[derive(Debug, Deserialize)]
pub struct SeedChapter {
    pub name: String,
    #[serde(default = "default_order")]
    pub order: i64,
    #[serde(default)]
    pub lessons: Vec<SeedLesson>,
}

#[derive(Debug, Deserialize)]
pub struct SeedLesson {
    pub name: String,
    #[serde(default = "default_order")]
    pub order: i64,
}

#[derive(Debug, Serialize)]
pub struct SeedSummary {
    pub grades: usize,
    pub subjects: usize,
    pub typebooks: usize,
    pub chapters: usize,
    pub lessons: usize,
}

const MERGE_GRADES: &str = "UNWIND $rows AS row \
     MERGE (g:Grade {name: row.name}) \
     ON CREATE SET g.id = row.id, g.createdAt = row.now \
     SET g.order = row.order, g.updatedAt = row.now";

const MERGE_SUBJECTS: &str = "UNWIND $rows AS row \
     MATCH (g:Grade {name: row.grade}) \
     MERGE (s:Subject {name: row.name})-[:BELONGS_TO_GRADE]->(g) \
     ON CREATE SET s.id = row.id, s.createdAt = row.now \
     SET s.order = row.order, s.updatedAt = row.now";

const MERGE_TYPEBOOKS: &str = "UNWIND $rows AS row \
     MATCH (s:Subject {name: row.subject})-[:BELONGS_TO_GRADE]->(:Grade {name: row.grade}) \
     MERGE (t:TypeBook {name: row.name})-[:BELONGS_TO_SUBJECT]->(s) \
     ON CREATE SET t.id = row.id, t.createdAt = row.now \
     SET t.order = row.order, t.updatedAt = row.now";

const MERGE_CHAPTERS: &str = "UNWIND $rows AS row \
     MATCH (t:TypeBook {name: row.typebook})-[:BELONGS_TO_SUBJECT]->\
(:Subject {name: row.subject})-[:BELONGS_TO_GRADE]->(:Grade {name: row.grade}) \
     MERGE (c:Chapter {name: row.name})-[:BELONGS_TO_TYPE_BOOK]->(t) \
     ON CREATE SET c.id = row.id, c.createdAt = row.now \
     SET c.order = row.order, c.updatedAt = row.now";

const MERGE_LESSONS: &str = "UNWIND $rows AS row \
     MATCH (c:Chapter {name: row.chapter})-[:BELONGS_TO_TYPE_BOOK]->\
(t:TypeBook {name: row.typebook})-[:BELONGS_TO_SUBJECT]->\
(:Subject {name: row.subject})-[:BELONGS_TO_GRADE]->(:Grade {name: row.grade}) \
     MERGE (l:Lesson {name: row.name})-[:BELONGS_TO_CHAPTER]->(c) \
     ON CREATE SET l.id = row.id, l.createdAt = row.now \
     SET l.order = row.order, l.updatedAt = row.now";

type Row = HashMap<String, PropValue>;

fn base_row(name: &str, order: i64, now: &str) -> Row {
    let mut row = HashMap::new();
    row.insert("id".to_string(), PropValue::Str(uuid::Uuid::new_v4().to_string()));
    row.insert("name".to_string(), PropValue::Str(name.to_string()));
    row.insert("order".to_string(), PropValue::Int(order));
    row.insert("now".to_string(), PropValue::Str(now.to_string()));
    row
}

fn with_parent(mut row: Row, key: &str, value: &str) -> Row {
    row.insert(key.to_string(), PropValue::Str(value.to_string()));
    row
}

struct FlatTree {
    grades: Vec<Row>,
    subjects: Vec<Row>,
    typebooks: Vec<Row>,
    chapters: Vec<Row>,
    lessons: Vec<Row>,
}

fn flatten(tree: &SeedTree, now: &str) -> FlatTree {
    let mut flat = FlatTree {
        grades: Vec::new(),
        subjects: Vec::new(),
        typebooks: Vec::new(),
        chapters: Vec::new(),
        lessons: Vec::new(),
    };
    for grade in &tree.grades {
        flat.grades.push(base_row(&grade.name, grade.order, now));
        for subject in &grade.subjects {
            flat.subjects.push(with_parent(
                base_row(&subject.name, subject.order, now),
                "grade",
                &grade.name,
            ));
            for typebook in &subject.typebooks {
                let row = base_row(&typebook.name, typebook.order, now);
                let row = with_parent(row, "subject", &subject.name);
                flat.typebooks.push(with_parent(row, "grade", &grade.name));
                for chapter in &typebook.chapters {
                    let row = base_row(&chapter.name, chapter.order, now);
                    let row = with_parent(row, "typebook", &typebook.name);
                    let row = with_parent(row, "subject", &subject.name);
                    flat.chapters.push(with_parent(row, "grade", &grade.name));
                    for lesson in &chapter.lessons {
                        let row = base_row(&lesson.name, lesson.order, now);
                        let row = with_parent(row, "chapter", &chapter.name);
                        let row = with_parent(row, "typebook", &typebook.name);
                        let row = with_parent(row, "subject", &subject.name);
                        flat.lessons.push(with_parent(row, "grade", &grade.name));
                    }
                }
            }
        }
    }
    flat
}

/// Materialize the whole tree in one transaction, level by level so every
/// MERGE can match its parents.
pub async fn seed_hierarchy(
    store: &dyn GraphStore,
    tree: &SeedTree,
    batch_size: usize,
) -> Result<SeedSummary> {
    let now = now_iso();
    let flat = flatten(tree, &now);
    let summary = SeedSummary {
        grades: flat.grades.len(),
        subjects: flat.subjects.len(),
        typebooks: flat.typebooks.len(),
        chapters: flat.chapters.len(),
        lessons: flat.lessons.len(),
    };
    info!(
        "🌱 seeding hierarchy: {} grades, {} subjects, {} typebooks, {} chapters, {} lessons",
        summary.grades, summary.subjects, summary.typebooks, summary.chapters, summary.lessons
    );

    let levels: [(&str, &[Row]); 5] = [
        (MERGE_GRADES, &flat.grades),
        (MERGE_SUBJECTS, &flat.subjects),
        (MERGE_TYPEBOOKS, &flat.typebooks),
        (MERGE_CHAPTERS, &flat.chapters),
        (MERGE_LESSONS, &flat.lessons),
    ];
    let batch_size = batch_size.max(1);
    let mut txn = store.begin().await?;
    for (text, rows) in levels {
        for chunk in rows.chunks(batch_size) {
            let stmt = Statement::new(text).param("rows", ParamValue::Rows(chunk.to_vec()));
            if let Err(err) = txn.run_write(stmt).await {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!("rollback after failed seed also failed: {rollback_err:#}");
                }
                return Err(err).context("hierarchy seed failed");
            }
        }
    }
    txn.commit().await.context("hierarchy seed commit failed")?;
    info!("✅ hierarchy seeded");
    Ok(summary)
}

const CONSTRAINTS: &[&str] = &[
    "CREATE CONSTRAINT user_id_unique IF NOT EXISTS FOR (u:User) REQUIRE u.id IS UNIQUE",
    "CREATE CONSTRAINT grade_id_unique IF NOT EXISTS FOR (g:Grade) REQUIRE g.id IS UNIQUE",
    "CREATE CONSTRAINT subject_id_unique IF NOT EXISTS FOR (s:Subject) REQUIRE s.id IS UNIQUE",
    "CREATE CONSTRAINT typebook_id_unique IF NOT EXISTS FOR (t:TypeBook) REQUIRE t.id IS UNIQUE",
    "CREATE CONSTRAINT chapter_id_unique IF NOT EXISTS FOR (c:Chapter) REQUIRE c.id IS UNIQUE",
    "CREATE CONSTRAINT lesson_id_unique IF NOT EXISTS FOR (l:Lesson) REQUIRE l.id IS UNIQUE",
    "CREATE CONSTRAINT question_id_unique IF NOT EXISTS FOR (q:Question) REQUIRE q.id IS UNIQUE",
    "CREATE CONSTRAINT answer_id_unique IF NOT EXISTS FOR (a:Answer) REQUIRE a.id IS UNIQUE",
    "CREATE CONSTRAINT knowledge_id_unique IF NOT EXISTS FOR (k:Knowledge) REQUIRE k.id IS UNIQUE",
];

pub async fn ensure_constraints(graph: &Graph) -> Result<()> {
    for text in CONSTRAINTS {
        graph
            .run(neo4rs::query(text))
            .await
            .with_context(|| format!("failed to apply constraint: {text}"))?;
    }
    info!("🔒 {} uniqueness constraints ensured", CONSTRAINTS.len());
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct WipeReport {
    pub deleted: i64,
    pub remaining: i64,
}

async fn node_count(graph: &Graph) -> Result<i64> {
    let mut stream = graph
        .execute(neo4rs::query("MATCH (n) RETURN count(n) AS n"))
        .await
        .context("node count failed")?;
    match stream.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>("n").unwrap_or(0)),
        _ => Ok(0),
    }
}

/// Delete every node and relationship, then verify the graph is empty.
pub async fn wipe(graph: &Graph) -> Result<WipeReport> {
    let before = node_count(graph).await?;
    graph
        .run(neo4rs::query("MATCH (n) DETACH DELETE n"))
        .await
        .context("wipe failed")?;
    let remaining = node_count(graph).await?;
    if remaining > 0 {
        warn!("⚠️ wipe left {remaining} node(s) behind");
    } else {
        info!("🗑️ wiped {before} node(s)");
    }
    Ok(WipeReport {
        deleted: before - remaining,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tree() -> SeedTree {
        serde_json::from_value(json!({
            "grades": [{
                "name": "Grade 4",
                "order": 4,
                "subjects": [{
                    "name": "Math",
                    "typebooks": [{
                        "name": "Workbook",
                        "chapters": [
                            {"name": "Numbers", "order": 1, "lessons": [
                                {"name": "Counting", "order": 1},
                                {"name": "Comparing", "order": 2}
                            ]},
                            {"name": "Shapes", "order": 2}
                        ]
                    }]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn flatten_walks_every_level() {
        let flat = flatten(&sample_tree(), "2026-01-01T00:00:00Z");
        assert_eq!(flat.grades.len(), 1);
        assert_eq!(flat.subjects.len(), 1);
        assert_eq!(flat.typebooks.len(), 1);
        assert_eq!(flat.chapters.len(), 2);
        assert_eq!(flat.lessons.len(), 2);
    }

    #[test]
    fn lesson_rows_carry_the_full_ancestor_path() {
        let flat = flatten(&sample_tree(), "2026-01-01T00:00:00Z");
        let lesson = &flat.lessons[0];
        for key in ["chapter", "typebook", "subject", "grade", "id", "name", "order", "now"] {
            assert!(lesson.contains_key(key), "missing {key}");
        }
        assert_eq!(
            lesson.get("grade"),
            Some(&PropValue::Str("Grade 4".to_string()))
        );
    }

    #[test]
    fn missing_order_defaults_to_one() {
        let flat = flatten(&sample_tree(), "2026-01-01T00:00:00Z");
        // "Math" has no explicit order in the sample.
        assert_eq!(flat.subjects[0].get("order"), Some(&PropValue::Int(1)));
        assert_eq!(flat.grades[0].get("order"), Some(&PropValue::Int(4)));
    }
}
