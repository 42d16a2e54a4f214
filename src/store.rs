//! Graph store boundary.
//!
//! The importer speaks to the database through two narrow traits: batched
//! single-column reads on the store, and parameterized writes inside an
//! explicit transaction. `Neo4jStore` is the production implementation over
//! `neo4rs`; tests substitute an in-memory store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{BoltType, Graph, Query};
use std::collections::HashMap;

/// Scalar property value carried in an UNWIND row.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

/// Parameter value for a prepared statement. Batched statements only ever
/// bind id lists and UNWIND row lists; scalar parameters go through
/// `neo4rs::Query` directly.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    StrList(Vec<String>),
    Rows(Vec<HashMap<String, PropValue>>),
}

/// A fixed statement template plus its bound parameters. Statement text is
/// always a compile-time template; values only ever travel as parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub text: String,
    pub params: Vec<(String, ParamValue)>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Statement {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.push((key.into(), value));
        self
    }
}

/// Read side of the store. `run_read` expects statements that return a single
/// string column aliased `value`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn run_read(&self, stmt: Statement) -> Result<Vec<String>>;
    async fn begin(&self) -> Result<Box<dyn GraphTxn>>;
}

/// An open write transaction. Either `commit` or `rollback` consumes it.
#[async_trait]
pub trait GraphTxn: Send {
    async fn run_write(&mut self, stmt: Statement) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Neo4jStore { graph }
    }
}

fn prop_to_bolt(v: PropValue) -> BoltType {
    match v {
        PropValue::Str(s) => s.into(),
        PropValue::Int(i) => i.into(),
        PropValue::Bool(b) => b.into(),
    }
}

fn to_query(stmt: Statement) -> Query {
    let mut q = neo4rs::query(&stmt.text);
    for (key, value) in stmt.params {
        q = match value {
            ParamValue::StrList(xs) => q.param(&key, xs),
            ParamValue::Rows(rows) => {
                let rows: Vec<HashMap<String, BoltType>> = rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|(k, v)| (k, prop_to_bolt(v))).collect())
                    .collect();
                q.param(&key, rows)
            }
        };
    }
    q
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn run_read(&self, stmt: Statement) -> Result<Vec<String>> {
        let mut stream = self
            .graph
            .execute(to_query(stmt))
            .await
            .context("read query failed")?;
        let mut out = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            if let Ok(value) = row.get::<String>("value") {
                out.push(value);
            }
        }
        Ok(out)
    }

    async fn begin(&self) -> Result<Box<dyn GraphTxn>> {
        let txn = self
            .graph
            .start_txn()
            .await
            .context("failed to start transaction")?;
        Ok(Box::new(Neo4jTxn { txn }))
    }
}

struct Neo4jTxn {
    txn: neo4rs::Txn,
}

#[async_trait]
impl GraphTxn for Neo4jTxn {
    async fn run_write(&mut self, stmt: Statement) -> Result<()> {
        self.txn
            .run(to_query(stmt))
            .await
            .context("write statement failed")
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await.context("commit failed")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback().await.context("rollback failed")
    }
}
