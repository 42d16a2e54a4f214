//! edugraph: bulk importer and query CLI for the educational content graph.

mod importer;
mod model;
mod queries;
mod seed;
mod store;

use anyhow::{bail, Context, Result};
use model::ImportKind;
use neo4rs::Graph;
use serde::Serialize;
use serde_json::Value;
use store::Neo4jStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Config {
    neo4j_uri: String,
    neo4j_user: String,
    neo4j_password: String,
}

impl Config {
    fn from_env() -> Self {
        dotenv::dotenv().ok();
        Config {
            neo4j_uri: std::env::var("NEO4J_URI")
                .unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            neo4j_user: std::env::var("NEO4J_USERNAME").unwrap_or_else(|_| "neo4j".to_string()),
            neo4j_password: std::env::var("NEO4J_PASSWORD")
                .unwrap_or_else(|_| "password".to_string()),
        }
    }
}

async fn connect_with_retry(
    uri: &str,
    user: &str,
    password: &str,
    max_retries: u32,
) -> Result<Graph> {
    for attempt in 1..=max_retries {
        match Graph::new(uri, user, password).await {
            Ok(graph) => {
                info!("✅ connected to Neo4j at {uri}");
                return Ok(graph);
            }
            Err(err) => {
                warn!("⏳ Neo4j connection attempt {attempt}/{max_retries} failed: {err}");
                if attempt < max_retries {
                    let delay = std::time::Duration::from_secs(1u64 << (attempt - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    bail!("could not connect to Neo4j at {uri} after {max_retries} attempts")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_import(
    store: &Neo4jStore,
    kind: ImportKind,
    path: &str,
    batch_size: Option<usize>,
) -> Result<()> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let records: Vec<Value> = serde_json::from_str(&data)
        .with_context(|| format!("{path} does not contain a JSON array of records"))?;
    let report = importer::import_records(store, kind, &records, batch_size).await?;
    print_json(&report)
}

fn parse_batch_size(arg: Option<&String>) -> Result<Option<usize>> {
    match arg {
        None => Ok(None),
        Some(raw) => {
            let size: usize = raw
                .parse()
                .with_context(|| format!("invalid batch size: {raw}"))?;
            if size == 0 {
                bail!("batch size must be at least 1");
            }
            Ok(Some(size))
        }
    }
}

fn usage() {
    eprintln!(
        "usage: edugraph <command> [args]\n\
         \n\
         setup:\n\
         \x20 constraints                               ensure uniqueness constraints\n\
         \x20 seed <tree.json>                          seed the grade/subject hierarchy\n\
         \x20 wipe --yes                                delete every node and relationship\n\
         \n\
         bulk import (JSON array files):\n\
         \x20 import-users <file> [batch_size]\n\
         \x20 import-knowledge <file> [batch_size]\n\
         \x20 import-questions <file> [batch_size]\n\
         \x20 import-answers <file> [batch_size]\n\
         \x20 import-links <file> [batch_size]\n\
         \n\
         queries:\n\
         \x20 users\n\
         \x20 subjects\n\
         \x20 typebooks [subject_id]\n\
         \x20 chapters [typebook_id]\n\
         \x20 lessons [chapter_id]\n\
         \x20 knowledge [subject] [grade]\n\
         \x20 user-knowledge <user_id>\n\
         \x20 stats\n\
         \n\
         learned links:\n\
         \x20 link <user_id> <knowledge_id> [status] [progress]\n\
         \x20 unlink <user_id> <knowledge_id>\n\
         \x20 progress <user_id> <knowledge_id> <progress|-> [status]"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        usage();
        return Ok(());
    };

    let config = Config::from_env();
    let graph = connect_with_retry(
        &config.neo4j_uri,
        &config.neo4j_user,
        &config.neo4j_password,
        5,
    )
    .await?;
    let store = Neo4jStore::new(graph.clone());

    match command.as_str() {
        "constraints" => {
            seed::ensure_constraints(&graph).await?;
        }
        "seed" => {
            let path = args.get(1).context("seed requires a tree file")?;
            let data =
                std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
            let tree: seed::SeedTree = serde_json::from_str(&data)
                .with_context(|| format!("{path} is not a valid hierarchy tree"))?;
            seed::ensure_constraints(&graph).await?;
            let summary = seed::seed_hierarchy(&store, &tree, 500).await?;
            print_json(&summary)?;
        }
        "wipe" => {
            if args.get(1).map(String::as_str) != Some("--yes") {
                bail!("wipe deletes the whole graph; pass --yes to confirm");
            }
            let report = seed::wipe(&graph).await?;
            print_json(&report)?;
        }
        "import-users" | "import-knowledge" | "import-questions" | "import-answers"
        | "import-links" => {
            let kind = match command.as_str() {
                "import-users" => ImportKind::User,
                "import-knowledge" => ImportKind::Knowledge,
                "import-questions" => ImportKind::Question,
                "import-answers" => ImportKind::Answer,
                _ => ImportKind::LearnedLink,
            };
            let path = args.get(1).context("import requires a records file")?;
            let batch_size = parse_batch_size(args.get(2))?;
            run_import(&store, kind, path, batch_size).await?;
        }
        "users" => print_json(&queries::users(&graph).await?)?,
        "subjects" => print_json(&queries::subjects(&graph).await?)?,
        "typebooks" => {
            print_json(&queries::typebooks(&graph, args.get(1).map(String::as_str)).await?)?
        }
        "chapters" => {
            print_json(&queries::chapters(&graph, args.get(1).map(String::as_str)).await?)?
        }
        "lessons" => {
            print_json(&queries::lessons(&graph, args.get(1).map(String::as_str)).await?)?
        }
        "knowledge" => {
            let subject = args.get(1).map(String::as_str);
            let grade = args.get(2).map(String::as_str);
            print_json(&queries::knowledge(&graph, subject, grade).await?)?;
        }
        "user-knowledge" => {
            let user_id = args.get(1).context("user-knowledge requires a user id")?;
            print_json(&queries::user_knowledge(&graph, user_id).await?)?;
        }
        "link" => {
            let user_id = args.get(1).context("link requires a user id")?;
            let knowledge_id = args.get(2).context("link requires a knowledge id")?;
            let status = args.get(3).map(String::as_str);
            let progress = match args.get(4) {
                Some(raw) => Some(
                    raw.parse::<i64>()
                        .with_context(|| format!("invalid progress: {raw}"))?,
                ),
                None => None,
            };
            let result =
                queries::link_user_knowledge(&graph, user_id, knowledge_id, status, progress)
                    .await?;
            print_json(&result)?;
        }
        "unlink" => {
            let user_id = args.get(1).context("unlink requires a user id")?;
            let knowledge_id = args.get(2).context("unlink requires a knowledge id")?;
            queries::unlink_user_knowledge(&graph, user_id, knowledge_id).await?;
            info!("🔗 unlinked user {user_id} from knowledge {knowledge_id}");
        }
        "progress" => {
            let user_id = args.get(1).context("progress requires a user id")?;
            let knowledge_id = args.get(2).context("progress requires a knowledge id")?;
            let raw = args
                .get(3)
                .context("progress requires a value (or - to leave unchanged)")?;
            let progress = if raw == "-" {
                None
            } else {
                Some(
                    raw.parse::<i64>()
                        .with_context(|| format!("invalid progress: {raw}"))?,
                )
            };
            let status = args.get(4).map(String::as_str);
            let result = queries::update_learned_progress(
                &graph,
                user_id,
                knowledge_id,
                progress,
                status,
            )
            .await?;
            print_json(&result)?;
        }
        "stats" => print_json(&queries::stats(&graph).await?)?,
        other => {
            usage();
            bail!("unknown command: {other}");
        }
    }
    Ok(())
}
