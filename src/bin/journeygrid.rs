use std::{fs, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use journeygrid::{
    document::{self, ImportOptions},
    relay::{classify_completion, CompletionOutcome},
    Grid, Persona, PlaybackDriver, RelayClient, ServerEvent,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "journeygrid")]
#[command(about = "Inspect, replay and generate user journey maps")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarise a journey document
    Inspect {
        file: PathBuf,
    },
    /// Replay a journey document node by node
    Play {
        file: PathBuf,

        /// Delay between node insertions in milliseconds
        #[arg(long, default_value_t = 300)]
        tick_ms: u64,

        /// Place every node on the row of the entry that lists it
        #[arg(long)]
        normalize_rows: bool,
    },
    /// Ask a relay server to generate a journey from a scenario
    Prompt {
        /// Relay websocket, e.g. ws://127.0.0.1:3000/api/socket
        #[arg(long)]
        url: String,

        text: String,

        /// Where to write the generated document
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Expand a short persona brief into a full profile
    Persona {
        /// Relay websocket, e.g. ws://127.0.0.1:3000/api/socket
        #[arg(long)]
        url: String,

        brief: String,

        /// Print the structured profile as JSON instead of the text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,journeygrid=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Args::parse().command {
        Command::Inspect { file } => inspect(file),
        Command::Play {
            file,
            tick_ms,
            normalize_rows,
        } => play(file, tick_ms, normalize_rows).await,
        Command::Prompt { url, text, out } => prompt(&url, text, out).await,
        Command::Persona { url, brief, json } => persona(&url, brief, json).await,
    }
}

fn inspect(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(&file)?;
    let decoded = document::decode(&content)?;
    let imported = document::import_document(
        &decoded.document,
        ImportOptions::default(),
        &mut rand::thread_rng(),
    );

    let mut grid = Grid::new();
    grid.replace_row_labels(imported.row_labels.clone());
    for node in imported.nodes {
        grid.push_node(node);
    }

    println!("{}", file.display());
    for (index, label) in grid.row_labels().iter().enumerate() {
        let count = grid.nodes().iter().filter(|n| n.row as usize == index).count();
        println!("  row {index}: {label:?} ({count} nodes)");
    }
    for (group, members) in grid.grouped_view() {
        let steps: Vec<String> = members
            .iter()
            .map(|n| format!("({},{})", n.row, n.col))
            .collect();
        println!("  path {group}: {}", steps.join(" -> "));
    }
    println!(
        "{} nodes, {} paths drawn, {} entries skipped",
        grid.len(),
        grid.connections().len(),
        decoded.skipped
    );
    Ok(())
}

async fn play(
    file: PathBuf,
    tick_ms: u64,
    normalize_rows: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(&file)?;
    let options = ImportOptions { normalize_rows };
    let imported = document::import_json(&content, options, &mut rand::thread_rng())?;
    if imported.skipped > 0 {
        tracing::warn!(skipped = imported.skipped, "malformed node entries were skipped");
    }

    let grid = Grid::new().into_shared();
    grid.lock().await.replace_row_labels(imported.row_labels);

    let (progress, mut placed) = mpsc::unbounded_channel();
    let mut driver = PlaybackDriver::new(grid.clone())
        .with_tick(Duration::from_millis(tick_ms.max(1)))
        .with_progress(progress);
    driver.play(imported.nodes).await;

    let printer = tokio::spawn(async move {
        while let Some(node) = placed.recv().await {
            println!(
                "path {} step {} at row {} col {} {}",
                node.group_id, node.sub_id, node.row, node.col, node.color
            );
        }
    });

    driver.wait().await;
    drop(driver);
    let _ = printer.await;

    let grid = grid.lock().await;
    println!("{} nodes on {} rows", grid.len(), grid.row_count());
    Ok(())
}

async fn prompt(
    url: &str,
    text: String,
    out: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (client, mut events) = RelayClient::connect(url).await?;
    let request_id = client.send_prompt(text)?;

    let mut reply = None;
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Completion(completion)
                if completion.request_id.map_or(true, |id| id == request_id) =>
            {
                reply = Some(completion.text);
                break;
            }
            other => tracing::debug!(?other, "ignoring relay event"),
        }
    }
    client.disconnect().await;

    let text = reply.ok_or("relay closed before replying")?;
    match classify_completion(&text) {
        CompletionOutcome::Document(document) => {
            let path = out.unwrap_or_else(|| {
                PathBuf::from(document::suggested_filename(chrono::Utc::now()))
            });
            fs::write(&path, document.to_json_pretty()?)?;
            println!("wrote {} rows to {}", document.rows.len(), path.display());
            Ok(())
        }
        CompletionOutcome::Failure(message) => Err(message.into()),
    }
}

async fn persona(url: &str, brief: String, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (client, mut events) = RelayClient::connect(url).await?;
    let request_id = client.flourish_persona(brief)?;

    let mut reply = None;
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::PersonaFlourished(persona)
                if persona.request_id.map_or(true, |id| id == request_id) =>
            {
                reply = Some(persona.into_result());
                break;
            }
            other => tracing::debug!(?other, "ignoring relay event"),
        }
    }
    client.disconnect().await;

    let persona: Persona = reply.ok_or("relay closed before replying")??;
    if json {
        println!("{}", serde_json::to_string_pretty(&persona.profile)?);
    } else {
        println!("{}", persona.profile_text);
    }
    Ok(())
}
