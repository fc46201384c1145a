use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use notes_rag::core::config::{AppPaths, ConfigService};
use notes_rag::core::logging;
use notes_rag::core::progress::LoadProgress;
use notes_rag::llm::{GenerationEngine, LlamaServerBackend, LlamaServerEmbedder};
use notes_rag::notes::{JsonNoteStore, NoteDraft, NoteLibrary};
use notes_rag::speech::{StreamSettings, TranscriptionEngine, WhisperServerRecognizer};
use notes_rag::store::{SqliteVectorStore, VectorStore};
use notes_rag::{GenerateOutcome, RagError, RagService};

const HELP: &str = "\
Commands:
  /add <title> | <content>   save a note
  /rm <id>                   delete a note
  /notes                     list notes
  /search <query>            semantic note search
  /reindex                   re-embed every note
  /clear                     forget the conversation
  /quit                      exit
Anything else is a question about your notes. Ctrl-C stops an answer.";

fn report_progress(progress: LoadProgress) {
    tracing::info!(
        component = progress.component.as_str(),
        "{:>3.0}% {}",
        progress.progress * 100.0,
        progress.message
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let config = ConfigService::new(paths.clone())
        .load_app_config()
        .context("Failed to load config")?;
    let client = reqwest::Client::new();

    let embedder =
        LlamaServerEmbedder::new(config.embedding.clone(), &paths.bin_dir, client.clone())
            .into_provider();
    let vectors: Arc<dyn VectorStore> = Arc::new(
        SqliteVectorStore::new(&paths, embedder)
            .await
            .context("Failed to open vector store")?,
    );
    let library = NoteLibrary::new(Arc::new(JsonNoteStore::new(&paths)), vectors.clone());

    let generation = GenerationEngine::new(Arc::new(LlamaServerBackend::new(
        config.generation.clone(),
        &paths.bin_dir,
        client.clone(),
    )));
    let transcription = TranscriptionEngine::new(
        Arc::new(WhisperServerRecognizer::new(
            config.speech.clone(),
            &paths.bin_dir,
            client,
        )),
        StreamSettings::from(&config.speech),
        config.speech.ingest_capacity,
    );
    let service = Arc::new(RagService::new(
        vectors,
        generation,
        transcription,
        &config.rag,
    ));

    service
        .load(&report_progress)
        .await
        .context("Failed to load models")?;

    let interrupter = service.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupter.is_generating() {
                interrupter.interrupt();
            } else {
                eprintln!("\n(type /quit to exit)");
            }
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match run_command(line, &service, &library).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => eprintln!("error: {}", err),
        }
    }

    Ok(())
}

/// Handles one input line. Returns `false` when the user asked to quit.
async fn run_command(
    line: &str,
    service: &RagService,
    library: &NoteLibrary,
) -> Result<bool, RagError> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/quit" | "/exit" => return Ok(false),
        "/help" => println!("{}", HELP),
        "/add" => {
            let (title, content) = rest.split_once('|').unwrap_or(("", rest));
            let note = library.create(NoteDraft::new(title, content.trim())).await?;
            println!("saved {}", note.id);
        }
        "/rm" => {
            if library.delete(rest).await? {
                println!("deleted");
            } else {
                println!("no such note");
            }
        }
        "/notes" => {
            for note in library.list().await? {
                println!("{}  {}", note.id, note.title);
            }
        }
        "/search" => {
            for hit in library.search(rest, 5).await? {
                println!("{:.3}  {}  {}", hit.similarity, hit.note.id, hit.note.title);
            }
        }
        "/reindex" => {
            let indexed = library.reindex().await?;
            println!("indexed {} notes", indexed);
        }
        "/clear" => service.clear_history(),
        _ => ask(line, service).await?,
    }
    Ok(true)
}

async fn ask(question: &str, service: &RagService) -> Result<(), RagError> {
    let outcome = service
        .generate(question, |token| {
            print!("{}", token);
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();

    match outcome {
        GenerateOutcome::Completed { sources, .. } => {
            for source in sources {
                println!(
                    "  [{}] {} ({:.2})",
                    source.id, source.metadata.title, source.similarity
                );
            }
        }
        GenerateOutcome::Interrupted { .. } => println!("[interrupted]"),
    }
    Ok(())
}
