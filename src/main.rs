use anyhow::{Context, Result};
use dubforge::core::config::Config;
use dubforge::core::io::{NativeStorage, Storage};
use dubforge::core::state::LineStatus;
use dubforge::services::batch::{DubbingEngine, EngineOptions};
use dubforge::services::project::{Autosaver, ProjectStore};
use dubforge::services::repository::LineRepository;
use dubforge::services::tts::HttpSynthesisClient;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' is valid YAML.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let project_name = std::env::args()
        .nth(1)
        .context("usage: dubforge <project-name>")?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let store = ProjectStore::new(storage.clone(), &config.projects_folder);
    let data = store.load(&project_name).await?;

    let repo = Arc::new(Mutex::new(LineRepository::from_lines(data.lines.clone())));
    let roles = Arc::new(Mutex::new(data.role_configs.clone()));

    let server_url = if data.server_url.is_empty() {
        config.server_url.clone()
    } else {
        data.server_url.clone()
    };
    let concurrency = if data.concurrency == 0 {
        config.default_concurrency
    } else {
        data.concurrency
    };

    let client = Arc::new(HttpSynthesisClient::new()?);
    let engine = Arc::new(DubbingEngine::new(
        repo.clone(),
        roles.clone(),
        client,
        storage.clone(),
        EngineOptions {
            server_url,
            output_dir: store.output_dir(&project_name),
            max_concurrency: config.max_concurrency,
        },
    ));

    let autosaver = Autosaver::spawn(
        store.clone(),
        Duration::from_millis(config.autosave_debounce_ms),
        {
            let repo = repo.clone();
            let roles = roles.clone();
            let template = data.clone();
            move || {
                let mut snapshot = template.clone();
                snapshot.lines = repo.lock().unwrap().list().to_vec();
                snapshot.role_configs = roles.lock().unwrap().clone();
                snapshot
            }
        },
    );
    engine.attach_autosaver(autosaver.sender());

    let indices: Vec<usize> = {
        let repo = repo.lock().unwrap();
        repo.list()
            .iter()
            .filter(|l| l.status != LineStatus::Completed)
            .map(|l| l.index)
            .collect()
    };
    if indices.is_empty() {
        println!("Nothing to generate: all lines are completed.");
        return Ok(());
    }

    // Ctrl+C requests a cooperative stop; in-flight lines still finish.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.stop();
            }
        });
    }

    let total = repo.lock().unwrap().len();
    let baseline = repo.lock().unwrap().completed_count();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("#>-"));
    pb.set_position(baseline as u64);

    let mut progress = engine.subscribe();
    let pb_task = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow().clone();
            pb.set_position(snapshot.completed as u64);
            if let Some(task) = snapshot.current_task {
                pb.set_message(task);
            }
            if !snapshot.is_running {
                break;
            }
        }
        pb.finish_and_clear();
    });

    let report = engine.generate_batch(&indices, concurrency).await?;
    let _ = pb_task.await;
    autosaver.shutdown().await;

    println!(
        "{}: {} succeeded, {} failed ({} skipped for missing voices), {}/{} lines completed",
        if report.stopped { "Stopped" } else { "Done" },
        report.completed,
        report.failed,
        report.skipped,
        report.baseline + report.completed,
        report.total,
    );
    Ok(())
}
