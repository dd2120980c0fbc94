use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use curator_cli::logging;
use curator_cli::render;
use curator_core::app::App;
use curator_core::classifier::PredictionSummary;
use curator_core::config;
use curator_core::reconciler::DEFAULT_UPLOADER;
use curator_core::scanner;
use curator_core::{Fingerprint, Hierarchy, RecordKey};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    debug!(
        remote = %cfg.remote.provider,
        database = %cfg.database.path,
        "configuration loaded"
    );
    let app = App::from_config(cfg).await?;
    let result = run(&app, cli.command).await;
    if let Err(err) = &result {
        warn!(error = %err, "command failed");
    }
    app.close().await;
    result
}

#[derive(Parser)]
#[command(name = "waste-curator")]
#[command(about = "Curates a categorized waste image dataset", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload images (files or directories) under a category
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Main category
        #[arg(long = "main")]
        main_category: String,
        /// Sub category
        #[arg(long)]
        sub: Option<String>,
        /// Sub-sub category
        #[arg(long)]
        subsub: Option<String>,
        /// Recorded as the uploader
        #[arg(long, default_value = DEFAULT_UPLOADER)]
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the category tree
    Categories {
        #[arg(long)]
        json: bool,
    },
    /// List dataset records
    List {
        #[arg(long)]
        json: bool,
    },
    /// Look up a record by fingerprint
    Find {
        fingerprint: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete an image by fingerprint or record id
    Delete {
        #[arg(required_unless_present = "id", conflicts_with = "id")]
        fingerprint: Option<String>,
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Delete a category folder and every record filed under it
    DeleteCategory {
        /// Category path, e.g. plastic/pet
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Remove duplicate records left by older data
    Reconcile {
        #[arg(long)]
        json: bool,
    },
    /// Register remote images that have no record yet
    IndexRemote {
        #[arg(long)]
        json: bool,
    },
    /// Download the whole dataset into a local directory
    Export {
        dest: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Classify an image and store the prediction
    Predict {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Stored predictions
    Predictions {
        #[command(subcommand)]
        action: PredictionCommands,
    },
}

#[derive(Subcommand)]
enum PredictionCommands {
    List {
        #[arg(long)]
        json: bool,
    },
    Delete {
        id: i64,
        #[arg(long)]
        json: bool,
    },
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Upload {
            paths,
            main_category,
            sub,
            subsub,
            user,
            json,
        } => run_upload(app, &paths, &main_category, sub, subsub, &user, json).await,
        Commands::Categories { json } => {
            let tree = app.reconciler.categories().await;
            emit(json, &tree, || {
                let lines = render::tree_lines(&tree);
                if lines.is_empty() {
                    println!("no categories");
                }
                for line in lines {
                    println!("{line}");
                }
            })
        }
        Commands::List { json } => {
            let records = app.reconciler.list_records().await?;
            emit(json, &records, || {
                for record in &records {
                    println!("{}", render::record_line(record));
                }
                println!("{} record(s)", records.len());
            })
        }
        Commands::Find { fingerprint, json } => {
            let fp = Fingerprint::parse(&fingerprint)?;
            let record = app.reconciler.find(&fp).await?;
            emit(json, &record, || match &record {
                Some(r) => println!("{}", render::record_line(r)),
                None => println!("no record for {fp}"),
            })
        }
        Commands::Delete {
            fingerprint,
            id,
            json,
        } => {
            let key = match (fingerprint, id) {
                (_, Some(id)) => RecordKey::Id(id),
                (Some(fp), None) => RecordKey::Fingerprint(Fingerprint::parse(&fp)?),
                (None, None) => bail!("give a fingerprint or --id"),
            };
            let removed = app.reconciler.delete(&key).await?;
            let body = serde_json::json!({ "status": "ok", "removed": removed });
            emit(json, &body, || {
                if removed {
                    println!("deleted");
                } else {
                    println!("nothing to delete");
                }
            })
        }
        Commands::DeleteCategory { path, json } => {
            let hierarchy: Hierarchy = path.parse()?;
            let removal = app.reconciler.delete_category(&hierarchy).await?;
            emit(json, &removal, || {
                let parent = removal
                    .parent
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "(top level)".into());
                println!(
                    "deleted category {} under {parent}; {} record(s) removed",
                    removal.deleted, removal.records_removed
                );
            })
        }
        Commands::Reconcile { json } => {
            let report = app.reconciler.reconcile_all().await?;
            emit(json, &report, || {
                println!(
                    "scanned {}, removed {} duplicate(s), {} failed",
                    report.scanned,
                    report.removed,
                    report.failed.len()
                );
            })?;
            if !report.failed.is_empty() {
                bail!("{} duplicate(s) could not be removed", report.failed.len());
            }
            Ok(())
        }
        Commands::IndexRemote { json } => {
            let report = app.reconciler.index_remote().await?;
            emit(json, &report, || {
                println!(
                    "scanned {}, indexed {}, skipped {}",
                    report.scanned, report.indexed, report.skipped
                );
            })
        }
        Commands::Export { dest, json } => {
            let report = app.reconciler.export(&dest).await?;
            emit(json, &report, || {
                println!(
                    "exported {} file(s) in {} folder(s) to {}, {} skipped",
                    report.files,
                    report.folders,
                    dest.display(),
                    report.skipped
                );
            })
        }
        Commands::Predict { path, json } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let record = app.predictor.predict(Bytes::from(data)).await?;
            let summary = PredictionSummary::from(&record);
            emit(json, &summary, || println!("{}", render::prediction_line(&summary)))
        }
        Commands::Predictions { action } => match action {
            PredictionCommands::List { json } => {
                let summaries: Vec<PredictionSummary> = app
                    .predictor
                    .list()
                    .await?
                    .iter()
                    .map(PredictionSummary::from)
                    .collect();
                emit(json, &summaries, || {
                    for s in &summaries {
                        println!("{}", render::prediction_line(s));
                    }
                    println!("{} prediction(s)", summaries.len());
                })
            }
            PredictionCommands::Delete { id, json } => {
                let removed = app.predictor.delete(id).await?;
                let body = serde_json::json!({ "status": "ok", "removed": removed });
                emit(json, &body, || {
                    if removed {
                        println!("deleted prediction {id}");
                    } else {
                        println!("no prediction {id}");
                    }
                })
            }
        },
    }
}

async fn run_upload(
    app: &App,
    paths: &[PathBuf],
    main_category: &str,
    sub: Option<String>,
    subsub: Option<String>,
    user: &str,
    json: bool,
) -> Result<()> {
    let hierarchy = Hierarchy::from_parts(main_category, sub.as_deref(), subsub.as_deref())?;
    let files = scanner::collect_images(paths, &app.config.dataset.accept).await?;
    if files.is_empty() {
        bail!("no images found in the given paths");
    }
    debug!(files = files.len(), hierarchy = %hierarchy, "collected upload batch");
    let report = scanner::upload_files(&app.reconciler, &files, &hierarchy, user).await;
    emit(json, &report, || {
        for file in &report.files {
            println!("{}", render::file_line(file));
        }
        println!("uploaded {}, failed {}", report.uploaded, report.failed);
    })?;
    if report.failed > 0 {
        bail!("{} upload(s) failed", report.failed);
    }
    Ok(())
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce()) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}
