use clap::Parser;
use log::{error, info, warn};
use server::classifier::DirectionClassifier;
use server::context::AppContext;
use server::{http, twitch};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Port on which the server listens
    #[clap(short, long, default_value = "8005")]
    port: u16,
    /// Directory served read-only under /data
    #[clap(short, long)]
    data_dir: Option<PathBuf>,
    /// Directory holding the database and the trained model
    #[clap(short, long)]
    cache_dir: Option<PathBuf>,
    /// Trained model file to load; created fresh if absent
    #[clap(long)]
    model_file: Option<PathBuf>,
    /// Twitch channel to ingest chat commands from
    #[clap(long)]
    twitch_channel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    for dir in [&args.data_dir, &args.cache_dir].into_iter().flatten() {
        if !dir.is_dir() {
            return Err(format!("The specified directory '{}' does not exist.", dir.display()).into());
        }
    }

    let ctx = match &args.cache_dir {
        Some(dir) => AppContext::open(&dir.join("chatplays.db"))?,
        None => {
            warn!("No cache directory specified; scores will not survive a restart");
            AppContext::open_in_memory()?
        }
    };

    let model_file = model_path(&args);
    load_classifier(&ctx, model_file.as_deref());

    if let Some(channel) = args.twitch_channel.clone() {
        let chat_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            twitch::run_chat_source(chat_ctx, channel).await;
        });
    }

    // SIGHUP swaps the event decoder set and re-runs the model loader;
    // open connections are unaffected until their next frame
    #[cfg(unix)]
    {
        let reload_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to install SIGHUP handler: {}", e);
                    return;
                }
            };
            while hangup.recv().await.is_some() {
                info!("Reloading event registry and classifier");
                reload_ctx.events.reload();
                load_classifier(&reload_ctx, model_file.as_deref());
            }
        });
    }

    let router = http::router(Arc::clone(&ctx), args.data_dir.clone());
    let server_handle = tokio::spawn(http::serve(router, args.port));

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result? {
                error!("Server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}

fn model_path(args: &Args) -> Option<PathBuf> {
    args.model_file.clone().or_else(|| {
        args.cache_dir
            .as_ref()
            .map(|dir| dir.join("trained-model.json"))
    })
}

/// Restores a previously trained model or trains and saves a fresh one.
fn load_classifier(ctx: &AppContext, path: Option<&Path>) {
    let Some(path) = path else {
        error!("No cache directory or model file specified; chat classification disabled");
        return;
    };

    let classifier = match DirectionClassifier::load_from_file(path) {
        Some(classifier) => {
            info!("Restored trained model from {}", path.display());
            classifier
        }
        None => {
            let classifier = DirectionClassifier::create_new();
            if let Err(e) = classifier.save_to_file(path) {
                warn!("Trained model not saved to {}: {}", path.display(), e);
            }
            classifier
        }
    };

    ctx.set_classifier(classifier);
}
