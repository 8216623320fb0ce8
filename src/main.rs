use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinHandle;
use tracing::info;

use stanza::application::{CachedContentStore, ContentStore};
use stanza::cache::MemoryStore;
use stanza::config::{CliArgs, Command, ServeArgs, Settings};
use stanza::domain::ContentItem;
use stanza::infra::db::PostgresContentStore;
use stanza::infra::file::FileContentStore;
use stanza::infra::{http, telemetry};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    if let Err(err) = run(cli).await {
        eprintln!("stanza: {err}");
        process::exit(1);
    }
}

async fn run(cli: CliArgs) -> Result<(), Box<dyn Error>> {
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));
    let config_file = cli.config_file.as_deref();

    match command {
        Command::Serve(args) => {
            let settings = Settings::load(config_file, &args.overrides)?;
            telemetry::init(&settings.logging)?;
            serve(settings).await
        }
        Command::Export(args) => {
            let settings = Settings::load(config_file, &args.overrides)?;
            telemetry::init(&settings.logging)?;
            export(settings, args.out).await
        }
        Command::Import(args) => {
            let settings = Settings::load(config_file, &args.overrides)?;
            telemetry::init(&settings.logging)?;
            import(settings, args.file).await
        }
    }
}

/// Build the configured backing store, optionally wrapped in the overlay
/// cache. The watcher task only exists for the file-backed store and only
/// when the caller wants live reconciliation.
async fn build_store(
    settings: &Settings,
    watch: bool,
) -> Result<(Arc<dyn ContentStore>, Option<JoinHandle<()>>), Box<dyn Error>> {
    if let Some(url) = &settings.store.database_url {
        let store =
            PostgresContentStore::connect(url, settings.store.database_max_connections).await?;
        store.run_migrations().await?;
        info!("using postgres content store");
        Ok((wrap_cache(store, settings), None))
    } else {
        let store = FileContentStore::open(&settings.store.content_file)?;
        let watcher = watch.then(|| store.spawn_watcher(settings.store.watch_poll()));
        info!(
            path = %settings.store.content_file.display(),
            "using file content store"
        );
        Ok((wrap_cache(store, settings), watcher))
    }
}

fn wrap_cache<S>(store: S, settings: &Settings) -> Arc<dyn ContentStore>
where
    S: ContentStore + 'static,
{
    if settings.cache.enabled {
        let cache = Arc::new(MemoryStore::new(&settings.cache.key_prefix));
        Arc::new(CachedContentStore::new(store, cache, &settings.cache))
    } else {
        Arc::new(store)
    }
}

async fn serve(settings: Settings) -> Result<(), Box<dyn Error>> {
    let (store, _watcher) = build_store(&settings, true).await?;
    let app = http::mount(&settings.server.route_prefix, store);

    let listener = tokio::net::TcpListener::bind(settings.server.bind_addr()).await?;
    info!(
        addr = %listener.local_addr()?,
        prefix = %settings.server.route_prefix,
        "stanza edit surface listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

async fn export(settings: Settings, out: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let (store, _) = build_store(&settings, false).await?;
    let items = store.get_all_content().await?;
    let json = serde_json::to_string_pretty(&items)?;

    match out {
        Some(path) => {
            tokio::fs::write(&path, json).await?;
            info!(items = items.len(), path = %path.display(), "export complete");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn import(settings: Settings, file: PathBuf) -> Result<(), Box<dyn Error>> {
    let raw = tokio::fs::read_to_string(&file).await?;
    let items: Vec<ContentItem> = serde_json::from_str(&raw)?;

    let (store, _) = build_store(&settings, false).await?;
    store.set(&items).await?;
    info!(items = items.len(), "import complete");
    Ok(())
}
