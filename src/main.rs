use anyhow::{Context, Result, bail};
use object_conveyor::{
    Manager,
    config::{AppConfig, Backend, Command},
    models::file::InboundFile,
    services::{
        conveyor::Conveyor,
        disk_store::DiskStore,
        s3_store::S3Store,
        store::{ObjectStore, SyncDirection},
    },
};
use std::{io::ErrorKind, process::ExitCode, sync::Arc};
use tokio::{io::AsyncWriteExt, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting conveyor with config: {:?}", cfg);

    // --- Local maintenance commands ---
    match command {
        Command::Migrate => {
            open_disk_store(&cfg).await?;
            tracing::info!("Database migration complete.");
            return Ok(ExitCode::SUCCESS);
        }
        Command::CreateBucket => {
            let store = open_disk_store(&cfg).await?;
            if store.create_bucket(&cfg.bucket).await? {
                println!("created bucket {}", cfg.bucket);
            } else {
                println!("bucket {} already exists", cfg.bucket);
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    // --- Initialize conveyance ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Local => Arc::new(open_disk_store(&cfg).await?),
        Backend::S3 => Arc::new(S3Store::connect(cfg.s3.clone()).await),
    };
    let mut conveyor = Conveyor::connect(store, cfg.bucket.clone(), cfg.policy.clone())
        .await
        .with_context(|| format!("connecting to bucket `{}`", cfg.bucket))?;
    conveyor.set_file_category(cfg.category.as_deref());
    let manager = Manager::new(conveyor).with_sizes(cfg.sizes.clone());

    run(command, manager, &cfg).await
}

async fn open_disk_store(cfg: &AppConfig) -> Result<DiskStore> {
    if cfg.backend != Backend::Local {
        bail!("this command only applies to the local backend");
    }
    let store = DiskStore::connect(&cfg.database_url, &cfg.storage_dir)
        .await
        .with_context(|| format!("opening {}", cfg.database_url))?;
    store.migrate().await?;
    Ok(store)
}

async fn run(command: Command, manager: Manager, cfg: &AppConfig) -> Result<ExitCode> {
    let conveyor = manager.conveyor();
    match command {
        Command::Upload { path, name } => {
            let receipt = manager.convey(InboundFile::Local(path), name.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Command::Image { path } => {
            let conveyance = manager
                .convey_image_detailed(InboundFile::Local(path))
                .await?;
            for outcome in conveyance.variants.failed() {
                if let Err(err) = &outcome.result {
                    eprintln!("{}: {}", outcome.name.as_deref().unwrap_or("<unproduced>"), err);
                }
            }
            println!("{}", conveyance.url);
            if !conveyance.success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Download { name, output } => {
            let Some(data) = conveyor.get_object_raw(&name, None).await else {
                bail!("could not fetch `{name}`");
            };
            match output {
                Some(path) => tokio::fs::write(&path, &data).await?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Info { name } => {
            let info = conveyor.get_object_info(&name, None).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Exists { name } => {
            if !conveyor.object_exists(&name, None).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Delete { name } => {
            if !conveyor.delete_object(&name).await {
                eprintln!("`{name}` was not deleted");
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Url { name } => println!("{}", conveyor.url(&name)),
        Command::Sync { dir, download } => {
            let direction = if download {
                SyncDirection::Download
            } else {
                SyncDirection::Upload
            };
            let report = conveyor.sync_directory(&dir, None, direction).await?;
            println!("{} objects, {} bytes", report.transferred, report.bytes);
        }
        Command::Stash { name, prefix } => match conveyor.stash_object(&name, None, &prefix).await? {
            Some(path) => println!("{}", path.display()),
            None => {
                eprintln!("`{name}` not found");
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::Serve { .. } => serve(manager.clone(), cfg).await?,
        Command::Migrate | Command::CreateBucket => {}
    }
    Ok(ExitCode::SUCCESS)
}

async fn serve(manager: Manager, cfg: &AppConfig) -> Result<()> {
    let app = object_conveyor::app(manager);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
