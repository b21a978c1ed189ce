use clap::Parser;
use mongo_mirror::logging::{init_logging, Console};
use mongo_mirror::{Mirror, MirrorConfig, MongoStore, Shutdown};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// configuration file path.
    #[clap(short, long, default_value = "config.toml")]
    conf: String,
    /// log file path, if not specified, all log information will be output to stdout.
    #[clap(long)]
    log_path: Option<String>,
    /// database to mirror, overrides `sync.db`.
    #[clap(long)]
    db: Option<String>,
    /// documents per insert call, overrides `sync.batch_size`.
    #[clap(long)]
    batch_size: Option<usize>,
    /// collections copied at the same time, overrides `sync.collection_concurrent`.
    #[clap(long)]
    collection_concurrent: Option<usize>,
}

/// Trigger `shutdown` on Ctrl-C, from a dedicated signal thread.
fn watch_ctrl_c(shutdown: Shutdown) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Ctrl-C received, shutting down...");
                        shutdown.trigger();
                    }
                    Err(e) => error!(?e, "Can't listen for Ctrl-C."),
                }
            })
        })?;
    Ok(())
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let opts: Opts = Opts::parse();
    let mut conf = MirrorConfig::from_path(&opts.conf)?;
    if let Some(db) = opts.db {
        conf.get_sync_mut().set_db(db);
    }
    if let Some(batch_size) = opts.batch_size {
        conf.get_sync_mut().set_batch_size(batch_size);
    }
    if let Some(concurrent) = opts.collection_concurrent {
        conf.get_sync_mut().set_collection_concurrent(concurrent);
    }
    let log_path = opts.log_path.as_deref().or_else(|| conf.get_log_path());
    // returning from main drops the guard, which flushes pending log lines.
    let _guard = init_logging(log_path, Console::Stdout)?;

    let sync = conf.get_sync();
    let source = MongoStore::connect(conf.get_src_url(), sync.get_db())?
        .with_feed_poll(sync.get_feed_poll());
    let target = MongoStore::connect(conf.get_dst_url(), sync.get_db())?;
    for store in [&source, &target] {
        if let Err(e) = store.check_permissions() {
            error!(?e, "Check permission failed.");
            return Ok(ExitCode::FAILURE);
        }
    }

    let shutdown = Shutdown::new();
    watch_ctrl_c(shutdown.clone())?;

    info!(db = sync.get_db(), "Starting mongo mirror...");
    let mirror = Mirror::new(Arc::new(source), Arc::new(target), &conf);
    let report = mirror.run(&shutdown)?;
    info!(
        copied = report.bulk.copied.len(),
        skipped = report.bulk.skipped.len(),
        failed = report.bulk.failed.len(),
        differences = ?report.differences.as_ref().map(|d| d.len()),
        feed = ?report.feed,
        "Mongo mirror finished."
    );
    Ok(ExitCode::SUCCESS)
}
