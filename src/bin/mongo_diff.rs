use clap::Parser;
use mongo_mirror::logging::{init_logging, Console};
use mongo_mirror::mirror::validate::Validator;
use mongo_mirror::{MirrorConfig, MongoStore};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// configuration file path.
    #[clap(short, long, default_value = "config.toml")]
    conf: String,
    /// log file path, if not specified, all log information will be output to stderr.
    #[clap(long)]
    log_path: Option<String>,
    /// database to compare, overrides `sync.db`.
    #[clap(long)]
    db: Option<String>,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let opts: Opts = Opts::parse();
    let mut conf = MirrorConfig::from_path(&opts.conf)?;
    if let Some(db) = opts.db {
        conf.get_sync_mut().set_db(db);
    }
    let log_path = opts.log_path.as_deref().or_else(|| conf.get_log_path());
    // stdout carries the differences.
    let _guard = init_logging(log_path, Console::Stderr)?;

    let db = conf.get_sync().get_db();
    let source = MongoStore::connect(conf.get_src_url(), db)?;
    let target = MongoStore::connect(conf.get_dst_url(), db)?;
    for store in [&source, &target] {
        if let Err(e) = store.check_permissions() {
            error!(?e, "Check permission failed.");
            return Ok(ExitCode::FAILURE);
        }
    }

    let differences =
        Validator::new(&source, &target, conf.get_validate().get_unique_field()).validate_all()?;
    for diff in differences.iter() {
        println!("{}", diff);
    }
    info!(%db, total = differences.len(), "Validation complete.");
    if differences.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
