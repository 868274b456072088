use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use keysync::config::Config;
use keysync::fingerprint::Fingerprint;
use keysync::gateway::{self, AppState};
use keysync::keylist::{Endpoint, Keylist};
use keysync::queue::ValidatorMessageQueue;
use keysync::store::{default_store_dir, FileTrustStore, TrustStore};
use keysync::sync::{Pipeline, Refresher, Schedule, Session};
use keysync::transport::{Fetch, HttpTransport, SocksProxy};
use keysync::verifier::GpgVerifier;

#[derive(Parser)]
#[command(name="keysync")]
#[command(about="keysync — fetch, validate and apply signed keylists")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd
}

#[derive(Args, Clone, Default)]
struct ProxyArgs {
    /// SOCKS5 proxy host (e.g. 127.0.0.1 for a local Tor)
    #[arg(long)]
    proxy_host: Option<String>,
    /// SOCKS5 proxy port
    #[arg(long)]
    proxy_port: Option<String>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Download a URL, optionally through a SOCKS5 proxy
    Fetch {
        #[arg(long)]
        url: String,
        #[command(flatten)]
        proxy: ProxyArgs,
        /// Write the body here instead of reporting its size
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Validate a keylist file's format
    Validate {
        /// Path to keylist JSON
        #[arg(long)]
        file: PathBuf,
        /// URL the keylist is published at (for relative signature_uri)
        #[arg(long)]
        url: String,
        /// Authority key fingerprint configured for this keylist (not needed for a format check)
        #[arg(long)]
        fingerprint: Option<String>,
    },
    /// Fetch, validate and verify one keylist without touching the trust store
    Check {
        #[arg(long)]
        url: String,
        /// Authority key fingerprint expected to sign the keylist
        #[arg(long)]
        fingerprint: String,
        #[command(flatten)]
        proxy: ProxyArgs,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run one refresh cycle over all configured keylists
    Sync {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Refresh periodically and expose status to a UI over HTTP
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "127.0.0.1:8787")]
        addr: String,
    },
    /// Trust store operations
    Trust {
        #[command(subcommand)]
        cmd: TrustCmd
    },
}

#[derive(Subcommand)]
enum TrustCmd {
    /// List trusted and revoked keys
    List {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Format checks never read the authority, so `validate` may run without one.
const UNSET_AUTHORITY: &str = "0000000000000000000000000000000000000000";

fn endpoint_from_args(url: String, fingerprint: Fingerprint, proxy: ProxyArgs) -> Endpoint {
    let mut ep = Endpoint::new(url, fingerprint);
    if proxy.proxy_host.is_some() || proxy.proxy_port.is_some() {
        ep.use_proxy = true;
        ep.proxy_host = proxy.proxy_host;
        ep.proxy_port = proxy.proxy_port;
    }
    ep
}

fn pipeline_for(cfg: &Config) -> Pipeline {
    let s = &cfg.settings;
    Pipeline::new(
        Arc::new(HttpTransport::new(s.timeout(), s.max_document_bytes)),
        Arc::new(GpgVerifier::new(s.gpg_homedir.clone())),
        s.retries,
    )
}

fn open_store(cfg: &Config) -> Result<FileTrustStore> {
    let dir = match &cfg.settings.store_dir {
        Some(d) => d.clone(),
        None => default_store_dir()?,
    };
    FileTrustStore::open(dir)
}

/// Drain a validator queue oldest-first for terminal output.
fn print_notes(queue: &ValidatorMessageQueue) {
    let mut notes = Vec::new();
    while let Some(m) = queue.get(false) {
        notes.push(m);
    }
    for m in notes.into_iter().rev() {
        println!("  [{}] {}", m.step, m.msg);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Fetch { url, proxy, out } => {
            let proxy = match (proxy.proxy_host.as_deref(), proxy.proxy_port.as_deref()) {
                (None, None) => None,
                (host, port) => Some(SocksProxy::from_parts(host, port)?),
            };
            let body = HttpTransport::default().fetch(&url, proxy.as_ref())?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &body)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("FETCHED {} bytes -> {}", body.len(), path.display());
                }
                None => println!("FETCHED {} bytes", body.len()),
            }
        }
        Cmd::Validate { file, url, fingerprint } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let authority: Fingerprint = fingerprint.as_deref().unwrap_or(UNSET_AUTHORITY).parse()?;
            let mut kl = Keylist::new(Endpoint::new(url, authority));
            let keys = kl.validate_format(&bytes)?.keys.len();
            println!("VALID {keys} keys, signature at {}", kl.get_msg_sig_url()?);
        }
        Cmd::Check { url, fingerprint, proxy, config } => {
            let cfg = match config {
                Some(p) => Config::load_from(&p)?,
                None => Config::default(),
            };
            let fingerprint: Fingerprint = fingerprint.parse()?;
            let ep = endpoint_from_args(url, fingerprint, proxy);
            let notes = ValidatorMessageQueue::new();
            let result = pipeline_for(&cfg).check(&ep, &notes);
            print_notes(&notes);
            let verified = result?;
            println!("VERIFIED {} keys", verified.document.keys.len());
        }
        Cmd::Sync { config } => {
            let cfg = Config::load(config.as_deref())?;
            let store: Arc<dyn TrustStore> = Arc::new(open_store(&cfg)?);
            let refresher = Refresher::new(pipeline_for(&cfg), store);
            let session = Session::default();
            let report = refresher.run_cycle(&cfg.endpoints, &session, &Schedule::new());
            print_notes(&session.validator);
            for (url, err) in &report.failed {
                eprintln!("FAILED {url}: {err}");
            }
            println!("SYNCED {} keylists, {} keys", report.synced.len(), report.keys_applied);
            if !report.failed.is_empty() {
                return Err(anyhow!("{} keylists failed", report.failed.len()));
            }
        }
        Cmd::Serve { config, addr } => {
            let cfg = Config::load(config.as_deref())?;
            let store: Arc<dyn TrustStore> = Arc::new(open_store(&cfg)?);
            let refresher = Arc::new(Refresher::new(pipeline_for(&cfg), store));
            let session = Session::default();
            let schedule = Arc::new(Schedule::new());
            let worker = refresher.spawn(
                cfg.endpoints.clone(),
                session.clone(),
                schedule.clone(),
                cfg.settings.interval(),
            )?;

            let state = AppState { session, schedule: schedule.clone() };
            let rt = tokio::runtime::Runtime::new()?;
            let served = rt.block_on(gateway::run(&addr, state, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("cannot listen for ctrl-c: {e}");
                    std::future::pending::<()>().await;
                }
            }));
            schedule.stop();
            if worker.join().is_err() {
                log::error!("refresher thread panicked");
            }
            served?;
        }
        Cmd::Trust { cmd } => match cmd {
            TrustCmd::List { dir } => {
                let dir = match dir {
                    Some(d) => d,
                    None => default_store_dir()?,
                };
                for rec in FileTrustStore::open(dir)?.list()? {
                    println!(
                        "{}  {:?}  {}  {}",
                        rec.fingerprint,
                        rec.status,
                        rec.name.as_deref().unwrap_or("-"),
                        rec.source
                    );
                }
            }
        },
    }
    Ok(())
}
