use std::path::PathBuf;
use std::process;

use anyhow::Context;
use tokio::sync::mpsc;

use holod::{
    Dispatcher, DisplaySupervisor, ImageStore, LinkConfig, PoolConfig, RendererConfig,
    RendererPool, open_serial,
};

struct Options {
    images_root: PathBuf,
    serial: PathBuf,
    config: Option<PathBuf>,
    default_animation: String,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: holod [--images <dir>] [--serial <device>] [--config <file>] [--default <animation>]"
            );
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --images <dir>         Animation image tree [default: images]");
            eprintln!("  --serial <device>      Serial device node [default: /dev/ttyS0]");
            eprintln!("  --config <file>        Renderer configuration JSON");
            eprintln!("  --default <animation>  Animation shown at startup [default: Idle]");
            process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(options).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        images_root: PathBuf::from("images"),
        serial: PathBuf::from("/dev/ttyS0"),
        config: None,
        default_animation: "Idle".to_string(),
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--images" => {
                i += 1;
                options.images_root =
                    PathBuf::from(args.get(i).ok_or("--images requires a value")?);
            }
            "--serial" => {
                i += 1;
                options.serial = PathBuf::from(args.get(i).ok_or("--serial requires a value")?);
            }
            "--config" => {
                i += 1;
                options.config =
                    Some(PathBuf::from(args.get(i).ok_or("--config requires a value")?));
            }
            "--default" => {
                i += 1;
                options.default_animation =
                    args.get(i).ok_or("--default requires a value")?.clone();
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }
    Ok(options)
}

async fn run(options: Options) -> anyhow::Result<()> {
    let renderer = match &options.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => RendererConfig::default(),
    };

    // Open the link before any engine spawns so a bad device path fails
    // fast with nothing to tear down.
    let link = open_serial(&options.serial)
        .await
        .with_context(|| format!("opening {}", options.serial.display()))?;

    let pool = RendererPool::initialize(&options.images_root, PoolConfig::new(renderer))
        .await
        .context("initializing renderer pool")?;
    let mut supervisor = DisplaySupervisor::new(pool, options.default_animation);
    supervisor.initialize();

    let store = ImageStore::new(&options.images_root);
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (mut dispatcher, handle) =
        Dispatcher::new(link, supervisor, store, LinkConfig::default(), events_tx);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; shutting down");
            handle.trigger_shutdown();
        }
    });

    // Gesture policy (which swipe selects which animation) belongs to the
    // messaging front-end; locally gestures are only logged.
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            tracing::info!(?event, "gesture event");
        }
    });

    dispatcher.run().await.context("link dispatcher")?;
    Ok(())
}
