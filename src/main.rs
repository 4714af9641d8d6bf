use std::{
    io::Read,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use log::{debug, error};
use screencapture::{
    browser_controller::ChromeEngine,
    capture::{CaptureEngine, CaptureOptions},
    extractor::HtmlExtractor,
    handler::capture_to_storage,
    prober::HttpProber,
    runner::{Runner, RunnerOptions},
    types::{CaptureEvent, Response},
    uploader::{ObjectStoreSink, R2Config},
    utils::DEFAULT_OUTPUT_DIR,
};
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Screen Capture To Storage CLI", long_about = None)]
struct Args {
    /// JSON file holding `[{url, name}]` or `{"urls": [...]}`, `-` for stdin
    #[arg(short = 'i', long, default_value = "-")]
    input: String,
    /// Scratch directory for screenshots and local json mirrors
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    /// Number of results accumulated before flushing to storage
    #[arg(short = 'b', long, default_value_t = 5)]
    batch_size: usize,
    /// Time in seconds to wait after navigation before taking the screenshot
    #[arg(long, default_value_t = 5)]
    settle_delay: u64,
    /// Maximum time in seconds the browser waits for a navigation
    #[arg(long, default_value_t = 30)]
    navigation_timeout: u64,
    /// Hard ceiling in seconds for a whole screenshot
    #[arg(long, default_value_t = 45)]
    capture_timeout: u64,
    /// Timeout in seconds for the liveness check
    #[arg(long, default_value_t = 10)]
    liveness_timeout: u64,
    /// Don't mirror flushed collections into the output directory
    #[arg(long)]
    no_local_mirror: bool,
    #[arg(long, env = "CLOUDFLARE_R2_ENDPOINT")]
    r2_endpoint: String,
    #[arg(long, env = "CLOUDFLARE_ACCESS_KEY_ID", hide_env_values = true)]
    r2_access_key_id: String,
    #[arg(long, env = "CLOUDFLARE_SECRET_ACCESS_KEY", hide_env_values = true)]
    r2_secret_access_key: String,
    #[arg(long, env = "CLOUDFLARE_R2_BUCKET_NAME")]
    r2_bucket: String,
    /// Base url under which uploaded objects are publicly reachable
    #[arg(long, env = "CLOUDFLARE_R2_PUBLIC_URL")]
    r2_public_url: String,
}

fn read_event(input: &str) -> anyhow::Result<CaptureEvent> {
    let data = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("could not read urls from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input).context(format!("could not read urls from {}", input))?
    };
    serde_json::from_str(&data).context("urls must be a list of {url, name}")
}

fn build_runner(args: &Args, should_terminate: Arc<AtomicBool>) -> anyhow::Result<Runner> {
    let client = reqwest::Client::builder()
        .build()
        .context("could not build http client")?;

    let capture_options = CaptureOptions::default_builder()
        .settle_delay(Duration::from_secs(args.settle_delay))
        .navigation_timeout(Duration::from_secs(args.navigation_timeout))
        .ceiling(Duration::from_secs(args.capture_timeout))
        .build()?;
    let engine = ChromeEngine::new(capture_options.ceiling())
        .context("couldn't find appropriate Chrome binary")?;
    let capture = CaptureEngine::new(Arc::new(engine), capture_options)?;

    let sink = ObjectStoreSink::from_r2(&R2Config {
        endpoint: args.r2_endpoint.clone(),
        access_key_id: args.r2_access_key_id.clone(),
        secret_access_key: args.r2_secret_access_key.clone(),
        bucket: args.r2_bucket.clone(),
        public_url: args.r2_public_url.clone(),
    })
    .context("could not configure storage")?;

    let options = RunnerOptions::default_builder()
        .batch_size(args.batch_size)
        .output_dir(args.output_dir.clone())
        .local_mirror(!args.no_local_mirror)
        .build()?;

    Ok(Runner::new(
        Arc::new(HttpProber::with_timeout(
            client.clone(),
            Duration::from_secs(args.liveness_timeout),
        )),
        Arc::new(HtmlExtractor::new(client)),
        capture,
        Arc::new(sink),
        options,
    )
    .with_termination_flag(should_terminate))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    debug!("reading urls from {}", args.input);

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let setup = read_event(&args.input)
        .and_then(|event| Ok((event, build_runner(&args, should_terminate)?)));

    let response = match setup {
        Ok((event, runner)) => {
            debug!("scratch directory {:?}", runner.options().output_dir());
            capture_to_storage(&runner, event).await
        }
        Err(e) => {
            error!("a critical error occurred: {:#}", e);
            Response {
                status_code: 500,
                body: format!("A critical error occurred: {:#}", e),
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
