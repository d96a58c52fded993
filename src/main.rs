//! Code Scanner CLI
//!
//! Runs the acquisition loop, prints every new code and the product
//! lookup outcome for it. Without the `camera` feature frames come from a
//! mock source and codes from a scripted reader.

use clap::Parser;
use code_scanner::{
    acquisition::{LoopConfig, Scanner},
    capture::{FileConfig, FrameSource},
    decode::{BoundingBox, DecodedCode, MultiTransformDecoder, ScriptedReader, Symbology, Transform},
    events::{event_channel, FramePreview, LoopStatus, ScannerEvent},
    lookup::{CodeStore, LookupDispatcher, Resolution, ResolutionOutcome, Resolver, SqliteStore},
    metrics::{MetricsRegistry, MetricsSnapshot},
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "code-scanner", version, about = "Scan barcodes and look up products")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Product database (overrides the config file)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Codes the scripted reader reports, one per frame
    #[arg(long, value_delimiter = ',')]
    demo_codes: Vec<String>,

    /// Save an annotated PNG of every frame with new codes into this directory
    #[arg(long)]
    preview_dir: Option<PathBuf>,

    /// Print the final metrics in Prometheus text format
    #[arg(long)]
    print_metrics: bool,
}

const DEFAULT_DEMO_CODES: &[&str] = &["4006381333931", "96385074", "https://example.org"];

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Code Scanner v{}", code_scanner::VERSION);

    let mut config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };
    if let Some(db) = args.db {
        config.lookup.database = db;
    }
    if let Some(frames) = args.frames {
        config.output.frame_limit = frames;
    }

    let store: Arc<dyn CodeStore> = match SqliteStore::open(&config.lookup.database) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!(
                "Failed to open product database {}: {}",
                config.lookup.database.display(),
                e
            );
            std::process::exit(1);
        }
    };

    let (events, receiver) = event_channel(config.scanner.event_queue_capacity);

    let resolver = Resolver::new(store, config.lookup.timeout());
    let dispatcher = match LookupDispatcher::new(resolver, config.lookup.workers, events.clone()) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("Failed to start lookup workers: {}", e);
            std::process::exit(1);
        }
    };

    let demo_codes = if args.demo_codes.is_empty() {
        DEFAULT_DEMO_CODES.iter().map(|c| c.to_string()).collect()
    } else {
        args.demo_codes
    };
    let decoder = MultiTransformDecoder::new(ScriptedReader::new(
        demo_script(&demo_codes),
        Transform::ALL.len(),
    ));

    let mut loop_config = LoopConfig::from_scanner(&config.scanner, config.output.frame_limit);
    if let Some(dir) = &args.preview_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create preview directory {}: {}", dir.display(), e);
            std::process::exit(1);
        }
        loop_config.preview = true;
    }

    let mut scanner = Scanner::new(
        frame_source(),
        decoder,
        config.capture.clone(),
        loop_config,
        events,
    );

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_stop.store(true, Ordering::Release)) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Failed to create metrics registry: {}", e);
            std::process::exit(1);
        }
    };
    #[cfg(feature = "metrics")]
    let shared_metrics = serve_metrics(config.output.metrics_port, registry);
    let mut snapshot = MetricsSnapshot::default();

    if let Err(e) = scanner.start() {
        eprintln!("Failed to start scanner: {}", e);
        std::process::exit(1);
    }

    while !stop.load(Ordering::Acquire) {
        if let Err(e) = scanner.poll() {
            warn!("Scanner poll failed: {}", e);
        }
        let Some(event) = receiver.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        snapshot.observe(&event);
        snapshot.sample_queue(&receiver);
        #[cfg(feature = "metrics")]
        code_scanner::metrics::publish(&shared_metrics, &snapshot);

        match event {
            ScannerEvent::Detection(detection) => {
                println!("Detected {}", detection.code.label());
                if !config.lookup.product_codes_only || detection.code.symbology.is_product_code() {
                    dispatcher.submit(detection);
                }
            }
            ScannerEvent::Resolution(resolution) => report(&resolution),
            ScannerEvent::Preview(preview) => {
                if let Some(dir) = &args.preview_dir {
                    save_preview(dir, &preview);
                }
            }
            ScannerEvent::Status(status) => {
                if status.fatal {
                    warn!("{}", status.message);
                }
                if status.status == LoopStatus::Stopped {
                    break;
                }
            }
        }
    }

    scanner.stop();
    match scanner.wait_stopped(Duration::from_secs(2)) {
        Ok(true) => {}
        Ok(false) => warn!("Capture device did not stop in time"),
        Err(e) => warn!("Scanner stop failed: {}", e),
    }
    dispatcher.shutdown();
    for event in receiver.drain() {
        snapshot.observe(&event);
        if let ScannerEvent::Resolution(resolution) = event {
            report(&resolution);
        }
    }
    snapshot.sample_queue(&receiver);

    #[cfg(feature = "metrics")]
    let encoded = {
        code_scanner::metrics::publish(&shared_metrics, &snapshot);
        shared_metrics.blocking_read().encode()
    };
    #[cfg(not(feature = "metrics"))]
    let encoded = {
        registry.update(&snapshot);
        registry.encode()
    };
    if args.print_metrics {
        match encoded {
            Ok(text) => print!("{}", text),
            Err(e) => warn!("Failed to encode metrics: {}", e),
        }
    }

    info!(
        frames = snapshot.frames_read,
        codes = snapshot.codes_detected,
        found = snapshot.lookups_found,
        not_found = snapshot.lookups_not_found,
        errors = snapshot.lookup_errors,
        dropped = snapshot.events_dropped,
        "Done"
    );
}

#[cfg(feature = "camera")]
fn frame_source() -> Box<dyn FrameSource> {
    info!("Using camera capture");
    Box::new(code_scanner::capture::NokhwaSource::new())
}

#[cfg(not(feature = "camera"))]
fn frame_source() -> Box<dyn FrameSource> {
    info!("This is a demonstration using mock camera input");
    Box::new(code_scanner::capture::MockSource::new())
}

/// One frame per code, each followed by an empty frame.
fn demo_script(codes: &[String]) -> Vec<Vec<DecodedCode>> {
    codes
        .iter()
        .flat_map(|payload| {
            let code = DecodedCode::new(
                payload.as_str(),
                demo_symbology(payload),
                BoundingBox::new(200, 200, 240, 80),
            );
            [vec![code], Vec::new()]
        })
        .collect()
}

fn demo_symbology(payload: &str) -> Symbology {
    if !payload.chars().all(|c| c.is_ascii_digit()) {
        return Symbology::QrCode;
    }
    match payload.len() {
        13 => Symbology::Ean13,
        12 => Symbology::UpcA,
        8 => Symbology::Ean8,
        _ => Symbology::Code128,
    }
}

fn save_preview(dir: &Path, preview: &FramePreview) {
    let path = dir.join(format!(
        "frame-{}-{}.png",
        preview.session, preview.sequence
    ));
    match preview.annotated.image.save(&path) {
        Ok(()) => info!(path = %path.display(), codes = preview.annotated.labels.len(), "Preview saved"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to save preview"),
    }
}

fn report(resolution: &Resolution) {
    match &resolution.outcome {
        ResolutionOutcome::Found {
            queried,
            matched,
            record,
            via_fallback,
        } => {
            if *via_fallback {
                println!(
                    "{}: {} (matched previous code {})",
                    queried,
                    record.display_name(),
                    matched
                );
            } else {
                println!("{}: {}", queried, record.display_name());
            }
        }
        ResolutionOutcome::NotFoundPromptable { code } => {
            println!("{}: not in database, create a new product?", code);
        }
        ResolutionOutcome::AlreadyAskedNotFound { code } => {
            println!("{}: not in database", code);
        }
        ResolutionOutcome::StoreError {
            code,
            fallback,
            error,
        } => match fallback {
            Some(previous) => println!(
                "{}: lookup of previous code {} failed: {}",
                code, previous, error
            ),
            None => println!("{}: lookup failed: {}", code, error),
        },
    }
}

/// Serves the registry over HTTP unless `port` is 0. The returned state is
/// usable either way.
#[cfg(feature = "metrics")]
fn serve_metrics(port: u16, registry: MetricsRegistry) -> code_scanner::metrics::SharedMetrics {
    use code_scanner::metrics::{MetricsServer, MetricsServerConfig};

    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();
    if port != 0 {
        if let Err(e) = server.spawn() {
            warn!("Failed to start metrics server: {}", e);
        }
    }
    state
}
