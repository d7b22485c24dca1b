use clap::Parser;
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder;

use photopusher::cli::Cli;
use photopusher::common::errors::handle_error;
use photopusher::common::shutdown::Shutdown;
use photopusher::config::AppConfig;
use photopusher::database::ProcessedSet;
use photopusher::operations::default_providers;
use photopusher::operations::http::HttpTransport;
use photopusher::operations::imaging::LocalImageProcessor;
use photopusher::workflow::capture::capture_loop;
use photopusher::workflow::processors::artifacts::ImageProcessor;
use photopusher::workflow::processors::setup::{
    check_ffmpeg_and_ffprobe, initialize_folder, initialize_logger,
};
use photopusher::workflow::{Monitor, PipelineController};

/// Exit code for bad arguments or an unreachable endpoint.
const USAGE_EXIT: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid environment configuration: {:#}", err);
            return ExitCode::from(USAGE_EXIT);
        }
    };
    cli.apply(&mut config);
    initialize_logger(config.level_filter());

    if let Err(err) = config.validate() {
        error!("{}", err);
        return ExitCode::from(USAGE_EXIT);
    }

    let runtime = match Builder::new_multi_thread()
        .thread_name("photopusher-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            handle_error(anyhow::Error::from(err).context("Failed to build Tokio runtime"));
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: AppConfig) -> ExitCode {
    if let Err(err) = initialize_folder(&config) {
        handle_error(err);
        return ExitCode::FAILURE;
    }
    check_ffmpeg_and_ffprobe();

    let transport = match HttpTransport::new(config.upload_timeout()) {
        Ok(transport) => transport,
        Err(err) => {
            handle_error(err);
            return ExitCode::FAILURE;
        }
    };
    if config.ping {
        if let Err(err) = transport.ping(&config.base_url).await {
            error!("Failed to connect to {}: {:#}", config.base_url, err);
            return ExitCode::from(USAGE_EXIT);
        }
    }

    let processed = match ProcessedSet::open(&config.db_path) {
        Ok(processed) => processed,
        Err(err) => {
            handle_error(err);
            return ExitCode::FAILURE;
        }
    };
    if cli.retry_failed {
        match processed.clear_failed() {
            Ok(cleared) => info!("Cleared {} failed files for another attempt", cleared),
            Err(err) => {
                handle_error(err.context("Failed to clear the failure log"));
                return ExitCode::FAILURE;
            }
        }
    }

    let processor: Arc<dyn ImageProcessor> =
        match LocalImageProcessor::new(config.thumbnail_size, config.watermark_logo.as_deref()) {
            Ok(processor) => Arc::new(processor),
            Err(err) => {
                handle_error(err);
                return ExitCode::FAILURE;
            }
        };

    let controller = PipelineController::new(
        &config,
        Arc::new(processed),
        default_providers(&config),
        Arc::clone(&processor),
        Arc::new(transport),
    );

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received; letting in-flight stages finish");
                shutdown.trigger();
            }
        }
    });

    if let Some(channel) = cli.capture_channel {
        tokio::spawn(capture_loop(
            processor,
            channel,
            config.directory.clone(),
            Duration::from_millis(cli.capture_interval_ms),
            shutdown.signal(),
        ));
    }

    let monitor = Monitor::new(config, controller);
    match monitor.start(shutdown.signal(), None).await {
        Ok(summary) => {
            info!(
                "{} uploaded, {} failed, {} left for the next run",
                summary.uploaded, summary.failed, summary.deferred
            );
            println!("Bye!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
