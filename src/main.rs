use futures::StreamExt;
use transcode_bus::{Backend, TranscodeTask};

mod config;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("transcode_bus", log::LevelFilter::Info)
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

#[cfg(feature = "ffmpeg")]
fn backend() -> anyhow::Result<Box<dyn Backend>> {
    transcode_bus::init()?;
    Ok(Box::new(transcode_bus::ffmpeg::FfmpegBackend::new()))
}

#[cfg(not(feature = "ffmpeg"))]
fn backend() -> anyhow::Result<Box<dyn Backend>> {
    anyhow::bail!("built without a codec backend; rebuild with `--features ffmpeg`")
}

async fn run() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: transcoder <job.json>"))?;
    let config = config::load(&path)?;
    let backend = backend()?;

    let task = TranscodeTask::new();
    let mut progress = task.progress_stream();
    tokio::spawn(async move {
        while let Some(report) = progress.next().await {
            if !report.is_last {
                eprint!("{}\r", report);
            }
        }
    });

    let cancel = task.get_cancel();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received interrupt, stopping");
            cancel.cancel();
        }
    });

    let summary = task.run(config, backend).await;
    interrupt.abort();
    let summary = summary?;
    eprintln!();
    for (i, stats) in summary.streams.iter().enumerate() {
        log::info!(
            "output stream {}: {} frames, {} bytes",
            i,
            stats.frames_emitted,
            stats.bytes
        );
    }
    if summary.interrupted {
        log::warn!("transcode interrupted before the end of input");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}
