use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::config::TranscodeConfig;
use crate::error::{Error, Result};
use crate::report::{ProgressReport, ProgressSender};
use crate::transcoder::{TranscodeSummary, Transcoder};

pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressReport> + Send>>;

/// Runs a transcode job on the blocking pool and exposes cancellation and
/// progress to async callers.
pub struct TranscodeTask {
    cancel: CancellationToken,
    progress: ProgressSender,
}

impl TranscodeTask {
    pub fn new() -> Self {
        let (progress, _) = tokio::sync::broadcast::channel(16);
        Self {
            cancel: CancellationToken::new(),
            progress,
        }
    }

    pub fn get_cancel(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress reports published from now on. Lagging subscribers skip
    /// the reports they missed.
    pub fn progress_stream(&self) -> ProgressStream {
        let stream = BroadcastStream::new(self.progress.subscribe()).filter_map(|r| async move {
            match r {
                Ok(report) => Some(report),
                Err(e) => {
                    log::debug!("progress subscriber lagging: {}", e);
                    None
                }
            }
        });
        Box::pin(stream)
    }

    pub async fn run(&self, config: TranscodeConfig, mut backend: Box<dyn Backend>) -> Result<TranscodeSummary> {
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        tokio::task::spawn_blocking(move || {
            let mut transcoder = Transcoder::open(&config, backend.as_mut(), Some(progress))?;
            transcoder.run(&cancel)
        })
        .await
        .map_err(|e| Error::Resource(format!("transcode task failed: {}", e)))?
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Default for TranscodeTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TranscodeTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::config::{InputConfig, OutputConfig, OutputStreamConfig};
    use crate::mock::{self, MockBackend, MockInput};
    use crate::packet::Packet;
    use crate::rational::Rational;
    use crate::stream::MediaType;

    fn job() -> (TranscodeConfig, MockBackend) {
        let mut input = MockInput::new(vec![mock::video_stream(0, 64, 48, Rational(25, 1), Rational(1, 25))]);
        for k in 0..20 {
            input.push(Packet::new(0, vec![k as u8]).with_ts(Some(k), Some(k)).with_duration(1));
        }
        let config = TranscodeConfig {
            inputs: vec![InputConfig {
                url: "in0".into(),
                ..Default::default()
            }],
            outputs: vec![OutputConfig {
                url: "out0".into(),
                format: None,
                streams: vec![OutputStreamConfig::new(MediaType::Video)],
            }],
            ..Default::default()
        };
        (config, MockBackend::default().with_input("in0", input))
    }

    #[tokio::test]
    async fn test_task_publishes_final_report() -> anyhow::Result<()> {
        let (config, backend) = job();
        let task = TranscodeTask::new();
        let mut progress = task.progress_stream();

        let summary = task.run(config, Box::new(backend)).await?;
        assert_eq!(summary.streams[0].frames_emitted, 20);
        assert!(!summary.interrupted);

        let last = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(report) = progress.next().await {
                if report.is_last {
                    return Some(report);
                }
            }
            None
        })
        .await?;
        let last = last.ok_or_else(|| anyhow::anyhow!("no final report"))?;
        assert_eq!(last.frame, 20);
        assert_eq!(last, summary.report);
        Ok(())
    }

    #[tokio::test]
    async fn test_stopped_task_is_interrupted() -> anyhow::Result<()> {
        let (config, backend) = job();
        let task = TranscodeTask::new();
        let cancel = task.get_cancel();
        task.stop();
        assert!(cancel.is_cancelled());

        let summary = task.run(config, Box::new(backend)).await?;
        assert!(summary.interrupted);
        assert_eq!(summary.streams[0].frames_emitted, 0);
        Ok(())
    }
}
