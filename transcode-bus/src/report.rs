use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::frame::PictureType;
use crate::rational::Rational;

pub type ProgressSender = tokio::sync::broadcast::Sender<ProgressReport>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    /// Pictures written by the first video output.
    pub frame: u64,
    pub fps: f64,
    pub quality: Option<f32>,
    /// Bytes written to the first output file.
    pub total_size: u64,
    /// Seconds of output produced by the slowest stream.
    pub time: f64,
    pub bitrate_kbps: f64,
    pub dup: u64,
    pub drop: u64,
    pub video_size: u64,
    pub audio_size: u64,
    pub extra_size: u64,
    pub is_last: bool,
}

impl ProgressReport {
    /// Container bytes over payload bytes, in percent.
    pub fn muxing_overhead(&self) -> f64 {
        let payload = self.video_size + self.audio_size + self.extra_size;
        if payload == 0 {
            return 0.0;
        }
        100.0 * (self.total_size as f64 / payload as f64 - 1.0)
    }

    pub fn summary(&self) -> String {
        format!(
            "video:{:.0}kB audio:{:.0}kB global headers:{:.0}kB muxing overhead {:.6}%",
            self.video_size as f64 / 1024.0,
            self.audio_size as f64 / 1024.0,
            self.extra_size as f64 / 1024.0,
            self.muxing_overhead()
        )
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame={:5} fps={:3.0} ", self.frame, self.fps)?;
        match self.quality {
            Some(q) => write!(f, "q={:3.1} ", q)?,
            None => write!(f, "q=N/A ")?,
        }
        if self.is_last {
            write!(f, "L")?;
        }
        write!(
            f,
            "size={:8.0}kB time={:0.1} bitrate={:6.1}kbits/s",
            self.total_size as f64 / 1024.0,
            self.time,
            self.bitrate_kbps
        )?;
        if self.dup > 0 || self.drop > 0 {
            write!(f, " dup={} drop={}", self.dup, self.drop)?;
        }
        Ok(())
    }
}

/// Throttles progress reports and fans them out to subscribers.
pub struct Reporter {
    interval: Duration,
    start: Instant,
    last: Option<Instant>,
    sender: Option<ProgressSender>,
}

impl Reporter {
    pub fn new(interval: Duration, sender: Option<ProgressSender>) -> Self {
        Self {
            interval,
            start: Instant::now(),
            last: None,
            sender,
        }
    }

    /// Whether a periodic report is due. The first call only arms the timer.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            None => {
                self.last = Some(now);
                false
            }
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            Some(_) => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn publish(&self, report: ProgressReport) {
        if report.is_last {
            log::info!("{}", report);
            log::info!("{}", report.summary());
        } else {
            log::debug!("{}", report);
        }
        if let Some(sender) = &self.sender {
            // no subscribers is fine
            let _ = sender.send(report);
        }
    }
}

/// Per-picture encoder statistics, one line per coded video frame.
pub struct VideoStatsLog {
    writer: BufWriter<File>,
    failed: bool,
}

impl VideoStatsLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::Open {
            url: path.display().to_string(),
            source: e.into(),
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
            failed: false,
        })
    }

    pub fn write_frame(
        &mut self,
        frame_number: u64,
        quality: Option<f32>,
        frame_size: usize,
        video_size: u64,
        time_base: Rational,
        picture_type: PictureType,
    ) {
        if self.failed {
            return;
        }
        let line = format_vstats_line(frame_number, quality, frame_size, video_size, time_base, picture_type);
        if let Err(e) = self.writer.write_all(line.as_bytes()) {
            log::warn!("video stats log write failed: {}", e);
            self.failed = true;
        }
    }

    pub fn finish(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("video stats log flush failed: {}", e);
        }
    }
}

fn format_vstats_line(
    frame_number: u64,
    quality: Option<f32>,
    frame_size: usize,
    video_size: u64,
    time_base: Rational,
    picture_type: PictureType,
) -> String {
    let tb = time_base.to_f64();
    let time = (frame_number as f64 * tb).max(0.01);
    let bitrate = if tb > 0.0 {
        (frame_size * 8) as f64 / tb / 1000.0
    } else {
        0.0
    };
    let avg_bitrate = (video_size * 8) as f64 / time / 1000.0;
    format!(
        "frame= {:5} q= {:2.1} f_size= {:6} s_size= {:8.0}kB time= {:0.3} br= {:7.1}kbits/s avg_br= {:7.1}kbits/s type= {}\n",
        frame_number,
        quality.unwrap_or(0.0),
        frame_size,
        video_size as f64 / 1024.0,
        time,
        bitrate,
        avg_bitrate,
        picture_type.as_char()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_only_arms() {
        let mut reporter = Reporter::new(Duration::from_millis(500), None);
        let t0 = Instant::now();
        assert!(!reporter.due(t0));
        assert!(!reporter.due(t0 + Duration::from_millis(499)));
        assert!(reporter.due(t0 + Duration::from_millis(500)));
        assert!(!reporter.due(t0 + Duration::from_millis(700)));
        assert!(reporter.due(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_report_lines() {
        let report = ProgressReport {
            frame: 250,
            fps: 25.0,
            quality: Some(3.5),
            total_size: 2048 * 1024,
            time: 10.0,
            bitrate_kbps: 1677.7,
            dup: 2,
            drop: 1,
            video_size: 1536 * 1024,
            audio_size: 256 * 1024,
            extra_size: 0,
            is_last: true,
        };
        let line = report.to_string();
        assert!(line.starts_with("frame=  250 fps= 25 q=3.5 L"), "{}", line);
        assert!(line.ends_with("dup=2 drop=1"), "{}", line);
        assert_eq!(
            report.summary(),
            "video:1536kB audio:256kB global headers:0kB muxing overhead 14.285714%"
        );
    }

    #[test]
    fn test_vstats_line() {
        let line = format_vstats_line(25, Some(2.0), 1000, 25_000, Rational(1, 25), PictureType::P);
        assert!(line.contains("time= 1.000"), "{}", line);
        assert!(line.contains("br=   200.0kbits/s"), "{}", line);
        assert!(line.trim_end().ends_with("type= P"), "{}", line);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let (sender, mut receiver) = tokio::sync::broadcast::channel(4);
        let reporter = Reporter::new(Duration::from_millis(500), Some(sender));
        reporter.publish(ProgressReport {
            frame: 1,
            ..Default::default()
        });
        assert_eq!(receiver.recv().await.unwrap().frame, 1);
    }
}
