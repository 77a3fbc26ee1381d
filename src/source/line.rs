use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader, Lines},
    time::{self, Duration},
};

use super::{parse_event, Reading, SignalSource};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Newline-delimited codes from a device node, pipe or stdin.
pub struct LineSignalSource {
    lines: Lines<BufReader<BoxedReader>>,
    label: String,
    read_timeout: Duration,
    poll_interval: Duration,
    /// Pipes and stdin end the feed at EOF; device nodes just go quiet.
    end_on_eof: bool,
    reported_eof: bool,
}

impl LineSignalSource {
    pub fn new<R>(
        reader: R,
        label: impl Into<String>,
        read_timeout: Duration,
        poll_interval: Duration,
        end_on_eof: bool,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let boxed: BoxedReader = Box::new(reader);
        Self {
            lines: BufReader::new(boxed).lines(),
            label: label.into(),
            read_timeout,
            poll_interval,
            end_on_eof,
            reported_eof: false,
        }
    }

    /// Open a device node (e.g. a USB serial port) for reading.
    pub async fn open_device(
        path: &Path,
        read_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open signal device {}", path.display()))?;
        log_info!("reading signals from {}", path.display());
        Ok(Self::new(
            file,
            format!("device {}", path.display()),
            read_timeout,
            poll_interval,
            false,
        ))
    }

    pub fn stdin(read_timeout: Duration, poll_interval: Duration) -> Self {
        Self::new(tokio::io::stdin(), "stdin", read_timeout, poll_interval, true)
    }
}

impl SignalSource for LineSignalSource {
    async fn read_next(&mut self) -> Option<Reading> {
        match time::timeout(self.read_timeout, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Some(Reading::new(parse_event(&line), Utc::now())),
            Ok(Ok(None)) => {
                if self.end_on_eof {
                    log_info!("{} reached end of input", self.label);
                    return None;
                }
                if !self.reported_eof {
                    log_warn!("{} returned EOF; treating the link as disconnected", self.label);
                    self.reported_eof = true;
                }
                time::sleep(self.poll_interval).await;
                Some(Reading::unavailable(Utc::now()))
            }
            Ok(Err(err)) => {
                log_warn!("read from {} failed: {err}", self.label);
                Some(Reading::unavailable(Utc::now()))
            }
            Err(_) => {
                log_debug!("no signal from {} within {:?}", self.label, self.read_timeout);
                Some(Reading::unavailable(Utc::now()))
            }
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawSignal;
    use crate::source::SourceEvent;

    fn timing() -> (Duration, Duration) {
        (Duration::from_millis(50), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn reads_codes_and_units_until_eof() {
        let (read_timeout, poll) = timing();
        let input: &[u8] = b"GREEN\nCOUNT\n\nRED\n";
        let mut source = LineSignalSource::new(input, "test", read_timeout, poll, true);

        let events: Vec<SourceEvent> = vec![
            source.read_next().await.unwrap().event,
            source.read_next().await.unwrap().event,
            source.read_next().await.unwrap().event,
            source.read_next().await.unwrap().event,
        ];
        assert_eq!(
            events,
            vec![
                SourceEvent::Signal(RawSignal::code("GREEN")),
                SourceEvent::UnitCompleted,
                SourceEvent::Signal(RawSignal::Unavailable),
                SourceEvent::Signal(RawSignal::code("RED")),
            ]
        );
        assert!(source.read_next().await.is_none());
    }

    #[tokio::test]
    async fn device_eof_reports_unavailable_instead_of_ending() {
        let (read_timeout, poll) = timing();
        let input: &[u8] = b"YELLOW\n";
        let mut source = LineSignalSource::new(input, "device", read_timeout, poll, false);

        assert!(!source.read_next().await.unwrap().is_unavailable());
        for _ in 0..3 {
            assert!(source.read_next().await.unwrap().is_unavailable());
        }
    }

    #[tokio::test]
    async fn stalled_link_times_out_as_unavailable() {
        let (read_timeout, poll) = timing();
        let (_writer, reader) = tokio::io::duplex(64);
        let mut source = LineSignalSource::new(reader, "stalled", read_timeout, poll, true);

        let reading = source.read_next().await.unwrap();
        assert!(reading.is_unavailable());
    }
}
