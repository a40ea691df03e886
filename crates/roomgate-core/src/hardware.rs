//! ============================================================================
//! Hardware - card reader seam and bench implementations
//! ============================================================================
//! Real readers (NFC over SPI, GPIO LED strips) implement `CardReader` and
//! `LedStrip` outside this crate. The bench versions here read card tokens
//! from any line source and log LED frames through tracing.
//! ============================================================================

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info, trace};

use crate::feedback::LedStrip;
use crate::types::{Color, RoomgateResult};

/// Result of one reader poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardPoll {
    Token(String),
    /// Nothing presented within the timeout
    Empty,
    /// The reader is unusable; the scan loop stops
    Error(String),
}

#[async_trait]
pub trait CardReader: Send {
    async fn poll_token(&mut self, timeout: Duration) -> CardPoll;

    /// Release the device
    async fn close(&mut self);
}

/// Card tokens typed or piped one per line
pub struct LineCardReader<R> {
    lines: Lines<R>,
    closed: bool,
}

impl LineCardReader<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> LineCardReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
            closed: false,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> CardReader for LineCardReader<R> {
    async fn poll_token(&mut self, timeout: Duration) -> CardPoll {
        if self.closed {
            return CardPoll::Error("reader closed".into());
        }
        match tokio::time::timeout(timeout, self.lines.next_line()).await {
            Err(_) => CardPoll::Empty,
            Ok(Ok(Some(line))) => {
                let token = line.trim().to_uppercase();
                if token.is_empty() {
                    CardPoll::Empty
                } else {
                    CardPoll::Token(token)
                }
            }
            Ok(Ok(None)) => CardPoll::Error("card input closed".into()),
            Ok(Err(e)) => CardPoll::Error(e.to_string()),
        }
    }

    async fn close(&mut self) {
        debug!("Closing line card reader");
        self.closed = true;
    }
}

/// LED strip that only logs what it would show
#[derive(Debug, Default)]
pub struct TracingStrip {
    color: Option<Color>,
    shown: Option<Color>,
    brightness: f32,
}

impl LedStrip for TracingStrip {
    fn set_all(&mut self, color: Color) {
        self.color = Some(color);
    }

    fn present(&mut self) -> RoomgateResult<()> {
        if self.color == self.shown {
            return Ok(());
        }
        self.shown = self.color;
        if let Some(color) = self.color {
            if color.r == color.g && color.g == color.b && color != Color::BLACK {
                trace!("LED {} @ {:.1}", color, self.brightness);
            } else {
                info!("LED {} @ {:.1}", color, self.brightness);
            }
        }
        Ok(())
    }

    fn set_brightness(&mut self, level: f32) {
        self.brightness = level.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_reader() {
        let mut reader = LineCardReader::new(BufReader::new(&b"a1b2\n\n  C3 \n"[..]));
        let t = Duration::from_secs(1);
        assert_eq!(reader.poll_token(t).await, CardPoll::Token("A1B2".into()));
        assert_eq!(reader.poll_token(t).await, CardPoll::Empty);
        assert_eq!(reader.poll_token(t).await, CardPoll::Token("C3".into()));
        assert!(matches!(reader.poll_token(t).await, CardPoll::Error(_)));
    }

    #[tokio::test]
    async fn test_closed_reader_errors() {
        let mut reader = LineCardReader::new(BufReader::new(&b"A1\n"[..]));
        reader.close().await;
        assert!(matches!(
            reader.poll_token(Duration::from_secs(1)).await,
            CardPoll::Error(_)
        ));
    }

    #[test]
    fn test_tracing_strip_clamps() {
        let mut strip = TracingStrip::default();
        strip.set_brightness(3.0);
        strip.set_all(Color::ALERT_RED);
        strip.present().unwrap();
        assert_eq!(strip.brightness, 1.0);
        assert_eq!(strip.shown, Some(Color::ALERT_RED));
    }
}
