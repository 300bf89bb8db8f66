//! Event-stream framing over the upstream response body.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

pub type BodyReader = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// Adapt a streaming HTTP body into an `AsyncBufRead`.
pub fn body_reader(response: reqwest::Response) -> BodyReader {
    let stream = response
        .bytes_stream()
        .map_err(std::io::Error::other)
        .boxed();
    StreamReader::new(stream)
}

/// Splits a byte stream into frame payloads.
///
/// A frame is one or more `data:` lines terminated by a blank line; its
/// payload is the trimmed data joined with `\n`. Other lines are ignored.
/// `[DONE]` ends the sequence at once, and EOF flushes any partial frame.
pub struct FrameReader<R> {
    reader: R,
    cancel: CancellationToken,
    data_lines: Vec<String>,
    line: Vec<u8>,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, cancel: CancellationToken) -> Self {
        Self {
            reader,
            cancel,
            data_lines: Vec::new(),
            line: Vec::with_capacity(256),
            finished: false,
        }
    }

    /// Next frame payload, or `None` once the stream is over.
    ///
    /// Every line read races the cancellation token, so a stalled upstream is
    /// abandoned within one read.
    pub async fn next_frame(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if self.read_line().await? == 0 {
                self.finished = true;
                return Ok(self.take_frame());
            }

            let line = String::from_utf8_lossy(&self.line)
                .trim_end_matches(['\r', '\n'])
                .to_string();

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    return Ok(Some(frame));
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
                let data = rest.trim();
                if data == DONE_SENTINEL {
                    self.finished = true;
                    self.data_lines.clear();
                    return Ok(None);
                }
                if !data.is_empty() {
                    self.data_lines.push(data.to_string());
                }
            }
        }
    }

    async fn read_line(&mut self) -> Result<usize> {
        let Self {
            reader,
            cancel,
            line,
            ..
        } = self;
        line.clear();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            read = reader.read_until(b'\n', line) => Ok(read?),
        }
    }

    fn take_frame(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let frame = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio_test::io::Builder;

    async fn collect<R: AsyncBufRead + Unpin>(mut reader: FrameReader<R>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await.unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn reader(chunks: &[&[u8]]) -> FrameReader<BufReader<tokio_test::io::Mock>> {
        let mut builder = Builder::new();
        for chunk in chunks {
            builder.read(chunk);
        }
        FrameReader::new(BufReader::new(builder.build()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_frames_split_on_blank_lines() {
        let frames = collect(reader(&[
            b"data: {\"a\":1}\n\ndata: {\"b\":2}\r\n\r\n",
        ]))
        .await;
        assert_eq!(frames, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[tokio::test]
    async fn test_multi_line_frame_and_chunk_boundaries() {
        let frames = collect(reader(&[
            b"event: message\nda",
            b"ta: first\ndata:   second  \n",
            b": keepalive\n\n",
        ]))
        .await;
        assert_eq!(frames, vec!["first\nsecond"]);
    }

    #[tokio::test]
    async fn test_done_sentinel_ends_stream() {
        let frames = collect(reader(&[b"data: one\n\ndata: two\ndata: [DONE]\n"])).await;
        assert_eq!(frames, vec!["one"]);
        assert!(frames.iter().all(|f| f != DONE_SENTINEL));
    }

    #[tokio::test]
    async fn test_eof_flushes_partial_frame_once() {
        let mut frames = reader(&[b"data: tail"]);
        assert_eq!(frames.next_frame().await.unwrap().as_deref(), Some("tail"));
        assert_eq!(frames.next_frame().await.unwrap(), None);
        assert_eq!(frames.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_data_lines_are_skipped() {
        let frames = collect(reader(&[b"data:\n\ndata: x\n\n\n\n"])).await;
        assert_eq!(frames, vec!["x"]);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_stalled_read() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let mut frames = FrameReader::new(BufReader::new(rx), cancel.clone());

        tx.write_all(b"data: partial\n").await.unwrap();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = frames.next_frame().await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
        drop(tx);
    }
}
