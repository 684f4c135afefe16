//! SSE decoding for OpenAI-compatible and Anthropic streams.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;

use super::ErrorBody;
use crate::types::{AnthropicDelta, ChatCompletionChunk};
use crate::{Error, Result};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// A provider's SSE dialect: what one `data:` record decodes to and which record ends it.
pub trait StreamFormat {
    type Delta: DeserializeOwned;

    /// True if the stream ends after delivering `delta`.
    fn is_terminal(_delta: &Self::Delta) -> bool {
        false
    }
}

/// `chat.completion.chunk` records, terminated by `data: [DONE]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiFormat;

impl StreamFormat for OpenAiFormat {
    type Delta = ChatCompletionChunk;
}

/// Anthropic Messages events, terminated by `message_stop`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicFormat;

impl StreamFormat for AnthropicFormat {
    type Delta = AnthropicDelta;

    fn is_terminal(delta: &AnthropicDelta) -> bool {
        delta.is_message_stop()
    }
}

#[derive(Debug)]
pub enum LineOutcome<D> {
    Skip,
    Delta(D),
    /// Deliver, then stop.
    Last(D),
    Done,
}

/// Line-at-a-time decoder for one SSE dialect.
#[derive(Debug)]
pub struct SseDecoder<F> {
    finished: bool,
    _format: PhantomData<F>,
}

impl<F> Default for SseDecoder<F> {
    fn default() -> Self {
        Self {
            finished: false,
            _format: PhantomData,
        }
    }
}

impl<F: StreamFormat> SseDecoder<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminal record has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Classify one line with its terminator stripped.
    pub fn decode_line(&mut self, line: &str) -> LineOutcome<F::Delta> {
        if self.finished {
            return LineOutcome::Skip;
        }
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return LineOutcome::Skip;
        };
        if data == DONE_SENTINEL {
            self.finished = true;
            return LineOutcome::Done;
        }

        match serde_json::from_str::<F::Delta>(data) {
            Ok(delta) if F::is_terminal(&delta) => {
                self.finished = true;
                LineOutcome::Last(delta)
            }
            Ok(delta) => LineOutcome::Delta(delta),
            Err(e) => {
                tracing::warn!("skipping undecodable stream record: {} - data: {}", e, data);
                LineOutcome::Skip
            }
        }
    }
}

pin_project! {
    /// Stream of decoded deltas over a raw response body.
    pub struct DeltaStream<S, F> {
        #[pin]
        inner: S,
        buffer: Vec<u8>,
        pos: usize,
        decoder: SseDecoder<F>,
        exhausted: bool,
    }
}

impl<S, F> DeltaStream<S, F>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>>,
    F: StreamFormat,
{
    /// Decode deltas from a raw byte stream.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(4096),
            pos: 0,
            decoder: SseDecoder::new(),
            exhausted: false,
        }
    }
}

fn line_text(raw: &[u8]) -> Option<&str> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw).ok()
}

impl<S, F> Stream for DeltaStream<S, F>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>>,
    F: StreamFormat,
{
    type Item = Result<F::Delta>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if this.decoder.is_finished() {
                return Poll::Ready(None);
            }

            if let Some(rel) = this.buffer[*this.pos..].iter().position(|b| *b == b'\n') {
                let start = *this.pos;
                let end = start + rel;
                *this.pos = end + 1;

                let outcome = match line_text(&this.buffer[start..end]) {
                    Some(line) => this.decoder.decode_line(line),
                    None => LineOutcome::Skip,
                };

                if this.buffer.len() > 8192 && *this.pos > this.buffer.len() / 2 {
                    this.buffer.drain(..*this.pos);
                    *this.pos = 0;
                }

                match outcome {
                    LineOutcome::Delta(delta) | LineOutcome::Last(delta) => {
                        return Poll::Ready(Some(Ok(delta)));
                    }
                    LineOutcome::Done => return Poll::Ready(None),
                    LineOutcome::Skip => continue,
                }
            }

            if *this.exhausted {
                // Final line without a trailing newline.
                if *this.pos < this.buffer.len() {
                    let start = *this.pos;
                    *this.pos = this.buffer.len();
                    if let Some(line) = line_text(&this.buffer[start..]) {
                        match this.decoder.decode_line(line) {
                            LineOutcome::Delta(delta) | LineOutcome::Last(delta) => {
                                return Poll::Ready(Some(Ok(delta)));
                            }
                            LineOutcome::Done | LineOutcome::Skip => {}
                        }
                    }
                }
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if *this.pos > 0 && this.buffer.len() + bytes.len() > 16384 {
                        this.buffer.drain(..*this.pos);
                        *this.pos = 0;
                    }
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.exhausted = true;
                    *this.pos = this.buffer.len();
                    return Poll::Ready(Some(Err(Error::from(e))));
                }
                Poll::Ready(None) => *this.exhausted = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Decode `body` and hand each delta to `consumer` in arrival order.
///
/// A non-2xx `status` produces a single [`Error::Http`] carrying whatever body could be
/// read; no deltas are decoded in that case.
pub async fn decode_stream<F, S, C>(status: u16, body: S, mut consumer: C) -> Result<()>
where
    F: StreamFormat,
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>>,
    C: FnMut(F::Delta),
{
    if !(200..300).contains(&status) {
        let mut body = std::pin::pin!(body);
        let mut raw = Vec::new();
        while let Some(Ok(chunk)) = body.next().await {
            raw.extend_from_slice(&chunk);
        }
        return Err(Error::Http {
            status,
            body: ErrorBody::from_bytes(&raw),
        });
    }

    let mut deltas = std::pin::pin!(DeltaStream::<S, F>::new(body));
    while let Some(delta) = deltas.next().await {
        consumer(delta?);
    }
    Ok(())
}

/// [`decode_stream`] over a reqwest response.
pub async fn decode_response<F, C>(response: reqwest::Response, consumer: C) -> Result<()>
where
    F: StreamFormat,
    C: FnMut(F::Delta),
{
    let status = response.status().as_u16();
    decode_stream::<F, _, _>(status, response.bytes_stream(), consumer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentDelta;
    use futures::stream;

    fn body(chunks: &[&'static str]) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, reqwest::Error>(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect<F: StreamFormat>(status: u16, chunks: &[&'static str]) -> Result<Vec<F::Delta>> {
        let mut out = Vec::new();
        decode_stream::<F, _, _>(status, body(chunks), |d| out.push(d)).await?;
        Ok(out)
    }

    #[test]
    fn test_decoder_ignores_non_data_lines() {
        let mut decoder = SseDecoder::<OpenAiFormat>::new();
        assert!(matches!(decoder.decode_line(""), LineOutcome::Skip));
        assert!(matches!(decoder.decode_line(": keep-alive"), LineOutcome::Skip));
        assert!(matches!(decoder.decode_line("event: ping"), LineOutcome::Skip));
        assert!(matches!(decoder.decode_line("data:{}"), LineOutcome::Skip));
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_decoder_skips_non_chunk_records() {
        let mut decoder = SseDecoder::<OpenAiFormat>::new();
        assert!(matches!(
            decoder.decode_line(
                r#"data: {"error":{"message":"overloaded","type":"server_error"}}"#
            ),
            LineOutcome::Skip
        ));
        assert!(matches!(decoder.decode_line("data: {}"), LineOutcome::Skip));
        assert!(matches!(
            decoder.decode_line(r#"data: {"choices":[]}"#),
            LineOutcome::Delta(_)
        ));
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_decoder_done_must_match_exactly() {
        let mut decoder = SseDecoder::<OpenAiFormat>::new();
        assert!(matches!(decoder.decode_line("data: [DONE] "), LineOutcome::Skip));
        assert!(matches!(decoder.decode_line("data:  [DONE]"), LineOutcome::Skip));
        assert!(!decoder.is_finished());
        assert!(matches!(decoder.decode_line("data: [DONE]"), LineOutcome::Done));
    }

    #[test]
    fn test_decoder_done_is_terminal() {
        let mut decoder = SseDecoder::<OpenAiFormat>::new();
        assert!(matches!(decoder.decode_line("data: [DONE]"), LineOutcome::Done));
        assert!(decoder.is_finished());
        assert!(matches!(
            decoder.decode_line(r#"data: {"choices":[]}"#),
            LineOutcome::Skip
        ));
    }

    #[tokio::test]
    async fn test_anthropic_stops_after_message_stop() {
        let deltas = collect::<AnthropicFormat>(
            200,
            &[
                "event: content_block_delta\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
                "data: {\"type\":\"message_stop\"}\n\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"late\"}}\n\n",
            ],
        )
        .await
        .unwrap();

        assert_eq!(deltas.len(), 3);
        let text: String = deltas.iter().filter_map(|d| d.text()).collect();
        assert_eq!(text, "Hello");
        assert!(deltas[2].is_message_stop());
    }

    #[tokio::test]
    async fn test_openai_done_yields_nothing() {
        let deltas = collect::<OpenAiFormat>(200, &["data: [DONE]\n\n"]).await.unwrap();
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn test_openai_chunks_then_done() {
        let deltas = collect::<OpenAiFormat>(
            200,
            &[
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"b\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"c\"}}]}\n\n",
            ],
        )
        .await
        .unwrap();

        let text: Vec<_> = deltas.iter().filter_map(|d| d.text()).collect();
        assert_eq!(text, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_malformed_line_skipped() {
        let deltas = collect::<AnthropicFormat>(
            200,
            &[
                "data: {not json\n",
                "data: {\"type\":\"ping\"}\n",
                "data: {\"type\":\"message_stop\"}\n",
            ],
        )
        .await
        .unwrap();

        assert_eq!(deltas.len(), 2);
        assert!(matches!(deltas[0], AnthropicDelta::Ping));
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let deltas = collect::<AnthropicFormat>(
            200,
            &[
                "data: {\"type\":\"content_block_delta\",\"index\":0,",
                "\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\r\n",
                "\r\ndata: {\"type\":\"message_",
                "stop\"}",
            ],
        )
        .await
        .unwrap();

        assert_eq!(deltas.len(), 2);
        match &deltas[0] {
            AnthropicDelta::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => assert_eq!(text, "hi"),
            other => panic!("unexpected delta {:?}", other),
        }
        assert!(deltas[1].is_message_stop());
    }

    #[tokio::test]
    async fn test_stream_without_terminator_ends_cleanly() {
        let deltas = collect::<OpenAiFormat>(
            200,
            &["data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"}}]}\n"],
        )
        .await
        .unwrap();
        assert_eq!(deltas.len(), 1);
    }

    #[tokio::test]
    async fn test_non_success_status_is_single_error() {
        let mut seen = 0;
        let err = decode_stream::<AnthropicFormat, _, _>(
            429,
            body(&[
                "{\"error\":{\"type\":\"rate_limit_error\",\"message\":\"slow down\"}}",
            ]),
            |_| seen += 1,
        )
        .await
        .unwrap_err();

        assert_eq!(seen, 0);
        assert_eq!(err.status_code(), Some(429));
        let body = err.body().unwrap();
        assert_eq!(body.error_code.as_deref(), Some("rate_limit_error"));
        assert_eq!(body.message.as_deref(), Some("slow down"));
    }
}
