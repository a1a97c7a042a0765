//! Server-sent-event decoding for streamed chat completions.
//!
//! [`StreamDecoder`] is a pure state machine fed with raw network chunks; it
//! knows nothing about HTTP. [`decode_stream`] drives it from any byte stream
//! and handles cancellation.

use super::{wait_for_cancellation, StreamContext, StreamEvent};
use crate::error::ApiError;
use crate::types::{ChatResponse, ToolCall, Usage};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Reads one provider-specific reasoning shape out of a `delta` object.
type ReasoningExtractor = fn(&Value) -> Option<String>;

/// Reads one provider-specific cached-token counter out of a `usage` object.
type CachedTokenExtractor = fn(&Value) -> Option<u64>;

/// Tried in order; the first shape present in a delta wins.
const REASONING_EXTRACTORS: &[ReasoningExtractor] = &[
    |delta| non_empty_str(delta.get("reasoning")),
    |delta| non_empty_str(delta.get("reasoning_content")),
    reasoning_details_text,
];

/// Tried in order; the first counter present in a usage object wins.
const CACHED_TOKEN_EXTRACTORS: &[CachedTokenExtractor] = &[
    |usage| usage.pointer("/prompt_tokens_details/cached_tokens")?.as_u64(),
    |usage| usage.get("cached_tokens")?.as_u64(),
    |usage| usage.get("prompt_cache_hit_tokens")?.as_u64(),
    |usage| usage.get("cache_read_input_tokens")?.as_u64(),
];

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn reasoning_details_text(delta: &Value) -> Option<String> {
    let text: String = delta
        .get("reasoning_details")?
        .as_array()?
        .iter()
        .filter_map(|detail| detail.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Accumulator for one `index` slot of streamed tool calls.
#[derive(Debug, Default)]
struct ToolCallSlot {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Incremental decoder for `data: <json>` frames.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of a line that has not been terminated yet.
    pending: Vec<u8>,
    content: String,
    reasoning: String,
    slots: BTreeMap<usize, ToolCallSlot>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    done: bool,
    skipped_frames: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of frames dropped because they were not valid JSON.
    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    /// Feed one network chunk. Complete lines are decoded immediately; a
    /// trailing partial line is kept until the next chunk or [`finish`].
    ///
    /// [`finish`]: StreamDecoder::finish
    pub fn feed(&mut self, chunk: &[u8], emit: &mut dyn FnMut(StreamEvent)) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.push_line(&line, emit);
        }
    }

    /// Decode one complete line of the event stream.
    pub fn push_line(&mut self, line: &str, emit: &mut dyn FnMut(StreamEvent)) {
        if self.done {
            return;
        }
        let line = line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix("data:") else {
            // Blank separators, `event:`/`id:` fields and `:` comments.
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(frame) => self.apply_frame(&frame, emit),
            Err(err) => {
                self.skipped_frames += 1;
                debug!(error = %err, frame = %crate::textutil::prefix_chars(data, 200), "skipping malformed stream frame");
            }
        }
    }

    fn apply_frame(&mut self, frame: &Value, emit: &mut dyn FnMut(StreamEvent)) {
        if let Some(usage) = frame.get("usage").filter(|u| u.is_object()) {
            self.usage = Some(parse_usage(usage));
        }

        let Some(choice) = frame
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return;
        };

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }

        let Some(delta) = choice.get("delta").or_else(|| choice.get("message")) else {
            return;
        };

        if let Some(text) = non_empty_str(delta.get("content")) {
            self.content.push_str(&text);
            emit(StreamEvent::Content(text));
        }

        if let Some(text) = REASONING_EXTRACTORS.iter().find_map(|extract| extract(delta)) {
            self.reasoning.push_str(&text);
            emit(StreamEvent::Reasoning(text));
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for (position, call) in calls.iter().enumerate() {
                self.apply_tool_call_fragment(position, call, emit);
            }
        }
    }

    fn apply_tool_call_fragment(
        &mut self,
        position: usize,
        call: &Value,
        emit: &mut dyn FnMut(StreamEvent),
    ) {
        let index = call
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        let slot = self.slots.entry(index).or_default();

        if let Some(id) = non_empty_str(call.get("id")) {
            slot.id = id;
        }
        if let Some(function) = call.get("function") {
            if let Some(name) = non_empty_str(function.get("name")) {
                // Some providers resend the full name on every frame.
                if slot.name != name {
                    slot.name.push_str(&name);
                }
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                slot.arguments.push_str(arguments);
            }
        }

        if !slot.announced && !slot.name.is_empty() {
            slot.announced = true;
            emit(StreamEvent::ToolCallStarted {
                index,
                id: slot.id.clone(),
                name: slot.name.clone(),
            });
        }
    }

    /// Flush a trailing unterminated line and assemble the response.
    pub fn finish(mut self, emit: &mut dyn FnMut(StreamEvent)) -> ChatResponse {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.push_line(&line, emit);
        }

        let tool_calls = self
            .slots
            .into_iter()
            .filter(|(_, slot)| !slot.name.is_empty() || !slot.arguments.is_empty())
            .map(|(index, slot)| {
                let id = if slot.id.is_empty() {
                    format!("call_{index}")
                } else {
                    slot.id
                };
                ToolCall::function(id, slot.name, slot.arguments)
            })
            .collect();

        ChatResponse {
            content: self.content,
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

fn parse_usage(usage: &Value) -> Usage {
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        prompt_tokens: count("prompt_tokens"),
        completion_tokens: count("completion_tokens"),
        cached_tokens: CACHED_TOKEN_EXTRACTORS
            .iter()
            .find_map(|extract| extract(usage)),
    }
}

/// Drive a [`StreamDecoder`] from a chunked byte stream.
///
/// Cancellation is checked before every read and raced against each pending
/// read; on cancellation the stream is dropped (releasing the connection)
/// and [`ApiError::Cancelled`] is returned.
pub async fn decode_stream<S, B, E>(stream: S, ctx: &StreamContext) -> Result<ChatResponse, ApiError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<ApiError>,
{
    let mut stream = stream;
    let mut decoder = StreamDecoder::new();
    let mut emit = |event: StreamEvent| ctx.emit(event);

    loop {
        // Returning drops `stream`, which releases the underlying reader.
        if ctx.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let next = tokio::select! {
            _ = wait_for_cancellation(ctx.cancel.clone()) => {
                return Err(ApiError::Cancelled);
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                decoder.feed(chunk.as_ref(), &mut emit);
                if decoder.is_done() {
                    break;
                }
            }
            Some(Err(err)) => return Err(err.into()),
            None => break,
        }
    }

    let skipped = decoder.skipped_frames();
    let response = decoder.finish(&mut emit);
    if skipped > 0 {
        debug!(skipped, "stream finished with malformed frames skipped");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{sse_data_block, sse_done_block};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;

    fn decode_all(chunks: &[&str]) -> (ChatResponse, Vec<StreamEvent>) {
        let mut events = Vec::new();
        let mut decoder = StreamDecoder::new();
        for chunk in chunks {
            decoder.feed(chunk.as_bytes(), &mut |e| events.push(e));
        }
        let response = decoder.finish(&mut |e| events.push(e));
        (response, events)
    }

    fn delta_frame(delta: serde_json::Value) -> String {
        sse_data_block(&json!({"choices": [{"index": 0, "delta": delta}]}).to_string())
    }

    // Verifies content deltas accumulate and fire callbacks in order.
    #[test]
    fn accumulates_content_deltas() {
        let a = delta_frame(json!({"content": "Hel"}));
        let b = delta_frame(json!({"content": "lo"}));
        let (response, events) = decode_all(&[a.as_str(), b.as_str(), sse_done_block()]);
        assert_eq!(response.content, "Hello");
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("Hel".into()),
                StreamEvent::Content("lo".into())
            ]
        );
    }

    // Verifies interleaved tool-call fragments are joined per index.
    #[test]
    fn joins_interleaved_tool_call_fragments_by_index() {
        let frames = [
            delta_frame(json!({"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "read_file", "arguments": "{\"pa"}}
            ]})),
            delta_frame(json!({"tool_calls": [
                {"index": 1, "id": "call_b", "function": {"name": "grep_search", "arguments": "{\"query\":"}}
            ]})),
            delta_frame(json!({"tool_calls": [
                {"index": 0, "function": {"arguments": "th\":\"a.rs\"}"}},
                {"index": 1, "function": {"arguments": "\"fn\"}"}}
            ]})),
        ];
        let refs: Vec<&str> = frames.iter().map(String::as_str).collect();
        let (response, events) = decode_all(&refs);

        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].function.arguments, r#"{"path":"a.rs"}"#);
        assert_eq!(response.tool_calls[1].function.name, "grep_search");
        assert_eq!(response.tool_calls[1].function.arguments, r#"{"query":"fn"}"#);
        let started = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCallStarted { .. }))
            .count();
        assert_eq!(started, 2);
    }

    // Verifies a malformed frame is skipped without losing earlier content.
    #[test]
    fn malformed_frame_is_skipped() {
        let a = delta_frame(json!({"content": "kept"}));
        let b = delta_frame(json!({"content": " too"}));
        let (response, _) = decode_all(&[a.as_str(), "data: {not json\n\n", b.as_str()]);
        assert_eq!(response.content, "kept too");
    }

    // Verifies lines split across chunks (including inside UTF-8) are reassembled.
    #[test]
    fn reassembles_lines_split_across_chunks() {
        let frame = delta_frame(json!({"content": "héllo"}));
        let bytes = frame.as_bytes();
        let split = frame.find('é').unwrap() + 1;
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        decoder.feed(&bytes[..split], &mut |e| events.push(e));
        assert!(events.is_empty());
        decoder.feed(&bytes[split..], &mut |e| events.push(e));
        let response = decoder.finish(&mut |e| events.push(e));
        assert_eq!(response.content, "héllo");
    }

    #[test]
    fn final_unterminated_line_is_processed() {
        let frame = json!({"choices": [{"delta": {"content": "tail"}, "finish_reason": "stop"}]});
        let (response, _) = decode_all(&[format!("data: {frame}").as_str()]);
        assert_eq!(response.content, "tail");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    // Verifies each known reasoning shape lands in the reasoning buffer.
    #[test]
    fn reasoning_shapes_are_all_recognized() {
        let frames = [
            delta_frame(json!({"reasoning": "a"})),
            delta_frame(json!({"reasoning_content": "b"})),
            delta_frame(json!({"reasoning_details": [{"type": "reasoning.text", "text": "c"}]})),
        ];
        let refs: Vec<&str> = frames.iter().map(String::as_str).collect();
        let (response, _) = decode_all(&refs);
        assert_eq!(response.reasoning.as_deref(), Some("abc"));
        assert_eq!(response.content, "");
    }

    // Verifies cached tokens are read from several vendor field names.
    #[test]
    fn cached_tokens_from_vendor_fields() {
        let cases = [
            json!({"prompt_tokens": 10, "completion_tokens": 2, "prompt_tokens_details": {"cached_tokens": 7}}),
            json!({"prompt_tokens": 10, "completion_tokens": 2, "cached_tokens": 7}),
            json!({"prompt_tokens": 10, "completion_tokens": 2, "prompt_cache_hit_tokens": 7}),
            json!({"prompt_tokens": 10, "completion_tokens": 2, "cache_read_input_tokens": 7}),
        ];
        for usage in cases {
            let frame = sse_data_block(&json!({"choices": [], "usage": usage}).to_string());
            let (response, _) = decode_all(&[frame.as_str()]);
            let usage = response.usage.expect("usage");
            assert_eq!(usage.prompt_tokens, 10);
            assert_eq!(usage.cached_tokens, Some(7));
        }
    }

    #[test]
    fn frames_after_done_are_ignored() {
        let late = delta_frame(json!({"content": "late"}));
        let (response, _) = decode_all(&[sse_done_block(), late.as_str()]);
        assert_eq!(response.content, "");
    }

    #[tokio::test]
    async fn decode_stream_collects_chunks_and_emits_events() {
        let frames = vec![
            Ok::<_, ApiError>(delta_frame(json!({"content": "ok"})).into_bytes()),
            Ok(sse_done_block().as_bytes().to_vec()),
        ];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = StreamContext::new(
            Some(Arc::new(move |e| sink.lock().unwrap().push(e))),
            None,
        );
        let response = decode_stream(futures_util::stream::iter(frames), &ctx)
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    // Verifies a raised cancel flag stops reading and reports cancellation.
    #[tokio::test]
    async fn decode_stream_stops_on_cancellation() {
        let (tx, rx) = watch::channel(false);
        let ctx = StreamContext::new(None, Some(rx));
        let first = futures_util::stream::iter(vec![Ok::<_, ApiError>(
            delta_frame(json!({"content": "partial"})).into_bytes(),
        )]);
        let stream = first.chain(futures_util::stream::pending());
        tx.send(true).unwrap();
        let err = decode_stream(Box::pin(stream), &ctx).await.unwrap_err();
        assert!(matches!(err, ApiError::Cancelled));
    }
}
