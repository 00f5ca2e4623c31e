//! Incremental SSE (Server-Sent Events) parser for streamed completions.
//!
//! Events are separated by a blank line; each event holds optional `event:`
//! and one or more `data:` lines. Chunks may split an event anywhere, so the
//! parser buffers until a full event boundary arrives.

/// A single parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// The joined `data:` payload.
    pub data: String,
}

/// Parser that accumulates raw response bytes and yields complete events.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the HTTP response; returns completed events.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // Normalize CRLF up front so the boundary scan only deals with \n.
        self.buffer
            .push_str(&String::from_utf8_lossy(chunk).replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..boundary + 2).collect();
            if let Some(event) = parse_block(block.trim_end_matches('\n')) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // id:, retry: and ":" comment lines are ignored
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event_type,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: par").is_empty());
        let events = parser.feed(b"tial\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_crlf_boundaries() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: hi\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn test_named_event_with_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: delta\ndata: {\"a\":\ndata: 1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("delta"));
        assert_eq!(events[0].data, "{\"a\":\n1}");
    }

    #[test]
    fn test_comment_only_block_skipped() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": keep-alive\n\n").is_empty());
    }
}
