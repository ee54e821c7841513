//! Incremental server-sent-events decoder.
//!
//! Network chunks split lines arbitrarily, so the decoder keeps the
//! trailing partial line buffered and dispatches an event on every blank
//! line, per the SSE framing rules. Comment lines (`:` prefix, used for
//! keep-alives) are skipped.

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Default)]
pub struct SseDecoder {
    line_buf: String,
    current_event: String,
    current_data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.line_buf.push_str(chunk);

        // keep the incomplete last line in the buffer
        let mut lines: Vec<String> = self.line_buf.split('\n').map(str::to_string).collect();
        let remainder = lines.pop().unwrap_or_default();
        self.line_buf = remainder;

        let mut events = Vec::new();
        for line in lines {
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.current_event = name.trim_start().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                self.current_data.push(data.trim_start().to_string());
            }
            // `:` comments and unknown fields are ignored
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.current_event.is_empty() && self.current_data.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: std::mem::take(&mut self.current_event),
            data: self.current_data.join("\n"),
        };
        self.current_data.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_frames_decode() {
        let mut decoder = SseDecoder::new();
        let events =
            decoder.push("event: output\ndata: {\"type\":\"stdout\",\"text\":\"0\\n\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "output");
        assert!(events[0].data.contains("stdout"));
    }

    #[test]
    fn fragmented_frames_reassemble() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("event: res").is_empty());
        assert!(decoder.push("ult\ndata: {\"is_su").is_empty());
        let events = decoder.push("ccess\":true}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "result");
        assert_eq!(events[0].data, "{\"is_success\":true}");
    }

    #[test]
    fn keep_alive_comments_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(": ping\n\nevent: done\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "done");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push("event: output\ndata: a\n\nevent: output\ndata: b\n\nevent: done\ndata: {}\n\n");
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["output", "output", "done"]);
    }

    #[test]
    fn multiline_data_joins_with_newline() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push("event: output\ndata: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }
}
