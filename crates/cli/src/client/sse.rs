//! Incremental `text/event-stream` decoding.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub name: String,
    pub data: String,
}

/// Turns arbitrarily split body chunks into complete events.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    name: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw[..end]);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let name = self.name.take();
            if self.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                name: name.unwrap_or_else(|| "message".to_string()),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }

        // Comment, used for keep-alives.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: snap").is_empty());
        assert!(parser.feed(b"shot\ndata: {\"documents\"").is_empty());

        let events = parser.feed(b":[]}\n\nevent: error\r\ndata: boom\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    name: "snapshot".to_string(),
                    data: "{\"documents\":[]}".to_string(),
                },
                SseEvent {
                    name: "error".to_string(),
                    data: "boom".to_string(),
                },
            ]
        );
    }

    #[test]
    fn keep_alives_and_empty_events_are_ignored() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b":\n\n: ping\n\nevent: snapshot\n\n").is_empty());

        let events = parser.feed(b"data: a\ndata: b\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                name: "message".to_string(),
                data: "a\nb".to_string(),
            }]
        );
    }
}
