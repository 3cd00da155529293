//! SSE buffer handling for the opencode event stream.
//!
//! Events are delimited by `\n\n`; each block may contain `event:`, `data:`,
//! `id:`, or `retry:` lines. Only `data:` payloads matter here. The buffer is
//! drained in place: consumed bytes are removed and a trailing partial event
//! stays for the next call.

/// Extract complete `data:` payloads from an SSE buffer.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }

    payloads
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"type\":\"session.idle\"}\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"type\":\"session.idle\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["first", "second"]);
    }

    #[test]
    fn partial_event_stays_buffered() {
        let mut buf = String::from("data: complete\n\ndata: par");
        assert_eq!(drain_data_lines(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: par");

        buf.push_str("tial\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["partial"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn ignores_non_data_fields_and_blank_payloads() {
        let mut buf = String::from("event: ping\nid: 3\nretry: 5000\ndata: \n\ndata: x\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["x"]);
    }
}
