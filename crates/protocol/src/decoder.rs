/// Reassembles complete text lines from a byte stream that arrives at
/// arbitrary chunk boundaries.
///
/// A single logical line may be split across chunks, or several lines may
/// arrive in one chunk. The decoder keeps one carry-over byte buffer: each
/// pushed chunk is appended and split on `\n`; every complete line is
/// decoded and yielded, and the unterminated remainder becomes the new
/// buffer. Buffering bytes (not text) keeps multibyte characters intact
/// when a chunk boundary falls inside one.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw chunk and returns every line completed by it.
    ///
    /// Decoding is lossy: a malformed byte sequence becomes the replacement
    /// character instead of aborting an otherwise healthy stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline_index) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut raw: Vec<u8> = self.buffer.drain(..=newline_index).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }

        lines
    }

    /// Signals end of stream.
    ///
    /// A trailing partial line with no terminator is not a complete frame and
    /// must not be emitted; it is discarded here.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                discarded_bytes = self.buffer.len(),
                "discarding unterminated trailing line at stream end"
            );
            self.buffer.clear();
        }
    }

    /// Returns the number of held-back bytes of the unterminated remainder.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_lines(decoder: &mut LineDecoder, chunks: &[&[u8]]) -> Vec<String> {
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(decoder.push(chunk));
        }
        lines
    }

    #[test]
    fn single_chunk_with_multiple_lines() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"event: data\ndata: {\"content\":\"hi\"}\n\n");
        assert_eq!(lines, vec!["event: data", "data: {\"content\":\"hi\"}", ""]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn line_split_across_chunks_is_reassembled() {
        let mut decoder = LineDecoder::new();
        let lines = collect_lines(&mut decoder, &[b"data: {\"conte", b"nt\":\"hello\"}\n"]);
        assert_eq!(lines, vec!["data: {\"content\":\"hello\"}"]);
    }

    #[test]
    fn boundary_independence_for_every_split_point() {
        let input = "event: data\ndata: {\"content\":\"你好 Hel\"}\ndata: {\"content\":\"lo\"}\n"
            .as_bytes();
        let mut reference = LineDecoder::new();
        let expected = reference.push(input);

        for split in 1..input.len() {
            let mut decoder = LineDecoder::new();
            let lines = collect_lines(&mut decoder, &[&input[..split], &input[split..]]);
            assert_eq!(lines, expected, "split at byte {split} changed the output");
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let input = b"data: a\ndata: b\n";
        let mut decoder = LineDecoder::new();
        let mut lines = Vec::new();
        for byte in input {
            lines.extend(decoder.push(&[*byte]));
        }
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn no_lines_lost_or_duplicated() {
        let input = "data: one\ndata: two\ndata: three\n";
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(input.as_bytes());
        let rejoined = lines.join("\n") + "\n";
        assert_eq!(rejoined, input);
    }

    #[test]
    fn trailing_partial_line_is_discarded_at_finish() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"data: full\ndata: part");
        assert_eq!(lines, vec!["data: full"]);
        assert_eq!(decoder.pending_len(), "data: part".len());

        decoder.finish();
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn crlf_terminators_are_stripped() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"event: stop\r\ndata: {}\r\n");
        assert_eq!(lines, vec!["event: stop", "data: {}"]);
    }

    #[test]
    fn malformed_utf8_is_replaced_not_fatal() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"data: ok\xff\ndata: next\n");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("data: ok"));
        assert_eq!(lines[1], "data: next");
    }
}
