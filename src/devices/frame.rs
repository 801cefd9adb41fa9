//! Raw frames produced by device readers, plus the line framing and decoding
//! helpers readers share.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead};
use tracing::debug;

/// Frames longer than this without a terminator are discarded.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// One line read from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Source label, also the CSV column the data is recorded under
    pub tag: String,
    /// Decoded line without its terminator
    pub data: String,
    /// When the line was read
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Frame stamped with the current time.
    pub fn new(tag: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            data: data.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Read up to the next `terminator`, accumulating partial reads in `pending`.
///
/// Returns `Ok(None)` when no complete frame is available yet (timeout,
/// would-block, or end of input mid-frame). A trailing `\r` before a `\n`
/// terminator is stripped. A partial frame that grows past
/// [`MAX_FRAME_BYTES`] is discarded.
pub fn read_frame<R: BufRead>(
    reader: &mut R,
    terminator: u8,
    pending: &mut Vec<u8>,
) -> io::Result<Option<Vec<u8>>> {
    match reader.read_until(terminator, pending) {
        Ok(_) if pending.last() == Some(&terminator) => {
            pending.pop();
            if terminator == b'\n' && pending.last() == Some(&b'\r') {
                pending.pop();
            }
            Ok(Some(std::mem::take(pending)))
        }
        Ok(_) => {
            discard_overlong(pending);
            Ok(None)
        }
        // Bytes consumed before the timeout are already in `pending`.
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            discard_overlong(pending);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn discard_overlong(pending: &mut Vec<u8>) {
    if pending.len() > MAX_FRAME_BYTES {
        debug!(len = pending.len(), "Discarding unterminated frame");
        pending.clear();
    }
}

/// Decode raw bytes. Returns `None` when they are invalid in `encoding`.
pub fn decode_line(bytes: &[u8], encoding: &str) -> Option<String> {
    match encoding.to_lowercase().as_str() {
        "ascii" => bytes
            .is_ascii()
            .then(|| bytes.iter().map(|&b| char::from(b)).collect()),
        "latin-1" => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        _ => String::from_utf8(bytes.to_vec()).ok(),
    }
}

/// Whether a decoded line is a frame, given the configured start character.
pub fn accepts_frame(line: &str, frame_start_char: Option<char>) -> bool {
    match frame_start_char {
        Some(start) => line.starts_with(start),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};

    /// Returns a chunk of `x` and a timeout, alternately, and never a terminator.
    struct Stutter {
        reads: usize,
    }

    impl Read for Stutter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            if self.reads % 2 == 0 {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(4096);
            buf[..n].fill(b'x');
            Ok(n)
        }
    }

    #[test]
    fn splits_lines_and_strips_crlf() {
        let mut reader = Cursor::new(b"a: 1, 2\r\nb: 3\n".to_vec());
        let mut pending = Vec::new();
        assert_eq!(
            read_frame(&mut reader, b'\n', &mut pending).unwrap(),
            Some(b"a: 1, 2".to_vec())
        );
        assert_eq!(
            read_frame(&mut reader, b'\n', &mut pending).unwrap(),
            Some(b"b: 3".to_vec())
        );
        assert_eq!(read_frame(&mut reader, b'\n', &mut pending).unwrap(), None);
    }

    #[test]
    fn keeps_partial_frame_until_terminator_arrives() {
        let mut pending = Vec::new();
        let mut first = Cursor::new(b"par".to_vec());
        assert_eq!(read_frame(&mut first, b'\n', &mut pending).unwrap(), None);
        assert_eq!(pending, b"par");

        let mut second = Cursor::new(b"tial\n".to_vec());
        assert_eq!(
            read_frame(&mut second, b'\n', &mut pending).unwrap(),
            Some(b"partial".to_vec())
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn unterminated_data_between_timeouts_stays_bounded() {
        let mut reader = BufReader::new(Stutter { reads: 0 });
        let mut pending = Vec::new();
        for _ in 0..100 {
            assert_eq!(read_frame(&mut reader, b'\n', &mut pending).unwrap(), None);
            assert!(pending.len() <= MAX_FRAME_BYTES, "pending={}", pending.len());
        }
    }

    #[test]
    fn decodes_by_encoding() {
        assert_eq!(decode_line(b"abc", "utf-8").as_deref(), Some("abc"));
        assert_eq!(decode_line(&[0xff, 0x41], "utf-8"), None);
        assert_eq!(decode_line(&[0xe9], "ascii"), None);
        assert_eq!(decode_line(&[0xe9], "latin-1").as_deref(), Some("é"));
    }

    #[test]
    fn start_char_filters_frames() {
        assert!(accepts_frame("#1,2", Some('#')));
        assert!(!accepts_frame("1,2", Some('#')));
        assert!(!accepts_frame("", Some('#')));
        assert!(accepts_frame("", None));
    }
}
