//! Stream reader turning raw stick bytes into typed responses

use bytes::{Buf, BytesMut};

use crate::messages::Response;
use crate::packets::{MESSAGE_FOOTER, MESSAGE_HEADER};
use crate::parsing::verify_frame;

/// Longest frame body we accept before assuming the footer was lost
const MAX_FRAME_LEN: usize = 512;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Incremental frame parser
///
/// Bytes may arrive split at arbitrary points; [`MessageReader::feed`] keeps the
/// unfinished tail buffered until the rest of the frame shows up.
#[derive(Debug, Default)]
pub struct MessageReader {
    buffer: BytesMut,
}

impl MessageReader {
    /// Create a new message reader
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Number of buffered bytes not yet consumed
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Append received bytes and return every complete, valid message
    pub fn feed(&mut self, data: &[u8]) -> Vec<Response> {
        self.buffer.extend_from_slice(data);
        let mut responses = Vec::new();

        loop {
            let Some(start) = find(&self.buffer, MESSAGE_HEADER) else {
                // keep a possible partial header
                let keep = MESSAGE_HEADER.len() - 1;
                if self.buffer.len() > keep {
                    let skip = self.buffer.len() - keep;
                    tracing::debug!("Discarding {} bytes of line noise", skip);
                    self.buffer.advance(skip);
                }
                break;
            };
            if start > 0 {
                tracing::debug!("Discarding {} bytes before frame header", start);
                self.buffer.advance(start);
            }

            let body_start = MESSAGE_HEADER.len();
            let Some(end) = find(&self.buffer[body_start..], MESSAGE_FOOTER) else {
                if self.buffer.len() > MAX_FRAME_LEN {
                    tracing::warn!("Dropping unterminated frame of {} bytes", self.buffer.len());
                    self.buffer.advance(body_start);
                    continue;
                }
                break;
            };

            let content = &self.buffer[body_start..body_start + end];
            // a new header inside the frame means the previous one was cut short
            if let Some(restart) = find(content, MESSAGE_HEADER) {
                tracing::warn!("Dropping truncated frame");
                self.buffer.advance(body_start + restart);
                continue;
            }

            match verify_frame(content).and_then(Response::decode) {
                Ok(response) => {
                    tracing::debug!("Decoded {} with seq_id {}", response.name(), response.seq_id);
                    responses.push(response);
                }
                Err(e) => tracing::warn!("Error handling message: {}", e),
            }
            self.buffer.advance(body_start + end + MESSAGE_FOOTER.len());
        }

        responses
    }
}
