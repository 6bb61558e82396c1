use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};

/// Shared writer that a child's output is forwarded to
pub struct StdioSink(Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>);

impl Clone for StdioSink {
    fn clone(&self) -> Self {
        StdioSink(self.0.clone())
    }
}

impl StdioSink {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> StdioSink {
        StdioSink(Arc::new(Mutex::new(t)))
    }

    pub fn stdout() -> StdioSink {
        Self::new(Box::new(tokio::io::stdout()))
    }

    pub fn stderr() -> StdioSink {
        Self::new(Box::new(tokio::io::stderr()))
    }

    pub fn inner(&self) -> Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>> {
        self.0.clone()
    }
}

/// Decodes buffered bytes as UTF-8, holding back split code points
///
/// Invalid sequences become U+FFFD; decoding never fails on content.
struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match std::str::from_utf8(src) {
            Ok(s) => {
                let out = s.to_owned();
                src.clear();
                Ok(Some(out))
            }
            Err(e) => {
                let valid = e.valid_up_to();
                let consumed = match e.error_len() {
                    // Incomplete code point at the end; wait for more bytes
                    None if valid == 0 => return Ok(None),
                    None => valid,
                    Some(invalid) => valid + invalid,
                };

                let mut out = String::from_utf8_lossy(&src[..valid]).into_owned();
                if consumed > valid {
                    out.push(char::REPLACEMENT_CHARACTER);
                }
                src.advance(consumed);
                Ok(Some(out))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(text) => Ok(Some(text)),
            None if src.is_empty() => Ok(None),
            None => {
                let out = String::from_utf8_lossy(src).into_owned();
                src.clear();
                Ok(Some(out))
            }
        }
    }
}

/// Forward everything read from `io` to `out` as it arrives
///
/// Reading continues until `io` closes even if `out` stops accepting writes,
/// so the writing process never sees a closed pipe. The first write error is
/// returned at the end.
pub async fn stream<A: AsyncRead + Unpin>(io: A, out: StdioSink) -> tokio::io::Result<()> {
    let mut frames = FramedRead::with_capacity(io, Utf8Codec, 1024);
    let mut write_error = None;

    while let Some(frame) = frames.next().await {
        let text = frame.map_err(tokio::io::Error::other)?;
        if write_error.is_some() {
            continue;
        }

        let writer = out.inner();
        let mut writer = writer.lock().await;
        let written = match writer.write_all(text.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            write_error = Some(e);
        }
    }

    match write_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
