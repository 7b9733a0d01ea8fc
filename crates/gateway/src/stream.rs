//! Stream framing: splitting upstream bodies into chunks, unwrapping and
//! re-wrapping them, and placing the flavor prologue and epilogue.

use bytes::{Bytes, BytesMut};
use convert::Content;
use futures::{Stream, StreamExt};
use http::{HeaderMap, header::CONTENT_TYPE};

/// How a response body is framed, inferred from its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    NonStream,
    EventStream,
    NdJson,
}

impl StreamMode {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if content_type.contains("text/event-stream") {
            StreamMode::EventStream
        } else if content_type.contains("application/x-ndjson") {
            StreamMode::NdJson
        } else {
            StreamMode::NonStream
        }
    }

    pub fn is_stream(self) -> bool {
        self != StreamMode::NonStream
    }

    fn delimiter(self) -> &'static [u8] {
        match self {
            StreamMode::EventStream => b"\n\n",
            StreamMode::NdJson | StreamMode::NonStream => b"\n",
        }
    }
}

const EVENT_FIELDS: [&[u8]; 5] = [b"data:", b"event:", b"id:", b"retry:", b":"];

/// Strip the framing of one chunk, leaving the payload.
///
/// For event streams the `data:` lines are joined; a chunk made only of
/// comments or other fields unwraps to nothing.
pub fn unwrap(mode: StreamMode, chunk: &[u8]) -> Bytes {
    let text = trim_newlines(chunk);

    if mode != StreamMode::EventStream {
        return Bytes::copy_from_slice(text);
    }

    let mut data: Option<Vec<u8>> = None;

    for line in text.split(|byte| *byte == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if let Some(rest) = line.strip_prefix(b"data:") {
            let rest = rest.strip_prefix(b" ").unwrap_or(rest);
            let buffer = data.get_or_insert_with(Vec::new);

            if !buffer.is_empty() {
                buffer.push(b'\n');
            }

            buffer.extend_from_slice(rest);
        }
    }

    match data {
        Some(data) => Bytes::from(data),
        None if is_framed(text) => Bytes::new(),
        None => Bytes::copy_from_slice(text),
    }
}

/// Frame a payload for the given mode.
///
/// Event-stream output starts with a field name (`data: ` is added when
/// missing) and ends with exactly two newlines; ndjson output ends with
/// exactly one.
pub fn wrap(mode: StreamMode, payload: &[u8]) -> Bytes {
    let text = trim_newlines(payload);

    match mode {
        StreamMode::NonStream => Bytes::copy_from_slice(payload),
        StreamMode::NdJson => {
            let mut framed = BytesMut::with_capacity(text.len() + 1);
            framed.extend_from_slice(text);
            framed.extend_from_slice(b"\n");
            framed.freeze()
        }
        StreamMode::EventStream => {
            let mut framed = BytesMut::with_capacity(text.len() + 8);

            if !is_framed(text) {
                framed.extend_from_slice(b"data: ");
            }

            framed.extend_from_slice(text);
            framed.extend_from_slice(b"\n\n");
            framed.freeze()
        }
    }
}

fn is_framed(text: &[u8]) -> bool {
    EVENT_FIELDS.iter().any(|field| text.starts_with(field))
}

fn trim_newlines(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = bytes {
        bytes = rest;
    }

    bytes
}

/// Reads delimited chunks out of a streamed body.
///
/// Every chunk keeps its delimiter, so chunks can be forwarded untouched.
/// Whatever follows the last delimiter is returned once the body ends.
pub struct ChunkReader<S> {
    stream: S,
    buffer: BytesMut,
    delimiter: &'static [u8],
    finished: bool,
}

impl<S, E> ChunkReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(stream: S, mode: StreamMode) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            delimiter: mode.delimiter(),
            finished: false,
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, E> {
        loop {
            if let Some(position) = find(&self.buffer, self.delimiter) {
                let chunk = self.buffer.split_to(position + self.delimiter.len());
                return Ok(Some(chunk.freeze()));
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }

                return Ok(Some(self.buffer.split().freeze()));
            }

            match self.stream.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(error)) => return Err(error),
                None => self.finished = true,
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[derive(Debug)]
enum FrameState {
    FirstChunk,
    MidStream { mode: StreamMode, headers: HeaderMap },
    Finished,
}

/// Frames converted chunks for the client.
///
/// The output mode is taken from the headers of the first converted chunk,
/// so a flavor that rewrites `Content-Type` decides how its stream is framed.
/// The prologue goes out right before the first chunk, the epilogue on
/// [`Reframer::finish`].
#[derive(Debug)]
pub(crate) struct Reframer {
    prologue: Vec<String>,
    epilogue: Vec<String>,
    fallback_mode: StreamMode,
    fallback_headers: HeaderMap,
    state: FrameState,
}

impl Reframer {
    /// `upstream_*` frame the epilogue when no chunk ever arrives.
    pub fn new(prologue: &[String], epilogue: &[String], upstream_mode: StreamMode, upstream_headers: HeaderMap) -> Self {
        Self {
            prologue: prologue.to_vec(),
            epilogue: epilogue.to_vec(),
            fallback_mode: upstream_mode,
            fallback_headers: upstream_headers,
            state: FrameState::FirstChunk,
        }
    }

    /// Frame one converted chunk, preceded by the prologue on the first call.
    pub fn frame(&mut self, content: Content) -> Vec<Content> {
        let mut out = Vec::new();

        if let FrameState::FirstChunk = self.state {
            let mut mode = StreamMode::from_headers(&content.headers);

            if !mode.is_stream() {
                mode = self.fallback_mode;
            }

            // pieces go out in the order the flavor lists them
            for piece in &self.prologue {
                out.push(Content::new(wrap(mode, piece.as_bytes()), content.headers.clone()));
            }

            self.state = FrameState::MidStream {
                mode,
                headers: content.headers.clone(),
            };
        }

        let mode = match &self.state {
            FrameState::MidStream { mode, .. } => *mode,
            _ => self.fallback_mode,
        };

        out.push(Content::new(wrap(mode, &content.body), content.headers));
        out
    }

    /// The framed epilogue. Later calls return nothing.
    pub fn finish(&mut self) -> Vec<Content> {
        let (mode, headers) = match std::mem::replace(&mut self.state, FrameState::Finished) {
            FrameState::MidStream { mode, headers } => (mode, headers),
            FrameState::FirstChunk => (self.fallback_mode, self.fallback_headers.clone()),
            FrameState::Finished => return Vec::new(),
        };

        self.epilogue
            .iter()
            .map(|piece| Content::new(wrap(mode, piece.as_bytes()), headers.clone()))
            .collect()
    }
}
