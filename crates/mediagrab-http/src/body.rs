//! Response body helpers: JSON, streaming files, SSE.

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use http_body::Frame;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
/// Uniform body type across buffered and streaming responses.
pub type ApiBody = BoxBody<Bytes, BoxError>;

/// A fully buffered body.
pub fn full(bytes: impl Into<Bytes>) -> ApiBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty() -> ApiBody {
    full(Bytes::new())
}

/// Body streaming a file from disk.
pub fn file_stream(file: tokio::fs::File) -> ApiBody {
    let stream = tokio_util::io::ReaderStream::new(file)
        .map_ok(Frame::data)
        .map_err(|e| Box::new(e) as BoxError);
    BodyExt::boxed(StreamBody::new(stream))
}

/// Body streaming pre-formatted SSE messages.
pub fn sse_stream<S>(stream: S) -> ApiBody
where
    S: Stream<Item = String> + Send + Sync + 'static,
{
    let stream = stream.map(|message| Ok(Frame::data(Bytes::from(message))));
    BodyExt::boxed(StreamBody::new(stream))
}
