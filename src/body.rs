use bytes::Bytes;
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{BoxError, Error};

pub type RequestBody = Full<Bytes>;
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: Option<Bytes>,
) -> Result<Request<RequestBody>, Error> {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    request_builder
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|source| Error::usage(format!("failed to build http request: {source}")))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct BodyRead {
    pub(crate) bytes: u64,
    pub(crate) truncated: bool,
}

#[derive(Debug)]
pub(crate) enum ReadBodyError {
    Read(BoxError),
    Write(std::io::Error),
}

impl ReadBodyError {
    pub(crate) fn into_source(self) -> BoxError {
        match self {
            Self::Read(source) => source,
            Self::Write(source) => Box::new(source),
        }
    }
}

/// Copies `body` into `destination`, writing at most `max_bytes` when a cap
/// is set. Once the cap is reached the body is peeked for one more data
/// frame: any further data marks the read as truncated and is dropped, while
/// a read error is returned as-is.
///
/// Buffered and streamed reads share this path; a `Vec<u8>` destination is
/// the in-memory buffer.
pub(crate) async fn copy_body_limited<W>(
    body: &mut ResponseBody,
    destination: &mut W,
    max_bytes: Option<u64>,
) -> Result<BodyRead, ReadBodyError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut read = BodyRead::default();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ReadBodyError::Read)?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if data.is_empty() {
            continue;
        }

        let remaining = match max_bytes {
            Some(limit) => limit.saturating_sub(read.bytes),
            None => u64::MAX,
        };
        if remaining == 0 {
            read.truncated = true;
            break;
        }

        let take = usize::try_from(remaining).map_or(data.len(), |remaining| remaining.min(data.len()));
        destination
            .write_all(&data[..take])
            .await
            .map_err(ReadBodyError::Write)?;
        read.bytes += take as u64;
        if take < data.len() {
            read.truncated = true;
            break;
        }
    }

    destination.flush().await.map_err(ReadBodyError::Write)?;
    Ok(read)
}
