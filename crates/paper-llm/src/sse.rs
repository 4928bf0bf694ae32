//! Shared SSE -> [`LlmStream`] adapter.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Response;

use crate::provider::{LlmError, LlmStream, Result};
use crate::types::LlmChunk;

/// Convert an SSE HTTP [`Response`] into an [`LlmStream`].
///
/// `handler` receives each event's data payload and can emit any number of
/// chunks for it (zero to skip). Handler errors surface as
/// [`LlmError::Stream`].
pub fn llm_stream_from_sse<H>(response: Response, mut handler: H) -> LlmStream
where
    H: FnMut(&str) -> Result<Vec<LlmChunk>> + Send + 'static,
{
    let stream = response
        .bytes_stream()
        .eventsource()
        .map(move |event| {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            handler(event.data.as_str()).map_err(|e| LlmError::Stream(e.to_string()))
        })
        .flat_map(|result| match result {
            Ok(chunks) => futures::stream::iter(chunks.into_iter().map(Ok).collect::<Vec<_>>()),
            Err(err) => futures::stream::iter(vec![Err(err)]),
        });

    Box::pin(stream)
}
