use futures_util::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

/// Await the next item from a stream or a cancellation signal.
///
/// - Returns `Ok(Some(item))` when the stream yields
/// - Returns `Ok(None)` when the stream ends
/// - Returns `Err(())` on cancellation
///
/// Cancellation wins when both are ready.
pub async fn select_next_or_cancel<S>(stream: &mut S, cancel: &CancellationToken) -> Result<Option<S::Item>, ()>
where
    S: Stream + Unpin + ?Sized,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(()),
        item = stream.next() => Ok(item),
    }
}
