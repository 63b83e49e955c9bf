use std::io;

use async_stream::stream;
use futures_util::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Yield a reader's output line by line, without the trailing `\n` or `\r\n`.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// failing the line. The stream ends after end-of-file or after the first
/// read error, which is yielded as the last item.
pub fn line_stream<R>(reader: R) -> impl Stream<Item = io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream! {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => yield Ok(decode_line(&buf)),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn splits_on_newlines() {
        let input: &'static [u8] = b"PING 10.0.0.5 56(84) bytes of data.\n\n64 bytes from 10.0.0.5: icmp_seq=1 time=1.23 ms\r\nlast";
        let lines: Vec<String> = line_stream(input)
            .map(|line| line.expect("in-memory read"))
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![
                "PING 10.0.0.5 56(84) bytes of data.".to_string(),
                String::new(),
                "64 bytes from 10.0.0.5: icmp_seq=1 time=1.23 ms".to_string(),
                "last".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_fatal() {
        let input: &'static [u8] = b"64 bytes from \xffhost: icmp_seq=1 time=1.0 ms\nnext\n";
        let lines: Vec<io::Result<String>> = line_stream(input).collect().await;

        assert_eq!(lines.len(), 2);
        let first = lines[0].as_ref().expect("lossy decode");
        assert_eq!(first, "64 bytes from \u{fffd}host: icmp_seq=1 time=1.0 ms");
        assert_eq!(lines[1].as_ref().expect("second line"), "next");
    }
}
