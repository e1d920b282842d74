//! EMI message framing
//!
//! Every EMI message is an XML document terminated by the byte `0x19`. There is
//! no length prefix. The controller may put transport bytes in front of a
//! response; the payload proper starts at the first `<`.
//!
//! ```text
//! [garbage...]<response .../>0x19
//! ```

use super::xml::{XmlElement, XmlError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// End-of-message delimiter.
pub const DELIMITER: u8 = 0x19;

/// Framing errors (all recoverable: the stream stays aligned on delimiters)
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame contains no XML payload ({len} bytes)")]
    NoPayload { len: usize },

    #[error("Frame payload is not a valid document: {0}")]
    Xml(#[from] XmlError),
}

/// Serialize an element and append the delimiter.
pub fn encode_frame(element: &XmlElement) -> Result<Vec<u8>, XmlError> {
    let mut bytes = element.to_bytes()?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Decode one received frame into an element.
///
/// The trailing delimiter is optional here; anything before the first `<` is
/// discarded.
pub fn decode_frame(frame: &[u8]) -> Result<XmlElement, FrameError> {
    let body = frame.strip_suffix(&[DELIMITER]).unwrap_or(frame);
    let start = body
        .iter()
        .position(|&b| b == b'<')
        .ok_or(FrameError::NoPayload { len: frame.len() })?;
    let text = std::str::from_utf8(&body[start..]).map_err(XmlError::from)?;
    Ok(XmlElement::parse(text)?)
}

/// Stream-level read failures. Either one leaves the stream unaligned.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("No delimiter within {limit} bytes")]
    Oversized { limit: usize },
}

/// Read bytes up to and including the next delimiter, at most `max_len` of
/// them.
///
/// Returns `Ok(None)` if the peer closed the stream before a complete frame
/// arrived.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::with_capacity(max_len.min(1024));
    let mut limited = reader.take(max_len as u64);
    let n = limited.read_until(DELIMITER, &mut frame).await?;
    if n > 0 && frame.last() == Some(&DELIMITER) {
        return Ok(Some(frame));
    }
    if frame.len() >= max_len {
        return Err(ReadError::Oversized { limit: max_len });
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_garbage_and_delimiter_are_stripped() {
        let framed = b"garbage<getParameterValuesRequest id=\"1\"/>\x19";
        let clean = XmlElement::parse(r#"<getParameterValuesRequest id="1"/>"#).unwrap();

        assert_eq!(decode_frame(framed).unwrap(), clean);
    }

    #[test]
    fn test_binary_header_bytes_are_discarded() {
        let mut framed = vec![0x00, 0x01, 0xff, 0x7f];
        framed.extend_from_slice(b"<logoutResponse/>");
        framed.push(DELIMITER);

        assert_eq!(decode_frame(&framed).unwrap().name, "logoutResponse");
    }

    #[test]
    fn test_frame_without_payload() {
        assert!(matches!(
            decode_frame(b"no xml here\x19"),
            Err(FrameError::NoPayload { .. })
        ));
    }

    #[test]
    fn test_encode_appends_single_delimiter() {
        let frame = encode_frame(&XmlElement::new("logoutRequest")).unwrap();
        assert_eq!(frame, b"<logoutRequest/>\x19");
    }

    #[tokio::test]
    async fn test_read_frame_splits_on_delimiter() {
        let data: &[u8] = b"<a/>\x19xx<b/>\x19<c";
        let mut reader = tokio::io::BufReader::new(data);

        assert_eq!(read_frame(&mut reader, 64).await.unwrap().unwrap(), b"<a/>\x19");
        assert_eq!(read_frame(&mut reader, 64).await.unwrap().unwrap(), b"xx<b/>\x19");
        // Truncated trailing frame
        assert!(read_frame(&mut reader, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_stops_at_size_limit() {
        let data: &[u8] = b"<value>0123456789abcdef</value>\x19";
        let mut reader = tokio::io::BufReader::new(data);

        assert!(matches!(
            read_frame(&mut reader, 16).await,
            Err(ReadError::Oversized { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn test_frame_of_exactly_the_limit_is_accepted() {
        let data: &[u8] = b"<a/>\x19";
        let mut reader = tokio::io::BufReader::new(data);

        assert_eq!(read_frame(&mut reader, 5).await.unwrap().unwrap(), b"<a/>\x19");
    }
}
