use std::io::Error;
use std::result::Result;

use bytes::{Buf, BufMut, BytesMut};
use tokio::net::UnixStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use twoway::find_bytes;

pub type ControlProtocol<S = UnixStream> = Framed<S, ControlCodec>;

/// Line framing for the BIRD control socket
#[derive(Debug, Default)]
pub struct ControlCodec;

impl ControlCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ControlCodec {
    type Item = String;
    type Error = Error;

    // One reply line per item, without its line ending
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        if let Some(end) = find_bytes(&buf[..], b"\n") {
            let line = buf.split_to(end);
            buf.advance(1);
            let line = String::from_utf8_lossy(&line);
            Ok(Some(line.trim_end_matches('\r').to_string()))
        } else {
            Ok(None)
        }
    }
}

impl Encoder<String> for ControlCodec {
    type Error = Error;

    fn encode(&mut self, command: String, buf: &mut BytesMut) -> Result<(), Error> {
        let command = command.trim_end_matches('\n');
        buf.reserve(command.len() + 1);
        buf.put_slice(command.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

/// Reply lines starting with `0` end a BIRD response
pub fn is_terminal(line: &str) -> bool {
    line.starts_with('0')
}
