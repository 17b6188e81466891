//! Stream transport over any `Read`/`Write` pair (TCP, serial port, pipe)
//!
//! Frames are delimited by a four byte end-of-buffer signature.

use std::io::{BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Mutex;

use super::{Transport, TransportError};
use crate::protocol::MAX_SERIAL_PACKET_SIZE;

/// Appended after every packet on a byte stream
pub const END_OF_BUFFER_SIGNATURE: [u8; 4] = [0x00, 0x80, 0xEE, 0xFF];

pub struct StreamTransport<R: Read, W: Write> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
    max_packet_size: usize,
    shutdown: Option<TcpStream>,
}

impl<R: Read, W: Write> StreamTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            max_packet_size: MAX_SERIAL_PACKET_SIZE,
            shutdown: None,
        }
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }
}

impl StreamTransport<TcpStream, TcpStream> {
    /// Wrap a connected TCP stream
    pub fn tcp(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let shutdown = stream.try_clone()?;
        let mut transport = Self::new(reader, stream);
        transport.shutdown = Some(shutdown);
        Ok(transport)
    }
}

impl<R, W> Transport for StreamTransport<R, W>
where
    R: Read + Send,
    W: Write + Send,
{
    fn receive_framed(&self) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        let limit = self.max_packet_size + END_OF_BUFFER_SIGNATURE.len();

        let mut buf = Vec::new();
        let mut discarded = 0usize;
        let mut byte = [0u8; 1];

        loop {
            match reader.read(&mut byte) {
                Ok(0) => {
                    if !buf.is_empty() || discarded > 0 {
                        log::debug!("Stream ended in the middle of a frame");
                    }
                    return Ok(Vec::new());
                }
                Ok(_) => buf.push(byte[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            if buf.ends_with(&END_OF_BUFFER_SIGNATURE) {
                buf.truncate(buf.len() - END_OF_BUFFER_SIGNATURE.len());
                if discarded > 0 {
                    return Err(TransportError::Oversized {
                        len: discarded + buf.len(),
                        max: self.max_packet_size,
                    });
                }
                return Ok(buf);
            }

            // Keep only a possible signature prefix once the frame is too large
            if buf.len() > limit {
                let keep = END_OF_BUFFER_SIGNATURE.len() - 1;
                discarded += buf.len() - keep;
                buf.drain(..buf.len() - keep);
            }
        }
    }

    fn send_framed(&self, buf: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(buf)?;
        writer.write_all(&END_OF_BUFFER_SIGNATURE)?;
        writer.flush()?;
        Ok(())
    }

    fn close(&self) {
        if let Some(stream) = &self.shutdown {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("Shutdown of the remote stream failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(chunk);
            out.extend_from_slice(&END_OF_BUFFER_SIGNATURE);
        }
        out
    }

    #[test]
    fn test_reads_frames_in_order() {
        let input = framed(&[&[0x7E, 1, 2], &[0x7E, 3]]);
        let transport = StreamTransport::new(Cursor::new(input), Vec::new());

        assert_eq!(transport.receive_framed().unwrap(), vec![0x7E, 1, 2]);
        assert_eq!(transport.receive_framed().unwrap(), vec![0x7E, 3]);
        // end of stream reads as a close signal
        assert!(transport.receive_framed().unwrap().is_empty());
    }

    #[test]
    fn test_send_appends_signature() {
        let transport = StreamTransport::new(Cursor::new(Vec::new()), Vec::new());
        transport.send_framed(&[0x7E, 0x01]).unwrap();

        let writer = transport.writer.lock().unwrap();
        assert_eq!(&writer[..], &[0x7E, 0x01, 0x00, 0x80, 0xEE, 0xFF]);
    }

    #[test]
    fn test_oversized_frame_is_skipped() {
        let big = vec![0x41u8; 64];
        let input = framed(&[&big, &[0x7E, 9]]);
        let transport = StreamTransport::new(Cursor::new(input), Vec::new()).with_max_packet_size(16);

        assert!(matches!(
            transport.receive_framed(),
            Err(TransportError::Oversized { len: 64, max: 16 })
        ));
        assert_eq!(transport.receive_framed().unwrap(), vec![0x7E, 9]);
    }
}
