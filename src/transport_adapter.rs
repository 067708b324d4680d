use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use crate::endpoint::Endpoint;
use crate::error::Result;

/// A write half that can signal end-of-stream to its peer while the read
/// direction stays open.
pub trait HalfClose: Write {
    fn close_write(&mut self) -> io::Result<()>;
}

/// A duplex byte stream that can be split into independently owned halves,
/// one per copy direction.
pub trait ForwardedChannel: Send {
    type Reader: Read + Send;
    type Writer: HalfClose + Send;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer)>;
}

/// Opens a byte-stream channel to `remote`, tunneled through `session`.
pub trait ChannelDialer<S>: Send + Sync + 'static {
    type Channel: ForwardedChannel;

    fn open(&self, session: &S, remote: &Endpoint) -> Result<Self::Channel>;
}

impl HalfClose for TcpStream {
    fn close_write(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Write) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl ForwardedChannel for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> io::Result<(TcpStream, TcpStream)> {
        let writer = self.try_clone()?;
        Ok((self, writer))
    }
}
