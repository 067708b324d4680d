use std::io::{self, Read, Write};
use std::thread;

use tracing::{debug, warn};

use crate::transport_adapter::{ForwardedChannel, HalfClose};

const BUFFER_SIZE: usize = 32 * 1024;

/// Outcome of one copy direction.
#[derive(Debug, Default)]
pub struct DirectionReport {
    pub bytes: u64,
    pub error: Option<io::Error>,
}

impl DirectionReport {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct SpliceReport {
    pub local_to_remote: DirectionReport,
    pub remote_to_local: DirectionReport,
}

/// Copy bytes both ways between `local` and `channel` until both directions
/// have ended.
///
/// Each direction runs on its own thread and ends independently: end of
/// stream half-closes the opposite side, an error is logged. Neither
/// direction cancels the other.
pub fn splice<L, C>(local: L, channel: C) -> io::Result<SpliceReport>
where
    L: ForwardedChannel,
    C: ForwardedChannel,
{
    let (local_read, local_write) = local.split()?;
    let (remote_read, remote_write) = channel.split()?;

    let report = thread::scope(|scope| {
        let outbound = scope.spawn(move || pump("local->remote", local_read, remote_write));
        let inbound = scope.spawn(move || pump("remote->local", remote_read, local_write));
        SpliceReport {
            local_to_remote: joined("local->remote", outbound.join()),
            remote_to_local: joined("remote->local", inbound.join()),
        }
    });
    Ok(report)
}

fn joined(direction: &str, result: thread::Result<DirectionReport>) -> DirectionReport {
    result.unwrap_or_else(|_| {
        warn!(direction, "copy task panicked");
        DirectionReport {
            bytes: 0,
            error: Some(io::Error::new(io::ErrorKind::Other, "copy task panicked")),
        }
    })
}

fn pump<R, W>(direction: &'static str, mut source: R, mut dest: W) -> DirectionReport
where
    R: Read,
    W: HalfClose,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut report = DirectionReport::default();

    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(direction, error = %e, "copy failed");
                report.error = Some(e);
                break;
            }
        };
        if let Err(e) = dest.write_all(&buffer[..n]).and_then(|_| dest.flush()) {
            warn!(direction, error = %e, "copy failed");
            report.error = Some(e);
            return report;
        }
        report.bytes += n as u64;
    }

    if let Err(e) = dest.close_write() {
        debug!(direction, error = %e, "half-close failed");
    }
    debug!(direction, bytes = report.bytes, "copy finished");
    report
}
