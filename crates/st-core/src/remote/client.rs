//! Remote serial protocol client.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use st_common::RegisterBank;
use st_config::{ByteOrder, TargetConfig};
use tracing::{debug, trace, warn};

use super::packet::{self, Scan, ACK, NACK};
use super::{decode_registers, ProtocolError, RemoteTarget, TargetError, TransportError};

const READ_CHUNK: usize = 4096;

/// Retransmissions requested for one corrupt reply before giving up on it.
const MAX_RESENDS: u32 = 2;

/// Reads spent discarding late replies during a resync.
const RESYNC_READS: usize = 8;

/// Features advertised to the stub during the handshake.
const SUPPORTED_QUERY: &str = "qSupported:swbreak+;hwbreak+";

/// Client for one stub connection.
///
/// Generic over the stream so tests can drive it with a scripted peer.
/// Requests and replies are strictly paired: one command in flight.
pub struct GdbClient<S: Read + Write> {
    stream: S,
    pending: Vec<u8>,
    byte_order: ByteOrder,
    read_timeout_ms: u64,
}

/// Open a TCP connection to the stub and perform the handshake.
pub fn connect(config: &TargetConfig) -> Result<GdbClient<TcpStream>, TransportError> {
    let address = config.address.as_str();
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let connect_err = |source| TransportError::Connect {
        address: address.to_string(),
        source,
    };

    let socket_addr = address
        .to_socket_addrs()
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| {
            connect_err(std::io::Error::new(
                ErrorKind::NotFound,
                "address did not resolve",
            ))
        })?;
    let stream = TcpStream::connect_timeout(&socket_addr, connect_timeout).map_err(connect_err)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(connect_timeout))?;
    stream.set_read_timeout(Some(connect_timeout))?;
    debug!(address, "connected to debug stub");

    let mut client = GdbClient::new(stream, config.register_byte_order, config.connect_timeout_ms);
    client.handshake(address)?;

    client
        .stream
        .set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms)))?;
    client.read_timeout_ms = config.read_timeout_ms;
    Ok(client)
}

impl<S: Read + Write> GdbClient<S> {
    /// Wrap an already-open stream. `read_timeout_ms` is only used for
    /// error reporting; the stream itself enforces the timeout.
    pub fn new(stream: S, byte_order: ByteOrder, read_timeout_ms: u64) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            byte_order,
            read_timeout_ms,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Acknowledge, query features and require the stub's `+`.
    pub fn handshake(&mut self, address: &str) -> Result<(), TransportError> {
        self.stream.write_all(&[ACK])?;
        self.write_packet(SUPPORTED_QUERY)?;

        let failed = || TransportError::HandshakeFailed {
            address: address.to_string(),
        };
        match self.next_byte() {
            Ok(ACK) => {}
            Ok(other) => {
                debug!(byte = other, "unexpected handshake byte");
                return Err(failed());
            }
            Err(TransportError::Io(e)) => return Err(TransportError::Io(e)),
            Err(_) => return Err(failed()),
        }

        match self.receive() {
            Ok(features) => {
                debug!(features = %features, "stub features");
                Ok(())
            }
            Err(TargetError::Transport(e)) => {
                debug!(error = %e, "no qSupported reply");
                Err(failed())
            }
            Err(TargetError::Protocol(e)) => {
                debug!(error = %e, "garbled qSupported reply");
                Err(failed())
            }
        }
    }

    /// Send one command and return the payload of its reply.
    pub fn send_command(&mut self, command: &str) -> Result<String, TargetError> {
        self.write_packet(command)?;
        self.receive()
    }

    fn write_packet(&mut self, command: &str) -> Result<(), TransportError> {
        let framed = packet::frame(command);
        trace!(packet = %framed, "send");
        self.stream.write_all(framed.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read until one full packet has arrived, then acknowledge it.
    ///
    /// A corrupt packet is NACKed and its retransmission read in its place,
    /// so the reply stays paired with the command that caused it. After
    /// `MAX_RESENDS` corrupt copies the packet is ACKed and dropped.
    fn receive(&mut self) -> Result<String, TargetError> {
        let mut resends = 0;
        let mut rejected: Option<ProtocolError> = None;
        loop {
            match packet::scan(&self.pending) {
                Ok(Scan::Packet { payload, consumed }) => {
                    self.pending.drain(..consumed);
                    self.stream.write_all(&[ACK]).map_err(TransportError::Io)?;
                    trace!(payload = %payload, "recv");
                    return Ok(payload);
                }
                Ok(Scan::Incomplete) => {}
                Err(e) => {
                    self.pending.clear();
                    if resends >= MAX_RESENDS {
                        // The stub keeps resending until it sees an ACK.
                        self.stream.write_all(&[ACK]).map_err(TransportError::Io)?;
                        return Err(e.into());
                    }
                    resends += 1;
                    debug!(error = %e, resends, "requesting retransmission");
                    self.stream.write_all(&[NACK]).map_err(TransportError::Io)?;
                    rejected = Some(e);
                }
            }

            if let Err(e) = self.fill() {
                // A started but unfinished packet is a malformed reply; the
                // peer did answer, just not with a complete frame.
                if packet::is_partial(&self.pending) {
                    let partial = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    return Err(ProtocolError::Truncated(partial).into());
                }
                self.pending.clear();
                if matches!(e, TransportError::ReadTimeout { .. }) {
                    if let Some(corrupt) = rejected.take() {
                        return Err(corrupt.into());
                    }
                }
                return Err(e.into());
            }
        }
    }

    /// Acknowledge and collect every complete packet sitting in `pending`.
    fn take_buffered(&mut self, late: &mut Vec<String>) -> Result<(), TransportError> {
        loop {
            match packet::scan(&self.pending) {
                Ok(Scan::Packet { payload, consumed }) => {
                    self.pending.drain(..consumed);
                    self.stream.write_all(&[ACK])?;
                    late.push(payload);
                }
                Ok(Scan::Incomplete) => return Ok(()),
                Err(_) => {
                    self.pending.clear();
                    return Ok(());
                }
            }
        }
    }

    fn next_byte(&mut self) -> Result<u8, TransportError> {
        if self.pending.is_empty() {
            self.fill()?;
        }
        Ok(self.pending.remove(0))
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(TransportError::ConnectionClosed),
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::ReadTimeout {
                    millis: self.read_timeout_ms,
                })
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl<S: Read + Write> RemoteTarget for GdbClient<S> {
    fn resync(&mut self) -> Result<Vec<String>, TargetError> {
        let mut late = Vec::new();
        for _ in 0..RESYNC_READS {
            self.take_buffered(&mut late)?;
            match self.fill() {
                Ok(()) => {}
                Err(TransportError::ReadTimeout { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }
        self.take_buffered(&mut late)?;
        self.pending.clear();
        if !late.is_empty() {
            debug!(count = late.len(), "discarded late replies");
        }
        Ok(late)
    }

    fn single_step(&mut self) -> Result<bool, TargetError> {
        let reply = self.send_command("s")?;
        let stepped = packet::is_step_stop(&reply);
        if !stepped {
            warn!(reply = %reply, "single step not acknowledged");
        }
        Ok(stepped)
    }

    fn read_registers(&mut self) -> Result<RegisterBank, TargetError> {
        let reply = self.send_command("g")?;
        if packet::is_error_reply(&reply) {
            return Err(ProtocolError::ErrorReply(reply).into());
        }
        Ok(decode_registers(&reply, self.byte_order)?)
    }

    fn read_memory(&mut self, address: u32, len: u32) -> Result<Vec<u8>, TargetError> {
        let reply = match self.send_command(&format!("m{address:x},{len:x}")) {
            Ok(reply) => reply,
            Err(TargetError::Protocol(e)) => {
                warn!(address = %format!("{address:#010x}"), len, error = %e, "malformed memory reply");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        if packet::is_error_reply(&reply) {
            warn!(address = %format!("{address:#010x}"), len, reply = %reply, "memory read refused");
            return Ok(Vec::new());
        }
        match packet::decode_hex(&reply) {
            Ok(bytes) => {
                if bytes.len() != len as usize {
                    debug!(requested = len, received = bytes.len(), "short memory read");
                }
                Ok(bytes)
            }
            Err(e) => {
                warn!(address = %format!("{address:#010x}"), len, error = %e, "undecodable memory reply");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Peer that replays canned chunks and then times out. An empty chunk
    /// is a single timeout.
    struct Scripted {
        replies: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.as_bytes().to_vec()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.replies.pop_front().filter(|c| !c.is_empty()) else {
                return Err(io::Error::new(ErrorKind::TimedOut, "scripted timeout"));
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.replies.push_front(chunk[n..].to_vec());
            }
            Ok(n)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Stub answering `m` reads with the low address byte repeated. The
    /// first `corrupt` transmissions go out with a bad checksum, and a NACK
    /// makes it send its last reply again.
    struct ResendingStub {
        inbox: VecDeque<u8>,
        last: Option<String>,
        corrupt: u32,
        written: Vec<u8>,
    }

    impl ResendingStub {
        fn new(corrupt: u32) -> Self {
            Self {
                inbox: VecDeque::new(),
                last: None,
                corrupt,
                written: Vec::new(),
            }
        }

        fn transmit(&mut self) {
            let Some(payload) = self.last.clone() else {
                return;
            };
            let mut sum = packet::checksum(payload.as_bytes());
            if self.corrupt > 0 {
                self.corrupt -= 1;
                sum ^= 0xff;
            }
            self.inbox
                .extend(format!("${payload}#{sum:02x}").into_bytes());
        }

        fn nacks(&self) -> usize {
            self.written.iter().filter(|b| **b == NACK).count()
        }
    }

    impl Read for ResendingStub {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbox.is_empty() {
                return Err(io::Error::new(ErrorKind::TimedOut, "stub idle"));
            }
            let n = self.inbox.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(self.inbox.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for ResendingStub {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            match buf.first() {
                Some(&NACK) => self.transmit(),
                Some(b'$') => {
                    let text = String::from_utf8_lossy(buf).into_owned();
                    let command = text[1..].split('#').next().unwrap_or_default();
                    if let Some((addr, len)) = command.strip_prefix('m').and_then(|a| a.split_once(','))
                    {
                        let addr = u32::from_str_radix(addr, 16).unwrap();
                        let len = usize::from_str_radix(len, 16).unwrap();
                        self.last = Some(hex::encode(vec![addr as u8; len]));
                        self.inbox.push_back(ACK);
                        self.transmit();
                    }
                }
                _ => {}
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client(replies: &[&str]) -> GdbClient<Scripted> {
        GdbClient::new(Scripted::new(replies), ByteOrder::Little, 50)
    }

    #[test]
    fn handshake_requires_ack() {
        let features = packet::frame("PacketSize=4000");
        let mut ok = client(&["+", &features]);
        ok.handshake("stub").unwrap();
        let written = String::from_utf8(ok.get_ref().written.clone()).unwrap();
        assert!(written.starts_with("+$qSupported"));
        assert!(written.ends_with('+'));

        let mut silent = client(&[]);
        assert!(matches!(
            silent.handshake("stub"),
            Err(TransportError::HandshakeFailed { .. })
        ));
    }

    #[test]
    fn reply_split_across_reads_is_reassembled() {
        let mut c = client(&["+$S0", "5#b8"]);
        assert!(c.single_step().unwrap());
    }

    #[test]
    fn memory_read_decodes_payload() {
        let reply = packet::frame("efbeadde");
        let mut c = client(&["+", &reply]);
        assert_eq!(
            c.read_memory(0x4100_0000, 4).unwrap(),
            vec![0xef, 0xbe, 0xad, 0xde]
        );
        let written = String::from_utf8(c.get_ref().written.clone()).unwrap();
        assert!(written.starts_with("$m41000000,4#"));
    }

    #[test]
    fn memory_read_without_checksum_is_empty() {
        let mut c = client(&["+$efbeadde"]);
        assert_eq!(c.read_memory(0x4100_0000, 4).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn memory_error_reply_is_empty() {
        let reply = packet::frame("E14");
        let mut c = client(&[&reply]);
        assert!(c.read_memory(0, 4).unwrap().is_empty());
    }

    #[test]
    fn silence_is_a_timeout() {
        let mut c = client(&[]);
        assert!(matches!(
            c.read_memory(0, 4),
            Err(TargetError::Transport(TransportError::ReadTimeout { millis: 50 }))
        ));
    }

    #[test]
    fn exit_reply_is_not_a_step() {
        let reply = packet::frame("W00");
        let mut c = client(&[&reply]);
        assert!(!c.single_step().unwrap());
    }

    #[test]
    fn bad_checksum_is_nacked() {
        let mut c = client(&["$S05#00"]);
        assert!(matches!(
            c.single_step(),
            Err(TargetError::Protocol(ProtocolError::ChecksumMismatch { .. }))
        ));
        assert_eq!(c.get_ref().written.last(), Some(&NACK));
    }

    #[test]
    fn corrupt_reply_is_replaced_by_its_retransmission() {
        let mut c = GdbClient::new(ResendingStub::new(1), ByteOrder::Little, 50);
        assert_eq!(c.read_memory(0x1111_1111, 4).unwrap(), vec![0x11; 4]);
        assert_eq!(c.read_memory(0x2222_2222, 4).unwrap(), vec![0x22; 4]);
        assert_eq!(c.get_ref().nacks(), 1);
    }

    #[test]
    fn persistently_corrupt_reply_is_dropped_without_shifting_later_replies() {
        let mut c = GdbClient::new(
            ResendingStub::new(MAX_RESENDS + 1),
            ByteOrder::Little,
            50,
        );
        assert!(c.read_memory(0x1111_1111, 4).unwrap().is_empty());
        assert_eq!(c.get_ref().nacks(), MAX_RESENDS as usize);
        assert_eq!(c.get_ref().written.last(), Some(&ACK));

        assert_eq!(c.read_memory(0x2222_2222, 4).unwrap(), vec![0x22; 4]);
    }

    #[test]
    fn resync_collects_a_late_stop_reply() {
        let stop = packet::frame("S05");
        let memory = packet::frame("efbeadde");
        let mut c = client(&["+", "", &stop, "", "+", &memory]);
        assert!(matches!(
            c.single_step(),
            Err(TargetError::Transport(TransportError::ReadTimeout { .. }))
        ));

        assert_eq!(c.resync().unwrap(), vec!["S05".to_string()]);
        assert_eq!(
            c.read_memory(0x4100_0000, 4).unwrap(),
            vec![0xef, 0xbe, 0xad, 0xde]
        );
    }

    #[test]
    fn resync_on_a_quiet_link_is_empty() {
        let mut c = client(&[]);
        assert!(c.resync().unwrap().is_empty());
    }
}
