//! Best-effort access to the virtual machine's text monitor.
//!
//! Used only for out-of-band cross-checks of what the debug stub reports;
//! the recording loop never depends on it.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Serialize;
use st_config::{MemoryRegion, MonitorConfig};
use thiserror::Error;
use tracing::debug;

/// Prompt printed by the monitor after every command.
pub const PROMPT: &str = "(qemu)";

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to connect to monitor at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("monitor did not print its prompt within {millis}ms")]
    Timeout { millis: u64 },

    #[error("monitor closed the connection")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MonitorError> for st_common::Error {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Connect { address, source } => st_common::Error::Connect {
                address,
                reason: source.to_string(),
            },
            MonitorError::Timeout { millis } => st_common::Error::ReadTimeout { millis },
            MonitorError::Closed => st_common::Error::ConnectionClosed,
            MonitorError::Io(e) => st_common::Error::Io(e),
        }
    }
}

/// Text command client for the monitor.
pub struct MonitorClient<S: Read + Write> {
    stream: S,
    timeout_ms: u64,
}

/// Connect over TCP and wait for the first prompt.
pub fn connect(config: &MonitorConfig) -> Result<MonitorClient<TcpStream>, MonitorError> {
    let timeout = Duration::from_millis(config.timeout_ms);
    let connect_err = |source| MonitorError::Connect {
        address: config.address.clone(),
        source,
    };
    let addr = config
        .address
        .to_socket_addrs()
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| {
            connect_err(std::io::Error::new(
                ErrorKind::NotFound,
                "address did not resolve",
            ))
        })?;
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(connect_err)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut client = MonitorClient::new(stream, config.timeout_ms);
    let banner = client.read_until_prompt()?;
    debug!(banner = %banner.trim(), "monitor connected");
    Ok(client)
}

impl<S: Read + Write> MonitorClient<S> {
    pub fn new(stream: S, timeout_ms: u64) -> Self {
        Self { stream, timeout_ms }
    }

    /// Run one command and return its output without the trailing prompt.
    pub fn command(&mut self, command: &str) -> Result<String, MonitorError> {
        self.stream.write_all(format!("{command}\n").as_bytes())?;
        self.stream.flush()?;
        self.read_until_prompt()
    }

    /// `count` 32-bit words starting at `address`.
    pub fn dump_words(&mut self, address: u32, count: u32) -> Result<Vec<u32>, MonitorError> {
        let output = self.command(&format!("x/{count}wx 0x{address:08x}"))?;
        Ok(parse_word_dump(&output))
    }

    /// Register values as printed by `info registers`.
    pub fn registers(&mut self) -> Result<BTreeMap<String, u32>, MonitorError> {
        let output = self.command("info registers")?;
        Ok(parse_register_dump(&output))
    }

    /// Compare a region read through the debug stub with the monitor's view.
    pub fn cross_validate(
        &mut self,
        region: &MemoryRegion,
        debug_bytes: &[u8],
    ) -> Result<CrossCheck, MonitorError> {
        let words = self.dump_words(region.base, region.size / 4)?;
        Ok(CrossCheck::compare(region, debug_bytes, &words))
    }

    fn read_until_prompt(&mut self) -> Result<String, MonitorError> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Err(MonitorError::Closed),
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(MonitorError::Timeout {
                        millis: self.timeout_ms,
                    })
                }
                Err(e) => return Err(e.into()),
            };
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(at) = text.rfind(PROMPT) {
                return Ok(text[..at].to_string());
            }
        }
    }
}

/// Parse `x/Nwx` output: `<addr>: 0x... 0x...` per line.
pub fn parse_word_dump(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with(PROMPT))
        .filter_map(|line| line.split_once(':').map(|(_, rest)| rest))
        .flat_map(str::split_whitespace)
        .filter_map(|tok| tok.strip_prefix("0x"))
        .filter_map(|hex| u32::from_str_radix(hex, 16).ok())
        .collect()
}

/// Parse `NAME=value` tokens; values are hex with or without `0x`.
pub fn parse_register_dump(output: &str) -> BTreeMap<String, u32> {
    output
        .split_whitespace()
        .filter_map(|tok| tok.split_once('='))
        .filter_map(|(name, value)| {
            let value = value.strip_prefix("0x").unwrap_or(value);
            u32::from_str_radix(value, 16)
                .ok()
                .map(|v| (name.to_string(), v))
        })
        .collect()
}

/// Agreement between the debug stub and the monitor for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossCheck {
    pub region: String,
    pub words_compared: usize,
    pub mismatching_words: usize,
    /// Byte offset of the first disagreeing word.
    pub first_mismatch: Option<usize>,
    /// Either side returned fewer words than the region holds.
    pub incomplete: bool,
    pub consistent: bool,
}

impl CrossCheck {
    pub fn compare(region: &MemoryRegion, debug_bytes: &[u8], monitor_words: &[u32]) -> Self {
        let debug_words: Vec<u32> = debug_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let expected = (region.size / 4) as usize;

        let mut mismatching_words = 0;
        let mut first_mismatch = None;
        for (idx, (a, b)) in debug_words.iter().zip(monitor_words).enumerate() {
            if a != b {
                mismatching_words += 1;
                first_mismatch.get_or_insert(idx * 4);
            }
        }
        let words_compared = debug_words.len().min(monitor_words.len());
        let incomplete = debug_words.len() < expected || monitor_words.len() < expected;

        Self {
            region: region.name.clone(),
            words_compared,
            mismatching_words,
            first_mismatch,
            incomplete,
            consistent: mismatching_words == 0 && !incomplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    struct Scripted {
        replies: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.replies.pop_front() else {
                return Err(io::Error::new(ErrorKind::WouldBlock, "drained"));
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
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

    fn client(replies: &[&str]) -> MonitorClient<Scripted> {
        MonitorClient::new(
            Scripted {
                replies: replies.iter().map(|r| r.as_bytes().to_vec()).collect(),
                written: Vec::new(),
            },
            100,
        )
    }

    #[test]
    fn word_dump_parsing() {
        let output = "x/4wx 0x42000000\n\
                      0000000042000000: 0x55aa55aa 0x55aa55aa 0x00000000 0x55aa55aa\n";
        assert_eq!(
            parse_word_dump(output),
            vec![0x55aa_55aa, 0x55aa_55aa, 0, 0x55aa_55aa]
        );
    }

    #[test]
    fn register_dump_parsing() {
        let output = "R00=00000001 R01=00000000 R02=40001000 R03=00000000\n\
                      R13=41000ff0 R14=40000e80 R15=40000e70\n\
                      PSR=600001d3 -ZC- A NS svc32\n";
        let regs = parse_register_dump(output);
        assert_eq!(regs.get("R00"), Some(&1));
        assert_eq!(regs.get("R15"), Some(&0x4000_0e70));
        assert_eq!(regs.get("PSR"), Some(&0x6000_01d3));
        assert_eq!(regs.len(), 8);
    }

    #[test]
    fn command_reads_across_chunks_until_prompt() {
        let mut c = client(&["0000000040000000: 0xdeadbeef", " 0xcafebabe\n(qe", "mu) "]);
        let words = c.dump_words(0x4000_0000, 2).unwrap();
        assert_eq!(words, vec![0xdead_beef, 0xcafe_babe]);
        assert_eq!(c.stream.written, b"x/2wx 0x40000000\n");
    }

    #[test]
    fn missing_prompt_times_out() {
        let mut c = client(&["no prompt here"]);
        assert!(matches!(
            c.command("info registers"),
            Err(MonitorError::Timeout { millis: 100 })
        ));
    }

    #[test]
    fn cross_check_flags_disagreement() {
        let region = MemoryRegion::new("stackRegion", 0x4100_0000, 12);
        let debug: Vec<u8> = [0xDEAD_BEEFu32, 0xDEAD_BEEF, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        let same = CrossCheck::compare(&region, &debug, &[0xDEAD_BEEF, 0xDEAD_BEEF, 0]);
        assert!(same.consistent);

        let differs = CrossCheck::compare(&region, &debug, &[0xDEAD_BEEF, 1, 0]);
        assert_eq!(differs.mismatching_words, 1);
        assert_eq!(differs.first_mismatch, Some(4));
        assert!(!differs.consistent);

        let short = CrossCheck::compare(&region, &[], &[0xDEAD_BEEF, 1, 0]);
        assert!(short.incomplete);
        assert!(!short.consistent);
    }
}
