//! Stream Reader: bounded-wait polling of one worker pipe.

use crate::error::{AgentError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const READ_SIZE: usize = 4096;

/// Result of waiting for readability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Ready,
    Timeout,
}

/// Result of one poll-and-read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bytes were read into the buffer.
    Data(usize),
    /// Nothing arrived within the wait.
    Idle,
    /// End of stream; the writer side has closed.
    Closed,
}

/// Reader over one end of a pipe.
///
/// When a capture file is attached, every read is appended to it and flushed
/// before the buffer can be cleared.
#[derive(Debug)]
pub struct StreamReader {
    pipe: File,
    timeout: Duration,
    buffer: Vec<u8>,
    capture: Option<(File, PathBuf)>,
    closed: bool,
}

impl StreamReader {
    pub fn new(fd: impl Into<OwnedFd>) -> Self {
        Self {
            pipe: File::from(fd.into()),
            timeout: Duration::from_millis(50),
            buffer: Vec::with_capacity(READ_SIZE),
            capture: None,
            closed: false,
        }
    }

    /// Append everything read to `path`, creating it if needed.
    pub fn with_capture(mut self, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::Io(format!(
                    "failed to create capture directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                AgentError::Io(format!(
                    "failed to open capture file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        self.capture = Some((file, path.to_path_buf()));
        Ok(self)
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Wait up to the configured timeout for the pipe to become readable.
    ///
    /// Hang-up counts as ready so the following read can observe end of stream.
    pub fn start_selection(&mut self) -> Result<Selection> {
        let mut fds = [pollfd_for(&self.pipe)];
        match wait_readable(&mut fds, self.timeout)? {
            0 => Ok(Selection::Timeout),
            _ => Ok(Selection::Ready),
        }
    }

    /// Read what is available into the buffer; 0 means end of stream.
    pub fn start_reading(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_SIZE];
        loop {
            match self.pipe.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AgentError::Stream(format!("read failed: {}", e))),
            }
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop buffered bytes; the descriptor stays open.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Append the buffer to the capture file, if any, and flush it.
    pub fn capture(&mut self) -> Result<()> {
        if let Some((file, path)) = self.capture.as_mut() {
            file.write_all(&self.buffer)
                .and_then(|()| file.flush())
                .map_err(|e| {
                    AgentError::Io(format!(
                        "failed to write capture file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// One cycle: wait, then clear, read and capture on readiness.
    pub fn poll_once(&mut self) -> Result<StreamEvent> {
        if self.closed {
            return Ok(StreamEvent::Closed);
        }

        match self.start_selection()? {
            Selection::Timeout => Ok(StreamEvent::Idle),
            Selection::Ready => self.read_ready(),
        }
    }

    /// Clear, read and capture after readiness was observed elsewhere.
    pub fn read_ready(&mut self) -> Result<StreamEvent> {
        if self.closed {
            return Ok(StreamEvent::Closed);
        }
        self.clear_buffer();
        match self.start_reading()? {
            0 => Ok(StreamEvent::Closed),
            n => {
                self.capture()?;
                Ok(StreamEvent::Data(n))
            }
        }
    }
}

/// Wait once, up to `timeout`, for either reader to become readable.
///
/// Closed readers are left out of the wait. Returns which of the two are
/// ready; both `false` on timeout or when both are closed.
pub fn select_pair(
    first: &StreamReader,
    second: &StreamReader,
    timeout: Duration,
) -> Result<(bool, bool)> {
    let readers = [first, second];
    let open: Vec<usize> = (0..readers.len()).filter(|&i| !readers[i].closed).collect();
    if open.is_empty() {
        return Ok((false, false));
    }

    let mut fds: Vec<libc::pollfd> = open.iter().map(|&i| pollfd_for(&readers[i].pipe)).collect();
    if wait_readable(&mut fds, timeout)? == 0 {
        return Ok((false, false));
    }

    let mut ready = [false, false];
    for (fd, &i) in fds.iter().zip(&open) {
        ready[i] = fd.revents != 0;
    }
    Ok((ready[0], ready[1]))
}

fn pollfd_for(pipe: &File) -> libc::pollfd {
    libc::pollfd {
        fd: pipe.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    }
}

/// `poll(2)` until something is ready or `timeout` passes; returns the
/// number of ready descriptors. Retries on EINTR within the same deadline.
fn wait_readable(fds: &mut [libc::pollfd], timeout: Duration) -> Result<usize> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let wait_ms = remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        for fd in fds.iter_mut() {
            fd.revents = 0;
        }

        // SAFETY: fds points to fds.len() initialized pollfd structs.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, wait_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(AgentError::Stream(format!("poll failed: {}", err)));
        }

        if fds.iter().any(|fd| fd.revents & libc::POLLNVAL != 0) {
            return Err(AgentError::Stream(
                "poll failed: descriptor is not open".to_string(),
            ));
        }
        // POLLERR on a pipe read end still leaves data or EOF to read.
        return Ok(rc as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn_reader(script: &str) -> (std::process::Child, StreamReader) {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        (child, StreamReader::new(stdout))
    }

    fn drain(reader: &mut StreamReader) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            match reader.poll_once().unwrap() {
                StreamEvent::Data(_) => out.extend_from_slice(reader.buffer()),
                StreamEvent::Idle => {}
                StreamEvent::Closed => return out,
            }
        }
    }

    #[test]
    fn reads_until_end_of_stream() {
        let (mut child, mut reader) = spawn_reader("printf 'hello\\nworld\\n'");
        assert_eq!(drain(&mut reader), b"hello\nworld\n");
        assert!(reader.is_closed());
        assert_eq!(reader.poll_once().unwrap(), StreamEvent::Closed);
        child.wait().unwrap();
    }

    #[test]
    fn selection_honours_timeout() {
        let (mut child, mut reader) = spawn_reader("sleep 2");
        reader.set_timeout(Duration::from_millis(50));

        let start = Instant::now();
        assert_eq!(reader.start_selection().unwrap(), Selection::Timeout);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(40), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(500), "waited {:?}", waited);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn select_pair_waits_once_for_both_pipes() {
        let (mut first_child, first) = spawn_reader("sleep 2");
        let (mut second_child, second) = spawn_reader("sleep 2");

        let start = Instant::now();
        let ready = select_pair(&first, &second, Duration::from_millis(50)).unwrap();
        let waited = start.elapsed();
        assert_eq!(ready, (false, false));
        assert!(waited >= Duration::from_millis(40), "waited {:?}", waited);
        // One shared wait, not one per pipe.
        assert!(waited < Duration::from_millis(95), "waited {:?}", waited);

        for child in [&mut first_child, &mut second_child] {
            child.kill().unwrap();
            child.wait().unwrap();
        }
    }

    #[test]
    fn select_pair_reports_the_ready_side() {
        let (mut quiet_child, quiet) = spawn_reader("sleep 2");
        let (mut loud_child, mut loud) = spawn_reader("echo hi; sleep 2");

        let deadline = Instant::now() + Duration::from_secs(2);
        let ready = loop {
            let ready = select_pair(&quiet, &loud, Duration::from_millis(50)).unwrap();
            if ready != (false, false) || Instant::now() > deadline {
                break ready;
            }
        };
        assert_eq!(ready, (false, true));
        assert_eq!(loud.read_ready().unwrap(), StreamEvent::Data(3));
        assert_eq!(loud.buffer(), b"hi\n");

        for child in [&mut quiet_child, &mut loud_child] {
            child.kill().unwrap();
            child.wait().unwrap();
        }
    }

    #[test]
    fn select_pair_returns_at_once_when_both_closed() {
        let (mut first_child, mut first) = spawn_reader("true");
        let (mut second_child, mut second) = spawn_reader("true");
        drain(&mut first);
        drain(&mut second);

        let start = Instant::now();
        let ready = select_pair(&first, &second, Duration::from_secs(5)).unwrap();
        assert_eq!(ready, (false, false));
        assert!(start.elapsed() < Duration::from_secs(1));

        first_child.wait().unwrap();
        second_child.wait().unwrap();
    }

    #[test]
    fn failed_read_is_a_stream_error() {
        let (mut child, mut reader) = spawn_reader("sleep 30");
        let dir = File::open("/").unwrap();
        // Swap the pipe for a directory: readable per poll, but read fails.
        // SAFETY: both descriptors are open and owned by this test.
        let rc = unsafe { libc::dup2(dir.as_raw_fd(), reader.pipe.as_raw_fd()) };
        assert!(rc >= 0);

        let err = reader.poll_once().unwrap_err();
        assert!(matches!(err, AgentError::Stream(_)), "{:?}", err);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn clear_buffer_keeps_stream_open() {
        let (mut child, mut reader) = spawn_reader("echo one; sleep 0.2; echo two");
        loop {
            if let StreamEvent::Data(_) = reader.poll_once().unwrap() {
                break;
            }
        }
        reader.clear_buffer();
        assert!(reader.buffer().is_empty());
        assert!(!reader.is_closed());

        let rest = drain(&mut reader);
        assert!(String::from_utf8_lossy(&rest).contains("two"));
        child.wait().unwrap();
    }

    #[test]
    fn capture_file_receives_every_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.log");
        let (mut child, reader) = spawn_reader("echo first; sleep 0.1; echo second");
        let mut reader = reader.with_capture(&path).unwrap();

        let streamed = drain(&mut reader);
        child.wait().unwrap();

        let captured = std::fs::read(&path).unwrap();
        assert_eq!(captured, b"first\nsecond\n");
        assert_eq!(streamed, captured);
    }
}
