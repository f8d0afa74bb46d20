//! Suspension-point-driven stream helpers
//!
//! Each helper owns its partial progress and exposes a `poll` method that
//! performs non-blocking I/O until it would block. The driving task calls
//! `poll`, and on [`Progress::Pending`] yields the matching readiness wait:
//!
//! ```ignore
//! match reader.poll_line()? {
//!     Progress::Done(line) => handle(line),
//!     Progress::Pending => {
//!         return Step::Yield(SuspendReason::Readable(reader.fd()));
//!     }
//! }
//! ```
//!
//! The fds handed to these helpers must be in non-blocking mode; a blocking
//! fd would stall the whole scheduler inside the read or write call.

use crate::task::Fd;
use std::io;

/// Result of driving a stream helper one step.
#[derive(Debug)]
pub enum Progress<T> {
    /// The operation completed
    Done(T),
    /// The fd would block; suspend on its readiness and poll again
    Pending,
}

fn read_nonblocking(fd: Fd, buf: &mut [u8]) -> io::Result<Progress<usize>> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(Progress::Done(n as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(Progress::Pending),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

/// Buffered line reader over a non-blocking fd.
pub struct LineReader {
    fd: Fd,
    buf: Vec<u8>,
}

impl LineReader {
    /// Create a reader over `fd`. The fd must be non-blocking.
    pub fn new(fd: Fd) -> Self {
        Self {
            fd,
            buf: Vec::new(),
        }
    }

    /// The underlying fd, for readiness waits.
    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// Read until one full line is buffered.
    ///
    /// The returned line keeps its trailing newline; a line without one
    /// means end of stream, and an empty string means end of stream with
    /// nothing buffered.
    pub fn poll_line(&mut self) -> io::Result<Progress<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(Progress::Done(String::from_utf8_lossy(&line).into_owned()));
            }
            let mut chunk = [0u8; 256];
            match read_nonblocking(self.fd, &mut chunk)? {
                Progress::Pending => return Ok(Progress::Pending),
                Progress::Done(0) => {
                    let rest = std::mem::take(&mut self.buf);
                    return Ok(Progress::Done(String::from_utf8_lossy(&rest).into_owned()));
                }
                Progress::Done(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}

/// Reads an exact number of bytes from a non-blocking fd.
pub struct ReadExact {
    fd: Fd,
    buf: Vec<u8>,
    want: usize,
}

impl ReadExact {
    /// Create a reader that collects exactly `want` bytes from `fd`.
    pub fn new(fd: Fd, want: usize) -> Self {
        Self {
            fd,
            buf: Vec::with_capacity(want),
            want,
        }
    }

    /// The underlying fd, for readiness waits.
    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// Read until `want` bytes are collected. End of stream before that is
    /// an error.
    pub fn poll(&mut self) -> io::Result<Progress<Vec<u8>>> {
        while self.buf.len() < self.want {
            let mut chunk = [0u8; 256];
            let missing = (self.want - self.buf.len()).min(chunk.len());
            match read_nonblocking(self.fd, &mut chunk[..missing])? {
                Progress::Pending => return Ok(Progress::Pending),
                Progress::Done(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended mid-record",
                    ));
                }
                Progress::Done(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
        Ok(Progress::Done(std::mem::take(&mut self.buf)))
    }
}

/// Writes a whole buffer to a non-blocking fd.
pub struct WriteAll {
    fd: Fd,
    buf: Vec<u8>,
    written: usize,
}

impl WriteAll {
    /// Create a writer that sends all of `buf` to `fd`.
    pub fn new(fd: Fd, buf: Vec<u8>) -> Self {
        Self {
            fd,
            buf,
            written: 0,
        }
    }

    /// The underlying fd, for readiness waits.
    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// Write until the whole buffer is sent.
    pub fn poll(&mut self) -> io::Result<Progress<()>> {
        while self.written < self.buf.len() {
            let rest = &self.buf[self.written..];
            let n = unsafe { libc::write(self.fd, rest.as_ptr().cast(), rest.len()) };
            if n >= 0 {
                self.written += n as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(Progress::Pending),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
        Ok(Progress::Done(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pipe {
        read_fd: Fd,
        write_fd: Fd,
    }

    impl Pipe {
        fn new() -> Pipe {
            let mut fds = [0 as libc::c_int; 2];
            let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
            assert_eq!(rc, 0, "pipe() failed");
            for fd in fds {
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
            }
            Pipe {
                read_fd: fds[0],
                write_fd: fds[1],
            }
        }

        fn write(&self, bytes: &[u8]) {
            let n = unsafe { libc::write(self.write_fd, bytes.as_ptr().cast(), bytes.len()) };
            assert_eq!(n, bytes.len() as isize);
        }

        fn close_write(&mut self) {
            if self.write_fd >= 0 {
                unsafe { libc::close(self.write_fd) };
                self.write_fd = -1;
            }
        }
    }

    impl Drop for Pipe {
        fn drop(&mut self) {
            unsafe { libc::close(self.read_fd) };
            self.close_write();
        }
    }

    #[test]
    fn test_poll_line_across_partial_reads() {
        let pipe = Pipe::new();
        let mut reader = LineReader::new(pipe.read_fd);

        pipe.write(b"$GPGGA,123");
        assert!(matches!(reader.poll_line().unwrap(), Progress::Pending));

        pipe.write(b"519\n$GPRMC");
        match reader.poll_line().unwrap() {
            Progress::Done(line) => assert_eq!(line, "$GPGGA,123519\n"),
            Progress::Pending => panic!("line was complete"),
        }
        // The second sentence is still partial
        assert!(matches!(reader.poll_line().unwrap(), Progress::Pending));
    }

    #[test]
    fn test_poll_line_end_of_stream() {
        let mut pipe = Pipe::new();
        let mut reader = LineReader::new(pipe.read_fd);
        pipe.write(b"tail");
        pipe.close_write();

        match reader.poll_line().unwrap() {
            Progress::Done(line) => assert_eq!(line, "tail"),
            Progress::Pending => panic!("stream ended"),
        }
        match reader.poll_line().unwrap() {
            Progress::Done(line) => assert_eq!(line, ""),
            Progress::Pending => panic!("stream ended"),
        }
    }

    #[test]
    fn test_read_exact_collects_across_polls() {
        let pipe = Pipe::new();
        let mut reader = ReadExact::new(pipe.read_fd, 6);

        pipe.write(b"abc");
        assert!(matches!(reader.poll().unwrap(), Progress::Pending));
        pipe.write(b"defghi");
        match reader.poll().unwrap() {
            Progress::Done(bytes) => assert_eq!(bytes, b"abcdef"),
            Progress::Pending => panic!("enough bytes buffered"),
        }
    }

    #[test]
    fn test_read_exact_eof_is_error() {
        let mut pipe = Pipe::new();
        let mut reader = ReadExact::new(pipe.read_fd, 8);
        pipe.write(b"abc");
        pipe.close_write();
        let err = reader.poll().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_write_all_completes() {
        let pipe = Pipe::new();
        let mut writer = WriteAll::new(pipe.write_fd, b"hello".to_vec());
        assert!(matches!(writer.poll().unwrap(), Progress::Done(())));

        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(pipe.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
        assert_eq!(&buf[..n as usize], b"hello");
    }

    #[test]
    fn test_write_all_pending_on_full_pipe() {
        let pipe = Pipe::new();
        // Much larger than the pipe buffer
        let payload = vec![0x55u8; 1 << 20];
        let mut writer = WriteAll::new(pipe.write_fd, payload);
        assert!(matches!(writer.poll().unwrap(), Progress::Pending));

        // Drain some and the writer makes further progress
        let mut buf = vec![0u8; 1 << 16];
        let n = unsafe { libc::read(pipe.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
        assert!(n > 0);
        assert!(matches!(writer.poll().unwrap(), Progress::Pending));
    }
}
