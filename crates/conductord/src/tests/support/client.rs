//! Minimal framed client used to drive the socket reader.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use conductor_config::SocketEndpoint;
use conductor_protocol::{Command, CommandResult, Frame, FrameDecoder};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking test client speaking the frame protocol.
#[derive(Debug)]
pub struct TestClient {
    stream: UnixStream,
    decoder: FrameDecoder,
}

impl TestClient {
    /// Connects to `endpoint`.
    pub fn connect(endpoint: &SocketEndpoint) -> Self {
        let address = endpoint.socket_addr().expect("endpoint address");
        let stream = UnixStream::connect_addr(&address).expect("connect to reader");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    /// Sends `command` as one frame.
    pub fn send(&mut self, command: &Command) {
        let bytes = Frame::command(command)
            .and_then(|frame| frame.encode())
            .expect("encode command");
        self.send_raw(&bytes);
    }

    /// Sends arbitrary bytes in a single write.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write to reader");
    }

    /// Reads the next result, or `None` when the daemon closed the
    /// connection or stayed silent past the read timeout.
    pub fn receive_result(&mut self) -> Option<CommandResult> {
        let frame = self.receive_frame()?;
        Some(frame.to_result(None).expect("result frame"))
    }

    /// Returns true once the daemon has closed its end.
    pub fn closed_by_peer(&mut self) -> bool {
        let mut buffer = [0_u8; 64];
        matches!(self.stream.read(&mut buffer), Ok(0))
    }

    fn receive_frame(&mut self) -> Option<Frame> {
        let mut buffer = [0_u8; 4096];
        loop {
            if let Some(frame) = self.decoder.next_frame().expect("well-formed frame") {
                return Some(frame);
            }
            match self.stream.read(&mut buffer) {
                Ok(0) => return None,
                Ok(read) => self.decoder.extend(buffer.get(..read).expect("read within buffer")),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return None,
            }
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
