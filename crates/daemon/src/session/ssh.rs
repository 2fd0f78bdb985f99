//! SSH shell transport built on libssh2.
//!
//! The blocking ssh2 connect runs inside `spawn_blocking`; once the shell is
//! up the channel is switched to non-blocking and a dedicated reader thread
//! polls it, so interactive writes and resizes never wait behind a read. The
//! reader also pumps session keepalives while the channel is idle and tears
//! the channel down when the remote end closes it.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use ssh2::{Channel, KeyboardInteractivePrompt, Prompt, PtyModeOpcode, PtyModes, Session};
use tracing::{debug, trace, warn};

use super::connect::{ConnectError, ConnectTarget, Dialer};
use super::events::EventSink;
use super::shell::{SessionError, ShellTransport};

/// Read chunk size for the channel polling loop.
const READ_BUFFER_SIZE: usize = 4096;

/// Sleep between polls when the channel has nothing to read.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Consecutive `WouldBlock` polls a write tolerates before giving up.
const WRITE_STALL_BUDGET: u32 = 50;

/// Terminal type requested for the remote PTY.
const TERM: &str = "xterm-256color";

/// Dials SSH targets and hands back live [`SshTransport`]s.
#[derive(Debug, Clone)]
pub struct SshDialer {
    /// Keepalive interval advertised to the server, in seconds.
    pub keepalive_secs: u32,
}

impl Default for SshDialer {
    fn default() -> Self {
        Self { keepalive_secs: 10 }
    }
}

impl Dialer for SshDialer {
    async fn dial(&self, target: &ConnectTarget) -> Result<Box<dyn ShellTransport>, ConnectError> {
        let target = target.clone();
        let keepalive = self.keepalive_secs;
        let transport = tokio::task::spawn_blocking(move || connect_blocking(&target, keepalive))
            .await
            .map_err(|e| ConnectError::Shell(e.to_string()))??;
        Ok(Box::new(transport))
    }
}

fn connect_blocking(target: &ConnectTarget, keepalive_secs: u32) -> Result<SshTransport, ConnectError> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port))
        .map_err(ConnectError::from_io)?;
    tcp.set_nodelay(true).ok();

    let mut sess = Session::new().map_err(|e| ConnectError::Shell(e.to_string()))?;
    sess.set_tcp_stream(tcp);
    sess.handshake().map_err(classify_handshake)?;
    sess.set_keepalive(true, keepalive_secs);

    authenticate(&sess, target)?;
    if !sess.authenticated() {
        return Err(ConnectError::Auth("authentication rejected".to_string()));
    }

    let mut channel = sess
        .channel_session()
        .map_err(|e| ConnectError::Shell(e.to_string()))?;

    let mut modes = PtyModes::new();
    modes.set_boolean(PtyModeOpcode::ECHO, true);
    modes.set_boolean(PtyModeOpcode::ECHOCTL, true);

    channel
        .request_pty(
            TERM,
            Some(modes),
            Some((u32::from(target.cols), u32::from(target.rows), 0, 0)),
        )
        .map_err(|e| ConnectError::Shell(e.to_string()))?;
    channel
        .shell()
        .map_err(|e| ConnectError::Shell(e.to_string()))?;

    // Reads poll from here on; writes loop on WouldBlock
    sess.set_blocking(false);

    debug!(host = %target.host, port = target.port, user = %target.username, "ssh shell opened");
    Ok(SshTransport::new(sess, channel))
}

/// libssh2 reports a peer that dropped the TCP stream mid-handshake through
/// its socket send/recv/disconnect error codes; those are the reset class a
/// still-booting sshd produces.
fn classify_handshake(err: ssh2::Error) -> ConnectError {
    const SOCKET_SEND: i32 = -7;
    const SOCKET_DISCONNECT: i32 = -13;
    const SOCKET_RECV: i32 = -43;
    match err.code() {
        ssh2::ErrorCode::Session(SOCKET_SEND)
        | ssh2::ErrorCode::Session(SOCKET_DISCONNECT)
        | ssh2::ErrorCode::Session(SOCKET_RECV) => ConnectError::Reset(err.to_string()),
        _ => ConnectError::Handshake(err.to_string()),
    }
}

fn authenticate(sess: &Session, target: &ConnectTarget) -> Result<(), ConnectError> {
    if let Some(key) = &target.private_key {
        return sess
            .userauth_pubkey_memory(&target.username, None, key, target.passphrase.as_deref())
            .map_err(|e| ConnectError::Auth(e.to_string()));
    }

    let password = target.password.as_deref().unwrap_or_default();
    if sess.userauth_password(&target.username, password).is_ok() {
        return Ok(());
    }

    // Some sshd configs only offer keyboard-interactive; answer every prompt
    // with the password
    let mut prompter = PasswordPrompter {
        password: password.to_string(),
    };
    sess.userauth_keyboard_interactive(&target.username, &mut prompter)
        .map_err(|e| ConnectError::Auth(e.to_string()))
}

struct PasswordPrompter {
    password: String,
}

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Session and channel behind one lock; libssh2 runs all traffic for a
/// session through a single state machine, so they must never be driven
/// concurrently.
struct ShellIo {
    session: Session,
    channel: Channel,
}

/// A live SSH PTY shell.
pub struct SshTransport {
    io: Arc<Mutex<ShellIo>>,
    closed: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl SshTransport {
    fn new(session: Session, channel: Channel) -> Self {
        Self {
            io: Arc::new(Mutex::new(ShellIo { session, channel })),
            closed: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }
}

/// Send EOF and close the channel exactly once; later callers no-op.
fn shutdown_channel(io: &Mutex<ShellIo>, closed: &AtomicBool) {
    if closed.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut io = io.lock();
    if let Err(e) = io.channel.send_eof() {
        trace!(error = %e, "send_eof on close failed");
    }
    if let Err(e) = io.channel.close() {
        trace!(error = %e, "channel close failed");
    }
}

/// Push `data` through a non-blocking writer, polling through short stalls.
/// Gives up once the stall budget is spent so a full flow-control window
/// cannot wedge the caller.
fn write_with_budget<F>(mut write_chunk: F, data: &[u8]) -> Result<(), SessionError>
where
    F: FnMut(&[u8]) -> std::io::Result<usize>,
{
    let mut written = 0;
    let mut stalls = 0u32;
    while written < data.len() {
        match write_chunk(&data[written..]) {
            Ok(n) if n > 0 => {
                written += n;
                stalls = 0;
            }
            Ok(_) => {
                stalls += 1;
                if stalls > WRITE_STALL_BUDGET {
                    return Err(SessionError::WriteFailed(
                        "channel window stayed full, input dropped".to_string(),
                    ));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                stalls += 1;
                if stalls > WRITE_STALL_BUDGET {
                    return Err(SessionError::WriteFailed(
                        "channel window stayed full, input dropped".to_string(),
                    ));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(SessionError::WriteFailed(e.to_string())),
        }
    }
    Ok(())
}

impl ShellTransport for SshTransport {
    fn start(&mut self, sink: EventSink) {
        let io = Arc::clone(&self.io);
        let closed = Arc::clone(&self.closed);

        let handle = thread::spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                if closed.load(Ordering::SeqCst) {
                    break;
                }

                let read = {
                    let mut io = io.lock();
                    if io.channel.eof() {
                        Err(std::io::ErrorKind::UnexpectedEof.into())
                    } else {
                        io.channel.read(&mut buf)
                    }
                };

                match read {
                    Ok(0) => thread::sleep(POLL_INTERVAL),
                    Ok(n) => sink.output(String::from_utf8_lossy(&buf[..n]).into_owned()),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        // idle; let libssh2 send a keepalive if one is due
                        if let Err(e) = io.lock().session.keepalive_send() {
                            trace!(error = %e, "keepalive send failed");
                        }
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        trace!("ssh channel reached eof");
                        sink.ended();
                        shutdown_channel(&io, &closed);
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "ssh channel read failed");
                        sink.ended();
                        shutdown_channel(&io, &closed);
                        break;
                    }
                }
            }
        });

        self.reader = Some(handle);
    }

    fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::ChannelClosed);
        }

        // lock per chunk so reads and resizes interleave with a stalled write
        write_with_budget(|chunk| self.io.lock().channel.write(chunk), data)?;
        self.io.lock().channel.flush().ok();
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::ChannelClosed);
        }

        self.io
            .lock()
            .channel
            .request_pty_size(u32::from(cols), u32::from(rows), Some(0), Some(0))
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }

    fn close(&mut self) {
        shutdown_channel(&self.io, &self.closed);

        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("ssh reader thread panicked");
            }
        }
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(mut io) = self.io.try_lock() {
                let _ = io.channel.send_eof();
                let _ = io.channel.close();
            }
        }
    }
}
