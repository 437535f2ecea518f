use std::fs::remove_file;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use libq::logger;

use crate::api::{Message, MessageKind};
use crate::error::{ProtocolError, SocketError};
use crate::master::Master;

/// How long a connected client gets to send its request
const CLIENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs one request against the master and builds the reply
pub fn dispatch<M: Master + ?Sized>(master: &mut M, request: &Message) -> Message {
    let payload = request.payload.as_str();
    let result = match request.kind {
        MessageKind::Start => master.start(payload),
        MessageKind::Stop => master.stop(payload),
        MessageKind::Restart => master.restart(payload),
        MessageKind::Status => master.status(payload),
        MessageKind::ReloadConfig => master.reload_config(payload),
        MessageKind::Exit => master.exit(),
        MessageKind::ReplyOk | MessageKind::ReplyError => {
            return Message::new(MessageKind::ReplyError, ProtocolError::Unexpected(request.kind).to_string());
        }
    };

    return Message::reply(result);
}

/// Reads one request off the stream and answers it
pub fn handle_connection<M: Master + ?Sized>(stream: &mut UnixStream, master: &mut M) -> Result<(), ProtocolError> {
    let reply = match Message::read(stream) {
        Ok(request) => {
            logger::with_name_as_json("taskmaster;socket")
                .debug()
                .with_string("kind", format!("{:?}", request.kind))
                .with_str("payload", &request.payload)
                .smsg("Got request");
            dispatch(master, &request)
        }
        Err(ProtocolError::Io(err)) => {
            return Err(ProtocolError::Io(err));
        }
        Err(err) => Message::new(MessageKind::ReplyError, err.to_string()),
    };

    return reply.write(stream);
}

/// The daemon's end of the control channel
pub struct ControlSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlSocket {
    /// Binds the socket at `path`. A socket file nobody answers on is treated as
    /// left over from a dead daemon and replaced
    pub fn bind(path: &Path) -> Result<ControlSocket, SocketError> {
        if path.exists() {
            match UnixStream::connect(path) {
                Ok(_) => {
                    return Err(SocketError::AlreadyRunning(path.to_path_buf()));
                }
                Err(_) => {
                    remove_file(path)?;
                }
            }
        }

        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;

        return Ok(ControlSocket {
            listener: listener,
            path: path.to_path_buf(),
        });
    }

    pub fn path(&self) -> &Path {
        return &self.path;
    }

    /// Answers every client currently waiting to be accepted, without blocking.
    /// Returns how many were served
    pub fn serve_pending<M: Master + ?Sized>(&self, master: &mut M) -> usize {
        let logger = logger::with_name_as_json("taskmaster;socket");
        let mut served = 0;
        loop {
            let mut stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return served;
                }
                Err(err) => {
                    logger.warn().with_string("error", err.to_string()).smsg("Failed to accept connection");
                    return served;
                }
            };

            let prepared = stream
                .set_nonblocking(false)
                .and_then(|_| stream.set_read_timeout(Some(CLIENT_TIMEOUT)))
                .and_then(|_| stream.set_write_timeout(Some(CLIENT_TIMEOUT)));
            if let Err(err) = prepared {
                logger.warn().with_string("error", err.to_string()).smsg("Failed to set up connection");
                continue;
            }

            if let Err(err) = handle_connection(&mut stream, master) {
                logger.warn().with_string("error", err.to_string()).smsg("Failed to handle request");
            }

            served += 1;
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        let _ = remove_file(&self.path);
    }
}
