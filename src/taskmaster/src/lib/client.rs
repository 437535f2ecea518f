use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{Message, MessageKind};
use crate::error::{MasterError, ProtocolError};
use crate::master::Master;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A master that lives in a daemon on the other end of the control socket.
/// Every operation is one connection carrying one request and one reply
pub struct RemoteMaster {
    socket: PathBuf,
    timeout: Duration,
}

impl RemoteMaster {
    pub fn new(socket: &Path, timeout: Duration) -> RemoteMaster {
        return RemoteMaster {
            socket: socket.to_path_buf(),
            timeout: timeout,
        };
    }

    fn request(&self, kind: MessageKind, payload: &str) -> Result<String, MasterError> {
        let to_err = |err: io::Error| MasterError::Connection {
            socket: self.socket.clone(),
            source: err,
        };

        let mut stream = UnixStream::connect(&self.socket).map_err(to_err)?;
        stream.set_read_timeout(Some(self.timeout)).map_err(to_err)?;
        stream.set_write_timeout(Some(self.timeout)).map_err(to_err)?;

        Message::new(kind, payload).write(&mut stream)?;
        let reply = Message::read(&mut stream)?;

        return match reply.kind {
            MessageKind::ReplyOk => Ok(reply.payload),
            MessageKind::ReplyError => Err(MasterError::Remote(reply.payload)),
            other => Err(MasterError::from(ProtocolError::Unexpected(other))),
        };
    }
}

impl Master for RemoteMaster {
    fn start(&mut self, name: &str) -> Result<String, MasterError> {
        return self.request(MessageKind::Start, name);
    }

    fn stop(&mut self, name: &str) -> Result<String, MasterError> {
        return self.request(MessageKind::Stop, name);
    }

    fn restart(&mut self, name: &str) -> Result<String, MasterError> {
        return self.request(MessageKind::Restart, name);
    }

    fn status(&mut self, name: &str) -> Result<String, MasterError> {
        return self.request(MessageKind::Status, name);
    }

    fn reload_config(&mut self, path: &str) -> Result<String, MasterError> {
        return self.request(MessageKind::ReloadConfig, path);
    }

    fn exit(&mut self) -> Result<String, MasterError> {
        return self.request(MessageKind::Exit, "");
    }
}
