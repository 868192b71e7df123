//! Session-bound content streams

use crate::error::RepoError;
use crate::store::{NodeSession, Session};
use std::fmt;
use std::io::{self, Read};
use tracing::{debug, warn};

/// A readable file stream that keeps its store session open.
///
/// The session is logged out exactly once: by [`SessionStream::close`] or, if the
/// stream is abandoned, when it is dropped.
pub struct SessionStream {
    session: Option<Session>,
    reader: Box<dyn Read + Send>,
}

impl SessionStream {
    pub(crate) fn new(session: Session, reader: Box<dyn Read + Send>) -> Self {
        Self {
            session: Some(session),
            reader,
        }
    }

    /// Release the session and report a failed logout.
    pub fn close(mut self) -> Result<(), RepoError> {
        match self.session.take() {
            Some(session) => session.logout(),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Read for SessionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.session.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream session already released",
            ));
        }
        self.reader.read(buf)
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Releasing session of abandoned file stream");
            if let Err(e) = session.logout() {
                warn!(error = %e, "Failed to log out stream session");
            }
        }
    }
}

impl fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStream")
            .field("open", &self.is_open())
            .finish()
    }
}
