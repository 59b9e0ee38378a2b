// SPDX-License-Identifier: Apache-2.0 OR MIT

//! TCP connection management for MD traffic over TCP (`spec.md` §4.1, §4.5).
//!
//! A "corner" is a connection to one MD-over-TCP peer, identified by its
//! remote address rather than its file descriptor so a slot's identity
//! survives a reconnect. A corner marked *morituri* ("about to die",
//! `spec.md` §9) is kept open only long enough to flush whatever MD
//! sessions were already queued on it (the "uncompletedTCP" buffer); no new
//! session is ever started on a morituri corner.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::md::header::{MdHeader, MD_HEADER_LEN};
use crate::md::session::MdHandle;

/// Bytes read from a corner's socket per non-blocking `read` call.
const TCP_READ_CHUNK: usize = 4096;

/// One TCP connection to an MD peer.
pub struct Corner {
    pub remote: SocketAddr,
    pub stream: TcpStream,
    pub(crate) connected_at: Instant,
    morituri: bool,
    /// Handles of MD sessions with data still queued to send on this
    /// connection, indexed by handle rather than byte offset so a session
    /// can be tracked across partial, would-block writes.
    pending: Vec<MdHandle>,
    /// Frames queued to go out, oldest first; only the front one is ever
    /// partially written.
    write_queue: VecDeque<(MdHandle, Vec<u8>)>,
    write_offset: usize,
    /// Bytes read but not yet assembled into a full frame
    /// (`spec.md`'s `uncompletedTCP[slot]`); survives across `process` calls.
    read_buf: Vec<u8>,
}

impl Corner {
    fn connect(remote: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&remote, connect_timeout)
            .map_err(|e| Error::Sock(format!("connect {remote}: {e}")))?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self {
            remote,
            stream,
            connected_at: Instant::now(),
            morituri: false,
            pending: Vec::new(),
            write_queue: VecDeque::new(),
            write_offset: 0,
            read_buf: Vec::new(),
        })
    }

    /// Wrap an already-accepted inbound stream as a corner (`spec.md` §4.5's
    /// corner identity is the peer address, whichever side dialed).
    fn from_accepted(remote: SocketAddr, stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self {
            remote,
            stream,
            connected_at: Instant::now(),
            morituri: false,
            pending: Vec::new(),
            write_queue: VecDeque::new(),
            write_offset: 0,
            read_buf: Vec::new(),
        })
    }

    /// Queue `frame` for `handle` to go out on this connection. Tracked as
    /// pending until [`Corner::flush_writes`] reports it fully sent.
    pub fn queue_write(&mut self, handle: MdHandle, frame: Vec<u8>) {
        self.track_pending(handle);
        self.write_queue.push_back((handle, frame));
    }

    /// Drive the write queue as far as the socket accepts without blocking.
    /// Returns the handles whose frame landed on the wire in full this call.
    ///
    /// # Errors
    /// [`Error::Sock`] on a write error or an orderly peer close.
    pub fn flush_writes(&mut self) -> Result<Vec<MdHandle>> {
        let mut completed = Vec::new();
        loop {
            let Some((handle, frame)) = self.write_queue.front() else { break };
            match self.stream.write(&frame[self.write_offset..]) {
                Ok(0) => return Err(Error::Sock(format!("write to {} returned 0", self.remote))),
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset >= frame.len() {
                        let handle = *handle;
                        self.write_queue.pop_front();
                        self.write_offset = 0;
                        self.clear_pending(handle);
                        completed.push(handle);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Sock(format!("write to {}: {e}", self.remote))),
            }
        }
        Ok(completed)
    }

    /// Pull whatever bytes are available without blocking and split off
    /// every complete MD frame accumulated so far, using each frame's own
    /// header-declared `datasetLength` to find the boundary (`spec.md` §3).
    /// Trailing partial bytes stay buffered for the next call.
    ///
    /// # Errors
    /// [`Error::Sock`] on a read error or the peer closing the connection;
    /// [`Error::Crc`] if a header CRC fails (a framing error, not a
    /// recoverable partial read).
    pub fn poll_frames(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut chunk = [0u8; TCP_READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(Error::Sock(format!("{} closed the connection", self.remote))),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Sock(format!("read from {}: {e}", self.remote))),
            }
        }

        let mut frames = Vec::new();
        loop {
            if self.read_buf.len() < MD_HEADER_LEN {
                break;
            }
            let header = match MdHeader::decode(&self.read_buf) {
                Ok(header) => header,
                Err(Error::Crc) => return Err(Error::Crc),
                Err(_) => break,
            };
            let frame_len = MD_HEADER_LEN + crate::pd::header::padded_len(header.dataset_length as usize) + 4;
            if self.read_buf.len() < frame_len {
                break;
            }
            frames.push(self.read_buf.drain(..frame_len).collect());
        }
        Ok(frames)
    }

    /// Drop any frame still queued for `handle` and stop tracking it as
    /// pending — an aborted session's frame must not go out on the wire.
    pub fn discard(&mut self, handle: MdHandle) {
        if matches!(self.write_queue.front(), Some((h, _)) if *h == handle) {
            self.write_offset = 0;
        }
        self.write_queue.retain(|(h, _)| *h != handle);
        self.clear_pending(handle);
    }

    /// Mark this corner for teardown once `pending` drains.
    pub fn mark_morituri(&mut self) {
        self.morituri = true;
    }

    #[must_use]
    pub fn is_morituri(&self) -> bool {
        self.morituri
    }

    pub fn track_pending(&mut self, handle: MdHandle) {
        self.pending.push(handle);
    }

    pub fn clear_pending(&mut self, handle: MdHandle) {
        self.pending.retain(|h| *h != handle);
    }

    #[must_use]
    pub fn can_be_closed(&self) -> bool {
        self.morituri && self.pending.is_empty()
    }
}

/// Connection table keyed by remote address.
#[derive(Default)]
pub struct TcpCorners {
    corners: HashMap<SocketAddr, Corner>,
}

impl TcpCorners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the existing connection to `remote`, or establish a new one
    /// within `connect_timeout`.
    ///
    /// # Errors
    /// [`Error::Sock`] if the connect attempt fails or times out.
    pub fn get_or_connect(&mut self, remote: SocketAddr, connect_timeout: Duration) -> Result<&mut Corner> {
        if !self.corners.contains_key(&remote) {
            let corner = Corner::connect(remote, connect_timeout)?;
            self.corners.insert(remote, corner);
        }
        Ok(self.corners.get_mut(&remote).expect("just inserted or already present"))
    }

    pub fn get_mut(&mut self, remote: SocketAddr) -> Option<&mut Corner> {
        self.corners.get_mut(&remote)
    }

    /// Register an already-accepted inbound connection as a corner, replacing
    /// whatever (stale) corner was previously keyed to the same peer address.
    ///
    /// # Errors
    /// [`Error::Io`] if the stream cannot be put into non-blocking mode.
    pub fn accept(&mut self, remote: SocketAddr, stream: TcpStream) -> Result<()> {
        self.corners.insert(remote, Corner::from_accepted(remote, stream)?);
        Ok(())
    }

    /// Every currently open corner, for the work loop to flush/poll each tick.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Corner> {
        self.corners.values_mut()
    }

    pub fn mark_morituri(&mut self, remote: SocketAddr) {
        if let Some(corner) = self.corners.get_mut(&remote) {
            corner.mark_morituri();
        }
    }

    /// Drop every corner that is morituri and has nothing left pending.
    pub fn reap(&mut self) {
        self.corners.retain(|_, c| !c.can_be_closed());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.corners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}
