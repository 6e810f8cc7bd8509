//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). Every
//! handle is **waitable**; callers must `.wait()` (or drain through
//! [`wait_any`]) before trusting that a buffer is complete. Delivery between
//! an ordered pair of processes, for one tag, is FIFO.
//!
//! Collectives (`allgather`, `allreduce_*`, `gather`, `broadcast`, `barrier`)
//! are provided on top of point-to-point exchanges on reserved tags, so a
//! backend only has to supply `isend`/`irecv`, `split` and `duplicate`.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Failure of a message-passing primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("peer {peer} exited before sending the expected message")]
    PeerExited { peer: usize },
    #[error("peer rank {peer} out of range for communicator of size {size}")]
    InvalidPeer { peer: usize, size: usize },
    #[error("a process of the group panicked")]
    Poisoned,
    #[error("malformed collective payload from rank {peer}")]
    Collective { peer: usize },
    #[error("message-passing backend error: {0}")]
    Backend(String),
}

/// Message tag. Every tag stays within `0..=CommTag::UPPER_BOUND`, the range
/// any MPI implementation accepts; tags from `0x7F00` up are reserved for the
/// collectives implemented by this module.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const MATCH_REQUEST: CommTag = CommTag(10);
    pub const MATCH_REPLY: CommTag = CommTag(11);
    pub const HALO: CommTag = CommTag(20);
    pub const COARSEN_MULT: CommTag = CommTag(30);
    pub const COARSEN_ADJ: CommTag = CommTag(31);
    pub const FOLD: CommTag = CommTag(40);
    pub const GATHER: CommTag = CommTag(50);
    pub const CHECK: CommTag = CommTag(60);
    pub const PROJECT: CommTag = CommTag(70);
    pub const SCATTER: CommTag = CommTag(80);

    /// Smallest `MPI_TAG_UB` the MPI standard allows.
    pub const UPPER_BOUND: u16 = 0x7FFF;
    const RESERVED: u16 = 0x7F00;

    const ALLGATHER: CommTag = CommTag(Self::RESERVED + 1);
    const GATHER_ROOT: CommTag = CommTag(Self::RESERVED + 2);
    const BROADCAST: CommTag = CommTag(Self::RESERVED + 3);
    const SPLIT: CommTag = CommTag(Self::RESERVED + 4);

    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Same tag, shifted by `offset` (used to keep sub-steps of one operation apart).
    pub const fn offset(self, offset: u16) -> Self {
        CommTag(self.0 + offset)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Block until completion and return the received data (empty for sends).
    fn wait(self) -> Result<Vec<u8>, CommError>;
}

/// Non-blocking completion test, needed by [`wait_any`].
pub trait Test {
    /// Returns `Some(data)` once the operation has completed. After that the
    /// handle must not be tested or waited again.
    fn test(&mut self) -> Result<Option<Vec<u8>>, CommError>;
}

/// Non-blocking communication interface.
pub trait Communicator: Clone + Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait + Send;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait + Test + Send;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<Self::SendHandle, CommError>;
    fn irecv(&self, peer: usize, tag: CommTag) -> Result<Self::RecvHandle, CommError>;

    /// Split into sub-communicators by color; ranks inside a color are ordered
    /// by `(key, old rank)`. `None` opts out and yields no communicator.
    fn split(&self, color: Option<u32>, key: usize) -> Result<Option<Self>, CommError>;

    /// A communicator over the same group whose traffic never mixes with ours.
    fn duplicate(&self) -> Result<Self, CommError>;

    /// Whether two threads may drive distinct duplicates concurrently.
    fn supports_threads(&self) -> bool {
        true
    }

    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), CommError> {
        self.isend(peer, tag, buf)?.wait().map(|_| ())
    }

    fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, CommError> {
        self.irecv(peer, tag)?.wait()
    }

    /// Every rank contributes `buf`; every rank gets all contributions by rank.
    fn allgather(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, CommError> {
        let me = self.rank();
        let n = self.size();
        let mut recvs = Vec::with_capacity(n.saturating_sub(1));
        for p in (0..n).filter(|&p| p != me) {
            recvs.push((p, self.irecv(p, CommTag::ALLGATHER)?));
        }
        let mut sends = Vec::with_capacity(n.saturating_sub(1));
        for p in (0..n).filter(|&p| p != me) {
            sends.push(self.isend(p, CommTag::ALLGATHER, buf)?);
        }
        let mut out = vec![Vec::new(); n];
        out[me] = buf.to_vec();
        let mut first_err = None;
        for (p, h) in recvs {
            match h.wait() {
                Ok(data) => out[p] = data,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        for s in sends {
            if let Err(e) = s.wait() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.allgather(&[]).map(|_| ())
    }

    fn allgather_i64(&self, value: i64) -> Result<Vec<i64>, CommError> {
        let all = self.allgather(&value.to_le_bytes())?;
        all.iter()
            .enumerate()
            .map(|(p, b)| {
                <[u8; 8]>::try_from(b.as_slice())
                    .map(i64::from_le_bytes)
                    .map_err(|_| CommError::Collective { peer: p })
            })
            .collect()
    }

    fn allreduce_max(&self, value: i64) -> Result<i64, CommError> {
        Ok(self.allgather_i64(value)?.into_iter().max().unwrap_or(value))
    }

    fn allreduce_sum(&self, value: i64) -> Result<i64, CommError> {
        Ok(self.allgather_i64(value)?.into_iter().sum())
    }

    /// Collect every rank's buffer on `root`; other ranks get `None`.
    fn gather(&self, root: usize, buf: &[u8]) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        let me = self.rank();
        let n = self.size();
        if root >= n {
            return Err(CommError::InvalidPeer { peer: root, size: n });
        }
        if me != root {
            self.send(root, CommTag::GATHER_ROOT, buf)?;
            return Ok(None);
        }
        let mut out = vec![Vec::new(); n];
        out[me] = buf.to_vec();
        for p in (0..n).filter(|&p| p != me) {
            out[p] = self.recv(p, CommTag::GATHER_ROOT)?;
        }
        Ok(Some(out))
    }

    /// Root's buffer is returned on every rank.
    fn broadcast(&self, root: usize, buf: &[u8]) -> Result<Vec<u8>, CommError> {
        let me = self.rank();
        let n = self.size();
        if root >= n {
            return Err(CommError::InvalidPeer { peer: root, size: n });
        }
        if me == root {
            let mut sends = Vec::with_capacity(n.saturating_sub(1));
            for p in (0..n).filter(|&p| p != me) {
                sends.push(self.isend(p, CommTag::BROADCAST, buf)?);
            }
            wait_all(sends)?;
            Ok(buf.to_vec())
        } else {
            self.recv(root, CommTag::BROADCAST)
        }
    }
}

/// Wait for whichever pending receive completes first. Completed slots are
/// set to `None`. Returns `Ok(None)` when no slot is pending any more.
pub fn wait_any<H: Test>(handles: &mut [Option<H>]) -> Result<Option<(usize, Vec<u8>)>, CommError> {
    loop {
        let mut pending = false;
        for (i, slot) in handles.iter_mut().enumerate() {
            if let Some(h) = slot {
                pending = true;
                if let Some(data) = h.test()? {
                    *slot = None;
                    return Ok(Some((i, data)));
                }
            }
        }
        if !pending {
            return Ok(None);
        }
        std::thread::yield_now();
    }
}

/// Drain every handle, even after a failure, and report the first error.
pub fn wait_all<H: Wait>(handles: impl IntoIterator<Item = H>) -> Result<Vec<Vec<u8>>, CommError> {
    let mut out = Vec::new();
    let mut first_err = None;
    for h in handles {
        match h.wait() {
            Ok(d) => out.push(d),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

// --- ThreadComm: processes simulated by threads of one address space ---

type MailKey = (u64, usize, usize, u16); // (context, src world rank, dst world rank, tag)

#[derive(Default)]
struct MailState {
    queues: HashMap<MailKey, VecDeque<Bytes>>,
    exited: Vec<bool>,
    poisoned: bool,
}

struct Mailroom {
    state: Mutex<MailState>,
    arrived: Condvar,
    next_context: AtomicU64,
}

/// In-process backend: each rank is a thread, messages go through a shared
/// mailroom keyed by `(context, source, destination, tag)`.
#[derive(Clone)]
pub struct ThreadComm {
    room: Arc<Mailroom>,
    context: u64,
    members: Arc<[usize]>,
    rank: usize,
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("context", &self.context)
            .field("rank", &self.rank)
            .field("size", &self.members.len())
            .finish()
    }
}

impl ThreadComm {
    /// One communicator handle per rank of a fresh world of `size` ranks.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let room = Arc::new(Mailroom {
            state: Mutex::new(MailState {
                exited: vec![false; size],
                ..MailState::default()
            }),
            arrived: Condvar::new(),
            next_context: AtomicU64::new(1),
        });
        let members: Arc<[usize]> = (0..size).collect::<Vec<_>>().into();
        (0..size)
            .map(|rank| ThreadComm {
                room: room.clone(),
                context: 0,
                members: members.clone(),
                rank,
            })
            .collect()
    }

    /// Run `f` on `size` ranks, one thread each, and collect the results by rank.
    ///
    /// A rank that returns or panics is marked as exited, so peers still
    /// waiting on it fail with [`CommError::PeerExited`] instead of hanging.
    /// A panic on any rank is re-raised after all ranks are joined.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        let comms = Self::world(size);
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    s.spawn(move || {
                        let _guard = ExitGuard {
                            room: comm.room.clone(),
                            world_rank: comm.members[comm.rank],
                        };
                        f(comm)
                    })
                })
                .collect();
            let mut panic = None;
            let mut out = Vec::with_capacity(size);
            for h in handles {
                match h.join() {
                    Ok(r) => out.push(r),
                    Err(p) => {
                        panic.get_or_insert(p);
                    }
                }
            }
            if let Some(p) = panic {
                std::panic::resume_unwind(p);
            }
            out
        })
    }

    fn world_rank(&self, peer: usize) -> Result<usize, CommError> {
        self.members
            .get(peer)
            .copied()
            .ok_or(CommError::InvalidPeer {
                peer,
                size: self.members.len(),
            })
    }
}

struct ExitGuard {
    room: Arc<Mailroom>,
    world_rank: usize,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut st = self.room.state.lock();
        if std::thread::panicking() {
            st.poisoned = true;
        }
        if let Some(e) = st.exited.get_mut(self.world_rank) {
            *e = true;
        }
        drop(st);
        self.room.arrived.notify_all();
    }
}

/// Sends are buffered by the mailroom and complete immediately.
pub struct ThreadSend;

impl Wait for ThreadSend {
    fn wait(self) -> Result<Vec<u8>, CommError> {
        Ok(Vec::new())
    }
}

pub struct ThreadRecv {
    room: Arc<Mailroom>,
    key: MailKey,
    peer: usize,
}

impl ThreadRecv {
    fn poll(&self, st: &mut MailState) -> Result<Option<Vec<u8>>, CommError> {
        if let Some(b) = st.queues.get_mut(&self.key).and_then(|q| q.pop_front()) {
            return Ok(Some(b.to_vec()));
        }
        if st.poisoned {
            return Err(CommError::Poisoned);
        }
        if st.exited.get(self.key.1).copied().unwrap_or(true) {
            return Err(CommError::PeerExited { peer: self.peer });
        }
        Ok(None)
    }
}

impl Test for ThreadRecv {
    fn test(&mut self) -> Result<Option<Vec<u8>>, CommError> {
        let mut st = self.room.state.lock();
        self.poll(&mut st)
    }
}

impl Wait for ThreadRecv {
    fn wait(self) -> Result<Vec<u8>, CommError> {
        let mut st = self.room.state.lock();
        loop {
            if let Some(data) = self.poll(&mut st)? {
                return Ok(data);
            }
            self.room.arrived.wait(&mut st);
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ThreadSend;
    type RecvHandle = ThreadRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<ThreadSend, CommError> {
        let dst = self.world_rank(peer)?;
        let key = (self.context, self.members[self.rank], dst, tag.as_u16());
        {
            let mut st = self.room.state.lock();
            if st.poisoned {
                return Err(CommError::Poisoned);
            }
            st.queues
                .entry(key)
                .or_default()
                .push_back(Bytes::copy_from_slice(buf));
        }
        self.room.arrived.notify_all();
        Ok(ThreadSend)
    }

    fn irecv(&self, peer: usize, tag: CommTag) -> Result<ThreadRecv, CommError> {
        let src = self.world_rank(peer)?;
        Ok(ThreadRecv {
            room: self.room.clone(),
            key: (self.context, src, self.members[self.rank], tag.as_u16()),
            peer,
        })
    }

    fn split(&self, color: Option<u32>, key: usize) -> Result<Option<Self>, CommError> {
        let mut mine = Vec::with_capacity(16);
        mine.extend_from_slice(&color.map_or(-1i64, i64::from).to_le_bytes());
        mine.extend_from_slice(&(key as u64).to_le_bytes());
        let all = self.allgather(&mine)?;

        let Some(color) = color else {
            return Ok(None);
        };
        let mut group = Vec::new();
        for (p, b) in all.iter().enumerate() {
            if b.len() != 16 {
                return Err(CommError::Collective { peer: p });
            }
            let c = i64::from_le_bytes(b[..8].try_into().map_err(|_| CommError::Collective { peer: p })?);
            let k = u64::from_le_bytes(b[8..].try_into().map_err(|_| CommError::Collective { peer: p })?);
            if c == i64::from(color) {
                group.push((k, p));
            }
        }
        group.sort_unstable();
        let leader = group[0].1;
        let new_rank = group
            .iter()
            .position(|&(_, p)| p == self.rank)
            .ok_or(CommError::Collective { peer: self.rank })?;

        let context = if self.rank == leader {
            let ctx = self.room.next_context.fetch_add(1, Ordering::Relaxed);
            for &(_, p) in &group[1..] {
                self.send(p, CommTag::SPLIT, &ctx.to_le_bytes())?;
            }
            ctx
        } else {
            let b = self.recv(leader, CommTag::SPLIT)?;
            u64::from_le_bytes(
                b.as_slice()
                    .try_into()
                    .map_err(|_| CommError::Collective { peer: leader })?,
            )
        };
        let members: Arc<[usize]> = group.iter().map(|&(_, p)| self.members[p]).collect::<Vec<_>>().into();
        Ok(Some(ThreadComm {
            room: self.room.clone(),
            context,
            members,
            rank: new_rank,
        }))
    }

    fn duplicate(&self) -> Result<Self, CommError> {
        self.split(Some(0), self.rank)?
            .ok_or_else(|| CommError::Backend("duplicate produced no communicator".into()))
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::{Color, SimpleCommunicator};
    use mpi::traits::*;

    struct CommCell(SimpleCommunicator);

    // SAFETY: handles only cross threads during a two-thread fold, which is
    // enabled only when the universe was initialised with
    // `Threading::Multiple` (see `MpiComm::supports_threads`).
    unsafe impl Send for CommCell {}
    unsafe impl Sync for CommCell {}

    #[derive(Clone)]
    pub struct MpiComm {
        comm: Arc<CommCell>,
        rank: usize,
        size: usize,
        threaded: bool,
    }

    impl MpiComm {
        /// Wrap an MPI communicator. `threaded` must reflect the threading
        /// level the universe was initialised with.
        pub fn new(comm: SimpleCommunicator, threaded: bool) -> Self {
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Self {
                comm: Arc::new(CommCell(comm)),
                rank,
                size,
                threaded,
            }
        }
    }

    pub struct MpiSendHandle {
        request: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    // SAFETY: the buffer is owned by the handle and only freed after the
    // request completed.
    unsafe impl Send for MpiSendHandle {}

    impl MpiSendHandle {
        fn complete(&mut self) {
            if let Some(req) = self.request.take() {
                req.wait();
                // SAFETY: `buf` was leaked from a Box in `isend` and the
                // request that borrowed it has completed.
                drop(unsafe { Box::from_raw(self.buf) });
            }
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            self.complete();
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Result<Vec<u8>, CommError> {
            self.complete();
            Ok(Vec::new())
        }
    }

    /// A receive that is matched lazily: nothing is posted to MPI. `test`
    /// probes for a message from the peer with the tag and receives it when
    /// one is there; `wait` blocks in a plain receive. Sends are immediate and
    /// own their buffers.
    pub struct MpiRecvHandle {
        comm: Arc<CommCell>,
        peer: i32,
        tag: i32,
    }

    impl Test for MpiRecvHandle {
        fn test(&mut self) -> Result<Option<Vec<u8>>, CommError> {
            let proc = self.comm.0.process_at_rank(self.peer);
            if proc.immediate_probe_with_tag(self.tag).is_some() {
                let (data, _status) = proc.receive_vec_with_tag::<u8>(self.tag);
                Ok(Some(data))
            } else {
                Ok(None)
            }
        }
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Result<Vec<u8>, CommError> {
            let (data, _status) = self
                .comm
                .0
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Ok(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<MpiSendHandle, CommError> {
            if peer >= self.size {
                return Err(CommError::InvalidPeer { peer, size: self.size });
            }
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the allocation stays alive until `complete` frees it.
            let data: &'static [u8] = unsafe { &*raw };
            let request = self
                .comm
                .0
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag.as_u16()));
            Ok(MpiSendHandle {
                request: Some(request),
                buf: raw,
            })
        }

        fn irecv(&self, peer: usize, tag: CommTag) -> Result<MpiRecvHandle, CommError> {
            if peer >= self.size {
                return Err(CommError::InvalidPeer { peer, size: self.size });
            }
            Ok(MpiRecvHandle {
                comm: self.comm.clone(),
                peer: peer as i32,
                tag: i32::from(tag.as_u16()),
            })
        }

        fn split(&self, color: Option<u32>, key: usize) -> Result<Option<Self>, CommError> {
            let color = match color {
                Some(c) => Color::with_value(c as i32),
                None => Color::undefined(),
            };
            Ok(self
                .comm
                .0
                .split_by_color_with_key(color, key as i32)
                .map(|c| MpiComm::new(c, self.threaded)))
        }

        fn duplicate(&self) -> Result<Self, CommError> {
            Ok(MpiComm::new(self.comm.0.duplicate(), self.threaded))
        }

        fn supports_threads(&self) -> bool {
            self.threaded
        }

        fn barrier(&self) -> Result<(), CommError> {
            self.comm.0.barrier();
            Ok(())
        }

        fn allreduce_max(&self, value: i64) -> Result<i64, CommError> {
            let mut out = 0i64;
            self.comm
                .0
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            Ok(out)
        }

        fn allreduce_sum(&self, value: i64) -> Result<i64, CommError> {
            let mut out = 0i64;
            self.comm
                .0
                .all_reduce_into(&value, &mut out, SystemOperation::sum());
            Ok(out)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_roundtrip_two_ranks() {
        let out = ThreadComm::run(2, |comm| {
            if comm.rank() == 0 {
                let h = comm.isend(1, CommTag::new(7), &[1, 2, 3, 4]).unwrap();
                h.wait().unwrap();
                Vec::new()
            } else {
                comm.irecv(0, CommTag::new(7)).unwrap().wait().unwrap()
            }
        });
        assert_eq!(out[1], vec![1, 2, 3, 4]);
    }

    #[test]
    fn messages_between_a_pair_are_fifo() {
        let out = ThreadComm::run(2, |comm| {
            if comm.rank() == 0 {
                for i in 0..10u8 {
                    comm.send(1, CommTag::new(3), &[i]).unwrap();
                }
                Vec::new()
            } else {
                (0..10)
                    .map(|_| comm.recv(0, CommTag::new(3)).unwrap()[0])
                    .collect::<Vec<_>>()
            }
        });
        assert_eq!(out[1], (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn tags_fit_the_portable_mpi_range() {
        let named = [
            CommTag::MATCH_REQUEST,
            CommTag::MATCH_REPLY,
            CommTag::HALO,
            CommTag::COARSEN_MULT,
            CommTag::COARSEN_ADJ,
            CommTag::FOLD,
            CommTag::GATHER,
            CommTag::CHECK,
            CommTag::PROJECT,
            CommTag::SCATTER,
        ];
        assert!(named.iter().all(|t| t.as_u16() < CommTag::RESERVED));
        let reserved = [CommTag::ALLGATHER, CommTag::GATHER_ROOT, CommTag::BROADCAST, CommTag::SPLIT];
        assert!(reserved.iter().all(|t| (CommTag::RESERVED..=CommTag::UPPER_BOUND).contains(&t.as_u16())));
    }

    #[test]
    fn collectives_agree() {
        let out = ThreadComm::run(4, |comm| {
            let max = comm.allreduce_max(comm.rank() as i64 * 3).unwrap();
            let sum = comm.allreduce_sum(1).unwrap();
            let all = comm.allgather(&[comm.rank() as u8]).unwrap();
            let bc = comm.broadcast(2, &[comm.rank() as u8 + 10]).unwrap();
            let g = comm.gather(1, &[comm.rank() as u8]).unwrap();
            comm.barrier().unwrap();
            (max, sum, all, bc, g)
        });
        for (rank, (max, sum, all, bc, g)) in out.into_iter().enumerate() {
            assert_eq!(max, 9);
            assert_eq!(sum, 4);
            assert_eq!(all, vec![vec![0], vec![1], vec![2], vec![3]]);
            assert_eq!(bc, vec![12]);
            assert_eq!(g.is_some(), rank == 1);
        }
    }

    #[test]
    fn split_orders_by_key_and_isolates_traffic() {
        let out = ThreadComm::run(5, |comm| {
            let color = if comm.rank() == 4 { None } else { Some((comm.rank() % 2) as u32) };
            let key = 10 - comm.rank();
            let sub = comm.split(color, key).unwrap();
            sub.map(|s| {
                let sum = s.allreduce_sum(comm.rank() as i64).unwrap();
                (s.rank(), s.size(), sum)
            })
        });
        // even ranks {0, 2}: keys 10, 8 -> rank 2 first
        assert_eq!(out[0], Some((1, 2, 2)));
        assert_eq!(out[2], Some((0, 2, 2)));
        assert_eq!(out[1], Some((1, 2, 4)));
        assert_eq!(out[3], Some((0, 2, 4)));
        assert_eq!(out[4], None);
    }

    #[test]
    fn duplicate_keeps_traffic_apart() {
        let out = ThreadComm::run(2, |comm| {
            let dup = comm.duplicate().unwrap();
            let peer = 1 - comm.rank();
            dup.send(peer, CommTag::new(1), b"dup").unwrap();
            comm.send(peer, CommTag::new(1), b"orig").unwrap();
            let a = comm.recv(peer, CommTag::new(1)).unwrap();
            let b = dup.recv(peer, CommTag::new(1)).unwrap();
            (a, b)
        });
        for (a, b) in out {
            assert_eq!(a, b"orig");
            assert_eq!(b, b"dup");
        }
    }

    #[test]
    fn wait_any_returns_each_completion_once() {
        let out = ThreadComm::run(3, |comm| {
            if comm.rank() == 0 {
                let mut hs: Vec<_> = (1..3)
                    .map(|p| Some(comm.irecv(p, CommTag::new(5)).unwrap()))
                    .collect();
                let mut got = Vec::new();
                while let Some((i, data)) = wait_any(&mut hs).unwrap() {
                    got.push((i, data[0]));
                }
                got.sort();
                got
            } else {
                comm.send(0, CommTag::new(5), &[comm.rank() as u8]).unwrap();
                Vec::new()
            }
        });
        assert_eq!(out[0], vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn receiving_from_an_exited_rank_fails() {
        let out = ThreadComm::run(2, |comm| {
            if comm.rank() == 1 {
                comm.recv(0, CommTag::new(9)).err()
            } else {
                None
            }
        });
        assert_eq!(out[1], Some(CommError::PeerExited { peer: 0 }));
    }
}
