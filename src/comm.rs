//! Communication backends for distributed assembly and apply.
//!
//! All collective operations of the crate go through the [`Communicator`]
//! trait, so the same operator code runs on a single process
//! ([`SerialComm`]), on a group of threads within one process
//! ([`ChannelComm`], used heavily by the test suite) or across processes with
//! MPI (the `mpi` feature).
use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

#[cfg(feature = "mpi")]
pub mod mpi;

/// Element type that can travel through a [`Communicator`].
#[cfg(not(feature = "mpi"))]
pub trait CommElem: Copy + Default + Send + 'static {}
#[cfg(not(feature = "mpi"))]
impl<T: Copy + Default + Send + 'static> CommElem for T {}

/// Element type that can travel through a [`Communicator`].
///
/// With the `mpi` feature enabled, elements must additionally have an MPI
/// datatype equivalent.
#[cfg(feature = "mpi")]
pub trait CommElem: Copy + Default + Send + 'static + ::mpi::datatype::Equivalence {}
#[cfg(feature = "mpi")]
impl<T: Copy + Default + Send + 'static + ::mpi::datatype::Equivalence> CommElem for T {}

/// A process group with rank-to-rank collective exchange.
///
/// Every operation is collective: all ranks of the group must call it, in the
/// same order. The transport is assumed reliable; a rank that drops out of a
/// collective tears down the whole group.
///
/// The variable-count exchange is split-phase:
/// [`begin_all_to_allv`](Communicator::begin_all_to_allv) posts an exchange
/// without blocking and returns a request, and
/// [`complete_all_to_allv`](Communicator::complete_all_to_allv) waits for it.
/// Callers may compute between the two calls while the exchange is in flight.
pub trait Communicator: Clone + Send + 'static {
    /// An in-flight exchange posted by
    /// [`begin_all_to_allv`](Communicator::begin_all_to_allv).
    type Request<E: CommElem>: Send;

    /// This process's rank within the group, in `0..size`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Whether `self` and `other` address the same group of processes
    /// (identical or congruent, in MPI terms).
    fn same_group(&self, other: &Self) -> bool;

    /// Exchange one element with every rank: element `d` of `send` goes to
    /// rank `d`, and element `s` of the result came from rank `s`.
    fn all_to_all<E: CommElem>(&self, send: &[E]) -> Vec<E>;

    /// Post a variable-count exchange without blocking. `send` is laid out as
    /// one run per destination rank, in rank order, with run lengths given by
    /// `send_counts`; `recv_counts` gives the expected run lengths per source
    /// rank (typically obtained from a preceding
    /// [`all_to_all`](Communicator::all_to_all) of the counts). The received
    /// data becomes available only once the returned request is completed.
    fn begin_all_to_allv<E: CommElem>(
        &self,
        send: &[E],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Self::Request<E>;

    /// Wait for a posted exchange and return the received data, one run per
    /// source rank with the lengths given at the post. This is the blocking
    /// half of the split-phase exchange.
    fn complete_all_to_allv<E: CommElem>(&self, request: Self::Request<E>) -> Vec<E>;

    /// Blocking variable-count exchange: post and immediately complete.
    fn all_to_allv<E: CommElem>(&self, send: &[E], send_counts: &[usize], recv_counts: &[usize]) -> Vec<E> {
        self.complete_all_to_allv(self.begin_all_to_allv(send, send_counts, recv_counts))
    }

    /// Gather one value from every rank, in rank order.
    fn all_gather<E: CommElem>(&self, value: E) -> Vec<E> {
        self.all_to_all(&vec![value; self.size()])
    }
}

/// Trivial communicator for a single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    type Request<E: CommElem> = Vec<E>;

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn same_group(&self, _other: &Self) -> bool {
        true
    }

    fn all_to_all<E: CommElem>(&self, send: &[E]) -> Vec<E> {
        assert_eq!(send.len(), 1, "Send buffer must have one element per rank.");
        send.to_vec()
    }

    fn begin_all_to_allv<E: CommElem>(
        &self,
        send: &[E],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Vec<E> {
        assert_eq!(send_counts.len(), 1);
        assert_eq!(recv_counts.len(), 1);
        assert_eq!(send.len(), send_counts[0]);
        assert_eq!(send_counts[0], recv_counts[0]);
        send.to_vec()
    }

    fn complete_all_to_allv<E: CommElem>(&self, request: Vec<E>) -> Vec<E> {
        request
    }
}

type Payload = Box<dyn Any + Send>;

static NEXT_GROUP_ID: AtomicUsize = AtomicUsize::new(0);

/// In-process communicator connecting a fixed group of threads through
/// pairwise channels.
///
/// [`ChannelComm::group`] creates one communicator per rank; each is then
/// moved onto its own thread, which plays the role of an MPI rank. Posting an
/// exchange enqueues the outgoing runs into unbounded channels and never
/// blocks; completion blocks until every peer's run has arrived, so all ranks
/// of a group must be live and enter collectives in the same order.
#[derive(Debug, Clone)]
pub struct ChannelComm {
    rank: usize,
    size: usize,
    group_id: usize,
    /// senders[d] transmits to rank d; receivers[s] yields data sent by rank s.
    senders: Vec<Sender<Payload>>,
    receivers: Vec<Arc<Mutex<Receiver<Payload>>>>,
}

/// Receive half of an exchange posted on a [`ChannelComm`].
#[derive(Debug)]
pub struct ChannelRequest<E> {
    recv_counts: Vec<usize>,
    _elem: PhantomData<E>,
}

impl ChannelComm {
    /// Create a connected group of `size` communicators, one per rank.
    pub fn group(size: usize) -> Vec<ChannelComm> {
        assert!(size > 0, "Group must have at least one rank.");
        let group_id = NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed);

        let mut senders: Vec<Vec<Sender<Payload>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Arc<Mutex<Receiver<Payload>>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for source in 0..size {
            for dest in 0..size {
                let (tx, rx) = channel();
                senders[source].push(tx);
                receivers[dest].push(Arc::new(Mutex::new(rx)));
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ChannelComm {
                rank,
                size,
                group_id,
                senders,
                receivers,
            })
            .collect()
    }

    fn recv_from<E: CommElem>(&self, source: usize) -> Vec<E> {
        let payload = self.receivers[source]
            .lock()
            .unwrap()
            .recv()
            .expect("Peer rank disconnected in the middle of a collective");
        *payload
            .downcast::<Vec<E>>()
            .expect("Mismatched element type in collective; ranks must make matching calls")
    }
}

impl Communicator for ChannelComm {
    type Request<E: CommElem> = ChannelRequest<E>;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn same_group(&self, other: &Self) -> bool {
        self.group_id == other.group_id
    }

    fn all_to_all<E: CommElem>(&self, send: &[E]) -> Vec<E> {
        assert_eq!(send.len(), self.size, "Send buffer must have one element per rank.");
        for (dest, &value) in send.iter().enumerate() {
            self.senders[dest]
                .send(Box::new(vec![value]))
                .expect("Peer rank disconnected in the middle of a collective");
        }
        (0..self.size).map(|source| self.recv_from::<E>(source)[0]).collect()
    }

    fn begin_all_to_allv<E: CommElem>(
        &self,
        send: &[E],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> ChannelRequest<E> {
        assert_eq!(send_counts.len(), self.size);
        assert_eq!(recv_counts.len(), self.size);
        assert_eq!(send.len(), send_counts.iter().sum::<usize>());

        // Unbounded channels: enqueueing the outgoing runs cannot block on
        // the peers, so the post returns before any peer has entered the
        // exchange.
        let mut start = 0;
        for (dest, &count) in send_counts.iter().enumerate() {
            let run = send[start..start + count].to_vec();
            self.senders[dest]
                .send(Box::new(run))
                .expect("Peer rank disconnected in the middle of a collective");
            start += count;
        }

        ChannelRequest {
            recv_counts: recv_counts.to_vec(),
            _elem: PhantomData,
        }
    }

    fn complete_all_to_allv<E: CommElem>(&self, request: ChannelRequest<E>) -> Vec<E> {
        let mut received = Vec::with_capacity(request.recv_counts.iter().sum());
        for (source, &count) in request.recv_counts.iter().enumerate() {
            let run = self.recv_from::<E>(source);
            assert_eq!(run.len(), count, "Received run length disagrees with the exchanged counts");
            received.extend_from_slice(&run);
        }
        received
    }
}
