//! MPI backend for the [`Communicator`](crate::comm::Communicator) trait.
//!
//! Requires the `mpi` feature and an MPI installation. The caller must
//! initialize MPI before constructing an [`MpiComm`]:
//!
//! ```ignore
//! let _universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::world();
//! ```
use crate::comm::{CommElem, Communicator};
use mpi::collective::CommunicatorCollectives;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::{Communicator as _, CommunicatorRelation, SimpleCommunicator};
use mpi::Count;

/// Communicator backed by an MPI communicator.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

/// An exchange posted on an [`MpiComm`].
///
/// The outgoing data is staged here and the MPI call is issued at completion,
/// so with this backend the post transfers nothing and the completion carries
/// the whole exchange. rsmpi request objects borrow their buffers through a
/// scope and cannot outlive the posting stack frame, which rules out holding
/// a live `MPI_Ialltoallv` in this struct.
/// TODO: issue MPI_Ialltoallv at the post once the request can own its buffers.
#[derive(Debug)]
pub struct MpiRequest<E> {
    send: Vec<E>,
    send_counts: Vec<usize>,
    recv_counts: Vec<usize>,
}

impl MpiComm {
    /// Wrap the MPI world communicator.
    ///
    /// Panics if MPI has not been initialized via `mpi::initialize()`.
    pub fn world() -> Self {
        Self {
            comm: SimpleCommunicator::world(),
        }
    }

    /// Wrap an arbitrary MPI communicator.
    pub fn from_communicator(comm: SimpleCommunicator) -> Self {
        Self { comm }
    }
}

impl Clone for MpiComm {
    fn clone(&self) -> Self {
        Self {
            comm: self.comm.duplicate(),
        }
    }
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |acc, &count| {
            let displ = *acc;
            *acc += count;
            Some(displ)
        })
        .collect()
}

impl Communicator for MpiComm {
    type Request<E: CommElem> = MpiRequest<E>;

    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn same_group(&self, other: &Self) -> bool {
        matches!(
            self.comm.compare(&other.comm),
            CommunicatorRelation::Identical | CommunicatorRelation::Congruent
        )
    }

    fn all_to_all<E: CommElem>(&self, send: &[E]) -> Vec<E> {
        assert_eq!(send.len(), self.size(), "Send buffer must have one element per rank.");
        let mut recv = vec![E::default(); send.len()];
        self.comm.all_to_all_into(send, &mut recv[..]);
        recv
    }

    fn begin_all_to_allv<E: CommElem>(
        &self,
        send: &[E],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> MpiRequest<E> {
        assert_eq!(send_counts.len(), self.size());
        assert_eq!(recv_counts.len(), self.size());
        assert_eq!(send.len(), send_counts.iter().sum::<usize>());

        MpiRequest {
            send: send.to_vec(),
            send_counts: send_counts.to_vec(),
            recv_counts: recv_counts.to_vec(),
        }
    }

    fn complete_all_to_allv<E: CommElem>(&self, request: MpiRequest<E>) -> Vec<E> {
        self.all_to_allv(&request.send, &request.send_counts, &request.recv_counts)
    }

    fn all_to_allv<E: CommElem>(&self, send: &[E], send_counts: &[usize], recv_counts: &[usize]) -> Vec<E> {
        assert_eq!(send_counts.len(), self.size());
        assert_eq!(recv_counts.len(), self.size());
        assert_eq!(send.len(), send_counts.iter().sum::<usize>());

        let send_counts: Vec<Count> = send_counts.iter().map(|&c| c as Count).collect();
        let recv_counts: Vec<Count> = recv_counts.iter().map(|&c| c as Count).collect();
        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);

        let total_recv: Count = recv_counts.iter().sum();
        let mut recv = vec![E::default(); total_recv as usize];

        let send_partition = Partition::new(send, &send_counts[..], &send_displs[..]);
        let mut recv_partition = PartitionMut::new(&mut recv[..], &recv_counts[..], &recv_displs[..]);
        self.comm.all_to_all_varcount_into(&send_partition, &mut recv_partition);
        recv
    }

    fn all_gather<E: CommElem>(&self, value: E) -> Vec<E> {
        let mut recv = vec![E::default(); self.size()];
        self.comm.all_gather_into(&value, &mut recv[..]);
        recv
    }
}
