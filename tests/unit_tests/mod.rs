use gridtransfer::comm::ChannelComm;
use std::thread;

mod csr;
mod partition;
mod scatter;

/// Run `f` SPMD-style, once per rank on its own thread, and collect the
/// per-rank results in rank order.
pub fn on_ranks<R: Send>(size: usize, f: impl Fn(ChannelComm) -> R + Sync) -> Vec<R> {
    let comms = ChannelComm::group(size);
    thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("Rank thread panicked"))
            .collect()
    })
}
