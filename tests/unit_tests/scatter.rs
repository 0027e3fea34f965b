use super::on_ranks;
use gridtransfer::comm::Communicator;
use gridtransfer::scatter::HaloExchange;
use gridtransfer::RowPartition;
use util::assert_approx_slice_eq;

#[test]
fn forward_gathers_remote_blocks_in_halo_order() {
    let results = on_ranks(2, |comm| {
        let rank = comm.rank();
        let partition = RowPartition::from_ranges(comm, 2, vec![0, 2, 4]).unwrap();
        let halo_nodes: Vec<usize> = if rank == 0 { vec![2] } else { vec![0, 1] };
        let mut exchange = HaloExchange::<f64, _>::new(&partition, &halo_nodes);
        assert_eq!(exchange.num_halo_nodes(), halo_nodes.len());

        let local = if rank == 0 {
            vec![10.0, 11.0, 20.0, 21.0]
        } else {
            vec![30.0, 31.0, 40.0, 41.0]
        };
        let mut halo = vec![0.0; 2 * halo_nodes.len()];
        exchange.begin_forward(&local);
        exchange.end_forward(&mut halo);
        halo
    });
    assert_approx_slice_eq!(results[0], [30.0, 31.0], abstol = 0.0);
    assert_approx_slice_eq!(results[1], [10.0, 11.0, 20.0, 21.0], abstol = 0.0);
}

#[test]
fn reverse_adds_halo_blocks_into_the_owner() {
    let results = on_ranks(2, |comm| {
        let rank = comm.rank();
        let partition = RowPartition::from_ranges(comm, 2, vec![0, 2, 4]).unwrap();
        let halo_nodes: Vec<usize> = if rank == 0 { vec![2] } else { vec![0, 1] };
        let mut exchange = HaloExchange::<f64, _>::new(&partition, &halo_nodes);

        let halo = if rank == 0 {
            vec![1.0, 2.0]
        } else {
            vec![3.0, 4.0, 5.0, 6.0]
        };
        // Start from a non-zero local slice to observe the element-wise add.
        let mut local = vec![0.5; 4];
        exchange.begin_reverse(&halo);
        exchange.end_reverse(&mut local);
        local
    });
    // Rank 1 pushed (3, 4) into node 0 and (5, 6) into node 1 of rank 0;
    // rank 0 pushed (1, 2) into node 2 of rank 1.
    assert_approx_slice_eq!(results[0], [3.5, 4.5, 5.5, 6.5], abstol = 1e-15);
    assert_approx_slice_eq!(results[1], [1.5, 2.5, 0.5, 0.5], abstol = 1e-15);
}

#[test]
fn serial_exchange_with_no_halo_is_a_no_op() {
    use gridtransfer::comm::SerialComm;
    let partition = RowPartition::from_ranges(SerialComm, 1, vec![0, 3]).unwrap();
    let mut exchange = HaloExchange::<f64, _>::new(&partition, &[]);
    assert_eq!(exchange.num_halo_nodes(), 0);

    let mut halo: Vec<f64> = vec![];
    exchange.begin_forward(&[1.0, 2.0, 3.0]);
    exchange.end_forward(&mut halo);

    let mut local = vec![1.0, 2.0, 3.0];
    exchange.begin_reverse(&[]);
    exchange.end_reverse(&mut local);
    assert_eq!(local, vec![1.0, 2.0, 3.0]);
}

#[test]
fn mismatched_end_call_panics() {
    use gridtransfer::comm::SerialComm;
    use util::assert_panics;

    let partition = RowPartition::from_ranges(SerialComm, 1, vec![0, 2]).unwrap();
    assert_panics!({
        let mut exchange = HaloExchange::<f64, _>::new(&partition, &[]);
        let mut halo: Vec<f64> = vec![];
        exchange.end_forward(&mut halo);
    });
}

#[test]
fn mismatched_direction_panics() {
    use gridtransfer::comm::SerialComm;
    use util::assert_panics;

    let partition = RowPartition::from_ranges(SerialComm, 1, vec![0, 2]).unwrap();
    assert_panics!({
        let mut exchange = HaloExchange::<f64, _>::new(&partition, &[]);
        exchange.begin_forward(&[1.0, 2.0]);
        let mut local = vec![0.0; 2];
        exchange.end_reverse(&mut local);
    });
}
