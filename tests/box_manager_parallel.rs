//! Box manager assembly across several ranks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use structmg::error::MgError;
use structmg::parallel::{Comm, CommStats, ThreadComm};
use structmg::structured::{BoxManager, GridBox, Index};

const NRANKS: usize = 4;

/// The boxes rank `rank` contributes: a few random boxes inside 32x32.
fn random_boxes(rank: usize) -> Vec<(Index, Index)> {
    let mut rng = StdRng::seed_from_u64(rank as u64);
    let n = rng.gen_range(1..5);
    (0..n)
        .map(|_| {
            let x0 = rng.gen_range(0..28);
            let y0 = rng.gen_range(0..28);
            let imin = Index::new(x0, y0, 0);
            let imax = Index::new(x0 + rng.gen_range(0..4), y0 + rng.gen_range(0..4), 0);
            (imin, imax)
        })
        .collect()
}

#[test]
fn every_rank_gathers_every_entry_with_its_info() {
    let bbox = GridBox::from_bounds(&[0, 0], &[31, 31]).unwrap();
    let out = ThreadComm::run(NRANKS, |comm| {
        let rank = comm.rank();
        let mut bm = BoxManager::new(8, 4, 2, bbox, comm).unwrap();
        for (id, (imin, imax)) in random_boxes(rank).into_iter().enumerate() {
            let info = ((rank * 100 + id) as u32).to_le_bytes();
            bm.add_entry(imin, imax, rank, id, &info).unwrap();
        }
        bm.gather_entries(Index::new(0, 0, 0), Index::new(31, 31, 0)).unwrap();
        bm.assemble().unwrap();
        bm.get_all_entries()
            .unwrap()
            .iter()
            .map(|e| {
                let info = u32::from_le_bytes(bm.entry_info(e).try_into().unwrap());
                (e.proc(), e.id(), e.imin(), e.imax(), info)
            })
            .collect::<Vec<_>>()
    });

    let mut expected = Vec::new();
    for rank in 0..NRANKS {
        for (id, (imin, imax)) in random_boxes(rank).into_iter().enumerate() {
            expected.push((rank, id, imin, imax, (rank * 100 + id) as u32));
        }
    }
    for seen in out {
        assert_eq!(seen, expected);
    }
}

#[test]
fn intersections_match_a_brute_force_scan() {
    let bbox = GridBox::from_bounds(&[0, 0], &[31, 31]).unwrap();
    let queries = [((0, 0), (31, 31)), ((5, 5), (12, 9)), ((20, 0), (20, 31)), ((30, 30), (31, 31))];
    let out = ThreadComm::run(NRANKS, |comm| {
        let rank = comm.rank();
        let mut bm = BoxManager::new(8, 0, 2, bbox, comm).unwrap();
        for (id, (imin, imax)) in random_boxes(rank).into_iter().enumerate() {
            bm.add_entry(imin, imax, rank, id, &[]).unwrap();
        }
        bm.gather_entries(Index::new(0, 0, 0), Index::new(31, 31, 0)).unwrap();
        bm.assemble().unwrap();
        queries
            .iter()
            .map(|&((x0, y0), (x1, y1))| {
                bm.intersect(Index::new(x0, y0, 0), Index::new(x1, y1, 0))
                    .unwrap()
                    .iter()
                    .map(|e| (e.proc(), e.id()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    });

    let all: Vec<(usize, usize, GridBox)> = (0..NRANKS)
        .flat_map(|rank| {
            random_boxes(rank)
                .into_iter()
                .enumerate()
                .map(move |(id, (imin, imax))| (rank, id, GridBox::new(imin, imax, 2).unwrap()))
        })
        .collect();
    for (q, &((x0, y0), (x1, y1))) in queries.iter().enumerate() {
        let qbox = GridBox::from_bounds(&[x0, y0], &[x1, y1]).unwrap();
        let expected: Vec<(usize, usize)> = all
            .iter()
            .filter(|(_, _, b)| b.overlaps(&qbox))
            .map(|(p, i, _)| (*p, *i))
            .collect();
        for seen in &out {
            assert_eq!(seen[q], expected, "query {q}");
        }
    }
}

/// Rank `r` owns an 8x8 slab of a `8P x 8` strip and asks for its
/// neighbours. Neither the peers contacted nor the data a rank handles may
/// grow with `P`.
fn strip_contacts(nranks: usize) -> Vec<(usize, usize, Vec<usize>, CommStats)> {
    let width = 8 * nranks as i32;
    let bbox = GridBox::from_bounds(&[0, 0], &[width - 1, 7]).unwrap();
    ThreadComm::run(nranks, |comm| {
        let r = comm.rank() as i32;
        let mut bm = BoxManager::new(1, 0, 2, bbox, comm.clone()).unwrap();
        bm.add_entry(Index::new(8 * r, 0, 0), Index::new(8 * r + 7, 7, 0), comm.rank(), 0, &[])
            .unwrap();
        bm.gather_entries(Index::new(8 * r - 1, -1, 0), Index::new(8 * r + 8, 8, 0)).unwrap();
        bm.assemble().unwrap();
        let stats = bm.stats();
        let procs = bm.get_all_entries().unwrap().iter().map(|e| e.proc()).collect();
        (stats.publish_contacts, stats.query_contacts, procs, comm.stats())
    })
}

#[test]
fn assembly_contacts_stay_bounded() {
    for nranks in [4, 8] {
        for (r, (publish, query, procs, traffic)) in strip_contacts(nranks).into_iter().enumerate() {
            assert!(publish <= 3, "{nranks} ranks, rank {r}: {publish} publish contacts");
            assert!(query <= 3, "{nranks} ranks, rank {r}: {query} query contacts");
            // Publish, query and reply phases: at most three messages each,
            // and no world-sized reduction to count them.
            assert_eq!(traffic.reduced, 0, "{nranks} ranks, rank {r}");
            assert!(traffic.recvs <= 9, "{nranks} ranks, rank {r}: {traffic:?}");
            assert!(traffic.sends <= 9, "{nranks} ranks, rank {r}: {traffic:?}");
            let mut expected = vec![r];
            if r > 0 {
                expected.insert(0, r - 1);
            }
            if r + 1 < nranks {
                expected.push(r + 1);
            }
            assert_eq!(procs, expected, "{nranks} ranks, rank {r}");
        }
    }
}

#[test]
fn queries_require_assembly() {
    let bbox = GridBox::from_bounds(&[0], &[9]).unwrap();
    let mut bm = BoxManager::new(2, 0, 1, bbox, ThreadComm::serial()).unwrap();
    bm.add_entry(Index::new(0, 0, 0), Index::new(4, 0, 0), 0, 0, &[]).unwrap();

    let err = bm.intersect(Index::new(0, 0, 0), Index::new(9, 0, 0)).unwrap_err();
    assert!(matches!(err, MgError::NotAssembled(_)));
    assert!(err.is_contract_violation());

    bm.assemble().unwrap();
    assert_eq!(bm.intersect(Index::new(3, 0, 0), Index::new(9, 0, 0)).unwrap().len(), 1);
    let err = bm.add_entry(Index::new(5, 0, 0), Index::new(9, 0, 0), 0, 1, &[]).unwrap_err();
    assert!(matches!(err, MgError::AlreadyAssembled(_)));
    assert!(matches!(bm.get_entry(0, 7), Err(MgError::EntryNotFound { proc: 0, id: 7 })));
}
