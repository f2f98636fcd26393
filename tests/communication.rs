//! Integration tests for communication packages and handles.
//!
//! Exchanges are run on `ThreadComm` worlds of several ranks: ghost updates
//! with `set` and `add`, periodic wrap across ranks, reverse (accumulating)
//! exchanges, redistribution between grids and complex-valued payloads.

use std::sync::Arc;

use structmg::parallel::{Comm, ThreadComm};
use structmg::structured::{
    BoxArray, CommAction, CommHandle, CommInfo, CommPkg, DataSpace, GridBox, Index, StructGrid, StructVector,
};

fn line_grid(comm: ThreadComm, boxes: &[(i32, i32)], periodic: i32) -> StructGrid<ThreadComm> {
    let mut g = StructGrid::new(comm, 1).unwrap();
    for &(lo, hi) in boxes {
        g.set_extents(Index::new(lo, 0, 0), Index::new(hi, 0, 0)).unwrap();
    }
    g.set_periodic(Index::new(periodic, 0, 0)).unwrap();
    g.assemble().unwrap();
    g
}

fn padded_space(grid: &StructGrid<ThreadComm>, ghosts: &[i32; 6]) -> DataSpace {
    let boxes: Vec<GridBox> = grid.boxes().iter().map(|b| b.grow_by_array(ghosts)).collect();
    DataSpace::new(BoxArray::from(boxes), 1)
}

/// Owned point `x` holds `x * 10`; ghosts start at `-1`.
fn fill_owned(grid: &StructGrid<ThreadComm>, space: &DataSpace) -> Vec<i64> {
    let mut data = vec![-1i64; space.len()];
    for (i, b) in grid.boxes().iter().enumerate() {
        let db = space.data_box(i).unwrap();
        for x in b.imin()[0]..=b.imax()[0] {
            data[space.start(i) + db.index_rank(&Index::new(x, 0, 0))] = 10 * x as i64;
        }
    }
    data
}

fn value_at(space: &DataSpace, data: &[i64], b: usize, x: i32) -> i64 {
    data[space.start(b) + space.data_box(b).unwrap().index_rank(&Index::new(x, 0, 0))]
}

#[test]
fn ghost_round_trip_with_set_and_add() {
    let out = ThreadComm::run(3, |comm| {
        let r = comm.rank() as i32;
        let grid = line_grid(comm.clone(), &[(6 * r, 6 * r + 2), (6 * r + 3, 6 * r + 5)], 0);
        let ghosts = [2, 2, 0, 0, 0, 0];
        let info = CommInfo::from_num_ghost(&grid, &ghosts).unwrap();
        let space = padded_space(&grid, &ghosts);
        let pkg = CommPkg::new(&info, &space, &space, None, false, &comm).unwrap();

        let mut set = fill_owned(&grid, &space);
        let h = CommHandle::initialize(&pkg, &comm, &[&set[..]], CommAction::Set, 1).unwrap();
        h.finalize(&mut [&mut set[..]]).unwrap();

        let mut add = fill_owned(&grid, &space);
        let h = CommHandle::initialize(&pkg, &comm, &[&add[..]], CommAction::Add, 2).unwrap();
        h.finalize(&mut [&mut add[..]]).unwrap();
        (r, space, set, add)
    });
    for (r, space, set, add) in out {
        let lo = 6 * r;
        // Box 0 ghosts: lo-2, lo-1 (previous rank) and lo+3, lo+4 (box 1).
        for x in [lo - 2, lo - 1, lo + 3, lo + 4] {
            let expected = if x < 0 { -1 } else { 10 * x as i64 };
            assert_eq!(value_at(&space, &set, 0, x), expected, "rank {r} x {x}");
            let expected_add = if x < 0 { -1 } else { 10 * x as i64 - 1 };
            assert_eq!(value_at(&space, &add, 0, x), expected_add, "rank {r} x {x}");
        }
        // Box 1 ghosts on the right come from the next rank, if any.
        for x in [lo + 6, lo + 7] {
            let expected = if r == 2 { -1 } else { 10 * x as i64 };
            assert_eq!(value_at(&space, &set, 1, x), expected, "rank {r} x {x}");
        }
        // Owned values are never touched.
        assert_eq!(value_at(&space, &set, 1, lo + 5), 10 * (lo + 5) as i64);
        assert_eq!(value_at(&space, &add, 1, lo + 5), 10 * (lo + 5) as i64);
    }
}

#[test]
fn ghosts_wider_than_the_gather_distance() {
    let ghosts = [0, 9, 0, 0, 0, 0];
    let out = ThreadComm::run(4, |comm| {
        let r = comm.rank() as i32;
        // Default max distance 8: rank 0 never learns about rank 3's box.
        let short = line_grid(comm.clone(), &[(4 * r, 4 * r + 3)], 0);
        let rejected = CommInfo::from_num_ghost(&short, &ghosts).unwrap_err();

        let mut grid = StructGrid::new(comm.clone(), 1).unwrap();
        grid.set_extents(Index::new(4 * r, 0, 0), Index::new(4 * r + 3, 0, 0)).unwrap();
        grid.set_max_distance(9).unwrap();
        grid.assemble().unwrap();
        let info = CommInfo::from_num_ghost(&grid, &ghosts).unwrap();
        let space = padded_space(&grid, &ghosts);
        let pkg = CommPkg::new(&info, &space, &space, None, false, &comm).unwrap();
        let mut data = fill_owned(&grid, &space);
        let h = CommHandle::initialize(&pkg, &comm, &[&data[..]], CommAction::Set, 3).unwrap();
        h.finalize(&mut [&mut data[..]]).unwrap();
        (r, rejected, space, data)
    });
    for (r, rejected, space, data) in out {
        assert!(rejected.is_contract_violation(), "{rejected}");
        for x in 4 * r + 4..=4 * r + 12 {
            let expected = if x <= 15 { 10 * x as i64 } else { -1 };
            assert_eq!(value_at(&space, &data, 0, x), expected, "rank {r} x {x}");
        }
    }
}

#[test]
fn periodic_wrap_across_ranks() {
    let out = ThreadComm::run(3, |comm| {
        let r = comm.rank() as i32;
        let grid = Arc::new(line_grid(comm, &[(4 * r, 4 * r + 3)], 12));
        let mut v = StructVector::<i64, _>::new(grid, [1, 1, 0, 0, 0, 0]).unwrap();
        let owned = GridBox::from_bounds(&[4 * r], &[4 * r + 3]).unwrap();
        let vals: Vec<i64> = (4 * r..4 * r + 4).map(|x| x as i64).collect();
        v.set_box_values(&owned, &vals, CommAction::Set).unwrap();
        v.update_ghosts().unwrap();
        v.data().to_vec()
    });
    assert_eq!(out[0], vec![11, 0, 1, 2, 3, 4]);
    assert_eq!(out[1], vec![3, 4, 5, 6, 7, 8]);
    assert_eq!(out[2], vec![7, 8, 9, 10, 11, 0]);
}

#[test]
fn reverse_exchange_accumulates_into_owners() {
    let out = ThreadComm::run(2, |comm| {
        let r = comm.rank() as i32;
        let grid = line_grid(comm.clone(), &[(4 * r, 4 * r + 3)], 0);
        let ghosts = [1, 1, 0, 0, 0, 0];
        let info = CommInfo::from_num_ghost(&grid, &ghosts).unwrap();
        let space = padded_space(&grid, &ghosts);
        let pkg = CommPkg::new(&info, &space, &space, None, true, &comm).unwrap();
        // Every ghost carries a contribution of 5 back to its owner.
        let mut data = vec![0i64; space.len()];
        data[0] = 5;
        data[5] = 5;
        let h = CommHandle::initialize(&pkg, &comm, &[&data[..]], CommAction::Add, 3).unwrap();
        h.finalize(&mut [&mut data[..]]).unwrap();
        data
    });
    // Only the shared interface (x = 3 | x = 4) has a remote owner.
    assert_eq!(out[0], vec![5, 0, 0, 0, 5, 5]);
    assert_eq!(out[1], vec![5, 5, 0, 0, 0, 5]);
}

#[test]
fn redistribution_between_grids() {
    let out = ThreadComm::run(2, |comm| {
        let r = comm.rank() as i32;
        let from = line_grid(comm.clone(), &[(8 * r, 8 * r + 7)], 0);
        // The target layout is staggered by four points.
        let to_boxes: Vec<(i32, i32)> = if r == 0 { vec![(0, 3), (12, 15)] } else { vec![(4, 11)] };
        let to = line_grid(comm.clone(), &to_boxes, 0);
        let info = CommInfo::from_grids(&from, &to).unwrap();
        let no_ghosts = [0; 6];
        let send_space = padded_space(&from, &no_ghosts);
        let recv_space = padded_space(&to, &no_ghosts);
        let pkg = CommPkg::new(&info, &send_space, &recv_space, None, false, &comm).unwrap();
        let src: Vec<f64> = (8 * r..8 * r + 8).map(|x| x as f64).collect();
        let mut dst = vec![f64::NAN; recv_space.len()];
        let h = CommHandle::initialize(&pkg, &comm, &[&src[..]], CommAction::Set, 4).unwrap();
        h.finalize(&mut [&mut dst[..]]).unwrap();
        (dst, comm.stats())
    });
    assert_eq!(out[0].0, vec![0.0, 1.0, 2.0, 3.0, 12.0, 13.0, 14.0, 15.0]);
    assert_eq!(out[1].0, (4..12).map(|x| x as f64).collect::<Vec<_>>());
    assert!(out.iter().all(|(_, stats)| stats.sends > 0));
}

#[cfg(not(feature = "mpi"))]
#[test]
fn complex_values_travel_unchanged() {
    use num_complex::Complex64;

    let out = ThreadComm::run(2, |comm| {
        let r = comm.rank() as i32;
        let grid = Arc::new(line_grid(comm, &[(3 * r, 3 * r + 2)], 6));
        let mut v = StructVector::<Complex64, _>::new(grid, [1, 1, 0, 0, 0, 0]).unwrap();
        let owned = GridBox::from_bounds(&[3 * r], &[3 * r + 2]).unwrap();
        let vals: Vec<Complex64> = (3 * r..3 * r + 3).map(|x| Complex64::new(x as f64, -(x as f64))).collect();
        v.set_box_values(&owned, &vals, CommAction::Set).unwrap();
        v.update_ghosts().unwrap();
        v.data().to_vec()
    });
    assert_eq!(out[0][0], Complex64::new(5.0, -5.0));
    assert_eq!(out[0][4], Complex64::new(3.0, -3.0));
    assert_eq!(out[1][0], Complex64::new(2.0, -2.0));
    assert_eq!(out[1][4], Complex64::new(0.0, 0.0));
}

#[test]
fn agglomerated_package_moves_both_arrays() {
    let grid = line_grid(ThreadComm::serial(), &[(0, 3), (4, 7)], 0);
    let comm = grid.comm().clone();
    let ghosts = [1, 1, 0, 0, 0, 0];
    let info = CommInfo::from_num_ghost(&grid, &ghosts).unwrap();
    let space = padded_space(&grid, &ghosts);
    let pkg = CommPkg::new(&info, &space, &space, None, false, &comm).unwrap();
    let both = CommPkg::agglomerate(&[pkg.clone(), pkg]).unwrap();
    assert_eq!(both.num_blocks(), 2);

    let mut a = fill_owned(&grid, &space);
    let mut b: Vec<i64> = fill_owned(&grid, &space).iter().map(|v| v * 2).collect();
    let h = CommHandle::initialize(&both, &comm, &[&a[..], &b[..]], CommAction::Set, 5).unwrap();
    h.finalize(&mut [&mut a[..], &mut b[..]]).unwrap();
    assert_eq!(value_at(&space, &a, 0, 4), 40);
    assert_eq!(value_at(&space, &b, 1, 3), 60);
}
