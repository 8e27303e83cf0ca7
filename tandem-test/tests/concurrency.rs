use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tandem_dag::VertexId;
use tandem_test::{edit, register, store_with_limits};

const WRITERS: usize = 8;
const OPS_PER_WRITER: usize = 100;
const FILES: [&str; 5] = ["a.rs", "b.rs", "c.rs", "d.rs", "e.rs"];

#[test]
fn writers_and_trajectories_interleave_cleanly() {
    let store = store_with_limits(50, 10_000);
    let writers_done = AtomicBool::new(false);

    let finalized = thread::scope(|scope| {
        let recorder = scope.spawn(|| {
            let mut finalized = Vec::new();
            let mut round = 0;
            loop {
                let done = writers_done.load(Ordering::Acquire);
                store.start_trajectory(&format!("round {round}")).unwrap();
                for _ in 0..3 {
                    store.add_to_trajectory().unwrap();
                    thread::yield_now();
                }
                finalized.push(store.finalize_trajectory(0.8, None).unwrap());
                round += 1;
                if done {
                    break finalized;
                }
            }
        });

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..OPS_PER_WRITER {
                        let file = FILES[(w + i) % FILES.len()];
                        register(store, edit(&format!("agent-{w}"), &[file]));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        writers_done.store(true, Ordering::Release);
        recorder.join().unwrap()
    });

    let total = i64::try_from(WRITERS * OPS_PER_WRITER).unwrap();
    assert_eq!(store.get_stats().vertices, WRITERS * OPS_PER_WRITER);

    // The frontier is exactly the set of vertices nothing points back to.
    let vertices: Vec<_> = (1..=total)
        .map(|id| store.get_vertex(VertexId(id)).unwrap())
        .collect();
    let with_successor: BTreeSet<VertexId> = vertices
        .iter()
        .flat_map(|v| v.predecessors.iter().copied())
        .collect();
    let leaves: BTreeSet<VertexId> = vertices
        .iter()
        .map(|v| v.id)
        .filter(|id| !with_successor.contains(id))
        .collect();
    let tips: BTreeSet<VertexId> = store.get_tips().into_iter().collect();
    assert_eq!(tips, leaves);

    // Every operation lands in at most one trajectory, in registration order.
    let mut seen = BTreeSet::new();
    for trajectory in &finalized {
        let ids: Vec<VertexId> = trajectory.operations.iter().map(|o| o.vertex_id).collect();
        assert!(
            ids.windows(2).all(|w| w[0] < w[1]),
            "trajectory {} out of order: {ids:?}",
            trajectory.id
        );
        for id in ids {
            assert!(seen.insert(id), "vertex {id} captured twice");
        }
    }
    assert_eq!(store.get_learning_stats().total_trajectories, finalized.len());
}
