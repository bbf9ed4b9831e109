use std::collections::BTreeSet;

use rand::Rng;

use crate::{
    fs::MockDir,
    options::{IndexOptions, RebalanceScope, WriteMode},
};

use super::NameIndex;

#[derive(Debug, Clone)]
enum Op {
    Insert(String),
    Search(String),
    Reopen(WriteMode, RebalanceScope),
}

#[derive(Debug, Clone)]
struct TestCase {
    logical_ops: Vec<Op>,
    // Reopens, each to be run before the logical op at its index.
    physical_ops: Vec<(usize, Op)>,
}

impl TestCase {
    fn ops(&self) -> Vec<Op> {
        let mut physical = self.physical_ops.iter().peekable();
        let mut out = Vec::new();
        for (i, op) in self.logical_ops.iter().enumerate() {
            while let Some((_, p)) = physical.next_if(|(idx, _)| *idx <= i) {
                out.push(p.clone());
            }
            out.push(op.clone());
        }
        out.extend(physical.map(|(_, p)| p.clone()));
        out
    }

    fn without_logical(&self, idx: usize) -> Self {
        let mut reduced = self.clone();
        reduced.logical_ops.remove(idx);
        for op in reduced.physical_ops.iter_mut() {
            if op.0 > idx {
                op.0 -= 1;
            }
        }
        reduced
    }

    fn without_physical(&self, idx: usize) -> Self {
        let mut reduced = self.clone();
        reduced.physical_ops.remove(idx);
        reduced
    }
}

fn run_sequence(case: &TestCase) -> Vec<bool> {
    let dir = MockDir::new();
    let mut index = NameIndex::new(dir.clone(), IndexOptions::default());
    let mut out = Vec::new();

    for op in case.ops() {
        match op {
            Op::Insert(k) => {
                index.insert_unique(&k).unwrap();
            }
            Op::Search(k) => out.push(index.search(&k).unwrap()),
            Op::Reopen(mode, scope) => {
                let opts = IndexOptions::default()
                    .with_write_mode(mode)
                    .with_rebalance(scope);
                index = NameIndex::new(dir.clone(), opts);
            }
        }
    }

    out
}

fn run_model(case: &TestCase) -> Vec<bool> {
    let mut set = BTreeSet::new();
    let mut out = Vec::new();
    for op in &case.logical_ops {
        match op {
            Op::Insert(k) => {
                set.insert(k.clone());
            }
            Op::Search(k) => out.push(set.contains(k)),
            Op::Reopen(..) => {}
        }
    }
    out
}

fn differs(case: &TestCase) -> bool {
    run_sequence(case) != run_model(case)
}

fn reduce(mut case: TestCase) -> TestCase {
    'outer: loop {
        for idx in 0..case.logical_ops.len() {
            let reduced = case.without_logical(idx);
            if differs(&reduced) {
                case = reduced;
                continue 'outer;
            }
        }
        for idx in 0..case.physical_ops.len() {
            let reduced = case.without_physical(idx);
            if differs(&reduced) {
                case = reduced;
                continue 'outer;
            }
        }
        return case;
    }
}

#[test]
fn metamorphic_test() {
    let mut rng = rand::thread_rng();

    for _ in 0..20 {
        // Inserts skip keys already present, so the depth stays within the
        // number of distinct keys. Stacked duplicates have their own tests.
        let logical_ops = (0..60)
            .map(|_| {
                let key = format!("user{}", rng.gen_range(0..12));
                match rng.gen_range(0..2) {
                    0 => Op::Insert(key),
                    1 => Op::Search(key),
                    _ => unreachable!(),
                }
            })
            .collect::<Vec<_>>();

        let mut physical_ops = (0..10)
            .map(|_| {
                let mode = if rng.gen_bool(0.5) {
                    WriteMode::InPlace
                } else {
                    WriteMode::Atomic
                };
                let scope = if rng.gen_bool(0.5) {
                    RebalanceScope::Root
                } else {
                    RebalanceScope::Path
                };
                (rng.gen_range(0..logical_ops.len()), Op::Reopen(mode, scope))
            })
            .collect::<Vec<_>>();
        physical_ops.sort_by_key(|(idx, _)| *idx);

        let case = TestCase {
            logical_ops,
            physical_ops,
        };

        if differs(&case) {
            let reduced = reduce(case);
            println!("reduced case: {:#?}", reduced);
            panic!("index disagreed with the model!")
        }
    }
}
