use criterion::{criterion_group, criterion_main, Criterion};

use variant_sudoku_solver::solver::all_different::AllDifferentEnforcer;
use variant_sudoku_solver::types::CellIndex;
use variant_sudoku_solver::value_set::ValueSet;

fn criterion_benchmark(c: &mut Criterion) {
    const NUM_VALUES: usize = 16;

    let full_set = ValueSet::full(NUM_VALUES as u8);
    let cells = (0..NUM_VALUES).collect::<Vec<CellIndex>>();

    let mut enforcer = AllDifferentEnforcer::new(NUM_VALUES as u32);
    let mut grid = vec![ValueSet::empty(); NUM_VALUES];

    c.bench_function("enforce_all_different full", |b| {
        b.iter(|| {
            grid.fill(full_set);
            enforcer.enforce_all_different(&mut grid, &cells, |_| {}).is_ok()
        });
    });

    c.bench_function("enforce_all_different solved", |b| {
        b.iter(|| {
            grid.splice(
                0..NUM_VALUES,
                (0..NUM_VALUES).map(|v| ValueSet::from_value(v as u8)),
            );
            enforcer.enforce_all_different(&mut grid, &cells, |_| {}).is_ok()
        });
    });

    c.bench_function("enforce_all_different partial", |b| {
        b.iter(|| {
            grid.fill(full_set);
            grid[5] = ValueSet::from_iter([0, 1]);
            grid[7] = ValueSet::from_iter([0, 1, 3]);
            grid[0] = ValueSet::from_iter(0..9);
            enforcer.enforce_all_different(&mut grid, &cells, |_| {}).is_ok()
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
