pub mod card_table;
pub mod queue;

pub use criterion::Criterion;

pub fn bench(c: &mut Criterion) {
    queue::bench(c);
    card_table::bench(c);
}
