use criterion::Criterion;
use std::hint::black_box;

use rgc::policy::region::card_table::CardTable;
use rgc::util::Address;

const HEAP_SIZE: usize = 64 << 20;
const LOG_CARD_SIZE: usize = 9;

fn card_table() -> CardTable {
    let start = unsafe { Address::from_usize(0x4000_0000) };
    let table = CardTable::new(start, start + HEAP_SIZE, LOG_CARD_SIZE);
    table.clear(start..start + HEAP_SIZE);
    table
}

pub fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("card_table");

    group.bench_function("iterate_clean", |b| {
        let table = card_table();
        let start = table.addr_for(0);
        b.iter(|| {
            let mut runs = 0;
            table.dirty_card_iterate(start..start + HEAP_SIZE, None, |range| {
                black_box(range);
                runs += 1;
            });
            assert_eq!(runs, 0);
        })
    });

    group.bench_function("iterate_sparse", |b| {
        let table = card_table();
        let start = table.addr_for(0);
        // Every 64th card is dirty.
        for i in (0..table.num_cards()).step_by(64) {
            table.mark_card_dirty(i);
        }
        b.iter(|| {
            let mut runs = 0;
            table.dirty_card_iterate(start..start + HEAP_SIZE, None, |range| {
                black_box(range);
                runs += 1;
            });
            black_box(runs);
        })
    });

    group.bench_function("iterate_dense", |b| {
        let table = card_table();
        let start = table.addr_for(0);
        // Runs of 16 dirty cards separated by 16 clean ones.
        for i in 0..table.num_cards() {
            if (i / 16) % 2 == 0 {
                table.mark_card_dirty(i);
            }
        }
        b.iter(|| {
            let mut runs = 0;
            table.dirty_card_iterate(start..start + HEAP_SIZE, None, |range| {
                black_box(range);
                runs += 1;
            });
            black_box(runs);
        })
    });

    group.finish();
}
