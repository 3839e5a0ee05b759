use core_model::{ActionState, ComponentRecord};
use core_state::ComponentStore;
use core_uri::{Category, Uri};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn seeded_store(plugins: usize, items: usize) -> ComponentStore {
    let store = ComponentStore::new();
    for p in 0..plugins {
        for i in 0..items {
            let uri = Uri::new(Category::Actions, format!("plugin{p}"), format!("item{i}"));
            let _ = store.upsert(
                store.allocate_id(),
                ComponentRecord::action(uri, ActionState::new("bench")),
            );
        }
    }
    store
}

fn bench_find(c: &mut Criterion) {
    let store = seeded_store(20, 50);
    let exact = Uri::new(Category::Actions, "plugin7", "item31");
    let by_plugin = Uri::of_category(Category::Actions).with_plugin_id("plugin7");

    c.bench_function("store_resolve_exact", |b| {
        b.iter(|| black_box(store.resolve(black_box(&exact)).is_ok()))
    });
    c.bench_function("store_find_by_plugin", |b| {
        b.iter(|| black_box(store.find(black_box(&by_plugin)).len()))
    });
    c.bench_function("store_list_category", |b| {
        b.iter(|| black_box(store.find(&Uri::of_category(Category::Actions)).len()))
    });
}

criterion_group!(benches, bench_find);
criterion_main!(benches);
