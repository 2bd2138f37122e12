//! SQL Generation Performance Benchmarks
//!
//! Measures relation rendering: plain filters, join planning with default
//! scopes, and eager-load column aliasing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use folio_orm::{
    Association, ColumnKind, EntitySchema, Model, OrderDirection, Predicate, Record, Relation,
    SchemaRegistry, SqlDialect,
};
use once_cell::sync::Lazy;

fn current_editions() -> Predicate {
    Predicate::gte("edition", 2)
}

static REGISTRY: Lazy<SchemaRegistry> = Lazy::new(|| {
    SchemaRegistry::new()
        .register(
            EntitySchema::new("Publisher", "publishers")
                .column("name", ColumnKind::Text)
                .with_association(
                    Association::has_many("volumes", "Volume", "publisher_id")
                        .ordered_by("edition", OrderDirection::Desc),
                ),
        )
        .register(
            EntitySchema::new("Volume", "volumes")
                .column("title", ColumnKind::Text)
                .column("edition", ColumnKind::Integer)
                .column("price", ColumnKind::Float)
                .column("publisher_id", ColumnKind::BigInt)
                .default_scope(current_editions)
                .with_association(Association::belongs_to("publisher", "Publisher", "publisher_id")),
        )
});

macro_rules! bench_model {
    ($name:ident, $entity:literal) => {
        #[derive(Debug, Clone)]
        struct $name(Record);

        impl Model for $name {
            const ENTITY: &'static str = $entity;

            fn registry() -> &'static SchemaRegistry {
                &REGISTRY
            }

            fn from_record(record: Record) -> Self {
                Self(record)
            }

            fn as_record(&self) -> &Record {
                &self.0
            }

            fn as_record_mut(&mut self) -> &mut Record {
                &mut self.0
            }

            fn into_record(self) -> Record {
                self.0
            }
        }
    };
}

bench_model!(Publisher, "Publisher");
bench_model!(Volume, "Volume");

fn bench_basic_sql_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("basic_sql_generation");

    group.bench_function("default_scope_only", |b| {
        let relation = Relation::<Volume>::new();
        b.iter(|| black_box(relation.to_sql()))
    });

    group.bench_function("filters_and_window", |b| {
        let relation = Relation::<Volume>::new()
            .where_gt("price", 10.0)
            .where_like("title", "%Rust%")
            .exclude(Predicate::is_null("publisher_id"))
            .order_by_desc("edition")
            .limit(50)
            .offset(100);
        b.iter(|| black_box(relation.to_sql()))
    });

    group.bench_function("or_of_relations", |b| {
        let relation = Relation::<Volume>::new()
            .where_eq("edition", 2)
            .or(Relation::<Volume>::new().where_lt("price", 5.0));
        b.iter(|| black_box(relation.to_sql()))
    });

    group.finish();
}

fn bench_join_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("join_planning");

    group.bench_function("scoped_inner_join", |b| {
        let relation = Relation::<Publisher>::new()
            .joins("volumes")
            .where_gt("volumes.price", 20.0)
            .distinct(true);
        b.iter(|| black_box(relation.to_sql()))
    });

    group.bench_function("eager_load", |b| {
        let relation = Relation::<Publisher>::new().eager_load("volumes");
        b.iter(|| black_box(relation.to_sql()))
    });

    group.finish();
}

fn bench_in_list_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_list_sizes");

    for size in [10usize, 100, 1000] {
        let ids: Vec<i64> = (0..size as i64).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &ids, |b, ids| {
            let relation = Relation::<Volume>::new().where_in("id", ids.iter().copied());
            b.iter(|| black_box(relation.to_statement(SqlDialect::PostgreSQL)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_basic_sql_generation,
    bench_join_planning,
    bench_in_list_sizes
);
criterion_main!(benches);
