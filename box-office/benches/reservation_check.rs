//! Reservation checker benchmarks.
//!
//! The increment check runs on every click, recomputing consumption over the
//! whole cart. These benchmarks measure it on a realistic storefront catalog
//! (a few dozen ticket types, a dozen bundles).
//!
//! Run with: `cargo bench --bench reservation_check`

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use box_office::checkout::flatten;
use box_office::inventory::EventCatalog;
use box_office::reservation::{can_increment, Cart, LineId};
use box_office::types::{Bundle, BundleComponent, BundleId, EventId, Money, TicketType, TicketTypeId};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn catalog(ticket_types: usize, bundles: usize) -> EventCatalog {
    let tts = (0..ticket_types)
        .map(|i| TicketType {
            id: TicketTypeId::new(format!("tt{i}")),
            name: format!("Ticket {i}"),
            price: Money::from_minor(1_000 + i as u64 * 50),
            remaining: 40,
            max_per_order: 10,
        })
        .collect();
    let bundles = (0..bundles)
        .map(|i| Bundle {
            id: BundleId::new(format!("b{i}")),
            name: format!("Bundle {i}"),
            price: Money::from_minor(3_000),
            max_quantity: 5,
            components: (0..3)
                .map(|c| BundleComponent {
                    ticket_type_id: TicketTypeId::new(format!("tt{}", (i + c * 7) % ticket_types)),
                    quantity: 2,
                })
                .collect(),
        })
        .collect();
    EventCatalog::new(EventId::new("bench"), tts, bundles, Utc::now())
}

/// Every third line selected once.
fn busy_cart(catalog: &EventCatalog) -> Cart {
    let mut cart = Cart::open(catalog);
    let ids: Vec<_> = cart.lines().iter().map(|line| line.id.clone()).collect();
    for line in ids.iter().step_by(3) {
        cart.set_quantity(line, 1).unwrap();
    }
    cart
}

fn benchmark_can_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("can_increment");

    for (ticket_types, bundles) in [(10, 4), (40, 12), (100, 30)] {
        let catalog = catalog(ticket_types, bundles);
        let cart = busy_cart(&catalog);
        let ticket = LineId::Ticket(TicketTypeId::new("tt1"));
        let bundle = LineId::Bundle(BundleId::new("b1"));
        let label = format!("{ticket_types}tt_{bundles}b");

        group.bench_with_input(BenchmarkId::new("ticket_line", &label), &cart, |b, cart| {
            b.iter(|| can_increment(black_box(&ticket), cart, &catalog.snapshot, &catalog.bundles));
        });
        group.bench_with_input(BenchmarkId::new("bundle_line", &label), &cart, |b, cart| {
            b.iter(|| can_increment(black_box(&bundle), cart, &catalog.snapshot, &catalog.bundles));
        });
        group.bench_with_input(BenchmarkId::new("every_line", &label), &cart, |b, cart| {
            b.iter(|| {
                cart.lines()
                    .iter()
                    .filter(|line| can_increment(&line.id, cart, &catalog.snapshot, &catalog.bundles))
                    .count()
            });
        });
    }

    group.finish();
}

fn benchmark_flatten(c: &mut Criterion) {
    let catalog = catalog(40, 12);
    let cart = busy_cart(&catalog);

    c.bench_function("flatten_40tt_12b", |b| {
        b.iter(|| flatten(black_box(&cart)).unwrap());
    });
}

criterion_group!(benches, benchmark_can_increment, benchmark_flatten);
criterion_main!(benches);
