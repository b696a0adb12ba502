//! Criterion comparison of bind/step cost for raw `rusqlite` vs. a session's prepared
//! statement. Both variants insert the same rows inside one transaction per iteration so we
//! measure call overhead (binding, interrupt arming) rather than fsync.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rusqlite::{Connection, params};
use sqlite_session::prelude::*;

/// Resolve how many rows each iteration should insert.
fn insert_row_count() -> usize {
    std::env::var("BENCH_ROWS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1000)
}

const SCHEMA: &str = "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)";
const INSERT: &str = "INSERT INTO test (name, score) VALUES (?1, ?2)";

fn bench_raw(conn: &Connection, rows: usize) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(INSERT)?;
        for idx in 0..rows {
            stmt.execute(params![format!("name-{idx}"), idx as f64 * 0.5])?;
        }
    }
    tx.commit()
}

fn bench_session(session: &Session, rows: usize) -> Result<(), SqlSessionError> {
    session.transaction(|s| {
        let mut stmt = s.prepare(INSERT)?;
        for idx in 0..rows {
            let args = [
                NamedValue::positional(1, format!("name-{idx}")),
                NamedValue::positional(2, idx as f64 * 0.5),
            ];
            black_box(stmt.exec(&args)?);
        }
        Ok(())
    })
}

fn prepared_insert(c: &mut Criterion) {
    let rows = insert_row_count();
    let mut group = c.benchmark_group("prepared_insert");
    group.throughput(Throughput::Elements(rows as u64));

    let conn = Connection::open_in_memory().expect("open raw connection");
    conn.execute_batch(SCHEMA).expect("create raw schema");
    group.bench_with_input(BenchmarkId::new("rusqlite", rows), &rows, |b, &rows| {
        b.iter(|| bench_raw(&conn, rows).expect("raw insert"));
    });

    let session = Session::open_in_memory().expect("open session");
    session.exec(SCHEMA).expect("create session schema");
    group.bench_with_input(BenchmarkId::new("session", rows), &rows, |b, &rows| {
        b.iter(|| bench_session(&session, rows).expect("session insert"));
    });

    group.finish();
}

criterion_group!(benches, prepared_insert);
criterion_main!(benches);
