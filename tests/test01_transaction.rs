use std::panic::{AssertUnwindSafe, catch_unwind};

use rusqlite::ErrorCode;
use sqlite_session::prelude::*;

#[derive(Debug)]
enum TestError {
    Failed,
    Db(SqlSessionError),
}

impl From<SqlSessionError> for TestError {
    fn from(err: SqlSessionError) -> Self {
        TestError::Db(err)
    }
}

fn setup() -> Result<Session, SqlSessionError> {
    let session = Session::open_in_memory()?;
    session.exec("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")?;
    Ok(session)
}

fn count(session: &Session) -> Result<i64, SqlSessionError> {
    let mut stmt = session.prepare("SELECT count(*) FROM test")?;
    let mut rows = stmt.query(&[])?;
    let row = rows.next_row()?.unwrap_or_default();
    Ok(row.first().and_then(RowValue::as_int).unwrap_or(-1))
}

#[test]
fn end_ok_commits() -> Result<(), Box<dyn std::error::Error>> {
    let session = setup()?;
    let tx = session.begin()?;
    let work = session.exec("INSERT INTO test (name) VALUES ('hello')").map(|_| ());
    tx.end(work)?;
    assert_eq!(count(&session)?, 1);
    assert!(session.is_autocommit());
    Ok(())
}

#[test]
fn end_err_rolls_back_and_keeps_caller_error() -> Result<(), Box<dyn std::error::Error>> {
    let session = setup()?;
    let result: Result<(), TestError> = session.transaction(|s| {
        s.exec("INSERT INTO test (name) VALUES ('hello')")?;
        Err(TestError::Failed)
    });
    assert!(matches!(result, Err(TestError::Failed)));
    assert_eq!(count(&session)?, 0);
    assert!(session.is_autocommit());
    Ok(())
}

#[test]
fn panic_rolls_back_and_propagates_unchanged() -> Result<(), Box<dyn std::error::Error>> {
    let session = setup()?;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        session.transaction(|s| -> Result<(), SqlSessionError> {
            s.exec("INSERT INTO test (name) VALUES ('hello')")?;
            panic!("omg!");
        })
    }));
    let payload = outcome.err().ok_or("expected a panic")?;
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"omg!"));
    assert_eq!(count(&session)?, 0);
    assert!(session.is_autocommit());
    Ok(())
}

#[test]
fn cancellation_interrupts_begin_exec_and_commit() -> Result<(), Box<dyn std::error::Error>> {
    let session = setup()?;
    session.exec("INSERT INTO test (name) VALUES ('before')")?;

    let tx = session.begin()?;
    session.exec("INSERT INTO test (name) VALUES ('inside')")?;

    session.interrupt_token().cancel();

    let err = session.begin().err().ok_or("begin should fail")?;
    assert!(err.is_interrupted());

    let err = session
        .exec("INSERT INTO test (name) VALUES ('after')")
        .err()
        .ok_or("exec should fail")?;
    assert_eq!(err.code(), Some(ErrorCode::OperationInterrupted));

    let err = tx.end::<(), SqlSessionError>(Ok(())).err().ok_or("commit should fail")?;
    assert!(err.is_interrupted());

    // The compensating rollback ran even though the token was cancelled.
    assert!(session.is_autocommit());

    // Level-triggered until a fresh token is installed.
    assert!(session.exec("SELECT 1").is_err());
    session.set_interrupt(CancellationToken::new());
    assert_eq!(count(&session)?, 1);
    Ok(())
}

#[test]
fn failed_commit_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::open_in_memory()?;
    session.exec(
        "PRAGMA foreign_keys=on;
         CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (pid INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED);",
    )?;

    let tx = session.begin()?;
    let work = session.exec("INSERT INTO child VALUES (42)").map(|_| ());
    assert!(work.is_ok());
    let err = tx.end(work).err().ok_or("commit should fail")?;
    assert_eq!(err.code(), Some(ErrorCode::ConstraintViolation));
    assert!(session.is_autocommit());

    let mut stmt = session.prepare("SELECT count(*) FROM child")?;
    let row = stmt.query(&[])?.next_row()?.unwrap_or_default();
    assert_eq!(row[0].as_int(), Some(0));
    Ok(())
}

#[test]
fn manual_commit_inside_scope_is_respected() -> Result<(), Box<dyn std::error::Error>> {
    let session = setup()?;
    session.transaction(|s| -> Result<(), SqlSessionError> {
        s.exec("INSERT INTO test (name) VALUES ('hello'); COMMIT;")?;
        Ok(())
    })?;
    assert_eq!(count(&session)?, 1);

    // Failure path after a manual commit: nothing left to roll back.
    let result: Result<(), TestError> = session.transaction(|s| {
        s.exec("INSERT INTO test (name) VALUES ('again'); COMMIT;")?;
        Err(TestError::Failed)
    });
    assert!(matches!(result, Err(TestError::Failed)));
    assert_eq!(count(&session)?, 2);
    Ok(())
}

#[test]
fn read_only_transaction_rejects_writes() -> Result<(), Box<dyn std::error::Error>> {
    let session = setup()?;
    session.exec("INSERT INTO test (name) VALUES ('seed')")?;

    let tx = session.begin_tx(TxOptions::read_only())?;
    assert_eq!(count(&session)?, 1);
    let write = session.exec("INSERT INTO test (name) VALUES ('nope')").map(|_| ());
    let err = write.as_ref().err().ok_or("write should fail")?;
    assert_eq!(err.code(), Some(ErrorCode::ReadOnly));
    assert!(tx.end(write).is_err());

    // A read-only "commit" also releases the snapshot and restores writability.
    let tx = session.begin_tx(TxOptions::read_only())?;
    tx.commit()?;
    assert!(session.is_autocommit());
    session.exec("INSERT INTO test (name) VALUES ('writable again')")?;
    assert_eq!(count(&session)?, 2);
    Ok(())
}

#[test]
fn only_default_and_serializable_isolation() -> Result<(), Box<dyn std::error::Error>> {
    let session = setup()?;
    for level in [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::WriteCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Snapshot,
        IsolationLevel::Linearizable,
    ] {
        let opts = TxOptions {
            isolation: level,
            read_only: false,
        };
        let err = session.begin_tx(opts).err().ok_or("isolation should be rejected")?;
        assert!(matches!(err, SqlSessionError::IsolationUnsupported(l) if l == level));
        assert!(session.is_autocommit());
    }

    let tx = session.begin_tx(TxOptions {
        isolation: IsolationLevel::Serializable,
        read_only: true,
    })?;
    tx.rollback()?;
    Ok(())
}

#[test]
fn begin_modes_take_matching_locks() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("modes.db").to_string_lossy().into_owned();
    let session = Session::open(SessionOptions::new(path.clone()))?;
    session.exec("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")?;
    let other = Session::open(SessionOptions::new(path).with_pragma("busy_timeout=0"))?;

    for (mode, holds_write_lock) in [
        (BeginMode::Plain, false),
        (BeginMode::Deferred, false),
        (BeginMode::Immediate, true),
        (BeginMode::Exclusive, true),
    ] {
        let tx = session.begin_with(mode)?;
        assert!(!session.is_autocommit());

        match other.exec("BEGIN IMMEDIATE") {
            Ok(_) => {
                assert!(!holds_write_lock, "{mode:?} should hold the write lock");
                other.exec("ROLLBACK")?;
            }
            Err(err) => {
                assert!(holds_write_lock, "{mode:?} should not lock at begin: {err}");
                assert_eq!(err.code(), Some(ErrorCode::DatabaseBusy));
                assert!(other.is_autocommit());
            }
        }
        tx.commit()?;
    }
    Ok(())
}
