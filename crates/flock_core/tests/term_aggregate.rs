use flock_core::db::{in_transaction, open_db_in_memory};
use flock_core::repo::TermRepository;
use flock_core::{
    Conflict, EngineConfig, EngineError, EnrollmentManager, EnrollmentStatus, InvariantViolation,
    NewTerm, PageRequest, SessionManager, SqliteEducationRepository, TermAggregateManager,
    TermCounter, TermId, ValidationError,
};
use rusqlite::Connection;
use uuid::Uuid;

const TENANT: Uuid = Uuid::from_u128(0x7e4a);

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn repo(conn: &Connection) -> SqliteEducationRepository<'_> {
    SqliteEducationRepository::try_new(conn, TENANT).unwrap()
}

fn create_term(conn: &Connection, program_id: Uuid, term_number: i64, sessions: u32) -> TermId {
    let repo = repo(conn);
    let mut new_term = NewTerm::new(program_id, term_number);
    new_term.initial_sessions = sessions;
    TermAggregateManager::new(&repo)
        .create_term(&new_term, &EngineConfig::default())
        .unwrap()
        .id
}

#[test]
fn create_term_starts_with_zero_counters() {
    let conn = setup();
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);

    let term = manager
        .create_term(&NewTerm::new(Uuid::new_v4(), 1), &EngineConfig::default())
        .unwrap();

    assert_eq!(term.tenant_id, TENANT);
    assert_eq!(term.term_number, 1);
    for counter in TermCounter::ALL {
        assert_eq!(term.counters.get(counter), 0, "{counter:?}");
    }
}

#[test]
fn create_term_provisions_initial_sessions_numbered_from_one() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 4);
    let repo = repo(&conn);

    let term = TermAggregateManager::new(&repo).get_term(term_id).unwrap();
    assert_eq!(term.counters.number_of_sessions, 4);

    let sessions = SessionManager::new(&repo, &EngineConfig::default())
        .list_sessions(term_id, PageRequest::default())
        .unwrap();
    let numbers: Vec<i64> = sessions.items.iter().map(|session| session.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(sessions.total_count, 4);
}

#[test]
fn initial_sessions_over_capacity_leave_no_term_behind() {
    let mut conn = setup();
    let config = EngineConfig::from_json_str(r#"{"maxSessionsPerTerm": 2}"#).unwrap();
    let program_id = Uuid::new_v4();

    let result = in_transaction(&mut conn, |tx| {
        let repo = SqliteEducationRepository::try_new(tx, TENANT)?;
        let mut new_term = NewTerm::new(program_id, 1);
        new_term.initial_sessions = 3;
        TermAggregateManager::new(&repo).create_term(&new_term, &config)
    });

    assert!(matches!(
        result,
        Err(EngineError::Conflict(Conflict::CapacityExceeded { max_sessions: 2, .. }))
    ));
    let repo = repo(&conn);
    let terms = TermAggregateManager::new(&repo)
        .list_terms(program_id, PageRequest::default())
        .unwrap();
    assert_eq!(terms.total_count, 0);
}

#[test]
fn duplicate_live_term_number_is_a_conflict() {
    let conn = setup();
    let program_id = Uuid::new_v4();
    let first = create_term(&conn, program_id, 3, 0);
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);

    let err = manager
        .create_term(&NewTerm::new(program_id, 3), &EngineConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(Conflict::TermNumberTaken { term_number: 3, .. })
    ));

    manager.delete_term(first).unwrap();
    let reused = manager
        .create_term(&NewTerm::new(program_id, 3), &EngineConfig::default())
        .unwrap();
    assert_ne!(reused.id, first);
}

#[test]
fn create_term_validates_number_and_schedule() {
    let conn = setup();
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);

    let err = manager
        .create_term(&NewTerm::new(Uuid::new_v4(), 0), &EngineConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidTermNumber(0))
    ));

    let mut backwards = NewTerm::new(Uuid::new_v4(), 1);
    backwards.starts_on = Some(2_000);
    backwards.ends_on = Some(1_000);
    let err = manager
        .create_term(&backwards, &EngineConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidDateRange { .. })
    ));
}

#[test]
fn increment_and_decrement_move_one_counter() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 0);
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);

    manager
        .increment(term_id, TermCounter::EnrollmentCount, 3)
        .unwrap();
    manager
        .decrement(term_id, TermCounter::EnrollmentCount, 1)
        .unwrap();

    let term = manager.get_term(term_id).unwrap();
    assert_eq!(term.counters.enrollment_count, 2);
    assert_eq!(term.counters.in_progress_count, 0);
}

#[test]
fn counter_update_on_missing_term_is_invariant_violation() {
    let conn = setup();
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);
    let missing = Uuid::new_v4();

    let err = manager
        .increment(missing, TermCounter::NumberOfSessions, 1)
        .unwrap_err();
    assert!(err.is_invariant_violation());
    assert!(matches!(
        err,
        EngineError::InvariantViolation(InvariantViolation::TermNotFound {
            counter: TermCounter::NumberOfSessions,
            ..
        })
    ));
}

#[test]
fn counter_update_on_deleted_term_is_invariant_violation() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 0);
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);
    manager.delete_term(term_id).unwrap();

    let err = manager
        .increment(term_id, TermCounter::IsDone, 1)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvariantViolation(InvariantViolation::TermNotFound { .. })
    ));
}

#[test]
fn counter_from_another_tenant_is_not_touched() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 0);
    let other = SqliteEducationRepository::try_new(&conn, Uuid::new_v4()).unwrap();

    let err = TermAggregateManager::new(&other)
        .increment(term_id, TermCounter::EnrollmentCount, 1)
        .unwrap_err();
    assert!(err.is_invariant_violation());
    assert!(TermAggregateManager::new(&other)
        .get_term(term_id)
        .unwrap_err()
        .is_not_found());

    let repo = repo(&conn);
    let term = TermAggregateManager::new(&repo).get_term(term_id).unwrap();
    assert_eq!(term.counters.enrollment_count, 0);
}

#[test]
fn move_status_rebuckets_without_touching_enrollment_count() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 0);
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);
    manager
        .increment(term_id, TermCounter::EnrollmentCount, 1)
        .unwrap();
    manager.increment(term_id, TermCounter::InProgress, 1).unwrap();

    manager
        .move_status(term_id, EnrollmentStatus::InProgress, EnrollmentStatus::Completed)
        .unwrap();
    manager
        .move_status(term_id, EnrollmentStatus::Completed, EnrollmentStatus::Completed)
        .unwrap();

    let counters = manager.get_term(term_id).unwrap().counters;
    assert_eq!(counters.enrollment_count, 1);
    assert_eq!(counters.in_progress_count, 0);
    assert_eq!(counters.completed_count, 1);
}

#[test]
fn counters_never_go_negative() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 0);
    let repo = repo(&conn);

    let err = TermAggregateManager::new(&repo)
        .decrement(term_id, TermCounter::Completed, 1)
        .unwrap_err();
    assert!(matches!(err, EngineError::Repo(_)));
}

#[test]
fn update_schedule_rewrites_dates() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 0);
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);

    let term = manager
        .update_schedule(term_id, Some(1_000), Some(5_000))
        .unwrap();
    assert_eq!(term.starts_on, Some(1_000));
    assert_eq!(term.ends_on, Some(5_000));

    let err = manager
        .update_schedule(term_id, Some(5_000), Some(1_000))
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(manager
        .update_schedule(Uuid::new_v4(), None, None)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn list_terms_pages_by_term_number() {
    let conn = setup();
    let program_id = Uuid::new_v4();
    for number in [3, 1, 2] {
        create_term(&conn, program_id, number, 0);
    }
    create_term(&conn, Uuid::new_v4(), 1, 0);
    let repo = repo(&conn);
    let manager = TermAggregateManager::new(&repo);

    let all = manager
        .list_terms(program_id, PageRequest::default())
        .unwrap();
    let numbers: Vec<i64> = all.items.iter().map(|term| term.term_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let window = manager
        .list_terms(program_id, PageRequest::new(1, 1))
        .unwrap();
    assert_eq!(window.total_count, 3);
    assert_eq!(window.items.len(), 1);
    assert_eq!(window.items[0].term_number, 2);
}

#[test]
fn delete_term_cascades_to_children() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 2, 3);
    let repo = repo(&conn);
    let enrollment = EnrollmentManager::new(&repo)
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();

    let deleted = TermAggregateManager::new(&repo).delete_term(term_id).unwrap();
    assert_eq!(deleted.counters.number_of_sessions, 3);

    assert!(TermAggregateManager::new(&repo)
        .get_term(term_id)
        .unwrap_err()
        .is_not_found());
    let tombstone = repo.find_term(term_id, true).unwrap().unwrap();
    assert!(tombstone.is_deleted);
    assert!(EnrollmentManager::new(&repo)
        .get_enrollment(enrollment.id)
        .unwrap_err()
        .is_not_found());

    let live_rows: i64 = conn
        .query_row(
            "SELECT
                (SELECT COUNT(*) FROM sessions WHERE term_id = ?1 AND is_deleted = 0)
              + (SELECT COUNT(*) FROM enrollments WHERE term_id = ?1 AND is_deleted = 0)
              + (SELECT COUNT(*) FROM attendance_cells WHERE term_id = ?1 AND is_deleted = 0);",
            [term_id.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(live_rows, 0);
}

#[test]
fn audit_reports_consistent_term() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 2);
    let repo = repo(&conn);
    EnrollmentManager::new(&repo)
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::Completed, None)
        .unwrap();

    let audit = TermAggregateManager::new(&repo).audit(term_id).unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.cached, audit.live);
    assert_eq!(audit.session_numbers, vec![1, 2]);
}

#[test]
fn audit_detects_counter_drift_and_missing_cells() {
    let conn = setup();
    let term_id = create_term(&conn, Uuid::new_v4(), 1, 2);
    let repo = repo(&conn);
    EnrollmentManager::new(&repo)
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();

    conn.execute(
        "UPDATE terms SET enrollment_count = 4 WHERE id = ?1;",
        [term_id.to_string()],
    )
    .unwrap();
    conn.execute(
        "UPDATE attendance_cells
         SET is_deleted = 1
         WHERE cell_id = (SELECT MIN(cell_id) FROM attendance_cells WHERE term_id = ?1);",
        [term_id.to_string()],
    )
    .unwrap();

    let audit = TermAggregateManager::new(&repo).audit(term_id).unwrap();
    assert!(!audit.counters_match());
    assert_eq!(audit.drifted_counters(), vec![TermCounter::EnrollmentCount]);
    assert_eq!(audit.live.enrollment_count, 1);
    assert_eq!(audit.missing_cells.len(), 1);
    assert!(audit.numbering_contiguous());
    assert!(!audit.is_consistent());
}

#[test]
fn audit_flags_cells_that_point_outside_the_term() {
    let conn = setup();
    let term_a = create_term(&conn, Uuid::new_v4(), 1, 1);
    let term_b = create_term(&conn, Uuid::new_v4(), 1, 0);
    let repo = repo(&conn);
    let outsider = EnrollmentManager::new(&repo)
        .create_enrollment(term_b, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();
    conn.execute(
        "INSERT INTO attendance_cells (tenant_id, term_id, session_id, enrollment_id)
         SELECT tenant_id, term_id, id, ?1 FROM sessions WHERE term_id = ?2;",
        [outsider.id.to_string(), term_a.to_string()],
    )
    .unwrap();

    let audit = TermAggregateManager::new(&repo).audit(term_a).unwrap();

    assert_eq!(audit.stray_cells.len(), 1);
    assert_eq!(audit.stray_cells[0].1, outsider.id);
    assert!(audit.missing_cells.is_empty());
    assert!(!audit.is_consistent());
}
