use flock_core::db::{in_transaction, open_db_in_memory};
use flock_core::repo::SqliteOutboxRepository;
use flock_core::{
    AttendanceMatrixManager, CleanupConfig, CleanupHandler, CleanupState, EngineConfig,
    EngineError, EnrollmentManager, EnrollmentStatus, NewSession, NewTerm, PageRequest, Presence,
    SessionManager, SqliteEducationRepository, TermAggregateManager, TermCounter, TermId,
};
use rusqlite::Connection;
use uuid::Uuid;

const TENANT: Uuid = Uuid::from_u128(0xf10c);

fn repo(conn: &Connection) -> SqliteEducationRepository<'_> {
    SqliteEducationRepository::try_new(conn, TENANT).unwrap()
}

fn empty_term(conn: &Connection) -> TermId {
    term_with_sessions(conn, 0)
}

fn term_with_sessions(conn: &Connection, sessions: u32) -> TermId {
    let repo = repo(conn);
    let mut new_term = NewTerm::new(Uuid::new_v4(), 1);
    new_term.initial_sessions = sessions;
    TermAggregateManager::new(&repo)
        .create_term(&new_term, &EngineConfig::default())
        .unwrap()
        .id
}

fn assert_consistent(conn: &Connection, term_id: TermId) {
    let repo = repo(conn);
    let audit = TermAggregateManager::new(&repo).audit(term_id).unwrap();
    assert!(audit.is_consistent(), "term drifted: {audit:?}");
    assert_eq!(
        audit.session_numbers.len() as i64,
        audit.cached.number_of_sessions
    );
}

#[test]
fn scenario_create_three_sessions_then_delete_the_second() {
    let conn = open_db_in_memory().unwrap();
    let term_id = empty_term(&conn);
    let repo = repo(&conn);
    let manager = SessionManager::new(&repo, &EngineConfig::default());

    let created: Vec<_> = (0..3)
        .map(|_| {
            manager
                .create_session(term_id, &NewSession::default())
                .unwrap()
        })
        .collect();
    let numbers: Vec<i64> = created.iter().map(|session| session.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    manager.delete_session(created[1].id).unwrap();

    let remaining = manager
        .list_sessions(term_id, PageRequest::default())
        .unwrap();
    let numbers: Vec<i64> = remaining.items.iter().map(|session| session.number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(remaining.items[1].id, created[2].id);
    let term = TermAggregateManager::new(&repo).get_term(term_id).unwrap();
    assert_eq!(term.counters.number_of_sessions, 2);
    assert_consistent(&conn, term_id);
}

#[test]
fn scenario_enrollment_into_term_with_two_sessions() {
    let conn = open_db_in_memory().unwrap();
    let term_id = term_with_sessions(&conn, 2);
    let repo = repo(&conn);

    let enrollment = EnrollmentManager::new(&repo)
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();

    let cells = AttendanceMatrixManager::new(&repo)
        .list_enrollment_cells(enrollment.id)
        .unwrap();
    assert_eq!(cells.len(), 2);
    let counters = TermAggregateManager::new(&repo)
        .get_term(term_id)
        .unwrap()
        .counters;
    assert_eq!(counters.enrollment_count, 1);
    assert_eq!(counters.in_progress_count, 1);
    assert_consistent(&conn, term_id);
}

#[test]
fn scenario_presence_sequence_moves_tally() {
    let conn = open_db_in_memory().unwrap();
    let term_id = term_with_sessions(&conn, 1);
    let repo = repo(&conn);
    let enrollment = EnrollmentManager::new(&repo)
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();
    let matrix = AttendanceMatrixManager::new(&repo);
    let cell = matrix.list_enrollment_cells(enrollment.id).unwrap()[0].clone();
    assert_eq!(cell.presence, Presence::Unknown);

    let mut observed = vec![enrollment.attendance_count];
    for presence in [Presence::Present, Presence::Absent, Presence::Present] {
        matrix.set_presence(cell.id, presence).unwrap();
        observed.push(
            EnrollmentManager::new(&repo)
                .get_enrollment(enrollment.id)
                .unwrap()
                .attendance_count,
        );
    }

    assert_eq!(observed, vec![0, 1, 0, 1]);
    assert_consistent(&conn, term_id);
}

#[test]
fn scenario_cleanup_retries_after_failed_attempt() {
    let mut conn = open_db_in_memory().unwrap();
    let participant = Uuid::new_v4();
    let terms: Vec<TermId> = (0..3).map(|_| term_with_sessions(&conn, 2)).collect();
    {
        let repo = repo(&conn);
        let enrollments = EnrollmentManager::new(&repo);
        let matrix = AttendanceMatrixManager::new(&repo);
        for term_id in &terms {
            let enrollment = enrollments
                .create_enrollment(*term_id, participant, EnrollmentStatus::Completed, None)
                .unwrap();
            enrollments
                .create_enrollment(*term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
                .unwrap();
            let cell = matrix.list_enrollment_cells(enrollment.id).unwrap()[0].clone();
            matrix.set_presence(cell.id, Presence::Present).unwrap();
        }
    }
    let handler = CleanupHandler::new(CleanupConfig::default());
    let entry = handler
        .publish_participant_removed(&conn, TENANT, participant, 0)
        .unwrap();

    // The second term's delete fails; the first term's must roll back with it.
    conn.execute_batch(&format!(
        "CREATE TRIGGER fail_second_term
         BEFORE UPDATE ON enrollments
         WHEN NEW.term_id = '{}'
         BEGIN
             SELECT RAISE(ABORT, 'forced failure');
         END;",
        terms[1]
    ))
    .unwrap();

    let first = handler.process_due(&mut conn, 0).unwrap();
    assert_eq!(first.retried, 1);
    for term_id in &terms {
        let repo = repo(&conn);
        let counters = TermAggregateManager::new(&repo)
            .get_term(*term_id)
            .unwrap()
            .counters;
        assert_eq!(counters.enrollment_count, 2);
        assert_eq!(counters.completed_count, 1);
    }
    let outbox = SqliteOutboxRepository::try_new(&conn).unwrap();
    let retrying = outbox.find_entry(entry.message_id).unwrap().unwrap();
    assert_eq!(retrying.state, CleanupState::Retrying);
    assert_eq!(retrying.message.attempt, 2);

    conn.execute_batch("DROP TRIGGER fail_second_term;").unwrap();
    let second = handler
        .process_due(&mut conn, retrying.available_at)
        .unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(second.enrollments_removed, 3);

    let repo = repo(&conn);
    for term_id in &terms {
        let counters = TermAggregateManager::new(&repo)
            .get_term(*term_id)
            .unwrap()
            .counters;
        assert_eq!(counters.enrollment_count, 1);
        assert_eq!(counters.completed_count, 0);
        assert_eq!(counters.in_progress_count, 1);
        assert_consistent(&conn, *term_id);
    }
    let orphaned: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM attendance_cells c
             JOIN enrollments e ON e.id = c.enrollment_id
             WHERE c.is_deleted = 0
               AND (e.is_deleted = 1 OR e.participant_id = ?1);",
            [participant.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphaned, 0);
}

#[test]
fn numbering_stays_contiguous_across_mixed_operations() {
    let conn = open_db_in_memory().unwrap();
    let term_id = empty_term(&conn);
    let repo = repo(&conn);
    let sessions = SessionManager::new(&repo, &EngineConfig::default());
    let enrollments = EnrollmentManager::new(&repo);
    let matrix = AttendanceMatrixManager::new(&repo);

    enrollments
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();
    sessions
        .provision_sessions(term_id, 6, &NewSession::default())
        .unwrap();

    // Delete by position: first, middle, last, then append and delete again.
    let script: [Option<usize>; 8] = [
        Some(0),
        None,
        Some(2),
        Some(usize::MAX),
        None,
        None,
        Some(1),
        Some(0),
    ];
    for step in script {
        let live = sessions
            .list_sessions(term_id, PageRequest::default())
            .unwrap()
            .items;
        match step {
            None => {
                let created = sessions
                    .create_session(term_id, &NewSession::default())
                    .unwrap();
                assert_eq!(created.number, live.len() as i64 + 1);
                let enrollment_id = enrollments
                    .list_enrollments(term_id, Default::default(), PageRequest::default())
                    .unwrap()
                    .items[0]
                    .id;
                matrix
                    .mark_session(created.id, &[(enrollment_id, Presence::Present)])
                    .unwrap();
            }
            Some(position) => {
                let index = position.min(live.len() - 1);
                sessions.delete_session(live[index].id).unwrap();
            }
        }
        assert_consistent(&conn, term_id);
    }

    let term = TermAggregateManager::new(&repo).get_term(term_id).unwrap();
    assert_eq!(term.counters.number_of_sessions, 4);
}

#[test]
fn status_counters_always_sum_to_enrollment_count() {
    let conn = open_db_in_memory().unwrap();
    let term_id = term_with_sessions(&conn, 1);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);

    let mut ids = Vec::new();
    for status in [
        EnrollmentStatus::InProgress,
        EnrollmentStatus::Completed,
        EnrollmentStatus::Incomplete,
        EnrollmentStatus::InProgress,
    ] {
        ids.push(
            manager
                .create_enrollment(term_id, Uuid::new_v4(), status, None)
                .unwrap()
                .id,
        );
        assert_consistent(&conn, term_id);
    }
    manager
        .update_enrollment_status(ids[0], EnrollmentStatus::Completed)
        .unwrap();
    assert_consistent(&conn, term_id);
    manager
        .update_enrollment_status(ids[1], EnrollmentStatus::Incomplete)
        .unwrap();
    assert_consistent(&conn, term_id);
    manager.delete_enrollment(ids[2]).unwrap();
    assert_consistent(&conn, term_id);

    let counters = TermAggregateManager::new(&repo)
        .get_term(term_id)
        .unwrap()
        .counters;
    assert_eq!(counters.enrollment_count, 3);
    assert_eq!(counters.in_progress_count, 1);
    assert_eq!(counters.completed_count, 1);
    assert_eq!(counters.incomplete_count, 1);
}

#[test]
fn failed_operation_leaves_no_partial_writes() {
    let mut conn = open_db_in_memory().unwrap();
    let term_id = term_with_sessions(&conn, 2);
    let participant = Uuid::new_v4();

    let result: Result<(), EngineError> = in_transaction(&mut conn, |tx| {
        let repo = SqliteEducationRepository::try_new(tx, TENANT)?;
        EnrollmentManager::new(&repo).create_enrollment(
            term_id,
            participant,
            EnrollmentStatus::InProgress,
            None,
        )?;
        SessionManager::new(&repo, &EngineConfig::default())
            .create_session(term_id, &NewSession::default())?;
        TermAggregateManager::new(&repo)
            .increment(Uuid::new_v4(), TermCounter::IsDone, 1)
    });

    assert!(result.unwrap_err().is_invariant_violation());
    let repo = repo(&conn);
    let counters = TermAggregateManager::new(&repo)
        .get_term(term_id)
        .unwrap()
        .counters;
    assert_eq!(counters.enrollment_count, 0);
    assert_eq!(counters.number_of_sessions, 2);
    assert!(EnrollmentManager::new(&repo)
        .list_participant_enrollments(participant)
        .unwrap()
        .is_empty());
    assert_consistent(&conn, term_id);
}
