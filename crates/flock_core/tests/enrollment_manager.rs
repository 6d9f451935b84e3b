use flock_core::db::open_db_in_memory;
use flock_core::{
    AttendanceMatrixManager, Conflict, EngineConfig, EngineError, EnrollmentFilter,
    EnrollmentManager, EnrollmentStatus, NewSession, NewTerm, PageRequest, Presence,
    SessionManager, SqliteEducationRepository, TermAggregateManager, TermCounters, TermId,
    ValidationError,
};
use rusqlite::Connection;
use uuid::Uuid;

const TENANT: Uuid = Uuid::from_u128(0xe1);

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn repo(conn: &Connection) -> SqliteEducationRepository<'_> {
    SqliteEducationRepository::try_new(conn, TENANT).unwrap()
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

fn counters(conn: &Connection, term_id: TermId) -> TermCounters {
    let repo = repo(conn);
    TermAggregateManager::new(&repo)
        .get_term(term_id)
        .unwrap()
        .counters
}

#[test]
fn create_enrollment_adds_cells_and_counters() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 3);
    let repo = repo(&conn);

    let enrollment = EnrollmentManager::new(&repo)
        .create_enrollment(
            term_id,
            Uuid::new_v4(),
            EnrollmentStatus::Completed,
            Some("  joined late  ".to_string()),
        )
        .unwrap();

    assert_eq!(enrollment.attendance_count, 0);
    assert_eq!(enrollment.note.as_deref(), Some("joined late"));
    let cells = AttendanceMatrixManager::new(&repo)
        .list_enrollment_cells(enrollment.id)
        .unwrap();
    assert_eq!(cells.len(), 3);

    let counters = counters(&conn, term_id);
    assert_eq!(counters.enrollment_count, 1);
    assert_eq!(counters.completed_count, 1);
    assert_eq!(counters.in_progress_count, 0);
    assert_eq!(counters.number_of_sessions, 3);
}

#[test]
fn duplicate_live_enrollment_is_rejected() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 1);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let participant = Uuid::new_v4();
    manager
        .create_enrollment(term_id, participant, EnrollmentStatus::InProgress, None)
        .unwrap();

    let err = manager
        .create_enrollment(term_id, participant, EnrollmentStatus::Completed, None)
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Conflict(Conflict::AlreadyEnrolled { participant_id, .. }) if participant_id == participant
    ));
    assert_eq!(counters(&conn, term_id).enrollment_count, 1);
}

#[test]
fn participant_can_reenroll_after_delete() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 2);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let participant = Uuid::new_v4();
    let first = manager
        .create_enrollment(term_id, participant, EnrollmentStatus::InProgress, None)
        .unwrap();
    manager.delete_enrollment(first.id).unwrap();

    let second = manager
        .create_enrollment(term_id, participant, EnrollmentStatus::InProgress, None)
        .unwrap();

    assert_ne!(first.id, second.id);
    let cells = AttendanceMatrixManager::new(&repo)
        .list_enrollment_cells(second.id)
        .unwrap();
    assert_eq!(cells.len(), 2);
    assert_eq!(counters(&conn, term_id).enrollment_count, 1);
}

#[test]
fn same_participant_may_join_several_terms() {
    let conn = setup();
    let first_term = term_with_sessions(&conn, 1);
    let second_term = term_with_sessions(&conn, 1);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let participant = Uuid::new_v4();

    manager
        .create_enrollment(first_term, participant, EnrollmentStatus::InProgress, None)
        .unwrap();
    manager
        .create_enrollment(second_term, participant, EnrollmentStatus::InProgress, None)
        .unwrap();

    let enrollments = manager.list_participant_enrollments(participant).unwrap();
    let terms: Vec<TermId> = enrollments.iter().map(|enrollment| enrollment.term_id).collect();
    assert_eq!(terms, vec![first_term, second_term]);
}

#[test]
fn create_enrollment_rejects_missing_term_and_long_note() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 0);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);

    let err = manager
        .create_enrollment(Uuid::new_v4(), Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap_err();
    assert!(err.is_not_found());

    let err = manager
        .create_enrollment(
            term_id,
            Uuid::new_v4(),
            EnrollmentStatus::InProgress,
            Some("x".repeat(1001)),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::NoteTooLong { chars: 1001 })
    ));
    assert_eq!(counters(&conn, term_id).enrollment_count, 0);
}

#[test]
fn status_update_rebuckets_counters() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 0);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let enrollment = manager
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();

    let updated = manager
        .update_enrollment_status(enrollment.id, EnrollmentStatus::Incomplete)
        .unwrap();
    assert_eq!(updated.status, EnrollmentStatus::Incomplete);

    let counters = counters(&conn, term_id);
    assert_eq!(counters.enrollment_count, 1);
    assert_eq!(counters.in_progress_count, 0);
    assert_eq!(counters.incomplete_count, 1);
    assert_eq!(counters.status_total(), counters.enrollment_count);
}

#[test]
fn same_status_update_changes_nothing() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 0);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let enrollment = manager
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::Completed, None)
        .unwrap();
    let before = counters(&conn, term_id);

    let unchanged = manager
        .update_enrollment_status(enrollment.id, EnrollmentStatus::Completed)
        .unwrap();

    assert_eq!(unchanged, enrollment);
    assert_eq!(counters(&conn, term_id), before);
}

#[test]
fn update_note_trims_and_clears() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 0);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let enrollment = manager
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();

    let noted = manager
        .update_enrollment_note(enrollment.id, Some(" needs a ride ".to_string()))
        .unwrap();
    assert_eq!(noted.note.as_deref(), Some("needs a ride"));

    let cleared = manager
        .update_enrollment_note(enrollment.id, Some("   ".to_string()))
        .unwrap();
    assert_eq!(cleared.note, None);
}

#[test]
fn delete_enrollment_cascades_to_cells_and_counters() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 2);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let keep = manager
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();
    let leaving = manager
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::Completed, None)
        .unwrap();
    let matrix = AttendanceMatrixManager::new(&repo);
    let cell = matrix.list_enrollment_cells(leaving.id).unwrap()[0].clone();
    matrix.set_presence(cell.id, Presence::Present).unwrap();

    let deleted = manager.delete_enrollment(leaving.id).unwrap();
    assert_eq!(deleted.attendance_count, 1);

    let counters = counters(&conn, term_id);
    assert_eq!(counters.enrollment_count, 1);
    assert_eq!(counters.completed_count, 0);
    assert_eq!(counters.in_progress_count, 1);
    assert_eq!(counters.number_of_sessions, 2);
    assert!(matrix.get_cell(cell.id).unwrap_err().is_not_found());
    assert_eq!(matrix.list_enrollment_cells(keep.id).unwrap().len(), 2);
    assert!(manager.get_enrollment(leaving.id).unwrap_err().is_not_found());
}

#[test]
fn delete_enrollment_twice_is_not_found() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 1);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let enrollment = manager
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();

    manager.delete_enrollment(enrollment.id).unwrap();
    let err = manager.delete_enrollment(enrollment.id).unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(counters(&conn, term_id).enrollment_count, 0);
}

#[test]
fn new_session_after_enrollment_gets_a_cell() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 0);
    let repo = repo(&conn);
    let enrollment = EnrollmentManager::new(&repo)
        .create_enrollment(term_id, Uuid::new_v4(), EnrollmentStatus::InProgress, None)
        .unwrap();
    let matrix = AttendanceMatrixManager::new(&repo);
    assert!(matrix.list_enrollment_cells(enrollment.id).unwrap().is_empty());

    SessionManager::new(&repo, &EngineConfig::default())
        .create_session(term_id, &NewSession::default())
        .unwrap();

    assert_eq!(matrix.list_enrollment_cells(enrollment.id).unwrap().len(), 1);
}

#[test]
fn list_enrollments_filters_by_status_and_pages() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 0);
    let repo = repo(&conn);
    let manager = EnrollmentManager::new(&repo);
    let statuses = [
        EnrollmentStatus::InProgress,
        EnrollmentStatus::Completed,
        EnrollmentStatus::InProgress,
        EnrollmentStatus::InProgress,
    ];
    let mut created = Vec::new();
    for status in statuses {
        created.push(
            manager
                .create_enrollment(term_id, Uuid::new_v4(), status, None)
                .unwrap(),
        );
    }

    let in_progress = manager
        .list_enrollments(
            term_id,
            EnrollmentFilter {
                status: Some(EnrollmentStatus::InProgress),
            },
            PageRequest::new(1, 1),
        )
        .unwrap();
    assert_eq!(in_progress.total_count, 3);
    assert_eq!(in_progress.items.len(), 1);
    assert_eq!(in_progress.items[0].id, created[2].id);

    let all = manager
        .list_enrollments(term_id, EnrollmentFilter::default(), PageRequest::default())
        .unwrap();
    let ids: Vec<Uuid> = all.items.iter().map(|enrollment| enrollment.id).collect();
    let expected: Vec<Uuid> = created.iter().map(|enrollment| enrollment.id).collect();
    assert_eq!(ids, expected);
}

#[test]
fn enrollments_are_invisible_to_other_tenants() {
    let conn = setup();
    let term_id = term_with_sessions(&conn, 1);
    let repo = repo(&conn);
    let participant = Uuid::new_v4();
    let enrollment = EnrollmentManager::new(&repo)
        .create_enrollment(term_id, participant, EnrollmentStatus::InProgress, None)
        .unwrap();
    let other = SqliteEducationRepository::try_new(&conn, Uuid::new_v4()).unwrap();
    let foreign = EnrollmentManager::new(&other);

    assert!(foreign.get_enrollment(enrollment.id).unwrap_err().is_not_found());
    assert!(foreign.delete_enrollment(enrollment.id).unwrap_err().is_not_found());
    assert!(foreign
        .list_participant_enrollments(participant)
        .unwrap()
        .is_empty());
    assert_eq!(counters(&conn, term_id).enrollment_count, 1);
}
