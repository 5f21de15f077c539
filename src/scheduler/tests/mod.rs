use super::*;
use chrono::Duration;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

#[test]
fn test_nothing_due_before_time() {
    let mut s = Scheduler::new();
    s.insert(JobId(1), t0() + Duration::seconds(10), ScheduleOrigin::User);

    assert!(s.pop_due(t0()).is_empty());
    assert!(s.pop_due(t0() + Duration::seconds(9)).is_empty());
    assert_eq!(s.len(), 1);
}

#[test]
fn test_due_exactly_at_time() {
    let mut s = Scheduler::new();
    let at = t0() + Duration::seconds(10);
    s.insert(JobId(1), at, ScheduleOrigin::Retry);

    let due = s.pop_due(at);
    assert_eq!(
        due,
        vec![DueEntry {
            id: JobId(1),
            at,
            origin: ScheduleOrigin::Retry
        }]
    );
    assert!(s.is_empty());
}

#[test]
fn test_pop_due_returns_earliest_first() {
    let mut s = Scheduler::new();
    s.insert(JobId(3), t0() + Duration::seconds(30), ScheduleOrigin::User);
    s.insert(JobId(1), t0() + Duration::seconds(10), ScheduleOrigin::User);
    s.insert(JobId(2), t0() + Duration::seconds(20), ScheduleOrigin::Retry);
    s.insert(JobId(4), t0() + Duration::seconds(99), ScheduleOrigin::User);

    let due = s.pop_due(t0() + Duration::seconds(30));
    let ids: Vec<JobId> = due.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);
    assert_eq!(s.len(), 1, "job 4 is not due yet");
}

#[test]
fn test_equal_times_keep_insertion_order() {
    let mut s = Scheduler::new();
    let at = t0();
    for id in [5, 2, 9] {
        s.insert(JobId(id), at, ScheduleOrigin::User);
    }

    let ids: Vec<u64> = s.pop_due(at).iter().map(|d| d.id.get()).collect();
    assert_eq!(ids, vec![5, 2, 9]);
}

#[test]
fn test_removed_job_never_fires() {
    let mut s = Scheduler::new();
    s.insert(JobId(1), t0() + Duration::seconds(10), ScheduleOrigin::User);

    assert!(s.remove(JobId(1)));
    assert!(s.pop_due(t0() + Duration::hours(1)).is_empty());
}

#[test]
fn test_remove_is_idempotent() {
    let mut s = Scheduler::new();
    s.insert(JobId(1), t0(), ScheduleOrigin::User);

    assert!(s.remove(JobId(1)));
    assert!(!s.remove(JobId(1)), "second removal reports absence");
    assert!(!s.remove(JobId(42)), "unknown job reports absence");
}

#[test]
fn test_reinsert_replaces_due_time() {
    let mut s = Scheduler::new();
    s.insert(JobId(1), t0() + Duration::seconds(5), ScheduleOrigin::User);
    s.insert(JobId(1), t0() + Duration::seconds(50), ScheduleOrigin::Retry);

    assert!(
        s.pop_due(t0() + Duration::seconds(10)).is_empty(),
        "the earlier heap entry is stale"
    );
    assert_eq!(s.due_at(JobId(1)), Some(t0() + Duration::seconds(50)));

    let due = s.pop_due(t0() + Duration::seconds(50));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].origin, ScheduleOrigin::Retry);
}

#[test]
fn test_remove_then_reinsert_fires_once() {
    let mut s = Scheduler::new();
    s.insert(JobId(1), t0(), ScheduleOrigin::User);
    s.remove(JobId(1));
    s.insert(JobId(1), t0(), ScheduleOrigin::User);

    assert_eq!(s.pop_due(t0()).len(), 1);
    assert!(s.pop_due(t0()).is_empty());
}

#[test]
fn test_next_due_skips_stale_entries() {
    let mut s = Scheduler::new();
    assert_eq!(s.next_due(), None);

    s.insert(JobId(1), t0() + Duration::seconds(1), ScheduleOrigin::User);
    s.insert(JobId(2), t0() + Duration::seconds(2), ScheduleOrigin::User);
    s.remove(JobId(1));

    assert_eq!(s.next_due(), Some(t0() + Duration::seconds(2)));
    assert!(s.contains(JobId(2)));
    assert!(!s.contains(JobId(1)));
}
