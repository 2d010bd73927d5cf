use chrono::{Duration, Utc};
use hcom::config::StalenessConfig;
use hcom::models::{
    Event, EventPayload, LifeAction, LifePayload, StatusPayload, StatusVal,
};
use hcom::registry::{fold_events, project_staleness};

fn life(id: i64, instance: &str, action: LifeAction, age_secs: i64) -> Event {
    Event {
        id,
        timestamp: Utc::now() - Duration::seconds(age_secs),
        instance: instance.into(),
        payload: EventPayload::Life(LifePayload {
            action,
            by: "test".into(),
            batch_id: None,
            reason: None,
            tag: None,
            tool: Some("claude".into()),
            parent_name: None,
            directory: None,
            session_id: None,
            launched: None,
        }),
    }
}

fn status(id: i64, instance: &str, val: StatusVal, age_secs: i64) -> Event {
    Event {
        id,
        timestamp: Utc::now() - Duration::seconds(age_secs),
        instance: instance.into(),
        payload: EventPayload::Status(StatusPayload {
            val,
            context: "test".into(),
            detail: None,
        }),
    }
}

#[test]
fn created_establishes_listening() {
    let events = vec![life(1, "nova", LifeAction::Created, 0)];
    let registry = fold_events(events.iter());
    let nova = &registry["nova"];
    assert_eq!(nova.status, StatusVal::Listening);
    assert_eq!(nova.status_context, "new");
    assert!(!nova.stopped);
}

#[test]
fn any_status_is_reachable_from_any_other() {
    let events = vec![
        life(1, "nova", LifeAction::Created, 100),
        status(2, "nova", StatusVal::Blocked, 90),
        status(3, "nova", StatusVal::Listening, 80),
        status(4, "nova", StatusVal::Active, 70),
        status(5, "nova", StatusVal::Blocked, 60),
    ];
    let registry = fold_events(events.iter());
    assert_eq!(registry["nova"].status, StatusVal::Blocked);
}

#[test]
fn stopped_is_terminal_even_against_a_racing_status_write() {
    let events = vec![
        life(1, "nova", LifeAction::Created, 100),
        status(2, "nova", StatusVal::Active, 90),
        life(3, "nova", LifeAction::Stopped, 80),
        // The final status flush lost the race with the stop; it must not
        // resurrect the instance.
        status(4, "nova", StatusVal::Listening, 79),
    ];
    let registry = fold_events(events.iter());
    assert!(registry["nova"].stopped);
    assert_eq!(registry["nova"].status, StatusVal::Active);
}

#[test]
fn name_is_reusable_after_stop() {
    let events = vec![
        life(1, "nova", LifeAction::Created, 100),
        life(2, "nova", LifeAction::Stopped, 90),
        life(3, "nova", LifeAction::Created, 10),
        status(4, "nova", StatusVal::Active, 5),
    ];
    let registry = fold_events(events.iter());
    let nova = &registry["nova"];
    assert!(!nova.stopped);
    assert_eq!(nova.status, StatusVal::Active);
}

#[test]
fn status_for_unregistered_name_is_ignored() {
    let events = vec![status(1, "ghost", StatusVal::Active, 0)];
    let registry = fold_events(events.iter());
    assert!(registry.is_empty());
}

#[test]
fn two_readers_of_the_same_prefix_agree() {
    let events = vec![
        life(1, "nova", LifeAction::Created, 100),
        life(2, "veki", LifeAction::Created, 100),
        status(3, "nova", StatusVal::Active, 50),
        status(4, "veki", StatusVal::Blocked, 40),
        life(5, "veki", LifeAction::Stopped, 30),
    ];
    let first = fold_events(events.iter());
    let second = fold_events(events.iter());
    assert_eq!(first, second);
}

#[test]
fn stale_listening_projects_inactive() {
    let staleness = StalenessConfig::default();
    let events = vec![
        life(1, "nova", LifeAction::Created, 500),
        status(2, "nova", StatusVal::Listening, 120), // past the 35s heartbeat window
        life(3, "veki", LifeAction::Created, 500),
        status(4, "veki", StatusVal::Listening, 5), // fresh
    ];
    let mut registry = fold_events(events.iter());
    project_staleness(&mut registry, Utc::now(), &staleness);
    assert_eq!(registry["nova"].status, StatusVal::Inactive);
    assert_eq!(registry["nova"].status_context, "stale:listening");
    assert_eq!(registry["veki"].status, StatusVal::Listening);
}

#[test]
fn active_uses_the_longer_window() {
    let staleness = StalenessConfig::default();
    let events = vec![
        life(1, "nova", LifeAction::Created, 500),
        status(2, "nova", StatusVal::Active, 120), // inside the 300s window
        life(3, "veki", LifeAction::Created, 500),
        status(4, "veki", StatusVal::Active, 400), // past it
    ];
    let mut registry = fold_events(events.iter());
    project_staleness(&mut registry, Utc::now(), &staleness);
    assert_eq!(registry["nova"].status, StatusVal::Active);
    assert_eq!(registry["veki"].status, StatusVal::Inactive);
}

#[test]
fn stopped_instances_are_not_projected() {
    let staleness = StalenessConfig::default();
    let events = vec![
        life(1, "nova", LifeAction::Created, 500),
        life(2, "nova", LifeAction::Stopped, 400),
    ];
    let mut registry = fold_events(events.iter());
    project_staleness(&mut registry, Utc::now(), &staleness);
    assert!(registry["nova"].stopped);
    assert_ne!(registry["nova"].status_context, "stale:listening");
}
