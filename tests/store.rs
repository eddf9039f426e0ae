//! Library-level scenarios over isolated temp roots: snapshot monotonicity,
//! rehydrate recovery, delivery-guard exhaustion, malformed tolerance and
//! the idempotence laws.

use serde_json::{Map, json};
use teamchat::core::{AgentId, Envelope, MessageId, MessageType, TaskId, Timestamp};
use teamchat::service::{SendStatus, Service};
use teamchat::store::index::{MessageLocator, ShardedIndex};
use teamchat::store::{snapshot, TeamStore};
use teamchat::TeamId;

fn world() -> (tempfile::TempDir, Service) {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = Service::new(dir.path());
    service
        .init("demo", &["lead".into(), "dev".into(), "qa".into()])
        .expect("init");
    (dir, service)
}

fn store(dir: &tempfile::TempDir) -> TeamStore {
    TeamStore::open(dir.path(), TeamId::parse("demo").unwrap())
}

fn task_update(id: &str, created_at: &str, status: &str) -> Envelope {
    let mut payload = Map::new();
    payload.insert("status".to_string(), json!(status));
    let mut env = Envelope::new(
        MessageType::TaskUpdate,
        AgentId::parse("dev").unwrap(),
        AgentId::parse("lead").unwrap(),
        payload,
    );
    env.id = MessageId::parse(id).unwrap();
    env.created_at = Timestamp::parse(created_at).unwrap();
    env.task_id = Some(TaskId::parse("task_7").unwrap());
    env
}

#[test]
fn snapshot_is_monotonic_regardless_of_delivery_order() {
    let (dir, service) = world();

    // u2 (later key) arrives first; u1 must not roll the snapshot back.
    let u2 = task_update("u2", "2025-01-01T00:00:02Z", "done");
    let u1 = task_update("u1", "2025-01-01T00:00:01Z", "in_progress");
    service.send("demo", u2).unwrap();
    service.send("demo", u1).unwrap();

    let snap = snapshot::read(&store(&dir), &TaskId::parse("task_7").unwrap()).unwrap();
    assert_eq!(snap.last_message_id, "u2");
    assert_eq!(snap.status, "done");

    // Replay through rehydrate converges on the same terminal state.
    let report = service.rehydrate("demo").unwrap();
    assert_eq!(report.task_count, 1);
    let snap = snapshot::read(&store(&dir), &TaskId::parse("task_7").unwrap()).unwrap();
    assert_eq!(snap.last_message_id, "u2");
    assert_eq!(snap.status, "done");
}

#[test]
fn rehydrate_recovers_deleted_index_shards() {
    let (dir, service) = world();

    for i in 0..5 {
        let mut env = Envelope::new(
            MessageType::IdleNotification,
            AgentId::parse("lead").unwrap(),
            AgentId::parse("dev").unwrap(),
            Map::new(),
        );
        env.id = MessageId::parse(format!("msg_{i}")).unwrap();
        service.send("demo", env).unwrap();
    }
    service.ack("demo", "dev", "msg_1").unwrap();

    let before = service.read("demo", "dev", true, 0, None).unwrap();
    let before_ids: Vec<String> = before
        .messages
        .iter()
        .map(|m| m.id.as_str().to_string())
        .collect();

    std::fs::remove_dir_all(store(&dir).message_shards_dir()).unwrap();

    let report = service.rehydrate("demo").unwrap();
    assert_eq!(report.message_count, 5);
    assert_eq!(report.ack_count, 1);

    let after = service.read("demo", "dev", true, 0, None).unwrap();
    let after_ids: Vec<String> = after
        .messages
        .iter()
        .map(|m| m.id.as_str().to_string())
        .collect();
    assert_eq!(before_ids, after_ids);

    // Invariant: index covers exactly the inbox records.
    let index = ShardedIndex::messages(&store(&dir))
        .scan_all::<MessageLocator>()
        .unwrap();
    assert_eq!(index.len(), 5);
    for i in 0..5 {
        assert!(index.contains_key(&format!("msg_{i}")));
    }
}

#[test]
fn rehydrate_twice_is_idempotent_on_stable_inputs() {
    let (dir, service) = world();

    service
        .task_assign("demo", "lead", "dev", "task_1", "Impl", None, Some("tr_1"), false)
        .unwrap();
    service
        .task_update("demo", "dev", "lead", "task_1", "blocked", Some("waiting"), Some("tr_1"))
        .unwrap();

    service.rehydrate("demo").unwrap();
    let first_index = ShardedIndex::messages(&store(&dir))
        .scan_all::<MessageLocator>()
        .unwrap();
    let first_snapshot =
        std::fs::read_to_string(store(&dir).task_path(&TaskId::parse("task_1").unwrap())).unwrap();

    service.rehydrate("demo").unwrap();
    let second_index = ShardedIndex::messages(&store(&dir))
        .scan_all::<MessageLocator>()
        .unwrap();
    let second_snapshot =
        std::fs::read_to_string(store(&dir).task_path(&TaskId::parse("task_1").unwrap())).unwrap();

    assert_eq!(first_index, second_index);
    assert_eq!(first_snapshot, second_snapshot);
}

#[test]
fn ack_twice_is_idempotent() {
    let (dir, service) = world();

    let mut env = Envelope::new(
        MessageType::Handoff,
        AgentId::parse("lead").unwrap(),
        AgentId::parse("dev").unwrap(),
        Map::new(),
    );
    env.id = MessageId::parse("msg_a").unwrap();
    service.send("demo", env).unwrap();

    let first = service.ack("demo", "dev", "msg_a").unwrap();
    assert!(!first.already_acked);
    let second = service.ack("demo", "dev", "msg_a").unwrap();
    assert!(second.already_acked);

    // Exactly one acked event exists.
    let events = teamchat::store::events::read_all(&store(&dir)).unwrap();
    let acked = events
        .iter()
        .filter(|e| e.kind == teamchat::EventKind::Acked)
        .count();
    assert_eq!(acked, 1);
}

#[test]
fn ack_by_wrong_recipient_is_rejected() {
    let (dir, service) = world();

    let mut env = Envelope::new(
        MessageType::Handoff,
        AgentId::parse("lead").unwrap(),
        AgentId::parse("dev").unwrap(),
        Map::new(),
    );
    env.id = MessageId::parse("msg_b").unwrap();
    service.send("demo", env).unwrap();

    let err = service.ack("demo", "qa", "msg_b").unwrap_err();
    assert!(err.to_string().contains("addressed to"));
    assert_eq!(err.exit_code(), 1);

    let events = teamchat::store::events::read_all(&store(&dir)).unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.kind == teamchat::EventKind::AckRejected)
    );
}

#[test]
fn require_ack_dead_letters_after_exhaustion() {
    let (dir, service) = world();

    let mut env = Envelope::new(
        MessageType::DecisionRequired,
        AgentId::parse("lead").unwrap(),
        AgentId::parse("dev").unwrap(),
        Map::new(),
    );
    env.id = MessageId::parse("msg_urgent").unwrap();
    env.require_ack = true;
    env.trace_id = Some("tr_dl".to_string());
    service.send("demo", env).unwrap();

    let sent_at = Timestamp::now().unix_seconds();

    // Due but inside the timeout: each tick enqueues one nudge.
    let tick1 = service
        .tick("demo", Timestamp::from_unix(sent_at + 31))
        .unwrap();
    assert_eq!(tick1.retried, vec!["msg_urgent".to_string()]);
    assert!(tick1.dead_lettered.is_empty());

    let tick2 = service
        .tick("demo", Timestamp::from_unix(sent_at + 95))
        .unwrap();
    assert_eq!(tick2.retried, vec!["msg_urgent".to_string()]);

    // Reminders landed in the recipient inbox as ack_reminder envelopes.
    let inbox = service.read("demo", "dev", false, 0, None).unwrap();
    let reminders = inbox
        .messages
        .iter()
        .filter(|m| m.kind == MessageType::AckReminder)
        .count();
    assert_eq!(reminders, 2);

    // Past the ack timeout: terminal transition, exactly once.
    let tick3 = service
        .tick("demo", Timestamp::from_unix(sent_at + 700))
        .unwrap();
    assert_eq!(tick3.dead_lettered, vec!["msg_urgent".to_string()]);
    assert_eq!(tick3.pending, 0);

    let letters = teamchat::store::dead_letter::read_all(&store(&dir)).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].original_envelope.id.as_str(), "msg_urgent");
    assert_eq!(letters[0].attempts, 2);

    // No further retries after the terminal state.
    let tick4 = service
        .tick("demo", Timestamp::from_unix(sent_at + 5_000))
        .unwrap();
    assert!(tick4.retried.is_empty());
    assert!(tick4.dead_lettered.is_empty());
}

#[test]
fn acked_delivery_never_retries() {
    let (_dir, service) = world();

    let mut env = Envelope::new(
        MessageType::TaskAssign,
        AgentId::parse("lead").unwrap(),
        AgentId::parse("dev").unwrap(),
        Map::new(),
    );
    env.id = MessageId::parse("msg_ok").unwrap();
    env.task_id = Some(TaskId::parse("task_9").unwrap());
    env.require_ack = true;
    service.send("demo", env).unwrap();
    let sent_at = Timestamp::now().unix_seconds();

    service.ack("demo", "dev", "msg_ok").unwrap();

    let tick = service
        .tick("demo", Timestamp::from_unix(sent_at + 1_000))
        .unwrap();
    assert!(tick.retried.is_empty());
    assert!(tick.dead_lettered.is_empty());
    assert_eq!(tick.pending, 0);
}

#[test]
fn truncated_tail_line_is_skipped_and_diagnosed() {
    let (dir, service) = world();

    let mut env = Envelope::new(
        MessageType::IdleNotification,
        AgentId::parse("lead").unwrap(),
        AgentId::parse("dev").unwrap(),
        Map::new(),
    );
    env.id = MessageId::parse("msg_whole").unwrap();
    service.send("demo", env).unwrap();

    // Simulate a crash mid-append: garbage tail without a newline.
    let inbox_path = store(&dir).inbox_path(&AgentId::parse("dev").unwrap());
    let mut body = std::fs::read(&inbox_path).unwrap();
    body.extend_from_slice(b"{\"id\":\"msg_torn\",\"type\":\"hand");
    std::fs::write(&inbox_path, body).unwrap();

    let report = service.read("demo", "dev", false, 0, None).unwrap();
    assert_eq!(report.count, 1);
    assert_eq!(report.messages[0].id.as_str(), "msg_whole");

    let status = service.status("demo").unwrap();
    assert_eq!(status.message_total, 1);

    let doctor = service.doctor_check("demo").unwrap();
    assert_eq!(doctor.malformed_count, 1);
    assert!(doctor.ok, "issues: {:?}", doctor.issues);

    // The fingerprint is persisted once, not inflated by re-reads.
    service.doctor_check("demo").unwrap();
    let index = teamchat::store::diagnostics::load(&store(&dir));
    assert_eq!(index.len(), 1);
    assert_eq!(index.values().next().unwrap().count, 1);
}

#[test]
fn send_to_unknown_team_is_a_bootstrap_error() {
    let dir = tempfile::tempdir().unwrap();
    let service = Service::new(dir.path());
    let env = Envelope::new(
        MessageType::Handoff,
        AgentId::parse("a").unwrap(),
        AgentId::parse("b").unwrap(),
        Map::new(),
    );
    let err = service.send("ghosts", env).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn cooldown_suppresses_second_send_and_logs_event() {
    let (dir, service) = world();

    for i in 0..2 {
        let mut env = Envelope::new(
            MessageType::IdleNotification,
            AgentId::parse("lead").unwrap(),
            AgentId::parse("dev").unwrap(),
            Map::new(),
        );
        env.id = MessageId::parse(format!("msg_cd_{i}")).unwrap();
        env.cooldown_key = Some("k".to_string());
        env.cooldown_seconds = Some(60);
        let report = service.send("demo", env).unwrap();
        if i == 0 {
            assert!(matches!(report.status, SendStatus::Sent));
        } else {
            assert!(matches!(report.status, SendStatus::Suppressed));
            assert!(report.cooldown_remaining_seconds.unwrap_or(0) > 0);
        }
    }

    let inbox = service.read("demo", "dev", false, 0, None).unwrap();
    assert_eq!(inbox.count, 1);

    let events = teamchat::store::events::read_all(&store(&dir)).unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.kind == teamchat::EventKind::NudgeSuppressed)
    );
}
