use super::*;
use std::collections::HashMap;

use crate::bus::{LocalBus, RowChange};
use crate::realtime::{NoteChange, NotesSynchronizer};
use crate::store::MemoryNoteStore;
use pretty_assertions::assert_eq;

const TABLE: &str = "notes";

fn user(id: &str) -> AuthUser {
    AuthUser::new(id, Some(format!("{id}@example.com"))).with_full_name(id.to_uppercase())
}

fn fixture_note(content: &str) -> Note {
    Note::new("owner", "Shared", content)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

struct Harness {
    bus: LocalBus,
    store: MemoryNoteStore,
    note: Note,
}

impl Harness {
    fn new(content: &str) -> Self {
        let note = fixture_note(content);
        Self {
            bus: LocalBus::default(),
            store: MemoryNoteStore::with_notes([note.clone()]),
            note,
        }
    }

    fn session(&self, user_id: Option<&str>) -> CollaborativeSession {
        CollaborativeSession::new(
            Arc::new(self.bus.clone()),
            Arc::new(self.store.clone()),
            user_id.map(user),
            Some(self.note.id),
        )
    }

    async fn connected(&self, user_id: &str) -> CollaborativeSession {
        let mut session = self.session(Some(user_id));
        session.connect().await.unwrap();
        session
    }

    /// Publish a row update as if `editor` had saved `content` one second later
    fn remote_save(&self, editor: &str, content: &str) -> Note {
        let mut remote = self.note.clone();
        remote.set_content(content);
        remote.updated_at = self.note.updated_at + chrono::Duration::seconds(1);
        remote.last_edited_by = Some(editor.to_string());
        self.bus.emit_row_change(&RowChange::update(
            TABLE,
            serde_json::to_value(&remote).unwrap(),
        ));
        remote
    }

    /// Replay the stored row the way a backend without `last_edited_by` would
    async fn echo_stored_row(&self) -> Note {
        let mut row = self.store.fetch_note(&self.note.id).await.unwrap().unwrap();
        row.last_edited_by = None;
        self.bus.emit_row_change(&RowChange::update(
            TABLE,
            serde_json::to_value(&row).unwrap(),
        ));
        row
    }

    async fn stored_content(&self, note_id: &NoteId) -> String {
        self.store.fetch_note(note_id).await.unwrap().unwrap().content
    }
}

fn editing_ids(session: &CollaborativeSession) -> Vec<String> {
    let mut ids = session
        .editing_users()
        .into_iter()
        .map(|user| user.id)
        .collect::<Vec<_>>();
    ids.sort();
    ids
}

#[tokio::test]
async fn connect_without_identity_or_note_stays_idle() {
    let harness = Harness::new("hello");

    let mut anonymous = harness.session(None);
    anonymous.connect().await.unwrap();
    anonymous.save_note_content("changed");
    anonymous.broadcast_user_typing().await;
    assert_eq!(anonymous.state(), SessionState::Idle);
    assert!(anonymous.add_comment("hi", CommentPosition { start: 0, end: 1 }).await.is_none());

    let mut no_note = CollaborativeSession::new(
        Arc::new(harness.bus.clone()),
        Arc::new(harness.store.clone()),
        Some(user("alice")),
        None,
    );
    no_note.connect().await.unwrap();
    assert_eq!(no_note.state(), SessionState::Idle);
    assert_eq!(harness.bus.member_count(&session_topic(&harness.note.id)), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_loads_note_and_becomes_active() {
    let harness = Harness::new("hello world");
    let alice = harness.connected("alice").await;
    settle().await;

    assert_eq!(alice.state(), SessionState::Active);
    assert_eq!(alice.content(), "hello world");
    assert_eq!(alice.note().unwrap().id, harness.note.id);
    assert!(!alice.has_unsaved_changes());
    assert_eq!(harness.bus.member_count(&session_topic(&harness.note.id)), 1);
}

#[tokio::test(start_paused = true)]
async fn participants_see_each_other_but_never_themselves() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    let bob = harness.connected("bob").await;
    settle().await;

    assert_eq!(editing_ids(&alice), vec!["bob".to_string()]);
    assert_eq!(editing_ids(&bob), vec!["alice".to_string()]);

    bob.broadcast_cursor_move(Some(CursorPosition::at(4))).await;
    bob.broadcast_user_typing().await;
    settle().await;

    let seen = alice.editing_users();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].cursor_position, Some(CursorPosition::at(4)));
    assert_eq!(seen[0].full_name.as_deref(), Some("BOB"));
    assert!(seen[0].is_typing);
    assert_eq!(editing_ids(&bob), vec!["alice".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_expires_without_follow_up() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    let bob = harness.connected("bob").await;
    settle().await;

    bob.broadcast_user_typing().await;
    settle().await;
    assert!(alice.editing_users()[0].is_typing);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    bob.broadcast_user_typing().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(alice.editing_users()[0].is_typing);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let seen = alice.editing_users();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].is_typing);
}

#[tokio::test(start_paused = true)]
async fn leaving_participant_is_dropped_from_roster() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    let mut bob = harness.connected("bob").await;
    settle().await;
    assert_eq!(alice.editing_users().len(), 1);

    bob.disconnect().await;
    settle().await;

    assert!(alice.editing_users().is_empty());
    assert_eq!(bob.state(), SessionState::TornDown);
    assert_eq!(harness.bus.member_count(&session_topic(&harness.note.id)), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_editing_clears_roster() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    let _bob = harness.connected("bob").await;
    settle().await;

    alice.start_editing();
    assert!(alice.is_editing());
    alice.stop_editing();
    assert!(!alice.is_editing());
    assert!(alice.editing_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_collapse_into_one_save() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;

    for content in ["hello w", "hello wo", "hello wor", "hello world"] {
        alice.save_note_content(content);
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    assert!(harness.store.updates().is_empty());
    assert!(alice.has_unsaved_changes());

    tokio::time::sleep(Duration::from_millis(800)).await;

    let updates = harness.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.content.as_deref(), Some("hello world"));
    assert_eq!(updates[0].1.last_edited_by.as_deref(), Some("alice"));
    assert!(!alice.has_unsaved_changes());
    assert!(alice.last_saved().is_some());
    assert_eq!(alice.error(), None);
}

#[tokio::test(start_paused = true)]
async fn unchanged_content_is_not_saved() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;

    alice.save_note_content("hello");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(harness.store.updates().is_empty());

    alice.save_note_content("hello!");
    tokio::time::sleep(Duration::from_millis(200)).await;
    alice.save_note_content("hello");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(harness.store.updates().is_empty());
    assert!(!alice.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn failed_save_sets_error_without_retry() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    harness.store.set_fail_writes(true);

    alice.save_note_content("hello again");
    tokio::time::sleep(Duration::from_millis(5000)).await;

    assert_eq!(harness.store.updates().len(), 1);
    assert_eq!(alice.error().as_deref(), Some(SAVE_FAILED_MESSAGE));
    assert!(alice.has_unsaved_changes());
    assert!(alice
        .notifications()
        .iter()
        .any(|notification| notification.kind == NotificationKind::Error));

    alice.clear_error();
    assert_eq!(alice.error(), None);
}

#[tokio::test(start_paused = true)]
async fn remote_update_replaces_clean_buffer() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    let _bob = harness.connected("bob").await;
    settle().await;

    harness.remote_save("bob", "hello from bob");
    settle().await;

    assert_eq!(alice.content(), "hello from bob");
    assert!(alice.conflicts().is_empty());
    let notifications = alice.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::RemoteUpdate);
    assert_eq!(notifications[0].message, "BOB updated this note");
}

#[tokio::test(start_paused = true)]
async fn own_echo_and_stale_rows_are_ignored() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    harness.remote_save("alice", "echo");
    settle().await;
    assert_eq!(alice.content(), "hello");

    let mut stale = harness.note.clone();
    stale.set_content("ancient");
    stale.updated_at = harness.note.updated_at - chrono::Duration::seconds(30);
    stale.last_edited_by = Some("bob".to_string());
    harness.bus.emit_row_change(&RowChange::update(
        TABLE,
        serde_json::to_value(&stale).unwrap(),
    ));
    settle().await;

    assert_eq!(alice.content(), "hello");
    assert!(alice.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_events_are_skipped() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    harness.bus.emit_row_change(&RowChange::update(
        TABLE,
        serde_json::json!({ "id": harness.note.id.to_string(), "content": 42 }),
    ));
    settle().await;

    assert_eq!(alice.content(), "hello");
    assert_eq!(alice.state(), SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn remote_update_during_unsaved_edit_raises_conflict() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    alice.save_note_content("hello local");
    harness.remote_save("bob", "hello remote");
    settle().await;

    assert_eq!(alice.content(), "hello local");
    let conflicts = alice.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].field, ConflictField::Content);
    assert_eq!(conflicts[0].local_value, "hello local");
    assert_eq!(conflicts[0].remote_value, "hello remote");
    assert_eq!(conflicts[0].remote_user.id, "bob");
    assert!(alice
        .notifications()
        .iter()
        .any(|notification| notification.kind == NotificationKind::Conflict));
}

#[tokio::test(start_paused = true)]
async fn resolving_with_remote_discards_pending_save() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    alice.save_note_content("hello local");
    harness.remote_save("bob", "hello remote");
    settle().await;
    let conflict_id = alice.conflicts()[0].id.clone();

    let resolved = alice.resolve_conflict(&conflict_id, ConflictResolution::Remote);
    assert_eq!(resolved.as_deref(), Some("hello remote"));
    assert_eq!(alice.content(), "hello remote");
    assert!(alice.conflicts().is_empty());
    assert!(!alice.has_unsaved_changes());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(harness.store.updates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resolving_with_merge_saves_both_versions() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    alice.save_note_content("local");
    harness.remote_save("bob", "remote");
    settle().await;
    let conflict_id = alice.conflicts()[0].id.clone();

    let merged = alice
        .resolve_conflict(&conflict_id, ConflictResolution::Merge)
        .unwrap();
    assert_eq!(merged, "local\n\n---\n\nremote");
    assert_eq!(alice.content(), merged);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let updates = harness.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.content.as_deref(), Some(merged.as_str()));
}

#[tokio::test(start_paused = true)]
async fn resolving_with_local_keeps_buffer_and_unknown_ids_are_rejected() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    alice.save_note_content("mine");
    harness.remote_save("bob", "theirs");
    settle().await;
    let conflict_id = alice.conflicts()[0].id.clone();

    assert_eq!(
        alice.resolve_conflict("missing", ConflictResolution::Local),
        None
    );
    assert_eq!(
        alice.resolve_conflict(&conflict_id, ConflictResolution::Local).as_deref(),
        Some("mine")
    );
    assert!(alice.conflicts().is_empty());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let updates = harness.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.content.as_deref(), Some("mine"));
}

#[tokio::test(start_paused = true)]
async fn comments_are_shared_and_managed_locally() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    let bob = harness.connected("bob").await;
    settle().await;

    let comment = alice
        .add_comment("typo here", CommentPosition { start: 0, end: 5 })
        .await
        .unwrap();
    settle().await;

    let received = bob.comments();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, comment.id);
    assert_eq!(received[0].author.id, "alice");
    assert!(bob
        .notifications()
        .iter()
        .any(|notification| notification.kind == NotificationKind::Comment));

    let reply = bob.reply_to_comment(&comment.id, "fixed").unwrap();
    assert_eq!(reply.position, comment.position);
    assert_eq!(bob.comments()[0].replies.len(), 1);

    assert!(bob.resolve_comment(&comment.id));
    assert!(bob.comments()[0].resolved);
    assert!(bob.delete_comment(&comment.id));
    assert!(!bob.delete_comment(&comment.id));
    assert_eq!(alice.comments().len(), 1);
}

#[tokio::test]
async fn notifications_can_be_read_and_cleared() {
    let harness = Harness::new("hello");
    let alice = harness.session(Some("alice"));

    let first = alice.add_notification(NotificationKind::Info, "One", "first");
    let second = alice.add_notification(NotificationKind::Success, "Two", "second");
    assert_eq!(alice.unread_count(), 2);

    assert!(alice.mark_notification_read(&first.id));
    assert_eq!(alice.unread_count(), 1);

    assert!(alice.clear_notification(&second.id));
    assert!(!alice.clear_notification(&second.id));
    assert_eq!(alice.notifications().len(), 1);

    alice.clear_all_notifications();
    assert!(alice.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_save() {
    let harness = Harness::new("hello");
    let mut alice = harness.connected("alice").await;

    alice.save_note_content("never saved");
    alice.disconnect().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(harness.store.updates().is_empty());
    assert_eq!(alice.state(), SessionState::TornDown);
    assert_eq!(harness.bus.member_count(&session_topic(&harness.note.id)), 0);
}

#[tokio::test(start_paused = true)]
async fn switch_note_reconnects_with_fresh_state() {
    let harness = Harness::new("hello");
    let other = fixture_note("other note");
    harness.store.insert_note(&other).await.unwrap();

    let mut alice = harness.connected("alice").await;
    alice.add_notification(NotificationKind::Info, "Stale", "from first note");
    settle().await;

    alice.switch_note(Some(other.id)).await.unwrap();
    settle().await;

    assert_eq!(alice.note_id(), Some(other.id));
    assert_eq!(alice.content(), "other note");
    assert_eq!(alice.state(), SessionState::Active);
    assert!(alice.notifications().is_empty());
    assert_eq!(harness.bus.member_count(&session_topic(&harness.note.id)), 0);
    assert_eq!(harness.bus.member_count(&session_topic(&other.id)), 1);

    alice.switch_note(None).await.unwrap();
    assert_eq!(alice.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn presence_sync_drops_members_missing_from_snapshot() {
    let note_id = NoteId::new();
    let mut inner = SessionInner::new("me".to_string(), Some(note_id), WriteLedger::new());
    let member = |id: &str| PresenceInfo::new(&UserInfo::anonymous(id), Some(note_id));

    inner.apply_presence_state(&HashMap::from([
        ("k1".to_string(), vec![member("alice")]),
        ("k2".to_string(), vec![member("bob")]),
        ("k3".to_string(), vec![member("me")]),
    ]));
    assert_eq!(inner.roster.snapshot(Instant::now(), "me").len(), 2);

    inner.apply_presence_state(&HashMap::from([("k1".to_string(), vec![member("alice")])]));
    let users = inner.roster.snapshot(Instant::now(), "me");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, "alice");
}

#[tokio::test(start_paused = true)]
async fn echo_of_own_save_is_recognized_without_editor_column() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    alice.save_note_content("first draft");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!alice.has_unsaved_changes());

    alice.save_note_content("second draft");
    harness.echo_stored_row().await;
    settle().await;

    assert_eq!(alice.content(), "second draft");
    assert!(alice.conflicts().is_empty());
    assert!(alice.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shared_ledger_silences_synchronizer_for_own_saves() {
    let harness = Harness::new("hello");
    let ledger = WriteLedger::new();
    let mut owner = harness.session(Some("owner")).with_ledger(ledger.clone());
    owner.connect().await.unwrap();

    let owner_id = Some("owner".to_string());
    let mut sync =
        NotesSynchronizer::new(Arc::new(harness.bus.clone()), owner_id).with_ledger(ledger);
    sync.load(&harness.store).await.unwrap();
    sync.start().await.unwrap();
    let mut notices = sync.subscribe_notices();

    owner.save_note_content("saved by owner");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    harness.echo_stored_row().await;
    settle().await;

    assert_eq!(sync.notes()[0].content, "saved by owner");
    assert!(notices.try_recv().is_err());

    harness.remote_save("bob", "changed by bob");
    settle().await;
    assert_eq!(notices.try_recv().unwrap().change, NoteChange::Updated);
}

#[tokio::test(start_paused = true)]
async fn dismissing_conflict_keeps_buffer_and_pending_save() {
    let harness = Harness::new("hello");
    let alice = harness.connected("alice").await;
    settle().await;

    alice.save_note_content("mine");
    harness.remote_save("bob", "theirs");
    settle().await;
    let conflict_id = alice.conflicts()[0].id.clone();

    assert!(alice.dismiss_conflict(&conflict_id));
    assert!(!alice.dismiss_conflict(&conflict_id));
    assert!(alice.conflicts().is_empty());
    assert_eq!(alice.content(), "mine");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(harness.stored_content(&harness.note.id).await, "mine");
}

#[tokio::test(start_paused = true)]
async fn save_in_flight_during_switch_stays_with_its_note() {
    let harness = Harness::new("hello");
    let other = fixture_note("other note");
    harness.store.insert_note(&other).await.unwrap();
    harness.store.set_write_latency(Duration::from_millis(500));

    let mut alice = harness.connected("alice").await;
    alice.save_note_content("hello edited");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    alice.switch_note(Some(other.id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(alice.note_id(), Some(other.id));
    assert_eq!(alice.note().unwrap().id, other.id);
    assert_eq!(alice.content(), "other note");
    assert_eq!(alice.last_saved(), None);
    assert!(!alice.has_unsaved_changes());
    assert_eq!(harness.stored_content(&harness.note.id).await, "hello edited");
}

#[tokio::test(start_paused = true)]
async fn failed_save_in_flight_during_switch_leaves_next_note_clean() {
    let harness = Harness::new("hello");
    let other = fixture_note("other note");
    harness.store.insert_note(&other).await.unwrap();
    harness.store.set_write_latency(Duration::from_millis(500));

    let mut alice = harness.connected("alice").await;
    harness.store.set_fail_writes(true);
    alice.save_note_content("hello edited");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    alice.switch_note(Some(other.id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(alice.error(), None);
    assert!(alice.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn revert_while_save_in_flight_is_saved_again() {
    let harness = Harness::new("hello");
    harness.store.set_write_latency(Duration::from_millis(500));
    let alice = harness.connected("alice").await;

    alice.save_note_content("hello!");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    alice.save_note_content("hello");
    tokio::time::sleep(Duration::from_millis(3000)).await;

    assert_eq!(alice.content(), "hello");
    assert_eq!(harness.stored_content(&harness.note.id).await, "hello");
    assert!(!alice.has_unsaved_changes());
    assert_eq!(harness.store.updates().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn resolving_with_remote_during_in_flight_save_writes_remote_back() {
    let harness = Harness::new("hello");
    harness.store.set_write_latency(Duration::from_millis(500));
    let alice = harness.connected("alice").await;
    settle().await;

    alice.save_note_content("hello local");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    harness.remote_save("bob", "hello remote");
    settle().await;
    let conflict_id = alice.conflicts()[0].id.clone();

    let resolved = alice.resolve_conflict(&conflict_id, ConflictResolution::Remote);
    assert_eq!(resolved.as_deref(), Some("hello remote"));
    tokio::time::sleep(Duration::from_millis(3000)).await;

    assert_eq!(alice.content(), "hello remote");
    assert_eq!(harness.stored_content(&harness.note.id).await, "hello remote");
    assert!(!alice.has_unsaved_changes());
}
