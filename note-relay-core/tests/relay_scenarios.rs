use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use note_relay_core::config::{FailurePolicy, NoteView, RelayConfig};
use note_relay_core::contract::{
    CreatedNote, DriveFile, DriveFolder, MockContentStore, MockMessenger, MockNoteEndpoint,
    NewDriveFile, NewNote, Visibility,
};
use note_relay_core::error::RelayError;
use note_relay_core::message::{
    Command, ForwardOrigin, InboundMessage, MediaFile, MessageKind, PhotoSize,
};
use note_relay_core::relay::{InboundStream, Relay, HELP_TEXT};
use tokio::sync::mpsc;

const FOOTER: &str = "#relayed";

fn config(policy: FailurePolicy) -> RelayConfig {
    RelayConfig {
        upload_folder: "telegram".into(),
        view: NoteView {
            visibility: Visibility::Home,
            local_only: false,
        },
        footer: FOOTER.into(),
        failure_policy: policy,
    }
}

fn base(message_id: i32, caption: Option<&str>, kind: MessageKind) -> InboundMessage {
    InboundMessage {
        message_id,
        chat_id: 42,
        sender_id: Some(7),
        date: Utc::now(),
        caption: caption.map(str::to_string),
        forwarded_from: None,
        kind,
    }
}

/// A photo offered in three sizes; the full-size one is `<file>`.
fn photo(message_id: i32, file: &str, caption: &str) -> InboundMessage {
    let sizes = vec![
        PhotoSize {
            file_id: format!("{file}-thumb"),
            width: 90,
            height: 67,
        },
        PhotoSize {
            file_id: format!("{file}-medium"),
            width: 320,
            height: 240,
        },
        PhotoSize {
            file_id: file.to_string(),
            width: 1280,
            height: 960,
        },
    ];
    let caption = (!caption.is_empty()).then_some(caption);
    base(message_id, caption, MessageKind::Photo(sizes))
}

fn video(message_id: i32, file: &str, caption: &str) -> InboundMessage {
    let caption = (!caption.is_empty()).then_some(caption);
    base(
        message_id,
        caption,
        MessageKind::Video(MediaFile {
            file_id: file.to_string(),
        }),
    )
}

fn text(message_id: i32, body: &str) -> InboundMessage {
    base(message_id, None, MessageKind::Text(body.to_string()))
}

fn command(message_id: i32, raw: &str) -> InboundMessage {
    let command = Command::parse(raw).expect("test command should parse");
    base(message_id, None, MessageKind::Command(command))
}

/// Store that knows the `telegram` folder and uploads every URL except those
/// containing one of `failing`.
fn store(failing: &'static [&'static str]) -> MockContentStore {
    let mut store = MockContentStore::new();
    store.expect_list_folders().returning(|name: &str| {
        Ok(vec![DriveFolder {
            id: "folder-tg".into(),
            name: name.to_string(),
        }])
    });
    store.expect_create_folder().never();
    store
        .expect_upload_from_url()
        .returning(move |req: NewDriveFile| {
            if failing.iter().any(|f| req.url.contains(f)) {
                return Err(format!("cannot fetch {}", req.url).into());
            }
            let stem = req
                .url
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .trim_end_matches(".jpg")
                .to_string();
            Ok(DriveFile {
                id: format!("id-{stem}"),
                name: req.name,
            })
        });
    store
}

fn messenger() -> MockMessenger {
    let mut messenger = MockMessenger::new();
    messenger
        .expect_resolve_file_url()
        .returning(|file_id: &str| Ok(format!("https://files.test/{file_id}.jpg")));
    messenger.expect_reply().never();
    messenger
}

type Sent = Arc<Mutex<Vec<NewNote>>>;

fn recording_endpoint() -> (MockNoteEndpoint, Sent) {
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    let mut endpoint = MockNoteEndpoint::new();
    endpoint.expect_create_note().returning(move |note| {
        let mut notes = sink.lock().unwrap();
        notes.push(note);
        Ok(CreatedNote {
            id: format!("note-{}", notes.len()),
        })
    });
    (endpoint, sent)
}

/// Inbound stream whose backlog answer is scripted per message.
struct ScriptedStream {
    items: VecDeque<(InboundMessage, bool)>,
    backlog: bool,
}

impl ScriptedStream {
    fn new(items: Vec<(InboundMessage, bool)>) -> Self {
        Self {
            items: items.into(),
            backlog: false,
        }
    }
}

#[async_trait]
impl InboundStream for ScriptedStream {
    async fn next_message(&mut self) -> Option<InboundMessage> {
        let (msg, backlog) = self.items.pop_front()?;
        self.backlog = backlog;
        Some(msg)
    }

    fn has_pending_backlog(&self) -> bool {
        self.backlog
    }
}

async fn queued(messages: Vec<InboundMessage>) -> mpsc::Receiver<InboundMessage> {
    let (tx, rx) = mpsc::channel(messages.len().max(1));
    for msg in messages {
        tx.send(msg).await.expect("queue has room");
    }
    rx
}

#[tokio::test]
async fn album_delivered_at_once_becomes_one_note_with_last_caption() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = queued(vec![
        photo(1, "p1", ""),
        photo(2, "p2", "cap2"),
        photo(3, "p3", ""),
    ])
    .await;

    relay.run(&mut inbound).await.expect("relay should finish");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "one note for the whole album");
    assert_eq!(sent[0].text, format!("cap2\n\n{FOOTER}"));
    assert_eq!(sent[0].file_ids, vec!["id-p1", "id-p2", "id-p3"]);
    assert_eq!(sent[0].visibility, Visibility::Home);
    assert!(!sent[0].local_only);
}

#[tokio::test]
async fn later_caption_replaces_earlier_one() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = queued(vec![
        photo(1, "p1", "first"),
        video(2, "v1", ""),
        photo(3, "p3", "third"),
    ])
    .await;

    relay.run(&mut inbound).await.expect("relay should finish");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, format!("third\n\n{FOOTER}"));
}

#[tokio::test]
async fn lone_text_is_posted_immediately_without_attachments() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = queued(vec![text(1, "hello")]).await;

    relay.run(&mut inbound).await.expect("relay should finish");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, format!("hello\n\n{FOOTER}"));
    assert!(sent[0].file_ids.is_empty());
}

#[tokio::test]
async fn failed_upload_keeps_an_empty_slot() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&["p2"]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = queued(vec![
        photo(1, "p1", ""),
        photo(2, "p2", "lost photo"),
        photo(3, "p3", ""),
    ])
    .await;

    relay.run(&mut inbound).await.expect("upload failures do not stop the relay");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].file_ids, vec!["id-p1", "", "id-p3"]);
    assert_eq!(sent[0].text, format!("lost photo\n\n{FOOTER}"));
}

#[tokio::test]
async fn text_does_not_merge_with_or_flush_a_pending_burst() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = ScriptedStream::new(vec![
        (photo(1, "p1", "album"), true),
        (text(2, "interjection"), true),
        (photo(3, "p3", ""), false),
    ]);

    relay.run(&mut inbound).await.expect("relay should finish");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].text, format!("interjection\n\n{FOOTER}"));
    assert!(sent[0].file_ids.is_empty());
    assert_eq!(sent[1].text, format!("album\n\n{FOOTER}"));
    assert_eq!(sent[1].file_ids, vec!["id-p1", "id-p3"]);
}

#[tokio::test]
async fn trickling_media_is_posted_one_note_per_item() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = ScriptedStream::new(vec![
        (photo(1, "p1", "a"), false),
        (photo(2, "p2", "b"), false),
        (photo(3, "p3", ""), false),
    ]);

    relay.run(&mut inbound).await.expect("relay should finish");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].file_ids, vec!["id-p1"]);
    assert_eq!(sent[1].file_ids, vec!["id-p2"]);
    assert_eq!(sent[2].file_ids, vec!["id-p3"]);
    // The caption does not leak into the next burst.
    assert_eq!(sent[2].text, format!("\n\n{FOOTER}"));
}

#[tokio::test]
async fn burst_flushes_only_when_backlog_drains() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));

    relay
        .handle(photo(1, "p1", ""), || true)
        .await
        .expect("first item");
    relay
        .handle(photo(2, "p2", ""), || true)
        .await
        .expect("second item");
    assert!(sent.lock().unwrap().is_empty(), "nothing posted while backlog remains");
    assert_eq!(relay.pending().attachments().len(), 2);

    relay
        .handle(photo(3, "p3", ""), || false)
        .await
        .expect("third item");
    assert_eq!(sent.lock().unwrap().len(), 1);
    assert!(relay.pending().is_empty(), "burst resets after flush");
}

#[tokio::test]
async fn backlog_is_checked_after_the_upload() {
    let events = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let upload_events = events.clone();
    let mut store = MockContentStore::new();
    store.expect_list_folders().returning(|_| Ok(vec![]));
    store.expect_upload_from_url().returning(move |req| {
        upload_events.lock().unwrap().push("upload");
        Ok(DriveFile {
            id: "id-p1".into(),
            name: req.name,
        })
    });
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store, endpoint, messenger(), config(FailurePolicy::LogAndContinue));

    let probe = events.clone();
    relay
        .handle(photo(1, "p1", ""), move || {
            probe.lock().unwrap().push("backlog");
            true
        })
        .await
        .expect("item handled");

    assert_eq!(*events.lock().unwrap(), vec!["upload", "backlog"]);
    assert_eq!(relay.pending().attachments().len(), 1);
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unflushed_burst_is_dropped_when_stream_closes() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = ScriptedStream::new(vec![(photo(1, "p1", "never posted"), true)]);

    relay.run(&mut inbound).await.expect("relay should finish");

    assert!(sent.lock().unwrap().is_empty());
    assert_eq!(relay.pending().attachments().len(), 1);
}

#[tokio::test]
async fn forwarded_burst_carries_provenance_line() {
    let (endpoint, sent) = recording_endpoint();
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut forwarded = video(1, "v1", "breaking");
    forwarded.forwarded_from = Some(ForwardOrigin {
        title: "Daily News".into(),
        handle: "dailynews".into(),
    });
    let mut inbound = queued(vec![forwarded]).await;

    relay.run(&mut inbound).await.expect("relay should finish");

    let sent = sent.lock().unwrap();
    assert_eq!(
        sent[0].text,
        format!("breaking\n\nForwarded from Telegram Channel \"Daily News\" `@dailynews`\n{FOOTER}")
    );
}

#[tokio::test]
async fn help_and_start_are_answered_and_never_posted() {
    let mut endpoint = MockNoteEndpoint::new();
    endpoint.expect_create_note().never();
    let mut messenger = MockMessenger::new();
    messenger.expect_resolve_file_url().never();
    messenger
        .expect_reply()
        .withf(|chat_id: &i64, reply_to: &i32, text: &str| {
            *chat_id == 42 && (*reply_to == 1 || *reply_to == 2) && text == HELP_TEXT
        })
        .times(2)
        .returning(|_, _, _| Ok(()));

    let mut relay = Relay::new(store(&[]), endpoint, messenger, config(FailurePolicy::LogAndContinue));
    let mut inbound = queued(vec![
        command(1, "/start"),
        command(2, "/help@relay_bot"),
        command(3, "/unknown"),
    ])
    .await;

    relay.run(&mut inbound).await.expect("relay should finish");
}

#[tokio::test]
async fn unresolvable_media_is_skipped_with_its_caption() {
    let (endpoint, sent) = recording_endpoint();
    let mut messenger = MockMessenger::new();
    messenger
        .expect_resolve_file_url()
        .returning(|file_id: &str| {
            if file_id == "gone" {
                Err("file is too big".into())
            } else {
                Ok(format!("https://files.test/{file_id}.jpg"))
            }
        });
    let mut relay = Relay::new(store(&[]), endpoint, messenger, config(FailurePolicy::LogAndContinue));
    let mut inbound = queued(vec![video(1, "gone", "skipped caption"), photo(2, "p2", "")]).await;

    relay.run(&mut inbound).await.expect("relay should finish");

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].file_ids, vec!["id-p2"]);
    assert_eq!(sent[0].text, format!("\n\n{FOOTER}"));
}

#[tokio::test]
async fn rejected_note_is_dropped_and_burst_still_resets() {
    let attempts = Arc::new(Mutex::new(Vec::<NewNote>::new()));
    let sink = attempts.clone();
    let mut endpoint = MockNoteEndpoint::new();
    endpoint.expect_create_note().returning(move |note| {
        let mut seen = sink.lock().unwrap();
        seen.push(note);
        if seen.len() == 1 {
            Err("503 service unavailable".into())
        } else {
            Ok(CreatedNote { id: "n2".into() })
        }
    });
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::LogAndContinue));
    let mut inbound = ScriptedStream::new(vec![
        (photo(1, "p1", "lost"), false),
        (photo(2, "p2", ""), false),
    ]);

    relay.run(&mut inbound).await.expect("post failures are swallowed");

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 2, "no retry of the rejected note");
    assert_eq!(attempts[1].file_ids, vec!["id-p2"]);
    assert_eq!(attempts[1].text, format!("\n\n{FOOTER}"));
}

#[tokio::test]
async fn propagate_policy_stops_on_first_failure() {
    let mut endpoint = MockNoteEndpoint::new();
    endpoint
        .expect_create_note()
        .times(1)
        .returning(|_| Err("401 credential required".into()));
    let mut relay = Relay::new(store(&[]), endpoint, messenger(), config(FailurePolicy::Propagate));
    let mut inbound = queued(vec![text(1, "one"), text(2, "two")]).await;

    let err = relay.run(&mut inbound).await.unwrap_err();
    assert!(matches!(err, RelayError::Post { .. }), "got {err:?}");
}

#[tokio::test]
async fn propagate_policy_surfaces_upload_failures() {
    let mut endpoint = MockNoteEndpoint::new();
    endpoint.expect_create_note().never();
    let mut relay = Relay::new(store(&["p1"]), endpoint, messenger(), config(FailurePolicy::Propagate));
    let mut inbound = queued(vec![photo(1, "p1", "")]).await;

    let err = relay.run(&mut inbound).await.unwrap_err();
    assert!(matches!(err, RelayError::Upload { .. }), "got {err:?}");
}

#[tokio::test]
async fn prepare_upload_folder_creates_missing_folder() {
    let mut store = MockContentStore::new();
    store.expect_list_folders().times(1).returning(|_| Ok(vec![]));
    store
        .expect_create_folder()
        .times(1)
        .returning(|name: &str| {
            Ok(DriveFolder {
                id: "created".into(),
                name: name.to_string(),
            })
        });
    let relay = Relay::new(
        store,
        MockNoteEndpoint::new(),
        MockMessenger::new(),
        config(FailurePolicy::LogAndContinue),
    );

    assert_eq!(relay.prepare_upload_folder().await.as_deref(), Some("created"));
}
