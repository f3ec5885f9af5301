mod common;

use common::*;
use gmail_unsubscribe::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use gmail_unsubscribe::error::GmailError;
use gmail_unsubscribe::models::Message;
use gmail_unsubscribe::pipeline::{PipelineOptions, UnsubscribePipeline};
use gmail_unsubscribe::retry::{CallPolicy, FixedClock};
use gmail_unsubscribe::unsubscribe::UrlVisitor;
use std::sync::Arc;
use std::time::Duration;

const DIRECTIVE_A: &str = "<mailto:unsub@x.com?subject=remove>";

fn options() -> PipelineOptions {
    PipelineOptions {
        from_address: "me@example.com".to_string(),
        ..Default::default()
    }
}

fn build(
    mailbox: Arc<FakeMailbox>,
    journal: Arc<dyn CheckpointStore<Message>>,
    seen: Arc<dyn CheckpointStore<String>>,
    visitor: Arc<dyn UrlVisitor>,
    options: PipelineOptions,
) -> UnsubscribePipeline {
    UnsubscribePipeline::new(
        mailbox,
        CallPolicy::new(Arc::new(FixedClock(test_now()))),
        journal,
        seen,
        visitor,
        options,
    )
}

/// a@x.com sends three newsletters, b@y.com two plain messages, interleaved
fn mixed_folder() -> Vec<Message> {
    vec![
        create_newsletter_message("m1", "a@x.com", DIRECTIVE_A),
        create_plain_message("m4", "b@y.com"),
        create_newsletter_message("m2", "a@x.com", DIRECTIVE_A),
        create_plain_message("m5", "b@y.com"),
        create_newsletter_message("m3", "a@x.com", DIRECTIVE_A),
    ]
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_full_run_unsubscribes_once_and_deletes_everything() {
    let events = event_log();
    let mailbox = Arc::new(FakeMailbox::new(mixed_folder(), events.clone()));
    let journal = Arc::new(MemoryCheckpointStore::<Message>::new());
    let seen = Arc::new(RecordingSeenStore::new(events.clone()));

    let report = build(
        mailbox.clone(),
        journal.clone(),
        seen.clone(),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "delete:m4,m5".to_string(),
            "send:unsub@x.com".to_string(),
            "delete:m1,m2,m3".to_string(),
            "seen:a@x.com".to_string(),
            "seen-cleared".to_string(),
        ]
    );
    assert_eq!(
        mailbox.sent_messages(),
        vec!["From: me@example.com\r\nTo: unsub@x.com\r\nSubject: remove\r\n\r\n".to_string()]
    );

    assert_eq!(report.messages_total, 5);
    assert_eq!(report.messages_without_directive, 2);
    assert_eq!(report.groups_total, 1);
    assert_eq!(report.emails_sent, 1);
    assert_eq!(report.delete.deleted, 5);
    assert_eq!(report.delete.calls, 2);
    assert!(report.state_cleared);
    assert!(journal.snapshot().await.is_empty());
    assert!(seen.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_resume_from_journal_skips_listing() {
    let messages = mixed_folder();
    let mailbox = Arc::new(FakeMailbox::new(messages.clone(), event_log()));
    let journal = Arc::new(MemoryCheckpointStore::with_records(messages));

    let report = build(
        mailbox.clone(),
        journal,
        Arc::new(MemoryCheckpointStore::<String>::new()),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert!(report.resumed);
    assert_eq!(report.messages_total, 5);
    assert_eq!(mailbox.listing_calls(), 0);
    assert!(mailbox.fetched.lock().unwrap().is_empty());
    assert_eq!(report.delete.deleted, 5);
}

#[tokio::test]
async fn test_seen_sender_is_deleted_without_unsubscribing() {
    let events = event_log();
    let mailbox = Arc::new(FakeMailbox::new(mixed_folder(), events.clone()));
    let seen = Arc::new(RecordingSeenStore::with_records(
        vec!["a@x.com".to_string()],
        events.clone(),
    ));

    let report = build(
        mailbox.clone(),
        Arc::new(MemoryCheckpointStore::<Message>::new()),
        seen,
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.groups_skipped, 1);
    assert_eq!(report.emails_sent, 0);
    assert!(mailbox.sent_messages().is_empty());
    assert_eq!(
        mailbox.deleted_ids(),
        vec![ids(&["m4", "m5"]), ids(&["m1", "m2", "m3"])]
    );
    // Already present, so not appended a second time
    assert!(!events.lock().unwrap().contains(&"seen:a@x.com".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_send_waits_for_retry_instant() {
    let mailbox = Arc::new(
        FakeMailbox::new(mixed_folder(), event_log()).with_faults(Faults {
            send_errors: [rate_limit_after(5)].into_iter().collect(),
            ..Default::default()
        }),
    );

    let start = tokio::time::Instant::now();
    let report = build(
        mailbox.clone(),
        Arc::new(MemoryCheckpointStore::<Message>::new()),
        Arc::new(MemoryCheckpointStore::<String>::new()),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();
    let waited = start.elapsed();

    assert!(waited >= Duration::from_secs(5), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(6), "waited {:?}", waited);
    assert_eq!(report.emails_sent, 1);
    assert_eq!(mailbox.sent_messages().len(), 1);
}

#[tokio::test]
async fn test_failed_send_still_deletes_and_marks_seen() {
    let events = event_log();
    let mailbox = Arc::new(
        FakeMailbox::new(mixed_folder(), events.clone()).with_faults(Faults {
            send_errors: [GmailError::ApiError {
                status: 403,
                message: "Insufficient Permission".to_string(),
            }]
            .into_iter()
            .collect(),
            ..Default::default()
        }),
    );

    let report = build(
        mailbox.clone(),
        Arc::new(MemoryCheckpointStore::<Message>::new()),
        Arc::new(RecordingSeenStore::new(events.clone())),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.emails_sent, 0);
    assert_eq!(report.email_failures, 1);
    assert_eq!(report.delete.deleted, 5);
    assert!(events.lock().unwrap().contains(&"seen:a@x.com".to_string()));
}

#[tokio::test]
async fn test_url_failures_are_isolated_per_target() {
    let directive = "<https://x.com/broken>, <https://x.com/ok>, <mailto:unsub@x.com>";
    let mailbox = Arc::new(FakeMailbox::new(
        vec![create_newsletter_message("m1", "a@x.com", directive)],
        event_log(),
    ));

    let mut visitor = MockUrlVisitor::new();
    visitor
        .expect_visit()
        .withf(|url| url == "https://x.com/broken")
        .times(1)
        .returning(|url| Err(GmailError::UnsubscribeError(format!("GET {} returned 500", url))));
    visitor
        .expect_visit()
        .withf(|url| url == "https://x.com/ok")
        .times(1)
        .returning(|_| Ok(200));

    let report = build(
        mailbox.clone(),
        Arc::new(MemoryCheckpointStore::<Message>::new()),
        Arc::new(MemoryCheckpointStore::<String>::new()),
        Arc::new(visitor),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.url_failures, 1);
    assert_eq!(report.urls_visited, 1);
    assert_eq!(report.emails_sent, 1);
    assert_eq!(mailbox.deleted_ids(), vec![ids(&["m1"])]);
}

#[tokio::test]
async fn test_only_first_message_directive_is_used() {
    let mailbox = Arc::new(FakeMailbox::new(
        vec![
            create_newsletter_message("m1", "a@x.com", "<mailto:first@x.com>"),
            create_newsletter_message("m2", "a@x.com", "<mailto:second@x.com>"),
        ],
        event_log(),
    ));

    build(
        mailbox.clone(),
        Arc::new(MemoryCheckpointStore::<Message>::new()),
        Arc::new(MemoryCheckpointStore::<String>::new()),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    let sent = mailbox.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("To: first@x.com\r\n"));
}

#[tokio::test]
async fn test_unfetchable_message_is_skipped() {
    let mailbox = Arc::new(
        FakeMailbox::new(mixed_folder(), event_log()).with_faults(Faults {
            missing_ids: ["m2".to_string()].into_iter().collect(),
            ..Default::default()
        }),
    );
    let journal = Arc::new(MemoryCheckpointStore::<Message>::new());

    let report = build(
        mailbox.clone(),
        journal,
        Arc::new(MemoryCheckpointStore::<String>::new()),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.messages_total, 4);
    assert_eq!(
        mailbox.deleted_ids(),
        vec![ids(&["m4", "m5"]), ids(&["m1", "m3"])]
    );
}

#[tokio::test]
async fn test_folder_lookup_ignores_case() {
    let mailbox = Arc::new(FakeMailbox::new(mixed_folder(), event_log()));
    let options = PipelineOptions {
        folder: "UNSUBSCRIBE".to_string(),
        ..options()
    };

    let report = build(
        mailbox,
        Arc::new(MemoryCheckpointStore::<Message>::new()),
        Arc::new(MemoryCheckpointStore::<String>::new()),
        Arc::new(no_visits()),
        options,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.messages_total, 5);
}

#[tokio::test]
async fn test_unknown_folder_fails_before_listing() {
    let mailbox = Arc::new(FakeMailbox::new(mixed_folder(), event_log()));
    let options = PipelineOptions {
        folder: "Newsletters".to_string(),
        ..options()
    };

    let result = build(
        mailbox.clone(),
        Arc::new(MemoryCheckpointStore::<Message>::new()),
        Arc::new(MemoryCheckpointStore::<String>::new()),
        Arc::new(no_visits()),
        options,
    )
    .run()
    .await;

    assert!(matches!(result, Err(GmailError::FolderNotFound(name)) if name == "Newsletters"));
    assert_eq!(mailbox.listing_calls(), 0);
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_checkpoint_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let journal_path = dir.path().join("messages.jsonl");
    let seen_path = dir.path().join("seen.txt");

    let messages = vec![
        create_newsletter_message("m1", "a@x.com", DIRECTIVE_A),
        create_newsletter_message("m2", "a@x.com", DIRECTIVE_A),
        create_newsletter_message("m3", "c@z.com", "<mailto:bye@z.com>"),
    ];

    // First run: c@z.com's messages cannot be deleted
    let first = Arc::new(
        FakeMailbox::new(messages.clone(), event_log()).with_faults(Faults {
            undeletable_ids: ["m3".to_string()].into_iter().collect(),
            ..Default::default()
        }),
    );
    let report = build(
        first.clone(),
        Arc::new(FileCheckpointStore::<Message>::new(&journal_path)),
        Arc::new(FileCheckpointStore::<String>::new(&seen_path)),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert!(!report.state_cleared);
    assert_eq!(report.delete.failed_ids, ids(&["m3"]));
    assert_eq!(first.sent_messages().len(), 2);

    let seen_store = FileCheckpointStore::<String>::new(&seen_path);
    assert_eq!(
        seen_store.load().await.unwrap(),
        ids(&["a@x.com", "c@z.com"])
    );

    // Second run: everything comes from the files and nobody is emailed again
    let second = Arc::new(FakeMailbox::new(messages, event_log()));
    let report = build(
        second.clone(),
        Arc::new(FileCheckpointStore::<Message>::new(&journal_path)),
        Arc::new(FileCheckpointStore::<String>::new(&seen_path)),
        Arc::new(no_visits()),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert!(report.resumed);
    assert_eq!(second.listing_calls(), 0);
    assert!(second.sent_messages().is_empty());
    assert_eq!(report.groups_skipped, 2);
    assert!(report.state_cleared);
    assert!(FileCheckpointStore::<Message>::new(&journal_path)
        .load()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_dry_run_keeps_journal_for_the_real_run() {
    let mailbox = Arc::new(FakeMailbox::new(mixed_folder(), event_log()));
    let journal = Arc::new(MemoryCheckpointStore::<Message>::new());
    let seen = Arc::new(MemoryCheckpointStore::<String>::new());

    let report = build(
        mailbox.clone(),
        journal.clone(),
        seen.clone(),
        Arc::new(no_visits()),
        PipelineOptions {
            dry_run: true,
            ..options()
        },
    )
    .run()
    .await
    .unwrap();

    assert!(report.dry_run);
    assert!(mailbox.sent_messages().is_empty());
    assert!(mailbox.deleted_ids().is_empty());
    assert_eq!(journal.snapshot().await.len(), 5);
    assert!(seen.snapshot().await.is_empty());
}
