//! End-to-end tests against the full server running in-process.
//!
//! The client side uses the real `RemoteStore` and `ChangeFeedClient` from
//! the core crate, so these cover the wire contract in both directions.

use std::sync::Arc;
use std::time::Duration;

use quillsync::server::{
    init_db, router, ActivityLog, ApiKeyStore, AppState, DocumentRepository, FeedHub,
};
use quillsync_core::feed::ChangePayload;
use quillsync_core::store::{DocumentPatch, NewDocument};
use quillsync_core::{
    open_session, ActivityAction, ActivityRecorder, ChangeFeedClient, CloseReason, DocContent,
    DocumentId, DocumentStore, Permission, RemoteStore, SessionOptions, SessionPhase, StoreError,
    Visibility,
};

async fn start_server() -> (String, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();

    let state = AppState {
        documents: DocumentRepository::new(pool.clone()),
        activity: ActivityLog::new(pool),
        hub: Arc::new(FeedHub::new()),
        api_keys: Arc::new(ApiKeyStore::from_keys([
            ("alice-key", "alice"),
            ("bob-key", "bob"),
        ])),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), temp_dir)
}

#[tokio::test]
async fn test_create_load_save_roundtrip() {
    let (url, _temp) = start_server().await;
    let alice = RemoteStore::new(url, "alice-key");

    let doc = alice
        .create(NewDocument {
            title: "Notes".into(),
            content: DocContent::paragraph("hello"),
            visibility: Visibility::Private,
        })
        .await
        .unwrap();
    assert_eq!(doc.owner_id, "alice");

    let new_ts = alice
        .save(
            doc.id,
            DocumentPatch {
                content: Some(DocContent::paragraph("world")),
                ..Default::default()
            },
            doc.updated_at,
        )
        .await
        .unwrap();
    assert!(new_ts > doc.updated_at);

    let loaded = alice.load(doc.id).await.unwrap();
    assert_eq!(loaded.content, DocContent::paragraph("world"));
    assert_eq!(loaded.updated_at, new_ts);
}

#[tokio::test]
async fn test_stale_save_returns_conflict_with_server_timestamp() {
    let (url, _temp) = start_server().await;
    let alice = RemoteStore::new(url, "alice-key");

    let doc = alice.create(NewDocument::titled("Notes")).await.unwrap();
    let new_ts = alice
        .save(
            doc.id,
            DocumentPatch {
                content: Some(DocContent::paragraph("first")),
                ..Default::default()
            },
            doc.updated_at,
        )
        .await
        .unwrap();

    let result = alice
        .save(
            doc.id,
            DocumentPatch {
                content: Some(DocContent::paragraph("second")),
                ..Default::default()
            },
            doc.updated_at,
        )
        .await;
    match result {
        Err(StoreError::StaleWrite { current, .. }) => {
            assert_eq!(current, Some(new_ts));
        }
        other => panic!("expected StaleWrite, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_taxonomy_over_the_wire() {
    let (url, _temp) = start_server().await;
    let alice = RemoteStore::new(url.clone(), "alice-key");
    let bob = RemoteStore::new(url, "bob-key");

    let doc = alice.create(NewDocument::titled("Private")).await.unwrap();

    assert!(matches!(
        bob.load(doc.id).await,
        Err(StoreError::AccessDenied)
    ));
    assert!(matches!(
        alice.load(DocumentId::new()).await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        alice.create(NewDocument::titled("  ")).await,
        Err(StoreError::Invalid(_))
    ));
    assert!(matches!(
        bob.delete(doc.id).await,
        Err(StoreError::AccessDenied)
    ));
}

#[tokio::test]
async fn test_server_records_created_and_collaborator_activity() {
    let (url, _temp) = start_server().await;
    let alice = RemoteStore::new(url, "alice-key");

    let doc = alice.create(NewDocument::titled("Notes")).await.unwrap();
    alice
        .add_collaborator(doc.id, "bob", Permission::Edit)
        .await
        .unwrap();

    let entries = alice.list(doc.id, 10).await.unwrap();
    let actions: Vec<ActivityAction> = entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![ActivityAction::Created, ActivityAction::CollaboratorAdded]
    );
    assert_eq!(entries[1].details["user_id"], "bob");

    let collaborators = alice.list_collaborators(doc.id).await.unwrap();
    assert_eq!(collaborators.len(), 1);
    assert_eq!(collaborators[0].user_id, "bob");
}

#[tokio::test]
async fn test_feed_delivers_saves_to_subscribers() {
    let (url, _temp) = start_server().await;
    let alice = RemoteStore::new(url.clone(), "alice-key");

    let doc = alice.create(NewDocument::titled("Notes")).await.unwrap();
    alice
        .add_collaborator(doc.id, "bob", Permission::Edit)
        .await
        .unwrap();

    let feed = ChangeFeedClient::new(url, "bob-key");
    let mut subscription = feed.subscribe(doc.id);
    // Give the subscription a moment to connect before mutating.
    tokio::time::sleep(Duration::from_millis(300)).await;

    alice
        .save(
            doc.id,
            DocumentPatch {
                content: Some(DocContent::paragraph("pushed")),
                ..Default::default()
            },
            doc.updated_at,
        )
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), subscription.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.document_id, doc.id);
    match event.payload {
        ChangePayload::DocumentUpdated(row) => {
            assert_eq!(row.content, DocContent::paragraph("pushed"));
        }
        other => panic!("expected DocumentUpdated, got {:?}", other),
    }

    subscription.unsubscribe();
    subscription.unsubscribe();
}

#[tokio::test]
async fn test_remote_session_sees_collaborator_saves_and_deletes() {
    let (url, _temp) = start_server().await;
    let alice = RemoteStore::new(url.clone(), "alice-key");
    let bob = RemoteStore::new(url.clone(), "bob-key");

    let doc = alice.create(NewDocument::titled("Shared")).await.unwrap();
    alice
        .add_collaborator(doc.id, "bob", Permission::Edit)
        .await
        .unwrap();

    // Bob opens a live session over the real store and feed.
    let store: Arc<dyn DocumentStore> = Arc::new(bob.clone());
    let recorder: Arc<dyn ActivityRecorder> = Arc::new(bob);
    let feed = ChangeFeedClient::new(url, "bob-key").subscribe(doc.id);
    let handle = open_session(store, recorder, feed, "bob", SessionOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Alice saves; bob's clean session applies the pushed row.
    alice
        .save(
            doc.id,
            DocumentPatch {
                content: Some(DocContent::paragraph("alice was here")),
                ..Default::default()
            },
            doc.updated_at,
        )
        .await
        .unwrap();

    let mut state = handle.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| s.content == DocContent::paragraph("alice was here")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(handle.snapshot().phase, SessionPhase::Clean);

    // Alice deletes; bob's session closes.
    alice.delete(doc.id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle.closed())
        .await
        .unwrap();
    assert_eq!(
        handle.snapshot().close_reason,
        Some(CloseReason::DocumentDeleted)
    );
}
