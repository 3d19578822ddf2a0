//! Process-lifetime cache of the upstream user and conversation directories.
//!
//! Both directories come from a single upstream call, so one slot guards
//! them together. The first caller starts the fetch as a spawned task and
//! parks a shared future in the slot. Callers arriving while it runs await
//! that same future instead of issuing their own fetch. The spawned task
//! settles the slot itself, so the outcome is recorded even when every
//! waiter has gone away. A successful result is kept for the rest of the
//! process. A failure is handed to every waiter and the slot is cleared so
//! the next call retries.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use chatrelay_shared::{ConversationDirectory, ConversationEvent, ConversationId, UserDirectory};
use chatrelay_upstream::ChatBackend;

use crate::config::EventWindow;
use crate::error::FetchError;

/// One consistent snapshot of both directories.
#[derive(Debug)]
pub struct Directory {
    users: Arc<UserDirectory>,
    conversations: Arc<ConversationDirectory>,
}

impl Directory {
    pub fn new(users: UserDirectory, conversations: ConversationDirectory) -> Self {
        Self {
            users: Arc::new(users),
            conversations: Arc::new(conversations),
        }
    }

    pub fn users(&self) -> &Arc<UserDirectory> {
        &self.users
    }

    pub fn conversations(&self) -> &Arc<ConversationDirectory> {
        &self.conversations
    }
}

type DirectoryFetch = Shared<BoxFuture<'static, Result<Arc<Directory>, FetchError>>>;

#[derive(Default)]
struct Slot {
    ready: Option<Arc<Directory>>,
    in_flight: Option<DirectoryFetch>,
}

pub struct DomainCache {
    backend: Arc<dyn ChatBackend>,
    slot: Arc<Mutex<Slot>>,
}

impl DomainCache {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// The cached directory, fetching it first if needed.
    pub async fn directory(&self) -> Result<Arc<Directory>, FetchError> {
        let fetch = {
            let mut slot = self.slot.lock().await;
            if let Some(directory) = &slot.ready {
                return Ok(directory.clone());
            }
            // A settled failure still parked here means the task that
            // should have cleared it never ran to completion.
            let joinable = slot
                .in_flight
                .as_ref()
                .filter(|fetch| !matches!(fetch.peek(), Some(Err(_))))
                .cloned();
            match joinable {
                Some(fetch) => {
                    debug!("Joining in-flight directory fetch");
                    fetch
                }
                None => {
                    let fetch = self.start_fetch();
                    slot.in_flight = Some(fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    pub async fn users(&self) -> Result<Arc<UserDirectory>, FetchError> {
        Ok(self.directory().await?.users().clone())
    }

    /// All conversations, archived ones included.
    pub async fn conversations(&self) -> Result<Arc<ConversationDirectory>, FetchError> {
        Ok(self.directory().await?.conversations().clone())
    }

    /// Fetch a window of recent events of one conversation.
    ///
    /// Event history is not cached; every call goes upstream. Returns the
    /// first `window.take` events of a `window.size` window, oldest first.
    pub async fn event_window(
        &self,
        conversation: &ConversationId,
        window: EventWindow,
    ) -> Result<Vec<ConversationEvent>, FetchError> {
        let mut events = self
            .backend
            .get_events(conversation, None, window.size)
            .await?;
        events.truncate(window.take);
        debug!(
            conversation = %conversation,
            returned = events.len(),
            "Fetched event window"
        );
        Ok(events)
    }

    fn start_fetch(&self) -> DirectoryFetch {
        debug!("Fetching user and conversation directories");
        let backend = self.backend.clone();
        let slot = self.slot.clone();
        let handle = tokio::spawn(async move {
            let result = backend
                .build_user_conversation_list()
                .await
                .map(|(users, conversations)| Arc::new(Directory::new(users, conversations)))
                .map_err(FetchError::Upstream);

            let mut slot = slot.lock().await;
            slot.in_flight = None;
            match &result {
                Ok(directory) => {
                    let latest = directory
                        .conversations()
                        .all(true)
                        .max_by_key(|c| c.last_modified)
                        .and_then(|c| c.last_modified_utc());
                    info!(
                        users = directory.users().len(),
                        conversations = directory.conversations().len(),
                        latest = ?latest,
                        "Directory cached"
                    );
                    slot.ready = Some(directory.clone());
                }
                Err(e) => warn!(error = %e, "Directory fetch failed, next call will retry"),
            }
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Abandoned),
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chatrelay_shared::event::{ChatMessage, EventPayload};
    use chatrelay_shared::serializer::encode_conversation_state;
    use chatrelay_shared::wire;
    use chatrelay_shared::{ConversationSummary, EventId, User, UserId};
    use chatrelay_upstream::{FixtureBackend, Snapshot};

    fn alice() -> User {
        User {
            id: UserId::single("u1"),
            full_name: "Alice".into(),
            first_name: "Alice".into(),
            photo_url: None,
            emails: vec![],
            is_self: false,
        }
    }

    fn snapshot() -> Snapshot {
        let events = (1..=12)
            .map(|i| ConversationEvent {
                event_id: Some(EventId(format!("e{i}"))),
                conversation_id: Some(ConversationId::from("c1")),
                sender_id: Some(UserId::single("u1")),
                timestamp: Some(i),
                source_type: None,
                event_type: Some(1),
                payload: EventPayload::ChatMessage(ChatMessage::from_text("hi")),
            })
            .collect();

        Snapshot {
            users: UserDirectory::from(vec![alice()]),
            conversations: ConversationDirectory::from(vec![
                ConversationSummary {
                    id: ConversationId::from("c1"),
                    name: Some("General".into()),
                    participant_ids: vec![UserId::single("u1")],
                    last_modified: 12,
                    archived: false,
                },
                ConversationSummary {
                    id: ConversationId::from("c-old"),
                    name: None,
                    participant_ids: vec![],
                    last_modified: 1,
                    archived: true,
                },
            ]),
            events: [(ConversationId::from("c1"), events)].into_iter().collect(),
        }
    }

    fn slow_backend() -> Arc<FixtureBackend> {
        Arc::new(FixtureBackend::new(snapshot()).with_fetch_delay(Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn test_concurrent_users_coalesce_into_one_fetch() {
        let backend = slow_backend();
        let cache = DomainCache::new(backend.clone());

        let (a, b) = tokio::join!(cache.users(), cache.users());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(backend.directory_fetches(), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.all(), &[alice()]);
    }

    #[tokio::test]
    async fn test_many_concurrent_callers_share_one_fetch() {
        let backend = slow_backend();
        let cache = Arc::new(DomainCache::new(backend.clone()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        cache.users().await.map(|_| ())
                    } else {
                        cache.conversations().await.map(|_| ())
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(backend.directory_fetches(), 1);
    }

    #[tokio::test]
    async fn test_directory_is_stable_after_population() {
        let backend = slow_backend();
        let cache = DomainCache::new(backend.clone());

        let first = cache.conversations().await.unwrap();
        backend.inject(ConversationEvent {
            event_id: Some(EventId::from("late")),
            conversation_id: Some(ConversationId::from("c-new")),
            sender_id: None,
            timestamp: None,
            source_type: None,
            event_type: Some(4),
            payload: EventPayload::Other,
        });
        let second = cache.conversations().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.directory_fetches(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let backend = slow_backend();
        backend.fail_next_fetches(1);
        let cache = DomainCache::new(backend.clone());

        let (a, b) = tokio::join!(cache.users(), cache.users());
        assert!(matches!(a, Err(FetchError::Upstream(_))));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(backend.directory_fetches(), 1);

        let users = cache.users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(backend.directory_fetches(), 2);
    }

    #[tokio::test]
    async fn test_failure_with_no_waiters_left_still_allows_retry() {
        let backend = Arc::new(
            FixtureBackend::new(snapshot()).with_fetch_delay(Duration::from_millis(30)),
        );
        backend.fail_next_fetches(1);
        let cache = DomainCache::new(backend.clone());

        // The only waiter gives up long before the fetch fails.
        let abandoned = tokio::time::timeout(Duration::from_millis(5), cache.users()).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;

        let users = cache.users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(backend.directory_fetches(), 2);
    }

    #[tokio::test]
    async fn test_success_with_no_waiters_left_is_cached() {
        let backend = Arc::new(
            FixtureBackend::new(snapshot()).with_fetch_delay(Duration::from_millis(30)),
        );
        let cache = DomainCache::new(backend.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(5), cache.users()).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;

        cache.users().await.unwrap();
        assert_eq!(backend.directory_fetches(), 1);
    }

    #[tokio::test]
    async fn test_conversations_include_archived() {
        let cache = DomainCache::new(slow_backend());
        let conversations = cache.conversations().await.unwrap();
        assert!(conversations.all(true).any(|c| c.archived));
    }

    #[tokio::test]
    async fn test_event_window_takes_first_of_recent_window() {
        let cache = DomainCache::new(slow_backend());
        let c1 = ConversationId::from("c1");

        let events = cache
            .event_window(&c1, EventWindow { size: 10, take: 1 })
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, Some(EventId::from("e3")));

        let events = cache
            .event_window(&c1, EventWindow { size: 4, take: 10 })
            .await
            .unwrap();
        let ids: Vec<_> = events
            .iter()
            .map(|e| e.event_id.clone().unwrap().0)
            .collect();
        assert_eq!(ids, vec!["e9", "e10", "e11", "e12"]);
    }

    #[tokio::test]
    async fn test_window_from_start_encodes_event_identifiers() {
        let backend = slow_backend();
        let c1 = ConversationId::from("c1");
        let start = EventId::from("e5");

        let events = backend.get_events(&c1, Some(&start), 2).await.unwrap();
        let bytes = encode_conversation_state(&c1, &events).unwrap();
        let state = wire::ConversationState::from_bytes(&bytes).unwrap();

        let ids: Vec<_> = state
            .event
            .iter()
            .map(|e| e.event_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["e3", "e4"]);
        assert!(state.event.iter().all(|e| e.timestamp != Some(5)));
    }
}
