//! Backing services the mutation queue replays against.
//!
//! The remote document store and the email service sit behind async traits.
//! [`BackendDispatcher`] turns each [`OfflineAction`] into exactly one call on
//! one of them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{BookingStatus, BookingUpdate, EmailCampaign, OfflineAction};

pub const BOOKINGS: &str = "bookings";
pub const USERS: &str = "users";
pub const PROGRAMS: &str = "programs";
pub const PROGRAM_REGISTRATIONS: &str = "programRegistrations";

/// Top-level fields of a document.
pub type Fields = Map<String, Value>;

/// A document as returned by a collection scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The service could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// The service answered but refused the request.
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Whether the failure is about reachability rather than the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Document-oriented remote store. Each call is independently fallible.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Create a document and return its store-assigned id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, BackendError>;

    /// Merge `patch` into an existing document.
    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), BackendError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>, BackendError>;
}

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send_bulk(
        &self,
        campaign: &EmailCampaign,
        recipients: &[String],
    ) -> Result<(), BackendError>;
}

/// Something that can carry out a queued action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &OfflineAction) -> Result<(), BackendError>;
}

/// Maps every action to its single backing operation.
#[derive(Clone)]
pub struct BackendDispatcher {
    store: Arc<dyn BackingStore>,
    email: Arc<dyn EmailService>,
}

impl BackendDispatcher {
    pub fn new(store: Arc<dyn BackingStore>, email: Arc<dyn EmailService>) -> Self {
        Self { store, email }
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }
}

#[async_trait]
impl ActionExecutor for BackendDispatcher {
    async fn execute(&self, action: &OfflineAction) -> Result<(), BackendError> {
        match action {
            OfflineAction::CreateBooking { data } => {
                let id = self.store.create(BOOKINGS, to_fields(data)?).await?;
                tracing::debug!(booking_id = %id, "created booking");
            }
            OfflineAction::UpdateBooking { booking_id, data } => {
                self.store
                    .update(BOOKINGS, booking_id.as_str(), to_fields(data)?)
                    .await?;
            }
            OfflineAction::CancelBooking { booking_id } => {
                let patch = to_fields(&BookingUpdate::status(BookingStatus::Cancelled))?;
                self.store
                    .update(BOOKINGS, booking_id.as_str(), patch)
                    .await?;
            }
            OfflineAction::SendBulkEmail {
                campaign,
                recipients,
            } => {
                self.email.send_bulk(campaign, recipients).await?;
            }
            OfflineAction::UpdateUserProfile { user_id, data } => {
                self.store
                    .update(USERS, user_id.as_str(), to_fields(data)?)
                    .await?;
            }
            OfflineAction::EnrollInProgram {
                user_id,
                program_id,
            } => {
                let mut fields = Fields::new();
                fields.insert("userId".into(), Value::String(user_id.to_string()));
                fields.insert("programId".into(), Value::String(program_id.to_string()));
                self.store.create(PROGRAM_REGISTRATIONS, fields).await?;
            }
        }
        Ok(())
    }
}

/// Serialize a payload into top-level document fields.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, BackendError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(BackendError::Serialization(format!(
            "expected an object, got {other}"
        ))),
        Err(err) => Err(BackendError::Serialization(err.to_string())),
    }
}

/// A call recorded by [`InMemoryDocumentStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOperation {
    Create { collection: String, fields: Fields },
    Update { collection: String, id: String, patch: Fields },
    Delete { collection: String, id: String },
    List { collection: String },
}

/// In-memory document store.
///
/// Updates shallow-merge into the stored document, so the last update applied
/// wins field by field. Every call, successful or not, is recorded.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Fields>>>,
    operations: RwLock<Vec<StoreOperation>>,
    available: AtomicBool,
    next_id: AtomicU64,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document.
    pub async fn insert(&self, collection: &str, id: &str, fields: Fields) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// When unavailable every call fails with [`BackendError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn document(&self, collection: &str, id: &str) -> Option<Fields> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub async fn operations(&self) -> Vec<StoreOperation> {
        self.operations.read().await.clone()
    }

    async fn record(&self, op: StoreOperation) -> Result<(), BackendError> {
        self.operations.write().await.push(op);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("document store offline".to_string()))
        }
    }
}

#[async_trait]
impl BackingStore for InMemoryDocumentStore {
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, BackendError> {
        self.record(StoreOperation::Create {
            collection: collection.to_string(),
            fields: fields.clone(),
        })
        .await?;

        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.insert(collection, &id, fields).await;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), BackendError> {
        self.record(StoreOperation::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch: patch.clone(),
        })
        .await?;

        let mut collections = self.collections.write().await;
        let document = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| BackendError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        document.extend(patch);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        self.record(StoreOperation::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
        .await?;

        if let Some(docs) = self.collections.write().await.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, BackendError> {
        self.record(StoreOperation::List {
            collection: collection.to_string(),
        })
        .await?;

        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCampaign {
    pub campaign: EmailCampaign,
    pub recipients: Vec<String>,
}

/// Email service that records campaigns instead of sending them.
#[derive(Debug)]
pub struct InMemoryEmailOutbox {
    sent: RwLock<Vec<SentCampaign>>,
    available: AtomicBool,
}

impl Default for InMemoryEmailOutbox {
    fn default() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryEmailOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentCampaign> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl EmailService for InMemoryEmailOutbox {
    async fn send_bulk(
        &self,
        campaign: &EmailCampaign,
        recipients: &[String],
    ) -> Result<(), BackendError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("email service offline".to_string()));
        }
        self.sent.write().await.push(SentCampaign {
            campaign: campaign.clone(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewBooking, ProfileUpdate};
    use chrono::NaiveDate;
    use engage360_core::{BookingId, ProgramId, UserId};
    use serde_json::json;

    fn dispatcher() -> (
        Arc<InMemoryDocumentStore>,
        Arc<InMemoryEmailOutbox>,
        BackendDispatcher,
    ) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let email = Arc::new(InMemoryEmailOutbox::new());
        let dispatcher = BackendDispatcher::new(store.clone(), email.clone());
        (store, email, dispatcher)
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn create_booking_issues_one_create_with_the_payload() {
        let (store, _, dispatcher) = dispatcher();
        let action = OfflineAction::CreateBooking {
            data: NewBooking {
                user_id: UserId::new("u1"),
                program_id: ProgramId::new("p1"),
                date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                time: "18:00".to_string(),
                notes: None,
            },
        };

        dispatcher.execute(&action).await.unwrap();

        assert_eq!(
            store.operations().await,
            vec![StoreOperation::Create {
                collection: BOOKINGS.to_string(),
                fields: fields(json!({
                    "userId": "u1", "programId": "p1", "date": "2025-01-10", "time": "18:00"
                })),
            }]
        );
    }

    #[tokio::test]
    async fn cancel_booking_sets_cancelled_status() {
        let (store, _, dispatcher) = dispatcher();
        store
            .insert(BOOKINGS, "b1", fields(json!({"status": "confirmed", "time": "09:00"})))
            .await;

        dispatcher
            .execute(&OfflineAction::CancelBooking {
                booking_id: BookingId::new("b1"),
            })
            .await
            .unwrap();

        assert_eq!(
            store.document(BOOKINGS, "b1").await,
            Some(fields(json!({"status": "cancelled", "time": "09:00"})))
        );
    }

    #[tokio::test]
    async fn updating_a_missing_document_is_not_found() {
        let (_, _, dispatcher) = dispatcher();
        let err = dispatcher
            .execute(&OfflineAction::UpdateUserProfile {
                user_id: UserId::new("ghost"),
                data: ProfileUpdate {
                    phone: Some("0400 000 000".to_string()),
                    ..ProfileUpdate::default()
                },
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BackendError::NotFound {
                collection: USERS.to_string(),
                id: "ghost".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn enrolment_creates_a_registration() {
        let (store, _, dispatcher) = dispatcher();
        dispatcher
            .execute(&OfflineAction::EnrollInProgram {
                user_id: UserId::new("u1"),
                program_id: ProgramId::new("yoga"),
            })
            .await
            .unwrap();

        let registrations = store.list(PROGRAM_REGISTRATIONS).await.unwrap();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].fields["programId"], json!("yoga"));
    }

    #[tokio::test]
    async fn bulk_email_goes_to_the_email_service() {
        let (store, email, dispatcher) = dispatcher();
        let campaign = EmailCampaign {
            subject: "Timetable".to_string(),
            body: "New classes".to_string(),
            html: None,
        };

        dispatcher
            .execute(&OfflineAction::SendBulkEmail {
                campaign: campaign.clone(),
                recipients: vec!["a@example.org".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(email.sent().await.len(), 1);
        assert_eq!(email.sent().await[0].campaign, campaign);
        assert!(store.operations().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_without_applying() {
        let (store, _, dispatcher) = dispatcher();
        store.insert(BOOKINGS, "b1", fields(json!({"status": "pending"}))).await;
        store.set_available(false);

        let err = dispatcher
            .execute(&OfflineAction::CancelBooking {
                booking_id: BookingId::new("b1"),
            })
            .await
            .unwrap_err();

        assert!(err.is_unavailable());
        assert_eq!(
            store.document(BOOKINGS, "b1").await,
            Some(fields(json!({"status": "pending"})))
        );
    }
}
