//! Test doubles for the index and dispatcher.

use std::sync::{Arc, Mutex};

use axum::extract::ws::Utf8Bytes;
use uuid::Uuid;

use crate::error::Error;
use crate::index::Subscriber;

/// In-memory subscriber that records everything sent to it.
pub(crate) struct MockSubscriber {
    id: Uuid,
    user_id: Option<String>,
    auth_error: Option<fn() -> Error>,
    send_error: Option<fn() -> Error>,
    sent: Mutex<Vec<String>>,
}

impl MockSubscriber {
    pub(crate) fn anonymous() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: None,
            auth_error: None,
            send_error: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_user(user_id: &str) -> Arc<Self> {
        Arc::new(Self {
            user_id: Some(user_id.to_string()),
            ..Self::bare()
        })
    }

    pub(crate) fn with_auth_error(user_id: &str, auth_error: fn() -> Error) -> Arc<Self> {
        Arc::new(Self {
            user_id: Some(user_id.to_string()),
            auth_error: Some(auth_error),
            ..Self::bare()
        })
    }

    pub(crate) fn with_send_error(user_id: Option<&str>, send_error: fn() -> Error) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.map(str::to_string),
            send_error: Some(send_error),
            ..Self::bare()
        })
    }

    fn bare() -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            auth_error: None,
            send_error: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Messages delivered so far, as JSON strings.
    pub(crate) fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().expect("mock lock").clone()
    }
}

impl Subscriber for MockSubscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn authenticate(&self) -> Result<(), Error> {
        match self.auth_error {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }

    fn send_message(&self, message: Utf8Bytes) -> Result<(), Error> {
        if let Some(make) = self.send_error {
            return Err(make());
        }
        self.sent
            .lock()
            .expect("mock lock")
            .push(message.as_str().to_string());
        Ok(())
    }
}
