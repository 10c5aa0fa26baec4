use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// The logged-in responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

pub trait CurrentUserProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;
}

/// Holds whoever the session layer last reported.
#[derive(Debug, Default)]
pub struct StaticUserProvider {
    user: RwLock<Option<User>>,
}

impl StaticUserProvider {
    pub fn new(user: Option<User>) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    pub fn set(&self, user: Option<User>) {
        *self.user.write() = user;
    }
}

impl CurrentUserProvider for StaticUserProvider {
    fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }
}
