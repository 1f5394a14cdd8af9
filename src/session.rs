//! Process-wide session state
//!
//! [`SessionState::start`] follows the identity provider's auth changes and
//! keeps the signed-in user together with their profile. Anything may read
//! it; only the listener task and a successful profile save write to it.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::{AuthUser, IdentityProvider};
use crate::models::UserProfile;
use crate::profile::ProfileService;

/// What the session knows at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<AuthUser>,
    pub profile: Option<UserProfile>,
    /// The first auth event has been processed
    pub ready: bool,
}

impl SessionSnapshot {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn is_admin(&self) -> bool {
        self.profile.as_ref().map_or(false, UserProfile::is_admin)
    }
}

struct Inner {
    state: watch::Sender<SessionSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn stop(&self) -> bool {
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Signed-in user and profile, kept current for the whole process
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
}

impl SessionState {
    /// Subscribe to `identity` and start tracking the session
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(identity: Arc<dyn IdentityProvider>, profiles: ProfileService) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let inner = Arc::new(Inner {
            state,
            task: Mutex::new(None),
        });

        let mut auth = identity.on_auth_change();
        let weak = Arc::downgrade(&inner);
        let task = tokio::spawn(async move {
            loop {
                let user = (*auth.borrow_and_update()).clone();
                let snapshot = match user {
                    Some(user) => {
                        let profile = match profiles.ensure_profile(&user).await {
                            Ok(profile) => Some(profile),
                            Err(e) => {
                                warn!("could not load profile for {}: {}", user.id, e);
                                None
                            }
                        };
                        info!("session started for {}", user.id);
                        SessionSnapshot {
                            user: Some(user),
                            profile,
                            ready: true,
                        }
                    }
                    None => {
                        debug!("no user signed in");
                        SessionSnapshot {
                            ready: true,
                            ..SessionSnapshot::default()
                        }
                    }
                };

                match weak.upgrade() {
                    Some(inner) => {
                        inner.state.send_replace(snapshot);
                    }
                    None => break,
                }
                if auth.changed().await.is_err() {
                    debug!("identity provider closed, session listener ends");
                    break;
                }
            }
        });

        match inner.task.lock() {
            Ok(mut guard) => *guard = Some(task),
            Err(poisoned) => *poisoned.into_inner() = Some(task),
        }
        Self { inner }
    }

    /// Current snapshot
    pub fn current(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every session change
    pub fn changes(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.state.borrow().user.clone()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.inner.state.borrow().profile.clone()
    }

    async fn wait_until<F>(&self, predicate: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let mut rx = self.changes();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&*snapshot) {
                    return (*snapshot).clone();
                }
            }
            // the sender lives in `self`, so the channel stays open
            if rx.changed().await.is_err() {
                return self.current();
            }
        }
    }

    /// Wait until the first auth event has been processed
    pub async fn wait_ready(&self) -> SessionSnapshot {
        self.wait_until(|s| s.ready).await
    }

    /// Wait until `user_id` is signed in and their profile has been looked up
    pub async fn wait_for_user(&self, user_id: &str) -> SessionSnapshot {
        self.wait_until(|s| s.user_id() == Some(user_id)).await
    }

    /// Wait until nobody is signed in
    pub async fn wait_signed_out(&self) -> SessionSnapshot {
        self.wait_until(|s| s.ready && s.user.is_none()).await
    }

    /// Replace the profile after a successful save by its owner
    pub(crate) fn set_profile(&self, profile: UserProfile) {
        self.inner.state.send_if_modified(|snapshot| {
            if snapshot.user_id() == Some(profile.id.as_str()) {
                snapshot.profile = Some(profile);
                true
            } else {
                false
            }
        });
    }

    /// Stop following auth changes. Calling it again does nothing.
    pub fn shutdown(&self) {
        if self.inner.stop() {
            info!("session listener stopped");
        }
    }
}
