use moka::future::Cache;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Post, SessionUser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    #[default]
    SignedOut,
    Admin,
    Viewer,
}

impl SessionMode {
    fn for_user(user: &SessionUser) -> Self {
        if user.is_admin {
            SessionMode::Admin
        } else {
            SessionMode::Viewer
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user: Option<SessionUser>,
    pub mode: SessionMode,
    /// Posts created during this session, newest first.
    pub posts: Vec<Post>,
}

impl SessionState {
    pub fn is_admin(&self) -> bool {
        self.mode == SessionMode::Admin
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Login(SessionUser),
    Logout,
    AddPost(Post),
    UpdateUser(SessionUser),
}

/// Posts kept per session; older ones fall off the end.
pub const MAX_SESSION_POSTS: usize = 20;

pub fn reduce(state: SessionState, action: Action) -> SessionState {
    match action {
        Action::Login(user) => SessionState {
            mode: SessionMode::for_user(&user),
            user: Some(user),
            posts: Vec::new(),
        },
        Action::Logout => SessionState::default(),
        Action::AddPost(post) => {
            if state.user.is_none() {
                return state;
            }
            let mut posts = Vec::with_capacity(MAX_SESSION_POSTS);
            posts.push(post);
            posts.extend(state.posts.into_iter().take(MAX_SESSION_POSTS - 1));
            SessionState { posts, ..state }
        }
        Action::UpdateUser(user) => {
            if state.user.is_none() {
                return state;
            }
            SessionState {
                mode: SessionMode::for_user(&user),
                user: Some(user),
                ..state
            }
        }
    }
}

/// Console sessions keyed by bearer token. Held in memory only.
///
/// Each session sits behind its own lock so concurrent actions on one token
/// are applied in sequence.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Cache<String, Arc<Mutex<SessionState>>>,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(1_000)
            .time_to_idle(idle_timeout)
            .build();
        Self { sessions }
    }

    pub async fn login(&self, user: SessionUser) -> (String, SessionState) {
        let token = Uuid::new_v4().simple().to_string();
        let state = reduce(SessionState::default(), Action::Login(user));
        self.sessions
            .insert(token.clone(), Arc::new(Mutex::new(state.clone())))
            .await;
        info!(user_id = ?state.user.as_ref().map(|u| &u.id), "Session started");
        (token, state)
    }

    /// Snapshot of a live session.
    pub async fn get(&self, token: &str) -> Option<SessionState> {
        let session = self.sessions.get(token)?;
        let state = session.lock().await.clone();
        state.user.is_some().then_some(state)
    }

    /// Applies `action` to an existing session. Unknown tokens yield `None`.
    pub async fn dispatch(&self, token: &str, action: Action) -> Option<SessionState> {
        let session = self.sessions.get(token)?;
        let mut state = session.lock().await;
        // Ended by a concurrent logout while we waited for the lock.
        state.user.as_ref()?;
        let next = reduce(std::mem::take(&mut *state), action);
        *state = next.clone();
        if next.user.is_none() {
            self.sessions.invalidate(token).await;
            debug!("Session ended");
        }
        Some(next)
    }
}
