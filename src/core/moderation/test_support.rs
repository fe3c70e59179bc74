// Test doubles shared by the moderation tests: a scripted platform and an
// in-memory store.

use super::moderation_errors::{ApiError, StoreError};
use super::moderation_models::{
    ActionKind, ChatMember, ChatPermissions, GroupSettings, MemberPermissions, MemberStatus,
    ScamScore,
};
use super::moderation_ports::{ModerationStore, PlatformClient, RiskEscalation, SendOptions};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

pub const BOT_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    SendMessage {
        chat_id: u64,
        text: String,
    },
    DirectMessage {
        user_id: u64,
        text: String,
    },
    DeleteMessage {
        chat_id: u64,
        channel_id: u64,
        message_id: u64,
    },
    Restrict {
        chat_id: u64,
        user_id: u64,
        permissions: ChatPermissions,
        until_epoch_secs: i64,
    },
    Ban {
        chat_id: u64,
        user_id: u64,
        until_epoch_secs: Option<i64>,
    },
    Unban {
        chat_id: u64,
        user_id: u64,
        only_if_banned: bool,
    },
}

/// Records every mutating call and replays scripted failures per method.
pub struct FakePlatform {
    calls: Mutex<Vec<(Instant, PlatformCall)>>,
    reads: AtomicUsize,
    failures: Mutex<HashMap<&'static str, VecDeque<ApiError>>>,
    panics: Mutex<HashSet<&'static str>>,
    admins: Mutex<HashMap<u64, Vec<u64>>>,
    bot_permissions: Mutex<MemberPermissions>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
            panics: Mutex::new(HashSet::new()),
            admins: Mutex::new(HashMap::new()),
            bot_permissions: Mutex::new(MemberPermissions {
                can_delete_messages: true,
                can_restrict_members: true,
                can_ban_members: true,
            }),
        }
    }

    /// The next call to `method` fails with `err`. Queues up if repeated.
    pub fn fail_next(&self, method: &'static str, err: ApiError) {
        self.failures
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(err);
    }

    /// The next call to `method` panics after it is recorded.
    pub fn panic_next(&self, method: &'static str) {
        self.panics.lock().unwrap().insert(method);
    }

    pub fn set_admins(&self, chat_id: u64, admins: Vec<u64>) {
        self.admins.lock().unwrap().insert(chat_id, admins);
    }

    pub fn set_bot_permissions(&self, permissions: MemberPermissions) {
        *self.bot_permissions.lock().unwrap() = permissions;
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.timed_calls().into_iter().map(|(_, c)| c).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, PlatformCall)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn record(&self, method: &'static str, call: PlatformCall) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push((Instant::now(), call));
        self.scripted(method)
    }

    fn scripted(&self, method: &'static str) -> Result<(), ApiError> {
        let should_panic = self.panics.lock().unwrap().remove(method);
        if should_panic {
            panic!("scripted panic in {method}");
        }
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|q| q.pop_front())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn member(&self, chat_id: u64, user_id: u64) -> ChatMember {
        if user_id == BOT_ID {
            return ChatMember {
                user_id,
                status: MemberStatus::Administrator,
                permissions: *self.bot_permissions.lock().unwrap(),
            };
        }
        let is_admin = self
            .admins
            .lock()
            .unwrap()
            .get(&chat_id)
            .is_some_and(|ids| ids.contains(&user_id));
        ChatMember {
            user_id,
            status: if is_admin {
                MemberStatus::Administrator
            } else {
                MemberStatus::Member
            },
            permissions: MemberPermissions::default(),
        }
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn send_message(
        &self,
        chat_id: u64,
        text: &str,
        _opts: SendOptions,
    ) -> Result<(), ApiError> {
        self.record(
            "send_message",
            PlatformCall::SendMessage {
                chat_id,
                text: text.to_string(),
            },
        )
    }

    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), ApiError> {
        self.record(
            "send_direct_message",
            PlatformCall::DirectMessage {
                user_id,
                text: text.to_string(),
            },
        )
    }

    async fn delete_message(
        &self,
        chat_id: u64,
        channel_id: u64,
        message_id: u64,
    ) -> Result<(), ApiError> {
        self.record(
            "delete_message",
            PlatformCall::DeleteMessage {
                chat_id,
                channel_id,
                message_id,
            },
        )
    }

    async fn restrict_member(
        &self,
        chat_id: u64,
        user_id: u64,
        permissions: ChatPermissions,
        until_epoch_secs: i64,
    ) -> Result<(), ApiError> {
        self.record(
            "restrict_member",
            PlatformCall::Restrict {
                chat_id,
                user_id,
                permissions,
                until_epoch_secs,
            },
        )
    }

    async fn ban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        until_epoch_secs: Option<i64>,
    ) -> Result<(), ApiError> {
        self.record(
            "ban_member",
            PlatformCall::Ban {
                chat_id,
                user_id,
                until_epoch_secs,
            },
        )
    }

    async fn unban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        only_if_banned: bool,
    ) -> Result<(), ApiError> {
        self.record(
            "unban_member",
            PlatformCall::Unban {
                chat_id,
                user_id,
                only_if_banned,
            },
        )
    }

    async fn get_member(&self, chat_id: u64, user_id: u64) -> Result<ChatMember, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.scripted("get_member")?;
        Ok(self.member(chat_id, user_id))
    }

    async fn get_administrators(&self, chat_id: u64) -> Result<Vec<ChatMember>, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.scripted("get_administrators")?;
        let ids = self
            .admins
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .unwrap_or_default();
        Ok(ids.into_iter().map(|id| self.member(chat_id, id)).collect())
    }
}

/// DashMap-backed store, plus an escalation recorder.
#[derive(Default)]
pub struct MemoryStore {
    pub actions: Mutex<Vec<(u64, u64, ActionKind, String)>>,
    pub scam_events: Mutex<Vec<(u64, u64, u64, ScamScore, String)>>,
    pub escalations: Mutex<Vec<(u64, String)>>,
    team: DashSet<u64>,
    blacklist: DashMap<u64, String>,
    groups: DashMap<u64, GroupSettings>,
    broken: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one managed chat, all features on.
    pub fn with_group(chat_id: u64) -> Self {
        let store = Self::new();
        store
            .groups
            .insert(chat_id, GroupSettings::new(chat_id, "test group"));
        store
    }

    pub fn set_group(&self, settings: GroupSettings) {
        self.groups.insert(settings.chat_id, settings);
    }

    /// Every call fails from now on.
    pub fn break_store(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<(u64, u64, ActionKind, String)> {
        self.actions.lock().unwrap().clone()
    }

    pub fn scam_actions(&self) -> Vec<String> {
        self.scam_events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, _, _, action)| action.clone())
            .collect()
    }

    pub fn escalations(&self) -> Vec<(u64, String)> {
        self.escalations.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(StoreError::StorageError("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ModerationStore for MemoryStore {
    async fn log_action(
        &self,
        user_id: u64,
        chat_id: u64,
        action: ActionKind,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.actions
            .lock()
            .unwrap()
            .push((user_id, chat_id, action, reason.to_string()));
        Ok(())
    }

    async fn log_scam_event(
        &self,
        chat_id: u64,
        user_id: u64,
        message_id: u64,
        score: &ScamScore,
        action: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.scam_events.lock().unwrap().push((
            chat_id,
            user_id,
            message_id,
            score.clone(),
            action.to_string(),
        ));
        Ok(())
    }

    async fn is_team_member(&self, user_id: u64) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.team.contains(&user_id))
    }

    async fn add_team_member(&self, user_id: u64, _added_by: u64) -> Result<(), StoreError> {
        self.check()?;
        self.team.insert(user_id);
        Ok(())
    }

    async fn remove_team_member(&self, user_id: u64) -> Result<(), StoreError> {
        self.check()?;
        self.team.remove(&user_id);
        Ok(())
    }

    async fn is_blacklisted(&self, user_id: u64) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.blacklist.contains_key(&user_id))
    }

    async fn add_to_blacklist(
        &self,
        user_id: u64,
        _actor_id: u64,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.blacklist.insert(user_id, reason.to_string());
        Ok(())
    }

    async fn remove_from_blacklist(&self, user_id: u64) -> Result<(), StoreError> {
        self.check()?;
        self.blacklist.remove(&user_id);
        Ok(())
    }

    async fn get_group_settings(&self, chat_id: u64) -> Result<Option<GroupSettings>, StoreError> {
        self.check()?;
        Ok(self.groups.get(&chat_id).map(|g| g.clone()))
    }

    async fn register_group(&self, chat_id: u64, title: &str) -> Result<(), StoreError> {
        self.check()?;
        self.groups
            .entry(chat_id)
            .or_insert_with(|| GroupSettings::new(chat_id, title));
        Ok(())
    }

    async fn get_managed_groups(&self) -> Result<Vec<GroupSettings>, StoreError> {
        self.check()?;
        Ok(self.groups.iter().map(|g| g.clone()).collect())
    }
}

#[async_trait]
impl RiskEscalation for MemoryStore {
    async fn escalate(&self, user_id: u64, reason: &str) {
        self.escalations
            .lock()
            .unwrap()
            .push((user_id, reason.to_string()));
    }
}
