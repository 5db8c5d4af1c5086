use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::context::UpdateContext;
use crate::dispatcher::{Flow, Handler, Phase, StagedDispatcher};
use crate::groups::{self, GroupManager};
use crate::invoker::InvokeError;
use crate::store::{Filter, Query, Record, Session};
use crate::update::{ChatRef, Update, UserRef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Option<i64>,
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for UserRecord {
    const TABLE: &'static str = "user";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: Option<i64>,
    pub chat_id: i64,
    pub title: String,
    #[serde(default)]
    pub remove_joins: bool,
    #[serde(default)]
    pub remove_leaves: bool,
    #[serde(default)]
    pub welcome_text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for GroupRecord {
    const TABLE: &'static str = "group";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

/// A user seen writing in a group chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMemberRecord {
    pub id: Option<i64>,
    pub chat_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub role: Role,
}

impl Record for GroupMemberRecord {
    const TABLE: &'static str = "group_member";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

fn telegram_id(user: &UserRef) -> i64 {
    i64::try_from(user.id).unwrap_or(i64::MAX)
}

/// Creation is committed at once so the row survives a failing update.
pub async fn get_or_create_user(session: &mut Session, user: &UserRef) -> Result<UserRecord> {
    let user_id = telegram_id(user);
    let query = Query::filter(Filter::eq("user_id", user_id));
    if let Some(mut record) = session.first::<UserRecord>(query).await? {
        if record.username != user.username || record.first_name != user.first_name {
            record.username = user.username.clone();
            record.first_name = user.first_name.clone();
            session.add(&mut record).await?;
        }
        return Ok(record);
    }
    let mut record = UserRecord {
        id: None,
        user_id,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        created_at: Some(Utc::now()),
    };
    session.add(&mut record).await?;
    session.commit().await?;
    info!("created user {}", user);
    Ok(record)
}

pub async fn get_or_create_group(session: &mut Session, chat: &ChatRef) -> Result<GroupRecord> {
    let query = Query::filter(Filter::eq("chat_id", chat.id));
    let title = chat.title.clone().unwrap_or_else(|| chat.id.to_string());
    if let Some(mut record) = session.first::<GroupRecord>(query).await? {
        if record.title != title {
            record.title = title;
            session.add(&mut record).await?;
        }
        return Ok(record);
    }
    let mut record = GroupRecord {
        id: None,
        chat_id: chat.id,
        title,
        remove_joins: false,
        remove_leaves: false,
        welcome_text: None,
        created_at: Some(Utc::now()),
    };
    session.add(&mut record).await?;
    session.commit().await?;
    info!("created group {} ({})", record.title, chat.id);
    Ok(record)
}

async fn remember_member(session: &mut Session, chat_id: i64, user_id: i64) -> Result<()> {
    let filter = Filter::eq("chat_id", chat_id).and(Filter::eq("user_id", user_id));
    if session.count::<GroupMemberRecord>(filter).await? == 0 {
        let mut member = GroupMemberRecord {
            id: None,
            chat_id,
            user_id,
            role: Role::User,
        };
        session.add(&mut member).await?;
    }
    Ok(())
}

/// Groups the user has been seen in, by title.
pub async fn user_groups(session: &Session, user_id: i64) -> Result<Vec<GroupRecord>> {
    let members: Vec<GroupMemberRecord> = session
        .select(&Query::filter(Filter::eq("user_id", user_id)))
        .await?;
    if members.is_empty() {
        return Ok(Vec::new());
    }
    let query = Query::filter(Filter::is_in(
        "chat_id",
        members.iter().map(|member| member.chat_id),
    ))
    .order_by("title", crate::store::Order::Asc);
    session.select(&query).await
}

/// Chat owners and administrators may manage a group, and so may members
/// holding the admin role. A chat the bot cannot query counts as a refusal.
pub async fn can_manage_group(
    session: &Session,
    client: &Client,
    chat_id: i64,
    user_id: i64,
) -> Result<bool> {
    let filter = Filter::eq("chat_id", chat_id).and(Filter::eq("user_id", user_id));
    let member = session
        .first::<GroupMemberRecord>(Query::filter(filter))
        .await?;
    if member.map_or(false, |member| member.role == Role::Admin) {
        return Ok(true);
    }
    let Ok(telegram_user) = u64::try_from(user_id) else {
        return Ok(false);
    };
    match client.member_status(chat_id, telegram_user).await {
        Ok(status) => Ok(status.is_admin()),
        Err(InvokeError::Cancelled) => Err(InvokeError::Cancelled.into()),
        Err(err) => {
            info!("no member status of {} in {}: {}", user_id, chat_id, err);
            Ok(false)
        }
    }
}

/// The user's groups that `can_manage_group` lets them change.
pub async fn manageable_groups(
    session: &Session,
    client: &Client,
    user_id: i64,
) -> Result<Vec<GroupRecord>> {
    let mut groups = Vec::new();
    for group in user_groups(session, user_id).await? {
        if can_manage_group(session, client, group.chat_id, user_id).await? {
            groups.push(group);
        }
    }
    Ok(groups)
}

struct CreateSession;

#[async_trait]
impl Handler for CreateSession {
    fn name(&self) -> &str {
        "create_session"
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        ctx.session = Some(ctx.services.store.begin());
        Ok(Flow::Handled)
    }
}

struct LoadUser;

#[async_trait]
impl Handler for LoadUser {
    fn name(&self) -> &str {
        "load_user"
    }

    fn check(&self, update: &Update) -> bool {
        update.actor().is_some()
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let update = ctx.update.clone();
        if let Some(actor) = update.actor() {
            let user = get_or_create_user(ctx.session()?, actor).await?;
            ctx.user = Some(user);
        }
        Ok(Flow::Handled)
    }
}

struct LoadGroup;

#[async_trait]
impl Handler for LoadGroup {
    fn name(&self) -> &str {
        "load_group"
    }

    fn check(&self, update: &Update) -> bool {
        update.chat().map_or(false, |chat| !chat.private)
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let update = ctx.update.clone();
        let Some(chat) = update.chat() else {
            return Ok(Flow::Handled);
        };
        let session = ctx.session()?;
        let group = get_or_create_group(session, chat).await?;
        if let Update::Message(message) = &*update {
            if let Some(from) = &message.from {
                remember_member(session, chat.id, telegram_id(from)).await?;
            }
        }
        ctx.group = Some(group);
        Ok(Flow::Handled)
    }
}

struct SetCallbackQuery;

#[async_trait]
impl Handler for SetCallbackQuery {
    fn name(&self) -> &str {
        "set_callback_query"
    }

    fn check(&self, update: &Update) -> bool {
        update.callback_query().is_some()
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        ctx.callback_query = ctx.update.callback_query().cloned();
        ctx.callback_answered = false;
        Ok(Flow::Handled)
    }
}

struct CommitSession;

#[async_trait]
impl Handler for CommitSession {
    fn name(&self) -> &str {
        "commit_session"
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        if let Some(session) = ctx.session.as_mut() {
            session.commit().await?;
        }
        Ok(Flow::Handled)
    }
}

struct RollbackSession;

#[async_trait]
impl Handler for RollbackSession {
    fn name(&self) -> &str {
        "rollback_session"
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        if let Some(session) = ctx.session.as_mut() {
            session.rollback();
        }
        Ok(Flow::Handled)
    }
}

struct ResetCallbackQuery;

#[async_trait]
impl Handler for ResetCallbackQuery {
    fn name(&self) -> &str {
        "reset_callback_query"
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        // Stop the client-side spinner if nothing answered the query.
        if let Err(err) = ctx.answer_callback(None, false).await {
            warn!("failed to answer callback query: {:#}", err);
        }
        ctx.callback_query = None;
        Ok(Flow::Handled)
    }
}

struct ResetGroup;

#[async_trait]
impl Handler for ResetGroup {
    fn name(&self) -> &str {
        "reset_group"
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        ctx.group = None;
        Ok(Flow::Handled)
    }
}

struct ResetUser;

#[async_trait]
impl Handler for ResetUser {
    fn name(&self) -> &str {
        "reset_user"
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        ctx.user = None;
        Ok(Flow::Handled)
    }
}

struct CloseSession;

#[async_trait]
impl Handler for CloseSession {
    fn name(&self) -> &str {
        "close_session"
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        if let Some(mut session) = ctx.session.take() {
            session.close();
        }
        Ok(Flow::Handled)
    }
}

/// Registers the session, user, group and callback query lifecycle handlers.
pub fn register_handlers(dispatcher: &mut StagedDispatcher, groups: &GroupManager) -> Result<()> {
    dispatcher.add_handler(
        Phase::Initialize,
        groups.get(groups::CREATE_SESSION)?,
        Arc::new(CreateSession),
    );
    dispatcher.add_handler(
        Phase::Initialize,
        groups.get(groups::LOAD_USER)?,
        Arc::new(LoadUser),
    );
    dispatcher.add_handler(
        Phase::Initialize,
        groups.get(groups::LOAD_GROUP)?,
        Arc::new(LoadGroup),
    );
    dispatcher.add_handler(
        Phase::Initialize,
        groups.get(groups::SET_CALLBACK_QUERY)?,
        Arc::new(SetCallbackQuery),
    );
    dispatcher.add_handler(
        Phase::Finish,
        groups.get(groups::COMMIT_SESSION)?,
        Arc::new(CommitSession),
    );
    dispatcher.add_handler(
        Phase::Restore,
        groups.get(groups::ROLLBACK_SESSION)?,
        Arc::new(RollbackSession),
    );
    dispatcher.add_handler(
        Phase::Finalize,
        groups.get(groups::RESET_CALLBACK_QUERY)?,
        Arc::new(ResetCallbackQuery),
    );
    dispatcher.add_handler(
        Phase::Finalize,
        groups.get(groups::RESET_GROUP)?,
        Arc::new(ResetGroup),
    );
    dispatcher.add_handler(
        Phase::Finalize,
        groups.get(groups::RESET_USER)?,
        Arc::new(ResetUser),
    );
    dispatcher.add_handler(
        Phase::Finalize,
        groups.get(groups::CLOSE_SESSION)?,
        Arc::new(CloseSession),
    );
    Ok(())
}
