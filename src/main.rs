use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::info;
use teloxide::prelude::*;
use teloxide::types::Update as TgUpdate;

use windowbot::gui::{self, substitute, PageInfo, PageRequest, PagedTab, TabArgs, TextData};
use windowbot::store::{Filter, Query};
use windowbot::telegram::{self, TelegramTransport};
use windowbot::users::{self, GroupRecord};
use windowbot::{
    load_config, logging, BotBuilder, BotController, ButtonPress, CheckBoxButton, Flow, Handler,
    InputField, Leave, OutgoingMessage, Phase, SimpleButton, Store, TabClass, TabState,
    UpdateContext, Window, WindowClass,
};

const GROUPS_PER_PAGE: usize = 8;

const NOT_ADMIN_ALERT: &str = "Only administrators of this group can change its settings.";

const HELP: &str = "I keep group chats tidy. Add me to a group, write something there, then \
send /settings here to choose whether join and leave messages are removed and what new \
members are greeted with.";

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: PathBuf,
}

struct SettingsWindow;

static SETTINGS_WINDOW: SettingsWindow = SettingsWindow;
static SETTINGS_TABS: [&dyn TabClass; 2] = [&GroupListTab, &GroupSettingsTab];

impl WindowClass for SettingsWindow {
    fn tag(&self) -> &'static str {
        "GSET"
    }

    fn name(&self) -> &'static str {
        "group_settings"
    }

    fn tabs(&self) -> &'static [&'static dyn TabClass] {
        &SETTINGS_TABS
    }
}

/// Answers with an alert unless the user may manage `chat_id`.
async fn allowed(ctx: &mut UpdateContext, chat_id: i64) -> Result<bool> {
    let client = ctx.services.client.clone();
    let user_id = ctx.actor_id();
    if users::can_manage_group(ctx.session()?, &client, chat_id, user_id).await? {
        return Ok(true);
    }
    info!("user {} may not manage group {}", user_id, chat_id);
    ctx.answer_callback(Some(NOT_ADMIN_ALERT), true).await?;
    Ok(false)
}

/// Groups the user was seen in and may manage.
struct GroupListTab;

#[async_trait]
impl TabClass for GroupListTab {
    fn name(&self) -> &'static str {
        "group_list"
    }

    async fn build(&self, tab: &mut TabState, ctx: &mut UpdateContext, _args: TabArgs) -> Result<()> {
        tab.text.set_header("Group settings", false);
        gui::show_page(self, tab, ctx, PageRequest::Number(1)).await
    }

    async fn on_button(
        &self,
        tab: &mut TabState,
        ctx: &mut UpdateContext,
        press: ButtonPress,
    ) -> Result<()> {
        if gui::on_page_press(self, tab, ctx, &press).await? {
            return Ok(());
        }
        match press.callback.as_str() {
            "open_group" => {
                let chat_id: i64 = press
                    .arg
                    .parse()
                    .with_context(|| format!("bad group id {}", press.arg))?;
                if !allowed(ctx, chat_id).await? {
                    return Ok(());
                }
                let mut args = TabArgs::new();
                args.insert("chat_id".to_string(), chat_id.into());
                tab.switch_to(&GroupSettingsTab, args, Leave::Save);
                Ok(())
            }
            other => Err(anyhow!("unknown callback {}", other)),
        }
    }
}

#[async_trait]
impl PagedTab for GroupListTab {
    async fn fill_page(
        &self,
        tab: &mut TabState,
        ctx: &mut UpdateContext,
        request: PageRequest,
    ) -> Result<PageInfo> {
        let page = match request {
            PageRequest::Number(page) => page.max(1),
            _ => gui::current_page(tab)?,
        };
        let user_id = ctx.actor_id();
        let client = ctx.services.client.clone();
        let groups = users::manageable_groups(ctx.session()?, &client, user_id).await?;
        if groups.is_empty() {
            tab.text.set_body(
                "I have not seen you in any group you administer. Write something in such a group and try again.",
            );
            return Ok(PageInfo {
                total_pages: Some(1),
                ..PageInfo::default()
            });
        }
        tab.text.set_body("Choose a group:");
        let total_pages = groups.len().div_ceil(GROUPS_PER_PAGE);
        let page = page.min(total_pages);
        for group in groups.into_iter().skip((page - 1) * GROUPS_PER_PAGE).take(GROUPS_PER_PAGE) {
            tab.keyboard
                .add_row([SimpleButton::new(group.title, "open_group", group.chat_id)]);
        }
        Ok(PageInfo {
            total_pages: Some(total_pages),
            ..PageInfo::default()
        })
    }

    fn page_info_in_text(&self) -> bool {
        false
    }
}

/// Join/leave cleanup and the welcome text of one group.
struct GroupSettingsTab;

static SETTINGS_FIELDS: [InputField; 1] = [InputField::new("welcome_text")
    .prompt("Send a new welcome text, or - to remove it. Use {{name}} for the new member's name.")];

impl GroupSettingsTab {
    async fn group(tab: &TabState, ctx: &mut UpdateContext) -> Result<GroupRecord> {
        let chat_id: i64 = tab
            .field("chat_id")?
            .ok_or_else(|| anyhow!("settings tab without chat_id"))?;
        ctx.session()?
            .first(Query::filter(Filter::eq("chat_id", chat_id)))
            .await?
            .ok_or_else(|| anyhow!("group {} is gone", chat_id))
    }
}

#[async_trait]
impl TabClass for GroupSettingsTab {
    fn name(&self) -> &'static str {
        "group_settings"
    }

    fn input_fields(&self) -> &'static [InputField] {
        &SETTINGS_FIELDS
    }

    async fn build(&self, tab: &mut TabState, ctx: &mut UpdateContext, args: TabArgs) -> Result<()> {
        let chat_id = args
            .get("chat_id")
            .and_then(|value| value.as_i64())
            .ok_or_else(|| anyhow!("settings tab needs a chat_id"))?;
        tab.set_field("chat_id", chat_id)?;
        let group = GroupSettingsTab::group(tab, ctx).await?;
        tab.text.set_header("Settings of {title}", false);
        tab.text.set_body("Welcome text: {welcome}");
        tab.keyboard.add_row([CheckBoxButton::new(
            "Remove join messages",
            "toggle",
            "remove_joins",
            group.remove_joins,
        )]);
        tab.keyboard.add_row([CheckBoxButton::new(
            "Remove leave messages",
            "toggle",
            "remove_leaves",
            group.remove_leaves,
        )]);
        tab.keyboard.add_row([SimpleButton::new("« Back", "back", "")]);
        Ok(())
    }

    async fn text_data(&self, tab: &TabState, ctx: &mut UpdateContext) -> Result<TextData> {
        let group = GroupSettingsTab::group(tab, ctx).await?;
        let mut data = TextData::new();
        data.insert("title".to_string(), group.title);
        data.insert(
            "welcome".to_string(),
            group.welcome_text.unwrap_or_else(|| "none".to_string()),
        );
        Ok(data)
    }

    async fn on_button(
        &self,
        tab: &mut TabState,
        ctx: &mut UpdateContext,
        press: ButtonPress,
    ) -> Result<()> {
        match press.callback.as_str() {
            "toggle" => {
                let checked = press.checked.unwrap_or(false);
                let mut group = GroupSettingsTab::group(tab, ctx).await?;
                if !allowed(ctx, group.chat_id).await? {
                    tab.switch_to(&GroupListTab, TabArgs::new(), Leave::Destroy);
                    return Ok(());
                }
                match press.arg.as_str() {
                    "remove_joins" => group.remove_joins = checked,
                    "remove_leaves" => group.remove_leaves = checked,
                    other => return Err(anyhow!("unknown setting {}", other)),
                }
                ctx.session()?.add(&mut group).await?;
                Ok(())
            }
            "back" => {
                tab.switch_to(&GroupListTab, TabArgs::new(), Leave::Destroy);
                Ok(())
            }
            other => Err(anyhow!("unknown callback {}", other)),
        }
    }

    async fn on_input(
        &self,
        tab: &mut TabState,
        ctx: &mut UpdateContext,
        method: &str,
        text: &str,
    ) -> Result<()> {
        if method != "process_welcome_text" {
            return Err(anyhow!("unknown input method {}", method));
        }
        let mut group = GroupSettingsTab::group(tab, ctx).await?;
        let user_id = ctx.actor_id();
        let client = ctx.services.client.clone();
        if !users::can_manage_group(ctx.session()?, &client, group.chat_id, user_id).await? {
            ctx.reply(NOT_ADMIN_ALERT)?;
            return Ok(());
        }
        let text = text.trim();
        group.welcome_text = match text {
            "-" | "" => None,
            text => Some(text.to_string()),
        };
        ctx.session()?.add(&mut group).await?;
        Ok(())
    }
}

struct Commands;

#[async_trait]
impl Handler for Commands {
    fn name(&self) -> &str {
        "commands"
    }

    fn check(&self, update: &windowbot::Update) -> bool {
        matches!(update.command(), Some("start" | "help" | "settings"))
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let update = ctx.update.clone();
        let (Some(command), Some(chat)) = (update.command(), update.chat()) else {
            return Ok(Flow::Continue);
        };
        match command {
            "settings" if chat.private => {
                let user_id = ctx.actor_id();
                let mut window =
                    Window::build(&SETTINGS_WINDOW, ctx, chat.id, user_id, TabArgs::new()).await?;
                window.render(ctx).await?;
            }
            "settings" => ctx.reply("Send /settings to me in a private chat.")?,
            _ => ctx.reply(HELP)?,
        }
        Ok(Flow::Stop)
    }
}

/// Removes join/leave service messages and greets new members.
struct MemberChanges;

#[async_trait]
impl Handler for MemberChanges {
    fn name(&self) -> &str {
        "member_changes"
    }

    fn check(&self, update: &windowbot::Update) -> bool {
        matches!(update, windowbot::Update::MemberChange { .. })
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let update = ctx.update.clone();
        let windowbot::Update::MemberChange {
            chat,
            message_id,
            joined,
            left,
        } = &*update
        else {
            return Ok(Flow::Continue);
        };
        let group = ctx.group()?.clone();
        let remove = (!joined.is_empty() && group.remove_joins) || (left.is_some() && group.remove_leaves);
        if remove {
            if let Err(err) = ctx.services.client.delete_message(chat.id, *message_id).await {
                info!("could not delete service message in {}: {}", chat.id, err);
            }
        }
        if let Some(welcome) = &group.welcome_text {
            for user in joined {
                let mut data = TextData::new();
                data.insert("name".to_string(), user.first_name.clone());
                let text = substitute(welcome, &data).unwrap_or_else(|_| welcome.clone());
                let message = OutgoingMessage::new(chat.id, text)
                    .priority(ctx.services.sender.default_priority());
                ctx.send(message)?;
            }
        }
        Ok(Flow::Stop)
    }
}

async fn handle_message(msg: Message, controller: Arc<BotController>) -> Result<()> {
    controller.process_update(telegram::message_update(&msg)).await;
    Ok(())
}

async fn handle_callback(query: CallbackQuery, controller: Arc<BotController>) -> Result<()> {
    controller
        .process_update(telegram::callback_update(&query))
        .await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let forwarding = logging::init("info")?;

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let store = Store::open(&config.data_path)?;
    let admin_chat_id = config.admin_chat_id;

    let bot = Bot::new(config.token.clone());
    let transport = Arc::new(TelegramTransport::new(bot.clone()));

    let mut builder = BotBuilder::new(config, store, transport)?.window(&SETTINGS_WINDOW)?;
    let commands = builder.groups().add_left("COMMANDS")?;
    let member_changes = builder.groups().add_left("MEMBER_CHANGES")?;
    let controller = builder
        .handler(Phase::Main, commands, Arc::new(Commands))
        .handler(Phase::Main, member_changes, Arc::new(MemberChanges))
        .build()?;
    let controller = Arc::new(controller);
    controller.start()?;

    if let Some(chat_id) = admin_chat_id {
        forwarding.attach(controller.services().sender.clone(), chat_id);
        info!("forwarding warnings to chat {}", chat_id);
    }

    let handler = dptree::entry()
        .branch(TgUpdate::filter_message().endpoint(handle_message))
        .branch(TgUpdate::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![controller.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    controller.shutdown().await;
    Ok(())
}
