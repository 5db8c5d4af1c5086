use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::mock::{labels, press, test_config, text_message, MockTransport};
use crate::bot::{BotBuilder, BotController};
use crate::context::UpdateContext;
use crate::dispatcher::{Flow, Handler, Outcome, Phase};
use crate::gui::{
    ButtonPress, CheckBoxButton, InputField, Leave, SimpleButton, TabArgs, TabClass, TabRecord,
    TabState, TextData, Window, WindowClass, WindowRecord, PERMISSION_ALERT, STALE_ALERT,
};
use crate::store::{Query, Record, Store};
use crate::transport::LiveMessage;
use crate::update::Update;

const CHAT: i64 = 100;
const OWNER: u64 = 1;

struct MenuTab;

#[async_trait]
impl TabClass for MenuTab {
    fn name(&self) -> &'static str {
        "menu"
    }

    async fn build(&self, tab: &mut TabState, _ctx: &mut UpdateContext, _args: TabArgs) -> Result<()> {
        tab.text.set_body("Menu");
        tab.keyboard.add_row([SimpleButton::new("Open", "open", 7)]);
        tab.keyboard
            .add_row([CheckBoxButton::new("Flag", "flag", "alpha", false)]);
        Ok(())
    }

    async fn on_button(
        &self,
        tab: &mut TabState,
        _ctx: &mut UpdateContext,
        press: ButtonPress,
    ) -> Result<()> {
        match press.callback.as_str() {
            "open" => {
                let mut args = TabArgs::new();
                args.insert("item".to_string(), json!(press.arg.parse::<i64>()?));
                tab.switch_to(&DetailTab, args, Leave::Save);
            }
            "flag" => {
                let mut presses: Vec<(bool, String)> = tab.field("presses")?.unwrap_or_default();
                presses.push((press.checked.unwrap_or_default(), press.arg));
                tab.set_field("presses", presses)?;
            }
            other => anyhow::bail!("unexpected callback {}", other),
        }
        Ok(())
    }
}

static DETAIL_FIELDS: [InputField; 1] = [InputField::new("note").prompt("Send a note")];

struct DetailTab;

#[async_trait]
impl TabClass for DetailTab {
    fn name(&self) -> &'static str {
        "detail"
    }

    fn input_fields(&self) -> &'static [InputField] {
        &DETAIL_FIELDS
    }

    async fn build(&self, tab: &mut TabState, _ctx: &mut UpdateContext, args: TabArgs) -> Result<()> {
        let item = args.get("item").and_then(|item| item.as_i64()).unwrap_or_default();
        tab.set_field("item", item)?;
        tab.text.set_body("Item {item}\nNote: {note}");
        tab.keyboard.add_row([SimpleButton::new("Back", "back", "")]);
        Ok(())
    }

    async fn text_data(&self, tab: &TabState, _ctx: &mut UpdateContext) -> Result<TextData> {
        let mut data = TextData::new();
        let item: i64 = tab.field("item")?.unwrap_or_default();
        let note: String = tab.field("note")?.unwrap_or_else(|| "-".to_string());
        data.insert("item".to_string(), item.to_string());
        data.insert("note".to_string(), note);
        Ok(data)
    }

    async fn on_button(
        &self,
        tab: &mut TabState,
        _ctx: &mut UpdateContext,
        _press: ButtonPress,
    ) -> Result<()> {
        tab.switch_to(&MenuTab, TabArgs::new(), Leave::Destroy);
        Ok(())
    }

    async fn on_input(
        &self,
        tab: &mut TabState,
        _ctx: &mut UpdateContext,
        method: &str,
        text: &str,
    ) -> Result<()> {
        assert_eq!(method, "process_note");
        tab.set_field("note", text)
    }
}

static TEST_TABS: [&dyn TabClass; 2] = [&MenuTab, &DetailTab];

struct TestWindow;

impl WindowClass for TestWindow {
    fn tag(&self) -> &'static str {
        "TWIN"
    }

    fn name(&self) -> &'static str {
        "test_window"
    }

    fn tabs(&self) -> &'static [&'static dyn TabClass] {
        &TEST_TABS
    }
}

static TEST_WINDOW: TestWindow = TestWindow;

struct OpenWindow;

#[async_trait]
impl Handler for OpenWindow {
    fn name(&self) -> &str {
        "open_window"
    }

    fn check(&self, update: &Update) -> bool {
        update.command() == Some("open")
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let chat_id = ctx.update.chat_id().unwrap_or_default();
        let owner = ctx.actor_id();
        let mut window = Window::build(&TEST_WINDOW, ctx, chat_id, owner, TabArgs::new()).await?;
        window.render(ctx).await?;
        Ok(Flow::Stop)
    }
}

async fn open(mock: Arc<MockTransport>) -> (BotController, LiveMessage) {
    let mut builder = BotBuilder::new(test_config(), Store::in_memory(), mock.clone())
        .unwrap()
        .window(&TEST_WINDOW)
        .unwrap();
    let group = builder.groups().add_left("OPEN_WINDOW").unwrap();
    let controller = builder
        .handler(Phase::Main, group, Arc::new(OpenWindow))
        .build()
        .unwrap();
    controller.start().unwrap();
    let outcome = controller
        .process_update(text_message(CHAT, OWNER, "/open"))
        .await;
    assert_eq!(outcome, Outcome::Finished);
    let message = mock.last_message(CHAT).unwrap();
    (controller, message)
}

async fn rows<R: Record>(controller: &BotController) -> Vec<R> {
    controller
        .services()
        .store
        .begin()
        .select(&Query::all())
        .await
        .unwrap()
}

async fn click(
    controller: &BotController,
    mock: &MockTransport,
    message: &LiveMessage,
    from: u64,
    label: &str,
) -> LiveMessage {
    let outcome = controller.process_update(press(message, from, label)).await;
    assert_eq!(outcome, Outcome::Finished);
    mock.message(message.chat_id, message.id)
        .unwrap_or_else(|| message.clone())
}

#[tokio::test]
async fn window_renders_first_tab() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;
    assert_eq!(message.text.as_deref(), Some("Menu"));
    assert_eq!(labels(&message), ["Open", "Flag"]);
    let windows: Vec<WindowRecord> = rows(&controller).await;
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].message_id, Some(message.id));
    assert_eq!(windows[0].user_id, OWNER as i64);
    assert!(!windows[0].input_required);
    controller.shutdown().await;
}

#[tokio::test]
async fn check_box_toggles_and_reports_new_state() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;

    let message = click(&controller, &mock, &message, OWNER, "Flag").await;
    assert_eq!(labels(&message), ["Open", "☑ Flag"]);
    let message = click(&controller, &mock, &message, OWNER, "☑ Flag").await;
    assert_eq!(labels(&message), ["Open", "Flag"]);

    let tabs: Vec<TabRecord> = rows(&controller).await;
    assert_eq!(
        tabs[0].fields["presses"],
        json!([[true, "alpha"], [false, "alpha"]])
    );
    assert_eq!(mock.answers(), [None::<String>, None]);
    controller.shutdown().await;
}

#[tokio::test]
async fn saved_tab_comes_back_with_its_state() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;

    let message = click(&controller, &mock, &message, OWNER, "Flag").await;
    let message = click(&controller, &mock, &message, OWNER, "Open").await;
    assert_eq!(labels(&message), ["Back"]);
    assert_eq!(
        message.text.as_deref(),
        Some("Item 7\nNote: -\nSend a note")
    );
    let windows: Vec<WindowRecord> = rows(&controller).await;
    assert!(windows[0].input_required);
    assert_eq!(windows[0].current_tab_index, 1);

    let message = click(&controller, &mock, &message, OWNER, "Back").await;
    assert_eq!(labels(&message), ["Open", "☑ Flag"]);
    let tabs: Vec<TabRecord> = rows(&controller).await;
    assert_eq!(tabs.len(), 1);
    assert_eq!(tabs[0].fields["presses"], json!([[true, "alpha"]]));

    // The restored buttons keep working.
    let message = click(&controller, &mock, &message, OWNER, "☑ Flag").await;
    assert_eq!(labels(&message), ["Open", "Flag"]);
    controller.shutdown().await;
}

#[tokio::test]
async fn altered_keyboard_is_rejected_as_stale() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;

    let mut altered = message.clone();
    if let Some(markup) = altered.markup.as_mut() {
        markup.rows.remove(0);
    }
    click(&controller, &mock, &altered, OWNER, "Flag").await;
    assert_eq!(mock.answers(), [Some(STALE_ALERT.to_string())]);
    assert_eq!(labels(&mock.message(CHAT, message.id).unwrap()), ["Open", "Flag"]);

    let mut doubled = message.clone();
    if let Some(markup) = doubled.markup.as_mut() {
        let row = markup.rows[1].clone();
        markup.rows.push(row);
    }
    click(&controller, &mock, &doubled, OWNER, "Flag").await;
    assert_eq!(mock.answers().len(), 2);
    assert_eq!(mock.answers()[1].as_deref(), Some(STALE_ALERT));

    let tabs: Vec<TabRecord> = rows(&controller).await;
    assert!(tabs[0].fields.get("presses").is_none());
    controller.shutdown().await;
}

#[tokio::test]
async fn other_users_cannot_press_owned_windows() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;
    let after = click(&controller, &mock, &message, 2, "Flag").await;
    assert_eq!(mock.answers(), [Some(PERMISSION_ALERT.to_string())]);
    assert_eq!(labels(&after), ["Open", "Flag"]);
    controller.shutdown().await;
}

#[tokio::test]
async fn text_goes_to_the_focused_input_field() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;
    click(&controller, &mock, &message, OWNER, "Open").await;

    let outcome = controller
        .process_update(text_message(CHAT, OWNER, "buy milk"))
        .await;
    assert_eq!(outcome, Outcome::Finished);
    let shown = mock.message(CHAT, message.id).unwrap();
    assert_eq!(shown.text.as_deref(), Some("Item 7\nNote: buy milk\nSend a note"));

    // Another user's text is not routed to an owned window.
    controller
        .process_update(text_message(CHAT, 2, "not mine"))
        .await;
    let shown = mock.message(CHAT, message.id).unwrap();
    assert!(shown.text.unwrap().contains("buy milk"));
    controller.shutdown().await;
}

#[tokio::test]
async fn deleted_message_purges_window_on_input() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;
    click(&controller, &mock, &message, OWNER, "Open").await;
    mock.remove_message(CHAT, message.id);

    let outcome = controller
        .process_update(text_message(CHAT, OWNER, "too late"))
        .await;
    assert_eq!(outcome, Outcome::Finished);
    assert!(rows::<WindowRecord>(&controller).await.is_empty());
    assert!(rows::<TabRecord>(&controller).await.is_empty());
    controller.shutdown().await;
}

#[tokio::test]
async fn failed_edit_purges_window_and_alerts() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone()).await;
    mock.remove_message(CHAT, message.id);

    click(&controller, &mock, &message, OWNER, "Open").await;
    assert_eq!(mock.answers(), [Some(STALE_ALERT.to_string())]);
    assert!(rows::<WindowRecord>(&controller).await.is_empty());
    controller.shutdown().await;
}

#[tokio::test]
async fn cached_render_stands_in_when_messages_cannot_be_fetched() {
    let mock = MockTransport::without_fetch();
    let (controller, message) = open(mock.clone()).await;
    click(&controller, &mock, &message, OWNER, "Open").await;

    controller
        .process_update(text_message(CHAT, OWNER, "offline note"))
        .await;
    let shown = mock.message(CHAT, message.id).unwrap();
    assert!(shown.text.unwrap().contains("offline note"));
    assert_eq!(labels(&mock.message(CHAT, message.id).unwrap()), ["Back"]);
    controller.shutdown().await;
}
