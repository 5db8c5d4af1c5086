use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use super::mock::{labels, press, test_config, text_message, MockTransport};
use crate::bot::{BotBuilder, BotController};
use crate::context::UpdateContext;
use crate::dispatcher::{Flow, Handler, Outcome, Phase};
use crate::gui::{
    date_time_text_data, on_date_time_press, on_page_press, set_date_time, show_date_buttons,
    show_page, ButtonPress, PageInfo, PageRequest, PagedTab, SimpleButton, TabArgs, TabClass,
    TabState, TextData, Window, WindowClass, WindowRecord,
};
use crate::store::{Query, Store};
use crate::transport::LiveMessage;
use crate::update::Update;

const CHAT: i64 = 300;
const OWNER: u64 = 3;
const ITEMS: usize = 25;
const PER_PAGE: usize = 10;

struct ListTab;

#[async_trait]
impl TabClass for ListTab {
    fn name(&self) -> &'static str {
        "list"
    }

    async fn build(&self, tab: &mut TabState, ctx: &mut UpdateContext, _args: TabArgs) -> Result<()> {
        show_page(self, tab, ctx, PageRequest::Number(1)).await
    }

    async fn on_button(
        &self,
        tab: &mut TabState,
        ctx: &mut UpdateContext,
        press: ButtonPress,
    ) -> Result<()> {
        if on_page_press(self, tab, ctx, &press).await? {
            return Ok(());
        }
        bail!("unexpected callback {}", press.callback)
    }
}

#[async_trait]
impl PagedTab for ListTab {
    async fn fill_page(
        &self,
        tab: &mut TabState,
        _ctx: &mut UpdateContext,
        request: PageRequest,
    ) -> Result<PageInfo> {
        let PageRequest::Number(page) = request else {
            bail!("list pages are numbered");
        };
        let first = (page - 1) * PER_PAGE + 1;
        let last = (page * PER_PAGE).min(ITEMS);
        tab.text.set_body(format!("Items {}-{}", first, last));
        Ok(PageInfo {
            total_pages: Some(ITEMS.div_ceil(PER_PAGE)),
            ..PageInfo::default()
        })
    }
}

struct PickerTab;

#[async_trait]
impl TabClass for PickerTab {
    fn name(&self) -> &'static str {
        "picker"
    }

    async fn build(&self, tab: &mut TabState, _ctx: &mut UpdateContext, _args: TabArgs) -> Result<()> {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        set_date_time(tab, start)?;
        tab.text.set_body("When: {date_time}");
        tab.keyboard.add_row([SimpleButton::new("Done", "done", "")]);
        show_date_buttons(tab);
        Ok(())
    }

    async fn text_data(&self, tab: &TabState, _ctx: &mut UpdateContext) -> Result<TextData> {
        date_time_text_data(tab)
    }

    async fn on_button(
        &self,
        tab: &mut TabState,
        _ctx: &mut UpdateContext,
        press: ButtonPress,
    ) -> Result<()> {
        if on_date_time_press(tab, &press)? {
            return Ok(());
        }
        match press.callback.as_str() {
            "done" => Ok(()),
            other => bail!("unexpected callback {}", other),
        }
    }
}

struct LongTab;

#[async_trait]
impl TabClass for LongTab {
    fn name(&self) -> &'static str {
        "long"
    }

    async fn build(&self, tab: &mut TabState, _ctx: &mut UpdateContext, _args: TabArgs) -> Result<()> {
        tab.text.set_body("x".repeat(5000));
        tab.keyboard.add_row([SimpleButton::new("Refresh", "refresh", "")]);
        Ok(())
    }

    async fn on_button(
        &self,
        _tab: &mut TabState,
        _ctx: &mut UpdateContext,
        _press: ButtonPress,
    ) -> Result<()> {
        Ok(())
    }
}

struct OneTab {
    tag: &'static str,
    name: &'static str,
    tabs: &'static [&'static dyn TabClass],
}

impl WindowClass for OneTab {
    fn tag(&self) -> &'static str {
        self.tag
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn tabs(&self) -> &'static [&'static dyn TabClass] {
        self.tabs
    }
}

static LIST_TABS: [&dyn TabClass; 1] = [&ListTab];
static PICKER_TABS: [&dyn TabClass; 1] = [&PickerTab];
static LONG_TABS: [&dyn TabClass; 1] = [&LongTab];

static LIST_WINDOW: OneTab = OneTab {
    tag: "LIST",
    name: "list_window",
    tabs: &LIST_TABS,
};
static PICKER_WINDOW: OneTab = OneTab {
    tag: "PICK",
    name: "picker_window",
    tabs: &PICKER_TABS,
};
static LONG_WINDOW: OneTab = OneTab {
    tag: "LONG",
    name: "long_window",
    tabs: &LONG_TABS,
};

struct OpenWindow;

#[async_trait]
impl Handler for OpenWindow {
    fn name(&self) -> &str {
        "open_window"
    }

    fn check(&self, update: &Update) -> bool {
        matches!(update.command(), Some("list" | "pick" | "long"))
    }

    async fn handle(&self, ctx: &mut UpdateContext) -> Result<Flow> {
        let update = ctx.update.clone();
        let class: &'static dyn WindowClass = match update.command() {
            Some("list") => &LIST_WINDOW,
            Some("pick") => &PICKER_WINDOW,
            _ => &LONG_WINDOW,
        };
        let chat_id = update.chat_id().unwrap_or_default();
        let owner = ctx.actor_id();
        let mut window = Window::build(class, ctx, chat_id, owner, TabArgs::new()).await?;
        window.render(ctx).await?;
        Ok(Flow::Stop)
    }
}

async fn open(mock: Arc<MockTransport>, command: &str) -> (BotController, LiveMessage) {
    let mut builder = BotBuilder::new(test_config(), Store::in_memory(), mock.clone())
        .unwrap()
        .window(&LIST_WINDOW)
        .unwrap()
        .window(&PICKER_WINDOW)
        .unwrap()
        .window(&LONG_WINDOW)
        .unwrap();
    let group = builder.groups().add_left("OPEN_WINDOW").unwrap();
    let controller = builder
        .handler(Phase::Main, group, Arc::new(OpenWindow))
        .build()
        .unwrap();
    controller.start().unwrap();
    let outcome = controller
        .process_update(text_message(CHAT, OWNER, command))
        .await;
    assert_eq!(outcome, Outcome::Finished);
    let message = mock.last_message(CHAT).unwrap();
    (controller, message)
}

async fn click(
    controller: &BotController,
    mock: &MockTransport,
    message: &LiveMessage,
    label: &str,
) -> LiveMessage {
    let outcome = controller.process_update(press(message, OWNER, label)).await;
    assert_eq!(outcome, Outcome::Finished);
    mock.message(message.chat_id, message.id).unwrap()
}

#[tokio::test]
async fn pages_are_numbered_and_linked() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone(), "/list").await;
    assert_eq!(message.text.as_deref(), Some("Items 1-10\n\nPage 1 / 3."));
    assert_eq!(labels(&message), ["2", "3"]);

    let message = click(&controller, &mock, &message, "3").await;
    assert_eq!(message.text.as_deref(), Some("Items 21-25\n\nPage 3 / 3."));
    assert_eq!(labels(&message), ["1", "2"]);

    let message = click(&controller, &mock, &message, "2").await;
    assert_eq!(message.text.as_deref(), Some("Items 11-20\n\nPage 2 / 3."));
    assert_eq!(labels(&message), ["3", "1"]);
    controller.shutdown().await;
}

#[tokio::test]
async fn picker_steps_date_and_time() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone(), "/pick").await;
    assert_eq!(message.text.as_deref(), Some("When: 2024-01-31 12:00:00"));
    assert_eq!(
        labels(&message),
        ["-y", "+y", "-mo", "+mo", "-d", "+d", "Pick time", "Done"]
    );

    let message = click(&controller, &mock, &message, "+d").await;
    assert_eq!(message.text.as_deref(), Some("When: 2024-02-01 12:00:00"));
    let message = click(&controller, &mock, &message, "+mo").await;
    assert_eq!(message.text.as_deref(), Some("When: 2024-03-02 12:00:00"));

    let message = click(&controller, &mock, &message, "Pick time").await;
    assert_eq!(
        labels(&message),
        ["-h", "+h", "-min", "+min", "-s", "+s", "Pick date", "Done"]
    );
    let message = click(&controller, &mock, &message, "-min").await;
    assert_eq!(message.text.as_deref(), Some("When: 2024-03-02 11:59:00"));
    controller.shutdown().await;
}

#[tokio::test]
async fn oversized_window_text_stays_one_editable_message() {
    let mock = MockTransport::new();
    let (controller, message) = open(mock.clone(), "/long").await;
    assert_eq!(mock.sent_texts().len(), 1);
    let text = message.text.clone().unwrap();
    assert_eq!(text.chars().count(), 4096);
    assert!(text.ends_with('…'));

    let windows: Vec<WindowRecord> = controller
        .services()
        .store
        .begin()
        .select(&Query::all())
        .await
        .unwrap();
    assert_eq!(windows[0].message_id, Some(message.id));

    let after = click(&controller, &mock, &message, "Refresh").await;
    assert_eq!(after.id, message.id);
    assert_eq!(mock.sent_texts().len(), 1);
    controller.shutdown().await;
}
