pub mod bot;
pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod groups;
pub mod gui;
pub mod invoker;
pub mod limiter;
pub mod logging;
pub mod sender;
pub mod split_text;
pub mod store;
pub mod tasks;
pub mod telegram;
pub mod transport;
pub mod update;
pub mod users;

#[cfg(test)]
mod tests;

pub use bot::{BotBuilder, BotController, Services};
pub use config::{load_config, Config};
pub use context::UpdateContext;
pub use dispatcher::{Flow, Handler, Outcome, Phase, StagedDispatcher};
pub use gui::{
    ButtonPress, CheckBoxButton, GuiError, InputField, Layout, Leave, SimpleButton, TabArgs,
    TabClass, TabState, TextData, Window, WindowClass,
};
pub use sender::{Delivery, MessageSender, OutgoingMessage};
pub use store::{Filter, Order, Query, Record, Session, Store};
pub use transport::{Markup, MarkupButton, SendOptions, Transport, TransportError};
pub use update::Update;

/// Owner marker for windows any user of the chat may operate.
pub const ANY_USER: i64 = 0;
