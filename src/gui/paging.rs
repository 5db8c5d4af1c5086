use anyhow::Result;
use async_trait::async_trait;

use super::button::{ButtonPress, SimpleButton};
use super::tab::{TabClass, TabState};
use crate::context::UpdateContext;

/// Name shared by every page button, for `Keyboard::remove_buttons`.
pub const PAGE_BUTTON: &str = "page_button";
pub const PAGE_CALLBACK: &str = "page";

const PAGE_FIELD: &str = "page";
const NEXT: &str = "next";
const PREVIOUS: &str = "previous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageMode {
    /// Numbered pages with jump buttons around the current one.
    #[default]
    Numbered,
    /// Only `<` and `>`, for sets that cannot be counted or indexed.
    Scroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    Number(usize),
    Next,
    Previous,
}

/// What the tab knows about the page it just filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageInfo {
    /// `None` for endless sets.
    pub total_pages: Option<usize>,
    /// Only consulted when the position cannot be derived from a page number.
    pub is_first: bool,
    pub is_last: bool,
}

/// A tab showing one page of a larger set. Build the first page with
/// `show_page` and forward button presses to `on_page_press`.
#[async_trait]
pub trait PagedTab: TabClass {
    fn page_mode(&self) -> PageMode {
        PageMode::Numbered
    }

    /// Appends `Page n / total.` to the body in numbered mode.
    fn page_info_in_text(&self) -> bool {
        true
    }

    /// Sets the body and content buttons for `request` on a cleared keyboard.
    async fn fill_page(
        &self,
        tab: &mut TabState,
        ctx: &mut UpdateContext,
        request: PageRequest,
    ) -> Result<PageInfo>;
}

/// Page numbers offered after and before `page`, as two button rows.
pub fn page_links(page: usize, total_pages: Option<usize>, is_last: bool) -> (Vec<usize>, Vec<usize>) {
    let is_last = match total_pages {
        Some(total) => page >= total,
        None => is_last,
    };
    let mut forward = Vec::new();
    if !is_last {
        forward.push(page + 1);
        if let Some(total) = total_pages {
            let end = page + 4.min(total - page);
            forward.extend(page + 2..end);
            if page + 1 < total {
                forward.push(total);
            }
        }
    }
    let mut backward = Vec::new();
    if page > 1 {
        if page > 2 {
            backward.push(1);
        }
        backward.extend(2.max(page.saturating_sub(3))..page - 1);
        backward.push(page - 1);
    }
    (forward, backward)
}

/// Clears the keyboard, lets the tab fill `request` and adds the page buttons.
pub async fn show_page<T>(
    class: &T,
    tab: &mut TabState,
    ctx: &mut UpdateContext,
    request: PageRequest,
) -> Result<()>
where
    T: PagedTab + ?Sized,
{
    tab.keyboard.clear();
    let info = class.fill_page(tab, ctx, request).await?;
    match (class.page_mode(), request) {
        (PageMode::Numbered, PageRequest::Number(page)) => {
            let page = page.max(1);
            tab.set_field(PAGE_FIELD, page)?;
            if class.page_info_in_text() {
                let line = match info.total_pages {
                    Some(total) => format!("\n\nPage {} / {}.", page, total),
                    None => format!("\n\nPage {}.", page),
                };
                tab.text.append_to_body(&line);
            }
            let (forward, backward) = page_links(page, info.total_pages, info.is_last);
            let link = |number: usize| {
                SimpleButton::new(number.to_string(), PAGE_CALLBACK, number).named(PAGE_BUTTON)
            };
            tab.keyboard.add_row(forward.into_iter().map(link));
            tab.keyboard.add_row(backward.into_iter().map(link));
        }
        _ => {
            let mut row = Vec::new();
            if !info.is_first {
                row.push(SimpleButton::new("<", PAGE_CALLBACK, PREVIOUS).named(PAGE_BUTTON));
            }
            if !info.is_last {
                row.push(SimpleButton::new(">", PAGE_CALLBACK, NEXT).named(PAGE_BUTTON));
            }
            tab.keyboard.add_row(row);
        }
    }
    Ok(())
}

/// Handles a page button. Returns false for any other press.
pub async fn on_page_press<T>(
    class: &T,
    tab: &mut TabState,
    ctx: &mut UpdateContext,
    press: &ButtonPress,
) -> Result<bool>
where
    T: PagedTab + ?Sized,
{
    if press.callback != PAGE_CALLBACK {
        return Ok(false);
    }
    let request = match press.arg.as_str() {
        NEXT => PageRequest::Next,
        PREVIOUS => PageRequest::Previous,
        number => PageRequest::Number(number.parse()?),
    };
    show_page(class, tab, ctx, request).await?;
    Ok(true)
}

/// Page last shown in numbered mode.
pub fn current_page(tab: &TabState) -> Result<usize> {
    Ok(tab.field(PAGE_FIELD)?.unwrap_or(1))
}
