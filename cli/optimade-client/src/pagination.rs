//! Navigation state of a paginated query.
//!
//! The controller tracks where in a result set the displayed page sits and
//! computes the cursor of the page to fetch next. It never fetches itself:
//! [PaginationController::plan] returns a [PageMove] for the caller to
//! request. Once the page arrived the caller commits the move and reports
//! the response with [PaginationController::set_pagination_data], so a
//! failed request leaves the position untouched.
//!
//! Cursors taken from server supplied links are preferred over locally
//! computed ones.

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use derive_more::Display;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::ParseError;
use crate::types::{Link, PageCursor, PageLinks};

pub const NO_DATA_SUMMARY: &str = "Showing 0 of 0 results.";

/// Offset of the last page of `data_returned` results.
///
/// `0` if everything fits on one page, `data_returned - page_limit` for an
/// exact multiple of the page limit, the start of the partial last page
/// otherwise.
pub fn last_page_offset(data_returned: u64, page_limit: u64) -> u64 {
    let page_limit = page_limit.max(1);
    if data_returned <= page_limit {
        0
    } else if data_returned % page_limit == 0 {
        data_returned - page_limit
    } else {
        data_returned - data_returned % page_limit
    }
}

/// 1-based number of the last page of `total` results.
pub fn last_page_number(total: u64, page_limit: u64) -> u64 {
    total.div_ceil(page_limit.max(1)).max(1)
}

/// A navigation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Navigation {
    #[display("first")]
    First,
    #[display("prev")]
    Prev,
    #[display("next")]
    Next,
    #[display("last")]
    Last,
}

impl FromStr for Navigation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first" => Ok(Navigation::First),
            "prev" | "previous" => Ok(Navigation::Prev),
            "next" => Ok(Navigation::Next),
            "last" => Ok(Navigation::Last),
            _ => Err(ParseError::new(
                "navigation",
                s,
                "expected one of 'first', 'prev', 'next', 'last'",
            )),
        }
    }
}

/// Which query parameter local arithmetic pages with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PagingMode {
    #[default]
    Offset,
    Number,
}

/// What observers are told after a batch of changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationSnapshot {
    pub summary: String,
    pub first_enabled: bool,
    pub prev_enabled: bool,
    pub next_enabled: bool,
    pub last_enabled: bool,
}

/// A page to fetch and the position it leads to.
///
/// Planned by [PaginationController::plan] without touching the displayed
/// position. The position only moves on [PaginationController::commit].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMove {
    pub cursor: PageCursor,
    offset: u64,
    mode: PagingMode,
}

pub type PaginationObserver = Box<dyn FnMut(&PaginationSnapshot) + Send>;

pub struct PaginationController {
    page_limit: u64,
    mode: PagingMode,
    /// Offset of the first displayed result.
    offset: u64,
    data_returned: u64,
    data_available: Option<u64>,
    links: PageLinks,
    has_data: bool,
    observers: Vec<PaginationObserver>,
    held: usize,
    dirty: bool,
}

impl Debug for PaginationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationController")
            .field("page_limit", &self.page_limit)
            .field("mode", &self.mode)
            .field("offset", &self.offset)
            .field("data_returned", &self.data_returned)
            .field("data_available", &self.data_available)
            .field("has_data", &self.has_data)
            .finish_non_exhaustive()
    }
}

impl PaginationController {
    pub fn new(page_limit: u64) -> Self {
        Self {
            page_limit: page_limit.max(1),
            mode: PagingMode::default(),
            offset: 0,
            data_returned: 0,
            data_available: None,
            links: PageLinks::default(),
            has_data: false,
            observers: Vec::new(),
            held: 0,
            dirty: false,
        }
    }

    pub fn page_limit(&self) -> u64 {
        self.page_limit
    }

    pub fn mode(&self) -> PagingMode {
        self.mode
    }

    pub fn set_paging_mode(&mut self, mode: PagingMode) {
        self.mode = mode;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 1-based number of the displayed page.
    pub fn page_number(&self) -> u64 {
        (self.offset / self.page_limit).saturating_add(1)
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Register an observer. It immediately receives the current state.
    pub fn subscribe(&mut self, mut observer: PaginationObserver) {
        observer(&self.snapshot());
        self.observers.push(observer);
    }

    /// Defer notifications until the returned guard is dropped.
    ///
    /// Observers then receive a single snapshot if anything changed. Holds
    /// nest; only the outermost one flushes.
    pub fn hold_notifications(&mut self) -> HeldNotifications<'_> {
        self.held += 1;
        HeldNotifications { controller: self }
    }

    /// Record the pagination data of a response.
    ///
    /// `reset_cache` marks the response as the first page of a new query, so
    /// the position restarts at the beginning.
    pub fn set_pagination_data(
        &mut self,
        data_returned: u64,
        data_available: Option<u64>,
        links: Option<PageLinks>,
        reset_cache: bool,
    ) {
        if reset_cache {
            self.offset = 0;
        }
        self.data_returned = data_returned;
        self.data_available = data_available;
        self.links = links.unwrap_or_default();
        self.has_data = data_returned > 0;
        self.offset = self.offset.min(self.last_offset());
        trace!(
            data_returned,
            ?data_available,
            offset = self.offset,
            "pagination data updated"
        );
        self.changed();
    }

    /// Reset the displayed counts without producing a fetch.
    pub fn silent_reset(&mut self) {
        debug!("resetting pagination");
        self.offset = 0;
        self.data_returned = 0;
        self.data_available = None;
        self.links = PageLinks::default();
        self.has_data = false;
        self.mode = PagingMode::default();
        self.changed();
    }

    /// The page `navigation` leads to, without moving there.
    ///
    /// `None` if there is no data or the navigation would not move. Server
    /// links pointing outside the result set are ignored in favor of local
    /// arithmetic.
    pub fn plan(&self, navigation: Navigation) -> Option<PageMove> {
        if !self.has_data {
            return None;
        }

        let local_target = match navigation {
            Navigation::First => 0,
            Navigation::Prev => self.offset.saturating_sub(self.page_limit),
            Navigation::Next => self
                .offset
                .saturating_add(self.page_limit)
                .min(self.last_offset()),
            Navigation::Last => self.last_offset(),
        };

        if let Some(link) = self.server_link(navigation) {
            let cursor = cursor_from_link(link.href());
            match self.link_target(&cursor, local_target) {
                Some((offset, mode)) => {
                    debug!(%navigation, ?cursor, "navigating by server link");
                    return Some(PageMove {
                        cursor,
                        offset,
                        mode,
                    });
                },
                None => warn!(%navigation, href = link.href(), "ignoring out of range server link"),
            }
        }

        if local_target == self.offset {
            debug!(%navigation, offset = self.offset, "nowhere to navigate");
            return None;
        }
        Some(PageMove {
            cursor: self.cursor_at(local_target),
            offset: local_target,
            mode: self.mode,
        })
    }

    /// The 1-based page `number`, without moving there.
    ///
    /// `None` if there is no data or no such page.
    pub fn plan_page(&self, number: u64) -> Option<PageMove> {
        if !self.has_data || number == 0 || number > self.last_page() {
            return None;
        }
        let offset = (number - 1).saturating_mul(self.page_limit);
        Some(PageMove {
            cursor: self.cursor_at(offset),
            offset,
            mode: self.mode,
        })
    }

    /// Move to a planned page once it was loaded.
    pub fn commit(&mut self, page: &PageMove) {
        self.offset = page.offset;
        self.mode = page.mode;
        self.changed();
    }

    /// Move to the page `navigation` leads to and return its cursor.
    ///
    /// `None` if there is no data or the navigation would not move.
    pub fn goto(&mut self, navigation: Navigation) -> Option<PageCursor> {
        let page = self.plan(navigation)?;
        self.commit(&page);
        Some(page.cursor)
    }

    /// Move to the 1-based page `number` and return its cursor.
    ///
    /// `None` if there is no data or no such page.
    pub fn goto_page(&mut self, number: u64) -> Option<PageCursor> {
        let page = self.plan_page(number)?;
        self.commit(&page);
        Some(page.cursor)
    }

    pub fn snapshot(&self) -> PaginationSnapshot {
        if !self.has_data {
            return PaginationSnapshot {
                summary: NO_DATA_SUMMARY.to_string(),
                first_enabled: false,
                prev_enabled: false,
                next_enabled: false,
                last_enabled: false,
            };
        }

        let total = self.total();
        let first = self.offset.saturating_add(1).min(total);
        let last = self.offset.saturating_add(self.page_limit).min(total);
        let mut summary = format!("Showing {first}-{last} of {total} results");
        if let Some(available) = self.data_available.filter(|a| *a > total) {
            summary.push_str(&format!(" ({available} available)"));
        }

        let at_start = self.offset == 0;
        let at_end = self.offset >= self.last_offset();
        PaginationSnapshot {
            summary,
            first_enabled: self.links.first.is_some() || !at_start,
            prev_enabled: self.links.prev.is_some() || !at_start,
            next_enabled: self.links.next.is_some() || !at_end,
            last_enabled: self.links.last.is_some() || !at_end,
        }
    }

    /// Offset and paging mode a server link cursor leads to, `None` if it
    /// points outside the result set.
    fn link_target(&self, cursor: &PageCursor, local_target: u64) -> Option<(u64, PagingMode)> {
        match cursor {
            PageCursor::Offset(offset) => {
                (*offset <= self.last_offset()).then_some((*offset, self.mode))
            },
            PageCursor::Number(number) => {
                let last_page = last_page_number(self.total_in(PagingMode::Number), self.page_limit);
                (1..=last_page).contains(number).then(|| {
                    ((number - 1).saturating_mul(self.page_limit), PagingMode::Number)
                })
            },
            PageCursor::Link(_) => Some((local_target, self.mode)),
        }
    }

    fn server_link(&self, navigation: Navigation) -> Option<&Link> {
        match navigation {
            Navigation::First => self.links.first.as_ref(),
            Navigation::Prev => self.links.prev.as_ref(),
            Navigation::Next => self.links.next.as_ref(),
            Navigation::Last => self.links.last.as_ref(),
        }
    }

    fn cursor_at(&self, offset: u64) -> PageCursor {
        match self.mode {
            PagingMode::Offset => PageCursor::Offset(offset),
            PagingMode::Number => PageCursor::Number(offset / self.page_limit + 1),
        }
    }

    fn last_offset(&self) -> u64 {
        match self.mode {
            PagingMode::Offset => last_page_offset(self.data_returned, self.page_limit),
            PagingMode::Number => (self.last_page() - 1).saturating_mul(self.page_limit),
        }
    }

    /// Number of results pages are counted over.
    ///
    /// Page numbers count `data_available` when the server reports more than
    /// it returned.
    fn total(&self) -> u64 {
        self.total_in(self.mode)
    }

    fn total_in(&self, mode: PagingMode) -> u64 {
        match mode {
            PagingMode::Offset => self.data_returned,
            PagingMode::Number => self.data_available.unwrap_or(0).max(self.data_returned),
        }
    }

    /// 1-based number of the last page.
    pub fn last_page(&self) -> u64 {
        last_page_number(self.total(), self.page_limit)
    }

    fn changed(&mut self) {
        if self.held > 0 {
            self.dirty = true;
        } else {
            self.notify();
        }
    }

    fn notify(&mut self) {
        self.dirty = false;
        let snapshot = self.snapshot();
        for observer in self.observers.iter_mut() {
            observer(&snapshot);
        }
    }
}

/// Cursor for a server supplied link: its `page_offset` or `page_number` if
/// it carries one, the link itself otherwise.
fn cursor_from_link(href: &str) -> PageCursor {
    let Ok(url) = Url::parse(href) else {
        return PageCursor::Link(href.to_string());
    };
    for (key, value) in url.query_pairs() {
        match (key.as_ref(), value.parse::<u64>()) {
            ("page_offset", Ok(offset)) => return PageCursor::Offset(offset),
            ("page_number", Ok(number)) => return PageCursor::Number(number),
            _ => {},
        }
    }
    PageCursor::Link(href.to_string())
}

/// Notifications of the controller are held while this guard lives.
pub struct HeldNotifications<'a> {
    controller: &'a mut PaginationController,
}

impl Deref for HeldNotifications<'_> {
    type Target = PaginationController;

    fn deref(&self) -> &Self::Target {
        self.controller
    }
}

impl DerefMut for HeldNotifications<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.controller
    }
}

impl Drop for HeldNotifications<'_> {
    fn drop(&mut self) {
        self.controller.held = self.controller.held.saturating_sub(1);
        if self.controller.held == 0 && self.controller.dirty {
            self.controller.notify();
        }
    }
}
