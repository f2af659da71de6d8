use std::ops::RangeInclusive;

pub const DEFAULT_PAGE_SIZE: usize = 25;
/// Width of the page-number strip drawn under a paginated table.
pub const VISIBLE_PAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationDecision {
    NoPaginationNeeded,
    NeedsPaginator {
        pages_needed: usize,
        current_page: usize,
    },
}

pub fn pages_needed(collection_size: usize, page_size: usize) -> usize {
    collection_size.div_ceil(page_size.max(1))
}

/// Pure paging decision for one refresh; `current_page` comes back clamped.
pub fn decide(collection_size: usize, page_size: usize, current_page: usize) -> PaginationDecision {
    let pages = pages_needed(collection_size, page_size);
    if pages < 2 {
        PaginationDecision::NoPaginationNeeded
    } else {
        PaginationDecision::NeedsPaginator {
            pages_needed: pages,
            current_page: current_page.clamp(1, pages),
        }
    }
}

/// Half-open item range `[from, to)` covered by one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub from: usize,
    pub to: usize,
}

impl PageRange {
    pub fn for_page(page: usize, page_size: usize) -> Self {
        let from = page.saturating_sub(1) * page_size;
        Self {
            from,
            to: from + page_size,
        }
    }
}

/// The page-number control. Its page count is fixed at construction; a
/// different count means a new widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginator {
    total_pages: usize,
    current_page: usize,
    generation: u64,
}

impl Paginator {
    fn new(total_pages: usize, start_page: usize, generation: u64) -> Self {
        Self {
            total_pages,
            current_page: start_page.clamp(1, total_pages.max(1)),
            generation,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Window of page numbers to draw, centred on the current page.
    pub fn visible_pages(&self) -> RangeInclusive<usize> {
        let shown = VISIBLE_PAGES.min(self.total_pages).max(1);
        let half = shown / 2;
        let start = self
            .current_page
            .saturating_sub(half)
            .clamp(1, self.total_pages + 1 - shown);
        start..=start + shown - 1
    }

    pub fn next_page(&self) -> Option<usize> {
        (self.current_page < self.total_pages).then_some(self.current_page + 1)
    }

    pub fn previous_page(&self) -> Option<usize> {
        (self.current_page > 1).then_some(self.current_page - 1)
    }

    fn route_click(&mut self, page: usize) -> Option<usize> {
        if (1..=self.total_pages).contains(&page) {
            self.current_page = page;
            Some(page)
        } else {
            None
        }
    }
}

/// Paging state of one tab plus the widget it exclusively owns.
#[derive(Debug, Clone)]
pub struct PaginationController {
    page_size: usize,
    current_page: usize,
    total_items: usize,
    widget: Option<Paginator>,
    generation: u64,
}

impl PaginationController {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current_page: 1,
            total_items: 0,
            widget: None,
            generation: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn widget(&self) -> Option<&Paginator> {
        self.widget.as_ref()
    }

    /// Brings the widget in line with a freshly fetched collection size.
    ///
    /// The caller fills the table right after this returns, using
    /// [`PaginationController::current_range`] when a paginator is needed.
    pub fn reconcile(&mut self, collection_size: usize) -> PaginationDecision {
        self.total_items = collection_size;
        match decide(collection_size, self.page_size, self.current_page) {
            PaginationDecision::NoPaginationNeeded => {
                self.destroy_widget();
                self.current_page = 1;
                PaginationDecision::NoPaginationNeeded
            }
            PaginationDecision::NeedsPaginator { pages_needed, .. } => {
                let start_page = if self.widget.is_none() {
                    log::debug!("creating a new paginator with {pages_needed} pages");
                    1
                } else {
                    if self.current_page > pages_needed {
                        log::debug!(
                            "current page {} exceeds {pages_needed} pages, clamping",
                            self.current_page
                        );
                    }
                    self.current_page.min(pages_needed)
                };
                self.destroy_widget();
                self.create_widget(pages_needed, start_page);
                PaginationDecision::NeedsPaginator {
                    pages_needed,
                    current_page: start_page,
                }
            }
        }
    }

    /// Range of the page currently shown, if the collection is paginated.
    pub fn current_range(&self) -> Option<PageRange> {
        self.widget
            .as_ref()
            .map(|_| PageRange::for_page(self.current_page, self.page_size))
    }

    /// Routes a page click through the widget and persists the new page.
    pub fn click(&mut self, page: usize) -> Option<PageRange> {
        let page = self.widget.as_mut()?.route_click(page)?;
        self.current_page = page;
        let range = PageRange::for_page(page, self.page_size);
        log::debug!(
            "clicked page {page}, filling [{}, {})",
            range.from,
            range.to
        );
        Some(range)
    }

    pub fn next(&mut self) -> Option<PageRange> {
        let page = self.widget.as_ref()?.next_page()?;
        self.click(page)
    }

    pub fn previous(&mut self) -> Option<PageRange> {
        let page = self.widget.as_ref()?.previous_page()?;
        self.click(page)
    }

    /// Drops all paging state, e.g. when the tab is navigated away from.
    pub fn reset(&mut self) {
        self.destroy_widget();
        self.current_page = 1;
        self.total_items = 0;
    }

    fn create_widget(&mut self, total_pages: usize, start_page: usize) {
        self.generation += 1;
        self.current_page = start_page;
        self.widget = Some(Paginator::new(total_pages, start_page, self.generation));
    }

    fn destroy_widget(&mut self) {
        if self.widget.take().is_some() {
            log::debug!("paginator exists, destroying it");
        }
    }
}
