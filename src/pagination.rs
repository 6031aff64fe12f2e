use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageItem {
    Page(u32),
    Ellipsis,
}

impl Serialize for PageItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PageItem::Page(page) => serializer.serialize_u32(*page),
            PageItem::Ellipsis => serializer.serialize_str("..."),
        }
    }
}

impl fmt::Display for PageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageItem::Page(page) => write!(f, "{page}"),
            PageItem::Ellipsis => f.write_str("..."),
        }
    }
}

const FULL_LIST_LIMIT: u32 = 7;

/// Page links for a ranking view: first and last page always, the current
/// page with one neighbour each side, and a collapse marker for each gap.
pub fn compute_window(current_page: u32, total_pages: u32) -> Vec<PageItem> {
    if total_pages <= FULL_LIST_LIMIT {
        return (1..=total_pages).map(PageItem::Page).collect();
    }

    let mut items = vec![PageItem::Page(1)];
    if current_page > 3 {
        items.push(PageItem::Ellipsis);
    }

    let start = current_page.saturating_sub(1).max(2);
    let end = current_page.saturating_add(1).min(total_pages - 1);
    items.extend((start..=end).map(PageItem::Page));

    if current_page < total_pages - 2 {
        items.push(PageItem::Ellipsis);
    }
    if total_pages > 1 {
        items.push(PageItem::Page(total_pages));
    }

    items
}

pub fn render_window(items: &[PageItem], current_page: u32) -> String {
    items
        .iter()
        .map(|item| match item {
            PageItem::Page(page) if *page == current_page => format!("[{page}]"),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
