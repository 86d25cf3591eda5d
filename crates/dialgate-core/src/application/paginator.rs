//! Paging of API item lists into USSD menus

use crate::application::context::value_to_display;
use crate::domain::flow::DynamicMenuConfig;
use crate::types::lookup_path;
use serde_json::Value;

/// Maximum rendered length of an item label or navigation label
const MAX_LABEL_LEN: usize = 80;

/// One selectable item on a dynamic menu page
#[derive(Debug, Clone, PartialEq)]
pub struct MenuItem {
    /// Selector shown to the subscriber (1-based within the page)
    pub selector: String,

    /// Display label extracted via the configured label field
    pub label: String,

    /// Value extracted via the configured value field
    pub value: Value,

    /// The full backing item
    pub item: Value,
}

/// One rendered page of a dynamic menu
#[derive(Debug, Clone, PartialEq)]
pub struct MenuPage {
    /// Items on this page
    pub items: Vec<MenuItem>,

    /// Zero-based page number
    pub page: usize,

    /// Whether more items follow this page
    pub has_next: bool,

    /// Whether a previous page exists
    pub has_back: bool,
}

impl MenuPage {
    /// Render the page as menu lines, navigation options last
    pub fn render_lines(&self, config: &DynamicMenuConfig) -> String {
        let mut lines: Vec<String> = self
            .items
            .iter()
            .map(|item| format!("{}. {}", item.selector, item.label))
            .collect();
        if self.has_next {
            lines.push(format!(
                "{}. {}",
                config.next_selector,
                clamp_label(&config.next_label)
            ));
        }
        if self.has_back {
            lines.push(format!(
                "{}. {}",
                config.back_selector,
                clamp_label(&config.back_label)
            ));
        }
        lines.join("\n")
    }

    /// Item selected by a 1-based page-local selector, if valid
    pub fn item_for(&self, selector: &str) -> Option<&MenuItem> {
        self.items.iter().find(|item| item.selector == selector)
    }
}

/// Slice an item list into one menu page
///
/// Pages beyond the end of the list produce an empty page with only the
/// applicable navigation options.
pub fn paginate(items: &[Value], page: usize, config: &DynamicMenuConfig) -> MenuPage {
    let page_size = config.page_size.max(1);
    let start = page.saturating_mul(page_size);
    let end = start.saturating_add(page_size).min(items.len());

    let page_items = if start < items.len() {
        &items[start..end]
    } else {
        &[]
    };

    let items_on_page = page_items
        .iter()
        .enumerate()
        .map(|(i, item)| MenuItem {
            selector: (i + 1).to_string(),
            label: item_label(item, &config.label_field),
            value: item_value(item, &config.value_field),
            item: item.clone(),
        })
        .collect();

    MenuPage {
        items: items_on_page,
        page,
        has_next: end < items.len(),
        has_back: page > 0,
    }
}

/// Label for an item: the configured field, else the item rendered directly
fn item_label(item: &Value, label_field: &str) -> String {
    let label = lookup_path(item, label_field)
        .map(value_to_display)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| value_to_display(item));
    clamp_label(&label)
}

/// Value for an item: the configured field, else the item itself
fn item_value(item: &Value, value_field: &str) -> Value {
    lookup_path(item, value_field)
        .cloned()
        .unwrap_or_else(|| item.clone())
}

fn clamp_label(label: &str) -> String {
    label.chars().take(MAX_LABEL_LEN).collect()
}
