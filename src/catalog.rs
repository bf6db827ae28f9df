//! Read-only suggestion catalog.
//!
//! Food content and help text are not core state; they are injected as a
//! read-only collaborator. The default catalog ships a small static menu
//! that the oracle receives as context for suggestion turns.

use rand::seq::SliceRandom;

/// One suggestible dish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodItem {
    pub name: String,
    /// Short flavor line shown next to the name.
    pub blurb: String,
}

pub trait SuggestionCatalog: Send + Sync {
    /// Pick up to `n` distinct items.
    fn suggest(&self, n: usize) -> Vec<FoodItem>;

    /// Human help text for the bot's capabilities.
    fn help_text(&self) -> &str;

    /// The full menu, for oracle context.
    fn all(&self) -> &[FoodItem];
}

/// Static in-tree catalog.
pub struct StaticCatalog {
    items: Vec<FoodItem>,
    help: String,
}

impl StaticCatalog {
    pub fn new(items: Vec<FoodItem>, help: String) -> Self {
        Self { items, help }
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        let items = [
            ("bún chả", "chuẩn vị Hà Nội, chấm đẫm nước mắm"),
            ("phở bò", "nước dùng ninh xương, hành trần"),
            ("cơm tấm sườn bì", "sườn nướng than, mỡ hành"),
            ("bánh mì thịt", "nhanh gọn cho trưa bận"),
            ("bún bò Huế", "cay thơm sả, giò heo"),
            ("gỏi cuốn", "nhẹ bụng, chấm tương đậu"),
            ("cháo lòng", "cho hôm trời mưa"),
            ("bánh xèo", "giòn rụm, cuốn rau sống"),
        ]
        .into_iter()
        .map(|(name, blurb)| FoodItem {
            name: name.to_string(),
            blurb: blurb.to_string(),
        })
        .collect();

        Self::new(
            items,
            "Mình ghi nợ, ghi trả nợ và gợi ý món ăn cho cả nhóm. \
             Cứ nhắn tự nhiên, ví dụ: \"ghi nợ cho Huy 200k tiền bún chả\"."
                .to_string(),
        )
    }
}

impl SuggestionCatalog for StaticCatalog {
    fn suggest(&self, n: usize) -> Vec<FoodItem> {
        let mut rng = rand::thread_rng();
        self.items
            .choose_multiple(&mut rng, n.min(self.items.len()))
            .cloned()
            .collect()
    }

    fn help_text(&self) -> &str {
        &self.help
    }

    fn all(&self) -> &[FoodItem] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggest_returns_distinct_items() {
        let catalog = StaticCatalog::default();
        let picks = catalog.suggest(3);
        assert_eq!(picks.len(), 3);
        let names: std::collections::HashSet<_> = picks.iter().map(|i| &i.name).collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn suggest_caps_at_catalog_size() {
        let catalog = StaticCatalog::default();
        let picks = catalog.suggest(100);
        assert_eq!(picks.len(), catalog.all().len());
    }

    #[test]
    fn help_text_is_present() {
        assert!(!StaticCatalog::default().help_text().is_empty());
    }
}
