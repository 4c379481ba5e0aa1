use crate::store::{StateStore, THEME_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

pub fn load_theme(store: &dyn StateStore) -> Theme {
    store
        .get(THEME_KEY)
        .as_deref()
        .and_then(Theme::parse)
        .unwrap_or_default()
}

pub fn toggle_theme(store: &dyn StateStore) -> Theme {
    let next = load_theme(store).toggled();
    store.set(THEME_KEY, next.as_str());
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn defaults_to_dark_and_persists_toggles() {
        let store = MemoryStore::new();
        assert_eq!(load_theme(&store), Theme::Dark);

        assert_eq!(toggle_theme(&store), Theme::Light);
        assert_eq!(store.get(THEME_KEY).as_deref(), Some("light"));
        assert_eq!(load_theme(&store), Theme::Light);

        assert_eq!(toggle_theme(&store), Theme::Dark);
        assert_eq!(load_theme(&store), Theme::Dark);
    }

    #[test]
    fn garbage_values_fall_back_to_dark() {
        let store = MemoryStore::new();
        store.set(THEME_KEY, "solarized");
        assert_eq!(load_theme(&store), Theme::Dark);
    }
}
