//! Language selection and the `t(key, vars)` label lookup.

use serde::{Deserialize, Serialize};

/// Supported UI languages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    En,
    Ru,
}

impl Lang {
    pub fn code(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Ru => "ru",
        }
    }

    /// Parse a language code; anything unknown is `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Lang::En),
            "ru" => Some(Lang::Ru),
            _ => None,
        }
    }
}

/// Number of rotating secret messages (`secret.0` .. `secret.N-1`).
pub const SECRET_MESSAGE_COUNT: usize = 3;

// (key, en, ru)
const STRINGS: &[(&str, &str, &str)] = &[
    ("stepOf", "Step {n} of {total}", "Шаг {n} из {total}"),
    ("locked", "Our journey opens in", "Наше путешествие откроется через"),
    (
        "countdown",
        "{days}d {hours}h {minutes}m {seconds}s",
        "{days}д {hours}ч {minutes}м {seconds}с",
    ),
    ("unlocked", "The journey is open", "Путешествие открыто"),
    ("status.completed", "completed", "пройдено"),
    ("status.open", "open", "открыто"),
    ("status.locked", "locked", "закрыто"),
    ("current", "Next stop: {city}", "Следующая остановка: {city}"),
    ("journeyComplete", "Journey complete!", "Путешествие завершено!"),
    (
        "heartsFound",
        "{found} of {total} hearts found",
        "Найдено сердец: {found} из {total}",
    ),
    ("progress", "{done} of {total} stops", "Остановок: {done} из {total}"),
    ("ticketsTitle", "Our tickets", "Наши билеты"),
    ("resetDone", "Progress cleared", "Прогресс сброшен"),
    ("ignored", "Not available right now", "Сейчас недоступно"),
    ("heartCollected", "You found a hidden heart", "Спрятанное сердце найдено"),
    ("secretTitle", "A secret for you", "Секрет для тебя"),
    (
        "secret.0",
        "Every road on this map leads back to you.",
        "Каждая дорога на этой карте ведёт к тебе.",
    ),
    (
        "secret.1",
        "You are my favourite destination.",
        "Ты мой самый любимый пункт назначения.",
    ),
    (
        "secret.2",
        "Shake it all you like, my heart stays put.",
        "Тряси сколько хочешь, моё сердце никуда не денется.",
    ),
];

/// Look up a UI label and substitute `{name}` placeholders.
///
/// Unknown keys are returned unchanged so a missing label is visible rather
/// than fatal.
pub fn t(lang: Lang, key: &str, vars: &[(&str, String)]) -> String {
    let template = STRINGS
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, en, ru)| match lang {
            Lang::En => *en,
            Lang::Ru => *ru,
        })
        .unwrap_or(key);
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}
