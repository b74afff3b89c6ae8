use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    System,
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
}

impl ThemeMode {
    pub fn toggled(self) -> Self {
        match self {
            ThemeMode::Light => ThemeMode::Dark,
            ThemeMode::Dark => ThemeMode::Light,
        }
    }
}

/// Palette handed to the view layer. Plain data; pick one with
/// [`Theme::for_scheme`] and pass it down explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Theme {
    pub mode: ThemeMode,
    pub background: &'static str,
    pub text: &'static str,
    pub input_background: &'static str,
    pub border: &'static str,
    pub primary: &'static str,
    pub placeholder: &'static str,
    pub icon: &'static str,
    pub card: &'static str,
    pub subtext: &'static str,
    pub highlight_background: &'static str,
    pub image_placeholder_background: &'static str,
}

impl Theme {
    pub fn light() -> Self {
        Self {
            mode: ThemeMode::Light,
            background: "#e6f9ef",
            text: "#000",
            input_background: "#fff",
            border: "#ccc",
            primary: "#004d00",
            placeholder: "#888",
            icon: "#000",
            card: "#e9f8e7",
            subtext: "#444444",
            highlight_background: "#fff3e0",
            image_placeholder_background: "#a1a1a1",
        }
    }

    pub fn dark() -> Self {
        Self {
            mode: ThemeMode::Dark,
            background: "#0D0D0D",
            text: "#fff",
            input_background: "#1e1e1e",
            border: "#444",
            primary: "#004d00",
            placeholder: "#aaa",
            icon: "#fff",
            card: "#1A1A1A",
            subtext: "#bbbbbb",
            highlight_background: "#004d00",
            image_placeholder_background: "#1A1A1A",
        }
    }

    pub fn for_mode(mode: ThemeMode) -> Self {
        match mode {
            ThemeMode::Light => Self::light(),
            ThemeMode::Dark => Self::dark(),
        }
    }

    /// `system_prefers_dark` is only consulted for [`ColorScheme::System`].
    pub fn for_scheme(scheme: ColorScheme, system_prefers_dark: bool) -> Self {
        match scheme {
            ColorScheme::Light => Self::light(),
            ColorScheme::Dark => Self::dark(),
            ColorScheme::System if system_prefers_dark => Self::dark(),
            ColorScheme::System => Self::light(),
        }
    }

    pub fn toggled(&self) -> Self {
        Self::for_mode(self.mode.toggled())
    }
}
