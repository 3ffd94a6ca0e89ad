use crate::story::StoryError;

pub type Rgb = [u8; 3];

/// One row of the built-in theme table. `{name}` placeholders are filled with
/// the subject's name.
#[derive(Debug, PartialEq, Eq)]
pub struct ThemeSpec {
    pub label: &'static str,
    pub aliases: &'static [&'static str],
    pub phrasing_rule: &'static str,
    pub cover_color: Rgb,
    pub presets: &'static [&'static str],
}

pub const DEFAULT_COVER_COLOR: Rgb = [255, 243, 205];

pub const DEFAULT_PHRASING_RULE: &str = "Each line must describe {name} in one short moment that clearly belongs to the theme \"{theme}\", for example \"{name} exploring a place or activity typical of {theme}\".";

pub const BUILTIN_THEMES: &[ThemeSpec] = &[
    ThemeSpec {
        label: "Professions",
        aliases: &["Different Professions"],
        phrasing_rule: "Each line must be exactly \"{name} the <profession>\" with no location or extra detail, for example \"{name} the doctor\".",
        cover_color: [204, 229, 255],
        presets: &[
            "{name} the doctor",
            "{name} the pilot",
            "{name} the firefighter",
            "{name} the scientist",
        ],
    },
    ThemeSpec {
        label: "Value-Based Adventures",
        aliases: &["Values", "Value Based Adventures"],
        phrasing_rule: "Each line must describe {name} doing one kind, honest or responsible action, for example \"{name} sharing toys with a friend\".",
        cover_color: [214, 240, 214],
        presets: &[
            "{name} cleaning their play area",
            "{name} helping an elder cross the street",
            "{name} sharing toys with a friend",
        ],
    },
    ThemeSpec {
        label: "Cultural Landmarks",
        aliases: &["Landmarks"],
        phrasing_rule: "Each line must be \"{name} at <landmark>, <country>\", for example \"{name} at the Taj Mahal, India\".",
        cover_color: [255, 224, 189],
        presets: &[
            "{name} at the Pyramids of Egypt",
            "{name} at the Taj Mahal, India",
            "{name} at the Eiffel Tower, France",
        ],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Theme {
    BuiltIn(&'static ThemeSpec),
    Custom(String),
}

fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn find_builtin(label: &str) -> Option<&'static ThemeSpec> {
    let wanted = normalize_label(label);
    BUILTIN_THEMES.iter().find(|spec| {
        normalize_label(spec.label) == wanted
            || spec.aliases.iter().any(|alias| normalize_label(alias) == wanted)
    })
}

/// Cover color for any label; unknown labels get the default.
pub fn cover_color_for(label: &str) -> Rgb {
    find_builtin(label)
        .map(|spec| spec.cover_color)
        .unwrap_or(DEFAULT_COVER_COLOR)
}

impl Theme {
    pub fn parse(label: &str) -> Result<Self, StoryError> {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(StoryError::EmptyTheme);
        }
        Ok(match find_builtin(trimmed) {
            Some(spec) => Theme::BuiltIn(spec),
            None => Theme::Custom(trimmed.to_string()),
        })
    }

    pub fn label(&self) -> &str {
        match self {
            Theme::BuiltIn(spec) => spec.label,
            Theme::Custom(label) => label.as_str(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Theme::BuiltIn(_))
    }

    pub fn phrasing_rule(&self, name: &str) -> String {
        let template = match self {
            Theme::BuiltIn(spec) => spec.phrasing_rule,
            Theme::Custom(_) => DEFAULT_PHRASING_RULE,
        };
        template
            .replace("{name}", name)
            .replace("{theme}", self.label())
    }

    pub fn cover_color(&self) -> Rgb {
        match self {
            Theme::BuiltIn(spec) => spec.cover_color,
            Theme::Custom(_) => DEFAULT_COVER_COLOR,
        }
    }

    /// Ready-made scenarios; custom themes have none.
    pub fn preset_scenarios(&self, name: &str) -> Option<Vec<String>> {
        match self {
            Theme::BuiltIn(spec) => Some(
                spec.presets
                    .iter()
                    .map(|preset| preset.replace("{name}", name))
                    .collect(),
            ),
            Theme::Custom(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_labels_and_aliases() {
        let theme = Theme::parse("  cultural   landmarks ").unwrap();
        assert_eq!(theme.label(), "Cultural Landmarks");
        assert!(theme.is_builtin());

        let theme = Theme::parse("Different Professions").unwrap();
        assert_eq!(theme.label(), "Professions");
    }

    #[test]
    fn unknown_labels_become_custom_with_defaults() {
        let theme = Theme::parse("Space Pirates").unwrap();
        assert_eq!(theme, Theme::Custom("Space Pirates".to_string()));
        assert_eq!(theme.cover_color(), DEFAULT_COVER_COLOR);
        assert_eq!(cover_color_for("Space Pirates"), DEFAULT_COVER_COLOR);
        assert_eq!(
            theme.phrasing_rule("Mia"),
            DEFAULT_PHRASING_RULE
                .replace("{name}", "Mia")
                .replace("{theme}", "Space Pirates")
        );
        assert!(theme.preset_scenarios("Mia").is_none());
    }

    #[test]
    fn empty_custom_label_is_rejected() {
        assert!(matches!(Theme::parse("   "), Err(StoryError::EmptyTheme)));
    }

    #[test]
    fn builtin_themes_have_distinct_rules_and_colors() {
        for (i, a) in BUILTIN_THEMES.iter().enumerate() {
            for b in &BUILTIN_THEMES[i + 1..] {
                assert_ne!(a.phrasing_rule, b.phrasing_rule);
                assert_ne!(a.cover_color, b.cover_color);
            }
            assert_ne!(a.cover_color, DEFAULT_COVER_COLOR);
        }
    }

    #[test]
    fn presets_interpolate_the_subject() {
        let theme = Theme::parse("Professions").unwrap();
        let presets = theme.preset_scenarios("Mia").unwrap();
        assert_eq!(presets[0], "Mia the doctor");
        assert_eq!(presets.len(), 4);
    }
}
