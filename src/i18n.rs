use std::collections::HashMap;
use std::sync::OnceLock;

/// Global localization state
static LOCALIZER: OnceLock<Localizer> = OnceLock::new();

/// Load the message catalogue now rather than on first use.
pub fn init() {
    localizer();
}

fn localizer() -> &'static Localizer {
    LOCALIZER.get_or_init(Localizer::new)
}

/// Get a localized message by key
pub fn t(key: &str) -> String {
    localizer().get(key)
}

/// Get a localized message by key with `{$name}` placeholders filled in
pub fn t_with_args(key: &str, args: &[(&str, &dyn std::fmt::Display)]) -> String {
    localizer().get_with_args(key, args)
}

/// Localization manager
#[derive(Debug)]
pub struct Localizer {
    messages: HashMap<String, String>,
}

impl Localizer {
    fn new() -> Self {
        let language = Self::detect_language();
        Self {
            messages: Self::load_messages(&language),
        }
    }

    fn detect_language() -> String {
        // Check environment variables in order of preference
        let lang_vars = ["PAGERUN_LANG", "LC_ALL", "LC_MESSAGES", "LANG"];

        for var in &lang_vars {
            if let Ok(value) = std::env::var(var) {
                // "nb_NO.UTF-8" -> "nb"
                let lang_code = value
                    .split(['.', '_', '-'])
                    .next()
                    .unwrap_or_default()
                    .to_lowercase();

                match lang_code.as_str() {
                    "nb" | "no" | "nor" | "nn" => return "nb".to_string(),
                    "en" => return "en".to_string(),
                    _ => continue,
                }
            }
        }

        // Default to English
        "en".to_string()
    }

    fn load_messages(language: &str) -> HashMap<String, String> {
        let content = match language {
            "nb" => include_str!("../locales/nb.ftl"),
            _ => include_str!("../locales/en.ftl"),
        };
        Self::parse(content)
    }

    // Simple `key = value` lines; `#` starts a comment.
    fn parse(content: &str) -> HashMap<String, String> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(" = "))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect()
    }

    fn get(&self, key: &str) -> String {
        self.messages.get(key).cloned().unwrap_or_else(|| {
            tracing::warn!("missing translation key: {key}");
            format!("MISSING: {key}")
        })
    }

    fn get_with_args(&self, key: &str, args: &[(&str, &dyn std::fmt::Display)]) -> String {
        let mut message = self.get(key);

        for (var_name, value) in args {
            let placeholder = format!("{{${var_name}}}");
            message = message.replace(&placeholder, &format!("{value}"));
        }

        message
    }
}

// Convenience macros for common usage patterns
#[macro_export]
macro_rules! t {
    ($key:expr) => {
        $crate::i18n::t($key)
    };
}

#[macro_export]
macro_rules! t_args {
    ($key:expr, $($name:expr => $value:expr),* $(,)?) => {{
        let args: &[(&str, &dyn std::fmt::Display)] = &[
            $(
                ($name, &$value),
            )*
        ];
        $crate::i18n::t_with_args($key, args)
    }};
}
