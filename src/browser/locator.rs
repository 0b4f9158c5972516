//! Page-side element lookup.
//!
//! All selector kinds resolve through one injected function so that CSS,
//! XPath and text matching share the same visibility rules.

use serde_json::{json, Value};

use super::Selector;

const LOCATOR_JS: &str = include_str!("locator.js");

/// Attribute used to hand an element found by the locator to a CSS lookup.
pub const TARGET_ATTRIBUTE: &str = "data-bot-target";

#[derive(Debug, Clone, Copy)]
pub enum Action {
    Visible,
    Attribute,
    Mark,
    MarkAndClear,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Attribute => "attr",
            Self::Mark => "mark",
            Self::MarkAndClear => "mark_clear",
        }
    }
}

pub fn script(selector: &Selector, action: Action, arg: Option<&str>) -> String {
    call(json!(selector), action.as_str(), json!(arg))
}

pub fn click_text_script(labels: &[&str]) -> String {
    call(Value::Null, "click_text", json!(labels))
}

pub fn target_css(token: &str) -> String {
    format!("[{TARGET_ATTRIBUTE}=\"{token}\"]")
}

fn call(spec: Value, action: &str, arg: Value) -> String {
    format!("({})({}, {}, {})", LOCATOR_JS.trim(), spec, json!(action), arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{css, text_is};

    #[test]
    fn test_script_embeds_selector_and_action() {
        let s = script(&css("button.join"), Action::Visible, None);
        assert!(s.starts_with("((spec, action, arg) =>"));
        assert!(s.ends_with(r#"({"css":"button.join","kind":"css"}, "visible", null)"#)
            || s.ends_with(r#"({"kind":"css","css":"button.join"}, "visible", null)"#));
    }

    #[test]
    fn test_text_selector_quotes_are_escaped() {
        let s = script(&text_is("You'll join the call"), Action::Mark, Some("t1"));
        assert!(s.contains(r#""text":"You'll join the call""#));
        assert!(s.contains(r#""mark", "t1")"#));
    }

    #[test]
    fn test_click_text_script() {
        let s = click_text_script(&["Ask to join", "Join now"]);
        assert!(s.ends_with(r#"(null, "click_text", ["Ask to join","Join now"])"#));
    }

    #[test]
    fn test_target_css() {
        assert_eq!(target_css("abc"), "[data-bot-target=\"abc\"]");
    }
}
