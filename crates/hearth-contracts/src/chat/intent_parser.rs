use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, PATH_COMMANDS, RAW_ARG_COMMANDS, TARGET_COMMANDS, UPLOAD_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        // Free text is not a command surface here; the loop answers with a
        // hint instead of guessing.
        return Intent::new("freeform", text);
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return Intent::new("freeform", text);
    }

    let command = slash_tail[..command_len].to_ascii_lowercase();
    let remainder = &slash_tail[command_len..];
    let arg = remainder.trim();

    if command == UPLOAD_COMMAND.command {
        let mut parts = parse_path_args(arg);
        let mut intent = Intent::new(UPLOAD_COMMAND.action, text);
        let path = if parts.is_empty() {
            String::new()
        } else {
            parts.remove(0)
        };
        intent
            .command_args
            .insert("path".to_string(), Value::String(path));
        intent.command_args.insert(
            "zip".to_string(),
            parts
                .first()
                .map(|zip| Value::String(zip.clone()))
                .unwrap_or(Value::Null),
        );
        return intent;
    }

    if let Some(action) = find_action(&command, PATH_COMMANDS) {
        let parts = parse_path_args(arg);
        let mut intent = Intent::new(action, text);
        let path = match parts.len() {
            0 => String::new(),
            1 => parts[0].clone(),
            _ => parts.join(" "),
        };
        intent
            .command_args
            .insert("path".to_string(), Value::String(path));
        return intent;
    }

    if let Some(action) = find_action(&command, TARGET_COMMANDS) {
        let mut intent = Intent::new(action, text);
        intent
            .command_args
            .insert("target".to_string(), Value::String(arg.to_string()));
        return intent;
    }

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        let mut intent = Intent::new(action, text);
        intent
            .command_args
            .insert("arg".to_string(), Value::String(arg.to_string()));
        return intent;
    }

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return Intent::new(action, text);
    }

    let mut intent = Intent::new("unknown", text);
    intent
        .command_args
        .insert("command".to_string(), Value::String(command));
    intent
        .command_args
        .insert("arg".to_string(), Value::String(arg.to_string()));
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_upload_with_zip() {
        let intent = parse_intent("/upload \"/tmp/front yard.jpg\" 90210");
        assert_eq!(intent.action, "upload_image");
        assert_eq!(intent.command_args["path"], json!("/tmp/front yard.jpg"));
        assert_eq!(intent.command_args["zip"], json!("90210"));
    }

    #[test]
    fn parse_upload_without_zip() {
        let intent = parse_intent("/upload house.png");
        assert_eq!(intent.action, "upload_image");
        assert_eq!(intent.command_args["path"], json!("house.png"));
        assert_eq!(intent.command_args["zip"], json!(null));
        assert!(intent.arg_str("zip").is_none());
    }

    #[test]
    fn parse_path_commands() {
        let video = parse_intent("/video \"/tmp/walk through.mp4\"");
        assert_eq!(video.action, "upload_reference_video");
        assert_eq!(video.command_args["path"], json!("/tmp/walk through.mp4"));

        let receipt = parse_intent("/receipt bid.jpg");
        assert_eq!(receipt.action, "upload_document");
        assert_eq!(receipt.command_args["path"], json!("bid.jpg"));
    }

    #[test]
    fn parse_target_commands() {
        let visualize = parse_intent("/visualize 2");
        assert_eq!(visualize.action, "visualize");
        assert_eq!(visualize.command_args["target"], json!("2"));

        let save = parse_intent("/save Paint Front Door");
        assert_eq!(save.action, "save_project");
        assert_eq!(save.command_args["target"], json!("Paint Front Door"));

        assert_eq!(parse_intent("/shop 1").action, "shop_project");
        assert_eq!(parse_intent("/products 1").action, "suggest_products");
        assert_eq!(parse_intent("/remove 1").action, "remove_project");
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/feed").action, "generate_feed");
        assert_eq!(parse_intent("/plan").action, "generate_plan");
        assert_eq!(parse_intent("/reset").action, "reset");
        assert_eq!(parse_intent("/status").action, "status");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_tab_and_key() {
        let tab = parse_intent("/tab discover");
        assert_eq!(tab.action, "set_tab");
        assert_eq!(tab.arg_str("arg"), Some("discover"));

        let key = parse_intent("/key AIza-example");
        assert_eq!(key.action, "select_key");
        assert_eq!(key.arg_str("arg"), Some("AIza-example"));

        let bare = parse_intent("/key");
        assert_eq!(bare.action, "select_key");
        assert!(bare.arg_str("arg").is_none());
    }

    #[test]
    fn freeform_and_unknown() {
        assert_eq!(parse_intent("what should I renovate?").action, "freeform");
        assert_eq!(parse_intent("").action, "noop");
        let unknown = parse_intent("/conjure roof");
        assert_eq!(unknown.action, "unknown");
        assert_eq!(unknown.command_args["command"], json!("conjure"));
        assert_eq!(unknown.command_args["arg"], json!("roof"));
    }
}
