#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose argument is a file path (quoted paths survive).
pub(crate) const PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "video",
        action: "upload_reference_video",
    },
    CommandSpec {
        command: "receipt",
        action: "upload_document",
    },
];

/// Commands whose argument names a suggestion or saved project (index into
/// the current listing, or a name/id fragment).
pub(crate) const TARGET_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "visualize",
        action: "visualize",
    },
    CommandSpec {
        command: "save",
        action: "save_project",
    },
    CommandSpec {
        command: "remove",
        action: "remove_project",
    },
    CommandSpec {
        command: "shop",
        action: "shop_project",
    },
    CommandSpec {
        command: "products",
        action: "suggest_products",
    },
];

/// Commands whose argument (if any) is taken verbatim.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "tab",
        action: "set_tab",
    },
    CommandSpec {
        command: "key",
        action: "select_key",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "feed",
        action: "generate_feed",
    },
    CommandSpec {
        command: "plan",
        action: "generate_plan",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

/// `/upload <path> [zip]` carries both a path and an optional zip code.
pub(crate) const UPLOAD_COMMAND: CommandSpec = CommandSpec {
    command: "upload",
    action: "upload_image",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/upload <photo> [zip]",
    "/visualize <n>",
    "/save <n>",
    "/remove <n>",
    "/shop <n>",
    "/products <n>",
    "/receipt <file>",
    "/plan",
    "/video <file>",
    "/feed",
    "/tab planner|visualize|projects|discover",
    "/key [value]",
    "/status",
    "/reset",
    "/help",
    "/quit",
];
