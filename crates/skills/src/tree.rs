//! Text tree of the tool catalogue: `tools` at the root, one branch per
//! server, one leaf per tool.

use serde::Deserialize;

use codemode_core::ToolGroup;

pub const TREE_ROOT: &str = "tools";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeOptions {
    /// Append each tool's description to its leaf.
    #[serde(default)]
    pub descriptions: bool,
    /// Truncate descriptions to this many characters.
    #[serde(default)]
    pub char_limit: Option<usize>,
}

pub fn render_tree(groups: &[ToolGroup], options: &TreeOptions) -> String {
    let mut lines = vec![TREE_ROOT.to_string()];

    for (g, group) in groups.iter().enumerate() {
        let last_group = g + 1 == groups.len();
        lines.push(format!("{}{}", branch(last_group), group.name));

        let indent = if last_group { "    " } else { "│   " };
        for (t, tool) in group.tools.iter().enumerate() {
            let last_tool = t + 1 == group.tools.len();
            let mut line = format!("{}{}{}", indent, branch(last_tool), tool.name);
            if options.descriptions {
                if let Some(text) = summarize(&tool.description, options.char_limit) {
                    line.push_str(" - ");
                    line.push_str(&text);
                }
            }
            lines.push(line);
        }
    }

    lines.join("\n")
}

fn branch(last: bool) -> &'static str {
    if last {
        "└── "
    } else {
        "├── "
    }
}

/// First line of a description, cut to `limit` characters.
fn summarize(description: &str, limit: Option<usize>) -> Option<String> {
    let first = description.lines().map(str::trim).find(|l| !l.is_empty())?;
    match limit {
        Some(limit) if first.chars().count() > limit => {
            let cut: String = first.chars().take(limit).collect();
            Some(format!("{}...", cut.trim_end()))
        }
        _ => Some(first.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_core::{OutputSchema, ToolMeta};

    fn tool(server: &str, name: &str, description: &str) -> ToolMeta {
        ToolMeta::build(
            server,
            name,
            Some(description.to_string()),
            None,
            OutputSchema::Unspecified,
        )
        .unwrap()
    }

    #[test]
    fn test_single_server_single_tool() {
        let groups = vec![ToolGroup::new("search", "search", vec![tool("search", "run", "Run a query")])];
        let tree = render_tree(&groups, &TreeOptions::default());
        assert_eq!(tree, "tools\n└── search\n    └── run");
    }

    #[test]
    fn test_branches_and_descriptions() {
        let groups = vec![
            ToolGroup::new(
                "search",
                "search",
                vec![
                    tool("search", "run", "Run a query\nagainst the index"),
                    tool("search", "stop", ""),
                ],
            ),
            ToolGroup::new("web", "web", vec![tool("web", "fetch", "Fetch a page over HTTP")]),
        ];
        let options = TreeOptions {
            descriptions: true,
            char_limit: Some(10),
        };

        let tree = render_tree(&groups, &options);
        let expected = [
            "tools",
            "├── search",
            "│   ├── run - Run a quer...",
            "│   └── stop",
            "└── web",
            "    └── fetch - Fetch a pa...",
        ]
        .join("\n");
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_empty_catalogue() {
        assert_eq!(render_tree(&[], &TreeOptions::default()), "tools");
    }
}
