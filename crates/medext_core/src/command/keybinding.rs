//! Keybinding normalization and lookup.

use crate::extension::manifest::CommandContext;
use crate::extension::registry::ContributedCommand;

/// Canonical form of a binding string.
///
/// Lower-cases, splits on `+`, sorts every token except the last (the
/// modifiers) and re-joins, so `Shift+Ctrl+K` and `ctrl+shift+k` are equal.
pub fn normalize_keybinding(binding: &str) -> String {
    let lowered = binding.to_lowercase();
    let mut tokens: Vec<&str> = lowered.split('+').map(str::trim).collect();
    if let Some((_key, modifiers)) = tokens.split_last_mut() {
        modifiers.sort_unstable();
    }
    tokens.join("+")
}

pub fn keybindings_match(left: &str, right: &str) -> bool {
    normalize_keybinding(left) == normalize_keybinding(right)
}

/// First command runnable in `context` whose binding matches `pressed`.
pub fn find_command_by_keybinding<'a>(
    commands: &'a [ContributedCommand],
    pressed: &str,
    context: CommandContext,
) -> Option<&'a ContributedCommand> {
    let wanted = normalize_keybinding(pressed);
    commands.iter().find(|entry| {
        entry.command.runs_in(context)
            && entry
                .command
                .keybinding
                .as_deref()
                .is_some_and(|binding| normalize_keybinding(binding) == wanted)
    })
}

#[cfg(test)]
mod tests {
    use super::{find_command_by_keybinding, keybindings_match, normalize_keybinding};
    use crate::extension::manifest::{CommandContext, CommandContribution};
    use crate::extension::registry::ContributedCommand;

    fn command(id: &str, keybinding: &str, context: CommandContext) -> ContributedCommand {
        ContributedCommand {
            extension_id: "acme.ext".to_string(),
            extension_version: "1.0.0".to_string(),
            command: CommandContribution {
                id: id.to_string(),
                title: id.to_string(),
                icon: None,
                context: vec![context],
                required_capabilities: None,
                keybinding: Some(keybinding.to_string()),
            },
        }
    }

    #[test]
    fn modifier_order_and_case_do_not_matter() {
        assert_eq!(normalize_keybinding("Shift+Ctrl+K"), "ctrl+shift+k");
        assert!(keybindings_match("Shift+Ctrl+K", "ctrl+shift+k"));
        assert!(!keybindings_match("Ctrl+K", "Ctrl+Shift+K"));
    }

    #[test]
    fn final_token_is_not_reordered() {
        assert_eq!(normalize_keybinding("Alt+A"), "alt+a");
        assert_ne!(normalize_keybinding("K+Ctrl"), normalize_keybinding("Ctrl+K"));
        assert_eq!(normalize_keybinding("F5"), "f5");
    }

    #[test]
    fn lookup_respects_context() {
        let commands = vec![
            command("acme.chart", "Ctrl+P", CommandContext::ChartEditor),
            command("acme.any", "Ctrl+Shift+P", CommandContext::Global),
        ];
        let found = find_command_by_keybinding(&commands, "ctrl+p", CommandContext::ChartEditor)
            .expect("chart command");
        assert_eq!(found.command.id, "acme.chart");
        assert!(
            find_command_by_keybinding(&commands, "ctrl+p", CommandContext::Dashboard).is_none()
        );

        let found = find_command_by_keybinding(&commands, "Shift+Ctrl+P", CommandContext::Dashboard)
            .expect("global command");
        assert_eq!(found.command.id, "acme.any");
    }
}
