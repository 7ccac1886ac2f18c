//! Install-command detection.
//!
//! Signature matching over command text. It only feeds prompt wording, so a
//! miss is harmless: the planner is told no install has run yet.

use std::sync::LazyLock;

use regex::RegexSet;

static INSTALL_SIGNATURES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        // system package managers
        r"(?i)\b(apt-get|apt|aptitude|yum|dnf|zypper|apk|brew|snap|port|choco|winget|scoop|emerge)\s+(-\S+\s+)*(install|add|reinstall)\b",
        r"(?i)\bpacman\s+(-\S*\s+)*-S",
        r"(?i)\b(dpkg\s+-i|rpm\s+-[iU])",
        // language package managers
        r"(?i)\b(pip3?|pipx|npm|yarn|pnpm|gem|cargo|go|composer|conda|mamba)\s+(-\S+\s+)*(install|add|get|require)\b",
        // pipe-to-shell installers
        r"(?i)\b(curl|wget)\b[^|]*\|\s*(sudo\s+(-\S+\s+)*)?(ba|z|da)?sh\b",
        r"(?i)\b(ba|z)?sh\s+<\(\s*(curl|wget)\b",
        // version managers
        r"(?i)\b(nvm|pyenv|rbenv|rustup|asdf|sdk|fnm|volta)\s+(install|toolchain\s+install)\b",
        r"(?i)\b(nvm|install)\.sh\b",
    ])
    .expect("install signatures are valid")
});

/// Whether `command` looks like it installs software.
pub fn is_install_command(command: &str) -> bool {
    INSTALL_SIGNATURES.is_match(command)
}

/// Whether any of `commands` looks like an install.
pub fn any_install_command<'a>(commands: impl IntoIterator<Item = &'a String>) -> bool {
    commands.into_iter().any(|c| is_install_command(c))
}
