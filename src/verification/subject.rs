//! Goal text -> verification subject.

use std::sync::LazyLock;

use regex::Regex;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9][a-z0-9._+-]*").expect("valid token regex"));

/// Action verbs stripped from the goal. Non-Latin verbs (安装, 部署, 配置, ...)
/// never survive tokenization, so only Latin-script forms are listed.
const ACTION_VERBS: &[&str] = &[
    "install",
    "installing",
    "reinstall",
    "deploy",
    "deploying",
    "configure",
    "configuring",
    "setup",
    "set",
    "upgrade",
    "update",
    "enable",
    "start",
    // es / pt
    "instalar",
    "configurar",
    "desplegar",
    "implantar",
    // de
    "installieren",
    "einrichten",
    "konfigurieren",
    // fr
    "installer",
    "configurer",
];

const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "up", "and", "or", "on", "in", "onto", "to", "for", "with", "of", "my", "this", "it", "please",
    "latest", "newest", "stable", "new", "version", "package", "packages", "service", "server", "make", "sure",
    "ensure", "get", "is", "are", "that", "running", "el", "la", "den", "die", "das", "le", "les",
];

/// Extract the thing a goal is about, e.g. `"Install the latest nginx"` -> `nginx`.
///
/// Returns `None` when nothing but verbs and filler remains.
pub fn extract_subject(goal: &str) -> Option<String> {
    let lowered = goal.to_lowercase();
    TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str().trim_end_matches(['.', '-', '+']))
        .find(|token| {
            !token.is_empty()
                && token.chars().any(|c| c.is_ascii_alphabetic())
                && !ACTION_VERBS.contains(token)
                && !FILLER_WORDS.contains(token)
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_install() {
        assert_eq!(extract_subject("install nginx"), Some("nginx".to_string()));
        assert_eq!(extract_subject("Install the latest Docker"), Some("docker".to_string()));
    }

    #[test]
    fn test_set_up_two_words() {
        assert_eq!(extract_subject("set up redis on the server"), Some("redis".to_string()));
    }

    #[test]
    fn test_version_numbers_are_skipped() {
        assert_eq!(extract_subject("install 3.11 python"), Some("python".to_string()));
        assert_eq!(extract_subject("install python3.11"), Some("python3.11".to_string()));
    }

    #[test]
    fn test_locale_verbs() {
        assert_eq!(extract_subject("安装nginx"), Some("nginx".to_string()));
        assert_eq!(extract_subject("部署 redis"), Some("redis".to_string()));
        assert_eq!(extract_subject("instalar postgresql"), Some("postgresql".to_string()));
        assert_eq!(extract_subject("Docker installieren"), Some("docker".to_string()));
    }

    #[test]
    fn test_trailing_punctuation() {
        assert_eq!(extract_subject("please install node."), Some("node".to_string()));
    }

    #[test]
    fn test_nothing_left() {
        assert_eq!(extract_subject("install"), None);
        assert_eq!(extract_subject("配置"), None);
        assert_eq!(extract_subject(""), None);
    }
}
