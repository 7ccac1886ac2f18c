//! Subject -> check command table.

/// Keys shorter than this only match exactly ("go" must not match "django").
const MIN_SUBSTRING_KEY: usize = 3;

/// Ordered table; the first matching key wins.
const CHECKS: &[(&str, &str)] = &[
    ("nginx", "nginx -v 2>&1"),
    ("docker-compose", "docker-compose --version"),
    ("docker", "docker --version"),
    ("kubectl", "kubectl version --client 2>&1"),
    ("helm", "helm version --short"),
    ("nodejs", "node --version"),
    ("node", "node --version"),
    ("npm", "npm --version"),
    ("yarn", "yarn --version"),
    ("pnpm", "pnpm --version"),
    ("nvm", ". \"$HOME/.nvm/nvm.sh\" && nvm --version"),
    ("python", "python3 --version 2>&1 || python --version 2>&1"),
    ("pip", "pip3 --version 2>&1 || pip --version 2>&1"),
    ("golang", "go version"),
    ("go", "go version"),
    ("rustup", "rustup --version 2>&1"),
    ("rust", "rustc --version"),
    ("cargo", "cargo --version"),
    ("java", "java -version 2>&1"),
    ("jdk", "java -version 2>&1"),
    ("maven", "mvn -v"),
    ("gradle", "gradle --version"),
    ("mysql", "mysql --version"),
    ("mariadb", "mariadb --version 2>&1 || mysql --version"),
    ("postgres", "psql --version"),
    ("redis", "redis-server --version"),
    ("mongo", "mongod --version"),
    ("apache", "apache2 -v 2>/dev/null || httpd -v"),
    ("httpd", "httpd -v"),
    ("php", "php --version"),
    ("ruby", "ruby --version"),
    ("git", "git --version"),
    ("curl", "curl --version"),
    ("wget", "wget --version"),
    ("terraform", "terraform version"),
    ("ansible", "ansible --version"),
    ("caddy", "caddy version"),
    ("certbot", "certbot --version 2>&1"),
];

/// Check for `subject` from the table: exact key first, then substring.
pub fn lookup(subject: &str) -> Option<&'static str> {
    CHECKS
        .iter()
        .find(|(key, _)| *key == subject)
        .or_else(|| {
            CHECKS
                .iter()
                .find(|(key, _)| key.len() >= MIN_SUBSTRING_KEY && subject.contains(key))
        })
        .map(|(_, check)| *check)
}

/// Fallback check for subjects with no table entry.
///
/// The version attempts are grouped so a missing binary reports `not found`
/// instead of falling through to the "installed" message.
pub fn generic(subject: &str) -> String {
    format!(
        "which {s} && {{ {s} --version 2>/dev/null || {s} -v 2>/dev/null || echo \"installed but version unknown\"; }} || echo \"{s}: not found\"",
        s = subject
    )
}

/// Check command for a subject.
pub fn check_for(subject: &str) -> String {
    lookup(subject).map(str::to_string).unwrap_or_else(|| generic(subject))
}
