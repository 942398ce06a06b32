/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    SignUp { email: String, password: String },
    Logout,
    Quit,
    /// Anything that is not a command: the composer draft.
    Text(String),
    /// A slash command we could not make sense of.
    Invalid(String),
}

pub fn parse(line: &str) -> Command {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return Command::Text(line.to_string());
    }

    let mut parts = trimmed.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("/login", [email, password]) => Command::Login {
            email: email.to_string(),
            password: password.to_string(),
        },
        ("/signup", [email, password]) => Command::SignUp {
            email: email.to_string(),
            password: password.to_string(),
        },
        ("/logout", []) => Command::Logout,
        ("/quit", []) => Command::Quit,
        ("/login" | "/signup", _) => Command::Invalid(format!("usage: {} <email> <password>", name)),
        _ => Command::Invalid(format!("unknown command {}", name)),
    }
}
