use colored::Colorize;
use unicode_width::UnicodeWidthStr;

use parley_client::Screen;
use parley_client::view::{Align, AuthForm, ChatView, MessageRow};

/// Lay a screen out as terminal lines, `width` columns wide.
pub fn draw(screen: &Screen, width: usize) -> Vec<String> {
    match screen {
        Screen::SignIn(form) => draw_form(form, width),
        Screen::Chat(view) => draw_chat(view, width),
    }
}

fn draw_form(form: &AuthForm, width: usize) -> Vec<String> {
    let mut lines = vec![
        form.title.bold().to_string(),
        rule(width),
        "/login <email> <password>    sign in".to_string(),
        "/signup <email> <password>   create an account".to_string(),
        "/quit                        exit".to_string(),
    ];
    if let Some(status) = &form.status {
        lines.push(String::new());
        lines.push(status.red().to_string());
    }
    lines
}

fn draw_chat(view: &ChatView, width: usize) -> Vec<String> {
    let right = format!("{}  [{}]", view.greeting, view.logout_label);
    let mut lines = vec![spread(
        (view.title.bold().to_string().as_str(), view.title),
        (right.as_str(), right.as_str()),
        width,
    )];
    lines.push(rule(width));

    for row in &view.rows {
        lines.extend(draw_row(row, width));
    }

    lines.push(rule(width));
    let composer = &view.composer;
    let prompt = if composer.draft.is_empty() {
        format!("> {}", composer.placeholder.dimmed())
    } else {
        format!("> {}", composer.draft)
    };
    let plain_prompt = if composer.draft.is_empty() {
        format!("> {}", composer.placeholder)
    } else {
        format!("> {}", composer.draft)
    };
    let send = format!("[{}]", composer.send_label);
    let send_styled = if composer.can_submit {
        send.bold().to_string()
    } else {
        send.dimmed().to_string()
    };
    lines.push(spread(
        (prompt.as_str(), plain_prompt.as_str()),
        (send_styled.as_str(), send.as_str()),
        width,
    ));
    lines
}

fn draw_row(row: &MessageRow, width: usize) -> Vec<String> {
    let meta = format!("{} · {}", row.username, row.age);
    let body = format!(" {} ", row.content);
    let body_styled = if row.own {
        body.as_str().white().on_blue().to_string()
    } else {
        body.clone()
    };

    vec![
        align(&meta.dimmed().to_string(), &meta, row.align, width),
        align(&body_styled, &body, row.align, width),
    ]
}

/// `plain` is `styled` without colour codes; its display width decides
/// the padding.
fn align(styled: &str, plain: &str, align: Align, width: usize) -> String {
    match align {
        Align::Left => styled.to_string(),
        Align::Right => format!("{}{}", " ".repeat(width.saturating_sub(plain.width())), styled),
    }
}

/// Left text flush left, right text flush right, at least one space apart.
/// Each side is a (styled, plain) pair.
fn spread(left: (&str, &str), right: (&str, &str), width: usize) -> String {
    let gap = width
        .saturating_sub(left.1.width() + right.1.width())
        .max(1);
    format!("{}{}{}", left.0, " ".repeat(gap), right.0)
}

fn rule(width: usize) -> String {
    "─".repeat(width)
}
