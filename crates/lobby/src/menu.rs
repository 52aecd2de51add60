use crate::session::{Session, SessionError};

pub const MENU_HEADER: &str = "Select One:";
pub const MSG_INVALID_CHOICE: &str = "Please choose a valid option";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption<T> {
    pub value: T,
    pub label: String,
}

impl<T> MenuOption<T> {
    pub fn new(value: T, label: impl Into<String>) -> Self {
        Self {
            value,
            label: label.into(),
        }
    }
}

/// Render `options` as a numbered list and keep asking until the user picks one.
///
/// Only the 1-based position selects an option. Invalid input is answered with
/// [`MSG_INVALID_CHOICE`] and asked again, without limit.
pub async fn show_menu<T: Clone>(
    session: &mut Session,
    options: &[MenuOption<T>],
) -> Result<T, SessionError> {
    if options.is_empty() {
        return Err(SessionError::EmptyMenu);
    }

    let mut text = String::from(MENU_HEADER);
    for (i, opt) in options.iter().enumerate() {
        text.push('\n');
        text.push_str(&format!("{}) {}", i + 1, opt.label));
    }
    session.send(&text)?;

    loop {
        session.show_prompt()?;
        let line = session.next_line().await?;
        match parse_choice(&line, options.len()) {
            Some(i) => return Ok(options[i - 1].value.clone()),
            None => session.send(MSG_INVALID_CHOICE)?,
        }
    }
}

/// Accepts only ASCII digits with optional surrounding whitespace, in `1..=count`.
pub fn parse_choice(line: &str, count: usize) -> Option<usize> {
    let s = line.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = s.parse().ok()?;
    (1..=count).contains(&n).then_some(n)
}
