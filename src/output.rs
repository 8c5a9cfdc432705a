use std::io;

use console::style;
use serde::Serialize;
use thiserror::Error;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::dates::{format_local_timestamp, format_relative_date};
use crate::models::{DmChat, Group, GroupDetails, Message, SendPayload, User};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupListOutput {
    pub groups: Vec<Group>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListOutput {
    pub conversation: String,
    pub messages: Vec<Message>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DmChatListOutput {
    pub chats: Vec<DmChat>,
}

pub fn json_string<T: Serialize + ?Sized>(value: &T) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), OutputError> {
    println!("{}", json_string(value)?);
    Ok(())
}

pub fn print_groups(output: &GroupListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }
    if output.groups.is_empty() {
        println!("{}", style("No groups found.").yellow());
        return Ok(());
    }
    for line in render_group_table(&output.groups) {
        println!("{line}");
    }
    Ok(())
}

pub fn render_group_table(groups: &[Group]) -> Vec<String> {
    let mut id_width = display_width("id");
    let mut name_width = display_width("name");
    for group in groups {
        id_width = id_width.max(display_width(&group.id));
        name_width = name_width.max(display_width(&group.name));
    }
    name_width = name_width.min(40);

    let mut lines = Vec::with_capacity(groups.len() + 1);
    lines.push(
        style(format!(
            "{}  {}  {}",
            pad_right("id", id_width),
            pad_right("name", name_width),
            pad_left("members", 7),
        ))
        .bold()
        .to_string(),
    );
    for group in groups {
        lines.push(format!(
            "{}  {}  {}",
            style(pad_right(&group.id, id_width)).cyan(),
            pad_right(&truncate_display(&group.name, name_width), name_width),
            style(pad_left(&group.member_count.to_string(), 7)).magenta(),
        ));
    }
    lines
}

pub fn print_group_details(group: &GroupDetails, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(group);
    }
    for line in render_group_details(group) {
        println!("{line}");
    }
    Ok(())
}

pub fn render_group_details(group: &GroupDetails) -> Vec<String> {
    let created = group.created_at.map(format_local_timestamp);
    let office_mode = group.office_mode.map(|value| if value { "yes" } else { "no" });
    let members = group.members.len().to_string();
    let rows = [
        ("id", Some(group.id.as_str())),
        ("name", Some(group.name.as_str())),
        ("description", group.description.as_deref()),
        ("share url", group.share_url.as_deref()),
        ("office mode", office_mode),
        ("created", created.as_deref()),
        ("members", Some(members.as_str())),
    ];
    let field_width = rows.iter().map(|(field, _)| display_width(field)).max().unwrap_or(0);

    let mut lines: Vec<String> = rows
        .iter()
        .map(|(field, value)| {
            format!(
                "{}  {}",
                style(pad_right(field, field_width)).cyan(),
                value.filter(|value| !value.trim().is_empty()).unwrap_or("-")
            )
        })
        .collect();
    let nicknames: Vec<&str> = group
        .members
        .iter()
        .map(|member| member.nickname.as_str())
        .filter(|nickname| !nickname.is_empty())
        .collect();
    if !nicknames.is_empty() {
        lines.push(format!(
            "{}  {}",
            style(pad_right("", field_width)).cyan(),
            style(truncate_display(&nicknames.join(", "), 80)).dim()
        ));
    }
    lines
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    created_at: i64,
    name: &'a str,
    text: String,
    likes: usize,
}

/// One row per message with a header; text is flattened to a single line.
pub fn write_messages_csv<W: io::Write>(writer: W, messages: &[Message]) -> Result<(), OutputError> {
    let mut rows = csv::Writer::from_writer(writer);
    for message in messages {
        rows.serialize(CsvRow {
            id: &message.id,
            created_at: message.created_at,
            name: message.name.as_deref().unwrap_or(""),
            text: message.text.as_deref().unwrap_or("").replace(['\r', '\n'], " "),
            likes: message.favorited_by.len(),
        })?;
    }
    if messages.is_empty() {
        rows.write_record(["id", "created_at", "name", "text", "likes"])?;
    }
    rows.flush()?;
    Ok(())
}

pub fn print_messages(output: &MessageListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }
    if output.messages.is_empty() {
        println!("{}", style("No messages found.").yellow());
        return Ok(());
    }
    for message in &output.messages {
        println!("{}", render_message_line(message, &format_local_timestamp(message.created_at)));
    }
    Ok(())
}

pub fn render_message_line(message: &Message, timestamp: &str) -> String {
    let mut line = format!(
        "{}  {}: {}",
        style(timestamp).cyan(),
        style(message.sender_name()).bold(),
        message.text.as_deref().unwrap_or(""),
    );
    let attachments = message.attachments.len();
    if attachments > 0 {
        let note = if attachments == 1 {
            "[1 attachment]".to_string()
        } else {
            format!("[{attachments} attachments]")
        };
        line.push(' ');
        line.push_str(&style(note).dim().to_string());
    }
    let likes = message.favorited_by.len();
    if likes > 0 {
        line.push(' ');
        line.push_str(&style(format!("♥{likes}")).magenta().to_string());
    }
    line
}

pub fn print_dm_chats(output: &DmChatListOutput, json: bool, now: i64) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }
    if output.chats.is_empty() {
        println!("{}", style("No DM chats found.").yellow());
        return Ok(());
    }
    for line in render_dm_chat_table(&output.chats, now) {
        println!("{line}");
    }
    Ok(())
}

pub fn render_dm_chat_table(chats: &[DmChat], now: i64) -> Vec<String> {
    let mut id_width = display_width("user id");
    let mut name_width = display_width("name");
    for chat in chats {
        id_width = id_width.max(display_width(&chat.other_user.id));
        name_width = name_width.max(display_width(&chat.other_user.name));
    }
    name_width = name_width.min(24);
    let when_width = 8;
    let last_width = 60;

    let mut lines = Vec::with_capacity(chats.len() + 1);
    lines.push(
        style(format!(
            "{}  {}  {}  {}",
            pad_right("user id", id_width),
            pad_right("name", name_width),
            pad_right("updated", when_width),
            "last message",
        ))
        .bold()
        .to_string(),
    );
    for chat in chats {
        let updated = chat
            .updated_at
            .or_else(|| chat.last_message.as_ref().and_then(|message| message.created_at))
            .map(|ts| format_relative_date(ts, now))
            .unwrap_or_else(|| "-".to_string());
        let snippet = chat.snippet();
        let snippet = if snippet.is_empty() {
            "<no messages>".to_string()
        } else {
            truncate_display(&snippet, last_width)
        };
        lines.push(format!(
            "{}  {}  {}  {}",
            style(pad_right(&chat.other_user.id, id_width)).cyan(),
            pad_right(&truncate_display(&chat.other_user.name, name_width), name_width),
            pad_right(&updated, when_width),
            style(snippet).magenta(),
        ));
    }
    lines
}

pub fn print_user(user: &User, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(user);
    }
    let rows = [
        ("id", Some(user.id.as_str())),
        ("name", Some(user.name.as_str())),
        ("email", user.email.as_deref()),
        ("phone", user.phone_number.as_deref()),
        ("image", user.image_url.as_deref()),
    ];
    for (field, value) in rows {
        println!(
            "{}  {}",
            style(pad_right(field, 5)).cyan(),
            value.filter(|value| !value.is_empty()).unwrap_or("-")
        );
    }
    Ok(())
}

/// Prints the exact payload a send would post. The payload alone goes to
/// stdout so it can be piped.
pub fn print_dry_run(payload: &SendPayload) -> Result<(), OutputError> {
    eprintln!("{}", style("Dry run: nothing was sent. Payload:").blue().bold());
    print_json(payload)
}

pub fn print_sent(label: &str, message: &Message, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(message);
    }
    println!("{} (id {})", style(format!("{label} sent.")).green(), message.id);
    Ok(())
}

fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn truncate_display(value: &str, max_width: usize) -> String {
    if display_width(value) <= max_width {
        return value.to_string();
    }
    let ellipsis = if max_width < 3 { "" } else { "..." };
    let mut width = 0usize;
    let mut output = String::new();
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + ellipsis.len() > max_width {
            break;
        }
        output.push(ch);
        width += ch_width;
    }
    output.push_str(ellipsis);
    output
}

fn pad_right(value: &str, width: usize) -> String {
    let mut output = value.to_string();
    let current = display_width(value);
    if current < width {
        output.push_str(&" ".repeat(width - current));
    }
    output
}

fn pad_left(value: &str, width: usize) -> String {
    let current = display_width(value);
    if current >= width {
        return value.to_string();
    }
    let mut output = " ".repeat(width - current);
    output.push_str(value);
    output
}
