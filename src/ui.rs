use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, InputMode, Phase, StatusKind};
use crate::session::{ChatRole, format_size};

const CAPTIONS: [&str; 2] = [
    "Agent server spins down when idle; the first request can take 50 seconds or more",
    "Model Context Protocol compliant research agent",
];

/// Style one line of assistant markdown: `# headings`, `- bullets`,
/// `**bold**` and `` `code` `` spans. Everything else is literal.
pub fn parse_markdown_line(text: &str) -> Line<'static> {
    let trimmed = text.trim_start();
    if let Some(heading) = trimmed.strip_prefix('#') {
        let heading = heading.trim_start_matches('#').trim();
        return Line::from(Span::styled(
            heading.to_string(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
    }

    let mut spans: Vec<Span<'static>> = Vec::new();
    let body = match trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
        Some(rest) => {
            let indent = text.len() - trimmed.len();
            spans.push(Span::raw(format!("{}• ", " ".repeat(indent))));
            rest
        }
        None => text,
    };

    let mut chars = body.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut bold_text = String::new();
                let mut found_close = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'*') {
                        chars.next();
                        found_close = true;
                        break;
                    }
                    bold_text.push(c);
                }

                if found_close && !bold_text.is_empty() {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(
                        bold_text,
                        Style::default().add_modifier(Modifier::BOLD),
                    ));
                } else {
                    // No closing **, treat as literal
                    current_text.push_str("**");
                    current_text.push_str(&bold_text);
                }
            }
            '`' => {
                let mut code = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    if c == '`' {
                        found_close = true;
                        break;
                    }
                    code.push(c);
                }

                if found_close {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(code, Style::default().fg(Color::Green)));
                } else {
                    current_text.push('`');
                    current_text.push_str(&code);
                }
            }
            _ => current_text.push(c),
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, captions, body, input, status, footer
    let [header_area, caption_area, body_area, input_area, status_area, footer_area] =
        Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(CAPTIONS.len() as u16),
            Constraint::Min(0),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(area);

    render_header(app, frame, header_area);
    render_captions(frame, caption_area);

    if app.show_documents {
        let [chat_area, docs_area] = Layout::horizontal([
            Constraint::Percentage(65),
            Constraint::Percentage(35),
        ])
        .areas(body_area);
        render_chat(app, frame, chat_area);
        render_documents(app, frame, docs_area);
    } else {
        app.documents_area = None;
        render_chat(app, frame, body_area);
    }

    render_input(app, frame, input_area);
    render_status(app, frame, status_area);
    render_footer(app, frame, footer_area);

    // Popups
    if app.show_reset_confirm {
        render_reset_confirm(frame, area);
    } else if app.show_upload_prompt {
        render_upload_prompt(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let thread = match app.session.thread_id() {
        Some(id) => format!(" thread {}", id),
        None => " no thread yet".to_string(),
    };
    let docs = match app.session.documents().len() {
        0 => String::new(),
        n => format!(" [{} docs]", n),
    };

    let title = Line::from(vec![
        Span::styled(" Research Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(thread, Style::default().fg(Color::Gray)),
        Span::styled(docs, Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_captions(frame: &mut Frame, area: Rect) {
    let lines: Vec<Line> = CAPTIONS
        .iter()
        .map(|c| {
            Line::from(Span::styled(
                format!(" {}", c),
                Style::default().fg(Color::DarkGray).italic(),
            ))
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), area);
}

fn role_line(role: ChatRole) -> Line<'static> {
    match role {
        ChatRole::User => Line::from(Span::styled(
            "You:",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        ChatRole::Assistant => Line::from(Span::styled(
            "Agent:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
    }
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area and inner size for mouse hit-testing and scroll calculations
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let border_color = if app.input_mode == InputMode::Normal {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ", app.client().base_url()));

    let mut lines: Vec<Line> = Vec::new();
    for turn in app.session.transcript() {
        lines.push(role_line(turn.role));
        match turn.role {
            ChatRole::User => {
                lines.extend(turn.content.lines().map(|l| Line::from(l.to_string())));
            }
            ChatRole::Assistant => {
                lines.extend(turn.content.lines().map(parse_markdown_line));
            }
        }
        lines.push(Line::default());
    }

    if let Some(reply) = app.reply.as_ref() {
        lines.push(role_line(ChatRole::Assistant));
        if reply.text().is_empty() {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        } else {
            lines.extend(reply.display().lines().map(parse_markdown_line));
        }
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_documents(app: &mut App, frame: &mut Frame, area: Rect) {
    app.documents_area = Some(area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" Documents (r refresh, C clear) ");

    let items: Vec<ListItem> = if app.session.documents().is_empty() {
        vec![ListItem::new(Span::styled(
            " No documents uploaded",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        app.session
            .documents()
            .iter()
            .map(|doc| {
                let mut details = vec![format!("{} chunks", doc.num_chunks)];
                if let Some(pages) = doc.num_pages {
                    details.push(format!("{} pages", pages));
                }
                details.push(format_size(doc.file_size));
                if let Some(at) = doc.upload_time {
                    details.push(at.format("%Y-%m-%d %H:%M").to_string());
                }

                ListItem::new(vec![
                    Line::from(Span::styled(format!(" {}", doc.filename), Style::default().bold())),
                    Line::from(Span::styled(
                        format!("   {}", details.join(" · ")),
                        Style::default().fg(Color::DarkGray),
                    )),
                ])
            })
            .collect()
    };

    frame.render_widget(List::new(items).block(block), area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = match app.phase {
        Phase::Idle => " Message ",
        Phase::AwaitingResponse => " Message (waiting for reply) ",
        Phase::Uploading => " Message (uploading) ",
        Phase::Resetting => " Message (resetting) ",
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Keep the cursor visible by scrolling horizontally
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if editing && !app.show_reset_confirm && !app.show_upload_prompt {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_status(app: &App, frame: &mut Frame, area: Rect) {
    let Some(status) = app.status.as_ref() else {
        return;
    };
    let (label, color) = match status.kind {
        StatusKind::Info => (" info ", Color::Green),
        StatusKind::Warning => (" warn ", Color::Yellow),
        StatusKind::Error => (" error ", Color::Red),
    };

    let line = Line::from(vec![
        Span::styled(label, Style::default().bg(color).fg(Color::Black)),
        Span::raw(" "),
        Span::styled(status.text.clone(), Style::default().fg(color)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let hint = |k: &'static str, label: &'static str| {
        [Span::styled(k, key_style), Span::styled(label, label_style)]
    };

    let hints: Vec<Span> = match app.input_mode {
        InputMode::Editing => [hint(" Enter ", " send "), hint(" Esc ", " commands ")]
            .into_iter()
            .flatten()
            .collect(),
        InputMode::Normal => [
            hint(" i ", " type "),
            hint(" j/k ", " scroll "),
            hint(" R ", " reset "),
            hint(" u ", " upload "),
            hint(" d ", if app.show_documents { " hide docs " } else { " docs " }),
            hint(" q ", " quit "),
        ]
        .into_iter()
        .flatten()
        .collect(),
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = (area.width.saturating_sub(width)) / 2;
    let y = (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_reset_confirm(frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 52, 5);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Reset conversation? ");

    let text = vec![
        Line::from("Starts a new thread and clears uploaded documents."),
        Line::default(),
        Line::from(vec![
            Span::styled(" y ", Style::default().bg(Color::Red).fg(Color::White)),
            Span::raw(" confirm   "),
            Span::styled(" n ", Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::raw(" cancel"),
        ]),
    ];

    frame.render_widget(Paragraph::new(text).block(block), popup_area);
}

fn render_upload_prompt(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 64, 6);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Upload document ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Path to a file. Enter to upload, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = input_area.width as usize;
    let offset = app.upload_path_cursor.saturating_sub(width.saturating_sub(1));
    let visible: String = app.upload_path_input.chars().skip(offset).take(width).collect();
    let path_input = Paragraph::new(visible).style(Style::default().fg(Color::Cyan));
    frame.render_widget(path_input, input_area);

    let cursor_x = (app.upload_path_cursor - offset) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}
