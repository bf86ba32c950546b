//! Flatten cards into the text and image messages the provider supports.

use parley_channels::{Button, CardBlock, OutboundCard};

const DIVIDER: &str = "────────";

/// One provider message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    /// Base64 image content.
    Image(String),
}

/// Render `card` in block order.
///
/// Adjacent text-like blocks share one text message; every image block
/// becomes its own image message.
pub fn render_card(card: &OutboundCard) -> Vec<Outgoing> {
    let mut out = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    if let Some(header) = card.header.as_deref().filter(|h| !h.is_empty()) {
        lines.push(header.to_string());
    }
    for block in &card.blocks {
        match block {
            CardBlock::Markdown(text) => lines.push(text.clone()),
            CardBlock::Divider => lines.push(DIVIDER.to_string()),
            CardBlock::Buttons(rows) => lines.extend(rows.iter().map(|row| render_row(row))),
            CardBlock::Image { key, .. } => {
                flush(&mut lines, &mut out);
                out.push(Outgoing::Image(key.clone()));
            },
        }
    }
    flush(&mut lines, &mut out);
    out
}

fn render_row(row: &[Button]) -> String {
    row.iter()
        .map(|b| {
            if b.payload.is_empty() || b.payload == b.label {
                format!("[{}]", b.label)
            } else {
                format!("[{}] {}", b.label, b.payload)
            }
        })
        .collect::<Vec<_>>()
        .join("  ")
}

fn flush(lines: &mut Vec<String>, out: &mut Vec<Outgoing>) {
    if lines.is_empty() {
        return;
    }
    let text = lines.join("\n");
    lines.clear();
    if !text.trim().is_empty() {
        out.push(Outgoing::Text(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_text_between_images() {
        let card = OutboundCard::new()
            .header("Jiadan")
            .markdown("post 1")
            .image("b64-a", "a")
            .image("b64-b", "b")
            .divider()
            .markdown("done")
            .buttons(vec![vec![Button::new("more", "#jiadan"), Button::new("ok", "ok")]]);
        assert_eq!(render_card(&card), vec![
            Outgoing::Text("Jiadan\npost 1".into()),
            Outgoing::Image("b64-a".into()),
            Outgoing::Image("b64-b".into()),
            Outgoing::Text(format!("{DIVIDER}\ndone\n[more] #jiadan  [ok]")),
        ]);
    }

    #[test]
    fn empty_card_renders_nothing() {
        assert!(render_card(&OutboundCard::new()).is_empty());
        assert!(render_card(&OutboundCard::new().markdown("  ")).is_empty());
    }
}
