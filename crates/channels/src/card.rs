//! Outbound rich cards.

/// A clickable button. `payload` is opaque and echoed back by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

impl Button {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardBlock {
    Markdown(String),
    /// `key` is whatever [`crate::ChatClient::upload_image`] returned.
    Image { key: String, alt: String },
    Divider,
    Buttons(Vec<Vec<Button>>),
}

/// Ordered blocks rendered as one outbound message where the platform
/// allows it. Block order is preserved by every binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundCard {
    pub header: Option<String>,
    pub blocks: Vec<CardBlock>,
}

impl OutboundCard {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, title: impl Into<String>) -> Self {
        self.header = Some(title.into());
        self
    }

    #[must_use]
    pub fn markdown(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(CardBlock::Markdown(text.into()));
        self
    }

    #[must_use]
    pub fn image(mut self, key: impl Into<String>, alt: impl Into<String>) -> Self {
        self.blocks.push(CardBlock::Image {
            key: key.into(),
            alt: alt.into(),
        });
        self
    }

    #[must_use]
    pub fn divider(mut self) -> Self {
        self.blocks.push(CardBlock::Divider);
        self
    }

    #[must_use]
    pub fn buttons(mut self, rows: Vec<Vec<Button>>) -> Self {
        self.blocks.push(CardBlock::Buttons(rows));
        self
    }

    pub fn push(&mut self, block: CardBlock) {
        self.blocks.push(block);
    }

    /// No blocks and no header. Sending an empty card does nothing.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.header.is_none()
    }
}
