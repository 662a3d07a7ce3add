use serde::Serialize;
use switchboard_core::render::{BlockKind, DeliveryBatch, RenderedBlock};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    pub element_type: &'static str,
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            element_type: "button",
            action_id: action_id.into(),
            text: TextObject::plain(label),
            url: None,
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        block_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<TextObject>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fields: Vec<TextObject>,
        #[serde(skip_serializing_if = "Option::is_none")]
        accessory: Option<ButtonElement>,
    },
    Divider {
        block_id: String,
    },
    Context {
        block_id: String,
        elements: Vec<TextObject>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    #[serde(rename = "text")]
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(builder.build(block_id.into()));
        self
    }

    pub fn divider(mut self, block_id: impl Into<String>) -> Self {
        self.blocks.push(Block::Divider { block_id: block_id.into() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
    fields: Vec<TextObject>,
    accessory: Option<ButtonElement>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    pub fn field(&mut self, text: impl Into<String>) -> &mut Self {
        self.fields.push(TextObject::mrkdwn(text));
        self
    }

    pub fn accessory(&mut self, button: ButtonElement) -> &mut Self {
        self.accessory = Some(button);
        self
    }

    fn build(self, block_id: String) -> Block {
        let text = match (self.text, self.fields.is_empty()) {
            (Some(text), _) => Some(text),
            (None, true) => Some(TextObject::plain(" ")),
            (None, false) => None,
        };
        Block::Section { block_id, text, fields: self.fields, accessory: self.accessory }
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

const FALLBACK_TEXT_CHARS: usize = 150;

/// Serializes one delivery batch into a postable message. Link cards become
/// sections with a url button, since actions blocks carry no text.
pub fn message_from_batch(batch: &DeliveryBatch, batch_index: usize) -> MessageTemplate {
    let fallback = batch
        .blocks
        .iter()
        .map(|block| block.text.trim())
        .find(|text| !text.is_empty())
        .map(|text| text.chars().take(FALLBACK_TEXT_CHARS).collect::<String>())
        .unwrap_or_else(|| "Assistant reply".to_owned());

    batch
        .blocks
        .iter()
        .enumerate()
        .fold(MessageBuilder::new(fallback), |builder, (index, block)| {
            let block_id = format!("reply.{batch_index}.{index}");
            append_rendered(builder, block_id, block)
        })
        .build()
}

fn append_rendered(builder: MessageBuilder, block_id: String, block: &RenderedBlock) -> MessageBuilder {
    match block.kind {
        BlockKind::Divider => builder.divider(block_id),
        BlockKind::Context => builder.context(block_id, |context| {
            context.mrkdwn(block.text.as_str());
        }),
        BlockKind::Section => builder.section(block_id, |section| {
            if !block.text.is_empty() {
                section.mrkdwn(block.text.as_str());
            }
            for field in &block.fields {
                section.field(field.as_str());
            }
        }),
        BlockKind::Actions => builder.section(block_id.clone(), |section| {
            section.mrkdwn(block.text.as_str());
            if let Some(link) = &block.link {
                section.accessory(
                    ButtonElement::new(format!("{block_id}.open"), link.label.as_str())
                        .url(link.url.as_str()),
                );
            }
        }),
    }
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("assistant.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {summary}"));
        })
        .context("assistant.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

pub fn help_message() -> MessageTemplate {
    MessageBuilder::new("Assistant help")
        .section("assistant.help.summary.v1", |section| {
            section.mrkdwn(
                "*Ask me in a thread*\n• Notion: `search for roadmap`, `create a page called Launch`\n• Amazon research: `keywords for yoga mat`, `sales for B0ABC123`\n• Workflows: `list my n8n workflows`, `run workflow nightly-sync`",
            );
        })
        .context("assistant.help.commands.v1", |context| {
            context.mrkdwn("`/assistant help` · `/assistant status`");
        })
        .build()
}
