//! Image attachment resolution.
//!
//! Messages may reference stored attachments instead of carrying image
//! bytes inline. Adapters call [`resolve_images`] before building a
//! request so that only [`ImageRef::Inline`] parts reach the wire.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::chat::{ImageRef, Message, Part};
use crate::error::LlmError;

/// Raw attachment content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// MIME type, e.g. `"image/jpeg"`.
    pub media_type: String,
    /// Raw bytes.
    pub data: Vec<u8>,
}

/// Fetches attachment content by object id.
pub trait AttachmentResolver: Send + Sync {
    /// Loads the attachment with the given id.
    fn resolve<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Attachment, LlmError>> + Send + 'a>>;
}

/// An in-memory attachment store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAttachments {
    items: HashMap<String, Attachment>,
}

impl InMemoryAttachments {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an attachment under `id`.
    pub fn insert(&mut self, id: impl Into<String>, attachment: Attachment) {
        self.items.insert(id.into(), attachment);
    }
}

impl AttachmentResolver for InMemoryAttachments {
    fn resolve<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Attachment, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            self.items
                .get(id)
                .cloned()
                .ok_or_else(|| LlmError::InvalidRequest(format!("attachment {id} not found")))
        })
    }
}

/// Replaces every attachment reference in `history` with inline base64 data.
///
/// Borrows the history unchanged when it holds no references. Fails with
/// [`LlmError::InvalidRequest`] when a reference is present but no resolver
/// is configured.
pub async fn resolve_images<'h>(
    history: &'h [Message],
    resolver: Option<&dyn AttachmentResolver>,
) -> Result<Cow<'h, [Message]>, LlmError> {
    let has_refs = history
        .iter()
        .flat_map(Message::images)
        .any(|img| matches!(img, ImageRef::Attachment { .. }));
    if !has_refs {
        return Ok(Cow::Borrowed(history));
    }
    let Some(resolver) = resolver else {
        return Err(LlmError::InvalidRequest(
            "message references an attachment but no attachment resolver is configured".into(),
        ));
    };

    let mut resolved = history.to_vec();
    for msg in &mut resolved {
        for part in &mut msg.parts {
            if let Part::Image(ImageRef::Attachment { id }) = part {
                let id = id.clone();
                let attachment = resolver.resolve(&id).await?;
                *part = Part::Image(ImageRef::Inline {
                    media_type: attachment.media_type,
                    data: STANDARD.encode(&attachment.data),
                });
            }
        }
    }
    Ok(Cow::Owned(resolved))
}
