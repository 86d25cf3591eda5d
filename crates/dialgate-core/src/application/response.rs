//! Gateway-facing response framing

use serde::{Deserialize, Serialize};

/// Continue-or-end decision plus the rendered message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply {
    /// Keep the dialog open and show the text
    Continue(String),

    /// Close the dialog with the text
    End(String),
}

impl GatewayReply {
    /// The message body
    pub fn text(&self) -> &str {
        match self {
            GatewayReply::Continue(text) | GatewayReply::End(text) => text,
        }
    }

    /// Whether the reply closes the dialog
    pub fn is_end(&self) -> bool {
        matches!(self, GatewayReply::End(_))
    }
}

/// Protocol tokens framing a gateway response
///
/// Marker tokens differ per gateway; the AT-style `CON`/`END` pair is the
/// default. The tokens are configuration, not code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerVocabulary {
    /// Continuation marker
    pub cont: String,

    /// Termination marker
    pub end: String,
}

impl Default for MarkerVocabulary {
    fn default() -> Self {
        Self {
            cont: "CON".to_string(),
            end: "END".to_string(),
        }
    }
}

impl MarkerVocabulary {
    /// Create a vocabulary with explicit tokens
    pub fn new(cont: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            cont: cont.into(),
            end: end.into(),
        }
    }

    /// Frame a reply as `<marker> <text>`
    pub fn frame(&self, reply: &GatewayReply) -> String {
        match reply {
            GatewayReply::Continue(text) => format!("{} {}", self.cont, text),
            GatewayReply::End(text) => format!("{} {}", self.end, text),
        }
    }
}
