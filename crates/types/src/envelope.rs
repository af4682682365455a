// crates/types/src/envelope.rs
use serde::Deserialize;

/// Response body as the backend sends it: either wrapped in a
/// `{ data, message?, status? }` envelope or the bare payload.
///
/// Variant order matters for the untagged decode: a body is only treated as
/// wrapped when it actually has a `data` field that decodes as `T`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped {
        data: T,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        status: Option<u16>,
    },
    Bare(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data, .. } | Envelope::Bare(data) => data,
        }
    }
}
