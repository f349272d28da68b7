// Outbound channel clients

pub mod telegram;
pub mod whatsapp;

pub use telegram::TelegramClient;
pub use whatsapp::WhatsAppClient;

/// Provider message size cap; longer replies are chunked
pub(crate) const MAX_MESSAGE_LEN: usize = 4096;

/// Split a reply into provider-sized chunks on char boundaries
pub(crate) fn chunk_message(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(MAX_MESSAGE_LEN)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(chunk_message("merhaba"), vec!["merhaba"]);
    }

    #[test]
    fn long_message_splits_on_char_boundaries() {
        let text = "ş".repeat(MAX_MESSAGE_LEN + 10);
        let chunks = chunk_message(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(chunks[1].chars().count(), 10);
    }
}
