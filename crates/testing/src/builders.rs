//! Message builders for tests.

use fake::faker::lorem::en::Sentence;
use fake::Fake;
use wirebus_core::Message;

/// A message of the given dotted type with no payload.
pub fn message_of_type(message_type: &str) -> Message {
    Message::new(message_type)
}

/// A `chat.message` with the given text.
pub fn chat_message(text: impl Into<String>) -> Message {
    Message::new("chat.message").with("text", text.into())
}

/// A `chat.message` with generated text.
pub fn random_chat_message() -> Message {
    let text: String = Sentence(3..8).fake();
    chat_message(text)
}
