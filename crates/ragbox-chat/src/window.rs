//! Conversation windowing and reply collection.

use ragbox_core::{ChatMessage, LlmChat, Result, Role};

/// Keep the first `system` message and the last `keep_last` non-system
/// messages, preserving order.
pub fn window_messages(messages: &[ChatMessage], keep_last: usize) -> Vec<ChatMessage> {
    let first_system = messages.iter().find(|m| m.role == Role::System).cloned();

    let non_system: Vec<ChatMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    let tail_start = non_system.len().saturating_sub(keep_last);

    first_system
        .into_iter()
        .chain(non_system.into_iter().skip(tail_start))
        .collect()
}

/// Drain the model's token stream into one reply string.
///
/// The model-specific end-of-turn marker is trimmed from the tail.
/// Dropping the returned future mid-stream cancels generation, since the
/// token receiver goes with it.
pub async fn collect_reply(chat: &dyn LlmChat, prompt: &str) -> Result<String> {
    let mut stream = chat.send(prompt).await?;
    let mut reply = String::new();
    while let Some(token) = stream.recv().await {
        reply.push_str(&token);
    }

    let eot = chat.eot_string();
    if !eot.is_empty() {
        while reply.ends_with(&eot) {
            reply.truncate(reply.len() - eot.len());
        }
    }
    Ok(reply.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragbox_core::TokenStream;

    struct ScriptedChat {
        tokens: Vec<&'static str>,
    }

    #[async_trait]
    impl LlmChat for ScriptedChat {
        fn template(&self, messages: &[ChatMessage]) -> Result<String> {
            let mut out = String::new();
            for m in messages {
                out.push_str(m.role.as_str());
                out.push_str(": ");
                out.push_str(&m.content);
                out.push('\n');
            }
            out.push_str("assistant: ");
            Ok(out)
        }

        async fn send(&self, _prompt: &str) -> Result<TokenStream> {
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            let tokens: Vec<String> = self.tokens.iter().map(|t| t.to_string()).collect();
            tokio::spawn(async move {
                for token in tokens {
                    if tx.send(token).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        fn eot_string(&self) -> String {
            "<|im_end|>".to_string()
        }
    }

    #[test]
    fn test_window_keeps_first_system_and_tail() {
        let mut messages = vec![ChatMessage::system("You are helpful.")];
        for i in 0..20 {
            messages.push(ChatMessage::user(format!("q{i}")));
            messages.push(ChatMessage::assistant(format!("a{i}")));
        }

        let windowed = window_messages(&messages, 10);
        assert_eq!(windowed.len(), 11);
        assert_eq!(windowed[0].role, Role::System);
        assert_eq!(windowed[1].content, "a14");
        assert_eq!(windowed.last().unwrap().content, "a19");
    }

    #[test]
    fn test_window_short_history_unchanged() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let windowed = window_messages(&messages, 10);
        assert_eq!(windowed, messages);
    }

    #[test]
    fn test_window_no_system_message() {
        let messages = vec![ChatMessage::user("a"), ChatMessage::user("b")];
        let windowed = window_messages(&messages, 1);
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].content, "b");
    }

    #[test]
    fn test_window_keeps_only_first_system() {
        let messages = vec![
            ChatMessage::system("first"),
            ChatMessage::user("q"),
            ChatMessage::system("second"),
        ];
        let windowed = window_messages(&messages, 10);
        assert_eq!(
            windowed.iter().filter(|m| m.role == Role::System).count(),
            1
        );
        assert_eq!(windowed[0].content, "first");
    }

    #[tokio::test]
    async fn test_collect_reply_trims_eot() {
        let chat = ScriptedChat {
            tokens: vec!["Hello", " world", "<|im_end|>"],
        };
        let reply = collect_reply(&chat, "prompt").await.unwrap();
        assert_eq!(reply, "Hello world");
    }

    #[tokio::test]
    async fn test_collect_reply_without_eot() {
        let chat = ScriptedChat {
            tokens: vec!["Just", " text"],
        };
        let reply = collect_reply(&chat, "prompt").await.unwrap();
        assert_eq!(reply, "Just text");
    }

    #[tokio::test]
    async fn test_collect_reply_empty_stream() {
        let chat = ScriptedChat { tokens: vec![] };
        let reply = collect_reply(&chat, "prompt").await.unwrap();
        assert_eq!(reply, "");
    }
}
