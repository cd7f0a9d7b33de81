use tokio::task::JoinHandle;

use crate::bedrock::{fail_soft, BedrockClient, CompletionError};
use crate::conversation::{Conversation, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Conversation state
    pub conversation: Conversation,

    // Input state
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Completion state
    pub loading: bool,
    pub pending: Option<JoinHandle<Result<String, CompletionError>>>,

    // Transcript viewport state
    pub scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    pub client: BedrockClient,
}

impl App {
    pub fn new(client: BedrockClient) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            conversation: Conversation::new(),

            input: String::new(),
            cursor: 0,

            loading: false,
            pending: None,

            scroll: 0,
            chat_height: 0,
            chat_width: 0,

            animation_frame: 0,

            client,
        }
    }

    /// Submit the current input as a user turn and start a completion call.
    ///
    /// Blank input is silently ignored, and so is a submit while a call is
    /// already in flight (exactly one at a time).
    pub fn submit(&mut self) {
        if self.input.trim().is_empty() || self.pending.is_some() {
            return;
        }

        let content = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.conversation.append(Role::User, content);
        self.loading = true;

        // Scroll so the waiting indicator is visible
        self.scroll_to_bottom();

        let client = self.client.clone();
        let turns = self.conversation.turns().to_vec();
        self.pending = Some(tokio::spawn(async move { client.converse(&turns).await }));
    }

    /// Reconcile a finished completion call back into the conversation.
    ///
    /// The result goes through `fail_soft` here, so a failed call is
    /// appended exactly like a successful one.
    pub async fn poll_completion(&mut self) {
        let finished = self.pending.as_ref().map_or(false, |task| task.is_finished());
        if !finished {
            return;
        }

        if let Some(task) = self.pending.take() {
            let result = match task.await {
                Ok(inner) => inner,
                Err(err) => Err(CompletionError::Task(err)),
            };
            self.conversation.append(Role::Assistant, fail_soft(result));
            self.loading = false;
            self.scroll_to_bottom();
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Transcript scrolling
    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_add(1);
    }

    pub fn scroll_up(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }

    pub fn scroll_half_page_down(&mut self) {
        self.scroll = self.scroll.saturating_add(self.chat_height / 2);
    }

    pub fn scroll_half_page_up(&mut self) {
        self.scroll = self.scroll.saturating_sub(self.chat_height / 2);
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll = 0;
    }

    /// Scroll the transcript so the latest turn (or the waiting indicator)
    /// is visible.
    pub fn scroll_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for turn in self.conversation.turns() {
            total_lines += 1; // Role label line ("You:" or "AI:")
            for line in turn.content.lines() {
                // Character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1; // Empty line still takes one line
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // Blank line after turn
        }

        if self.loading {
            total_lines += 2; // "AI:" + "Thinking..."
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.scroll = total_lines.saturating_sub(visible_height);
        }
    }
}
