use machine_events::ConnectionState;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;

/// Status glyph shown next to a machine's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge {
    pub glyph: &'static str,
    pub color: Color,
}

pub fn badge(state: ConnectionState) -> Badge {
    match state {
        ConnectionState::Connecting => Badge {
            glyph: "◌",
            color: Color::Yellow,
        },
        ConnectionState::Open => Badge {
            glyph: "✓",
            color: Color::Green,
        },
        ConnectionState::Closing => Badge {
            glyph: "⊘",
            color: Color::Yellow,
        },
        ConnectionState::Closed => Badge {
            glyph: "⊘",
            color: Color::Red,
        },
        ConnectionState::Failed => Badge {
            glyph: "✗ disconnected",
            color: Color::Red,
        },
        ConnectionState::Uninstantiated => Badge {
            glyph: "Uninstantiated",
            color: Color::DarkGray,
        },
    }
}

impl Badge {
    pub fn span<'a>(self) -> Span<'a> {
        let style = Style::default().fg(self.color);
        let style = if self.color == Color::Red {
            style.add_modifier(Modifier::BOLD)
        } else {
            style
        };
        Span::styled(self.glyph, style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_green_check() {
        assert_eq!(
            badge(ConnectionState::Open),
            Badge {
                glyph: "✓",
                color: Color::Green
            }
        );
    }

    #[test]
    fn failed_is_distinct_from_closed() {
        let closed = badge(ConnectionState::Closed);
        let failed = badge(ConnectionState::Failed);
        assert_eq!(closed.color, Color::Red);
        assert_ne!(closed.glyph, failed.glyph);
        assert!(failed.glyph.contains("disconnected"));
    }

    #[test]
    fn transient_states_are_yellow() {
        assert_eq!(badge(ConnectionState::Connecting).color, Color::Yellow);
        assert_eq!(badge(ConnectionState::Closing).color, Color::Yellow);
    }
}
