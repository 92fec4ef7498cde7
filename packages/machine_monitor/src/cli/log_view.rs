//! Scroll state for the log panel.

/// Which slice of a machine's log is on screen.
///
/// While following, every growth of the log moves the view to the newest
/// line. Scrolling back stops following until the user scrolls to the
/// bottom again or presses End.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogViewport {
    offset: usize,
    follow: bool,
    last_len: usize,
    height: usize,
}

impl Default for LogViewport {
    fn default() -> Self {
        Self::new()
    }
}

impl LogViewport {
    pub fn new() -> Self {
        Self {
            offset: 0,
            follow: true,
            last_len: 0,
            height: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_following(&self) -> bool {
        self.follow
    }

    fn max_offset(&self) -> usize {
        self.last_len.saturating_sub(self.height)
    }

    /// Reconcile with the current log length and visible height. Returns
    /// true when the view jumped to the newest line.
    pub fn sync(&mut self, len: usize, height: usize) -> bool {
        let grew = len > self.last_len;
        let resized = height != self.height;
        self.last_len = len;
        self.height = height;

        if self.follow && (grew || resized || self.offset != self.max_offset()) {
            self.offset = self.max_offset();
            return grew;
        }
        self.offset = self.offset.min(self.max_offset());
        false
    }

    pub fn scroll_up(&mut self, lines: usize) {
        if lines == 0 {
            return;
        }
        self.offset = self.offset.saturating_sub(lines);
        self.follow = self.offset >= self.max_offset();
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.offset = (self.offset + lines).min(self.max_offset());
        if self.offset == self.max_offset() {
            self.follow = true;
        }
    }

    pub fn follow_newest(&mut self) {
        self.follow = true;
        self.offset = self.max_offset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_the_bottom() {
        let mut view = LogViewport::new();
        view.sync(50, 10);
        assert_eq!(view.offset(), 40);
        assert!(view.is_following());
    }

    #[test]
    fn short_logs_start_at_zero() {
        let mut view = LogViewport::new();
        view.sync(3, 10);
        assert_eq!(view.offset(), 0);
    }

    #[test]
    fn growth_scrolls_to_newest_while_following() {
        let mut view = LogViewport::new();
        view.sync(20, 10);
        assert!(view.sync(21, 10));
        assert_eq!(view.offset(), 11);
        // No growth, no jump
        assert!(!view.sync(21, 10));
    }

    #[test]
    fn scrolling_back_holds_position_on_growth() {
        let mut view = LogViewport::new();
        view.sync(30, 10);
        view.scroll_up(5);
        assert!(!view.is_following());
        assert_eq!(view.offset(), 15);

        assert!(!view.sync(40, 10));
        assert_eq!(view.offset(), 15);
    }

    #[test]
    fn scrolling_to_the_bottom_resumes_following() {
        let mut view = LogViewport::new();
        view.sync(30, 10);
        view.scroll_up(3);
        view.scroll_down(100);
        assert!(view.is_following());
        assert!(view.sync(31, 10));
        assert_eq!(view.offset(), 21);
    }

    #[test]
    fn end_jumps_to_newest() {
        let mut view = LogViewport::new();
        view.sync(30, 10);
        view.scroll_up(25);
        assert_eq!(view.offset(), 0);
        view.follow_newest();
        assert_eq!(view.offset(), 20);
        assert!(view.is_following());
    }

    #[test]
    fn offset_is_clamped_when_log_shrinks() {
        // Retention can drop old lines
        let mut view = LogViewport::new();
        view.sync(30, 10);
        view.scroll_up(2);
        view.sync(12, 10);
        assert_eq!(view.offset(), 2);
    }
}
