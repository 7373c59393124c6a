use std::collections::VecDeque;

/// Pre-supplied answers for a programmatic run, consumed first-in first-out
#[derive(Debug, Clone, Default)]
pub struct AutoInputQueue {
    values: VecDeque<String>,
}

impl AutoInputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop whatever is left and load the answers for a new session
    pub fn replace<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
    }

    pub fn pop(&mut self) -> Option<String> {
        self.values.pop_front()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = AutoInputQueue::new();
        queue.replace(["A", "B"]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_deref(), Some("A"));
        assert_eq!(queue.pop().as_deref(), Some("B"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_replace_discards_leftovers() {
        let mut queue = AutoInputQueue::new();
        queue.replace(["old", "stale"]);
        queue.pop();
        queue.replace(Vec::<String>::new());
        assert!(queue.is_empty());
    }
}
